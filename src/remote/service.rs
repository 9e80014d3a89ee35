use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Case, Device, Threat};
use crate::store::EntityKind;

use super::api_types::{CampaignRisk, ComplianceVerdict, PlaybookSuggestion};

/// Why a remote operation failed. Every variant is recoverable by falling
/// back to a local computation.
#[derive(Debug, Error)]
pub enum RemoteError {
  #[error("no remote service configured")]
  Offline,
  #[error("request to {endpoint} failed: {source}")]
  Transport {
    endpoint: String,
    #[source]
    source: reqwest::Error,
  },
  #[error("{endpoint} returned HTTP {status}")]
  Status { endpoint: String, status: u16 },
  #[error("{endpoint} returned an undecodable body: {reason}")]
  Decode { endpoint: String, reason: String },
  #[error("invalid endpoint {path}: {reason}")]
  Endpoint { path: String, reason: String },
}

/// The authoritative entity and analysis service.
///
/// Operations are plain request/response calls. Implementations do not
/// retry or enforce timeouts; the resilient client owns both concerns.
#[async_trait]
pub trait RemoteService: Send + Sync {
  /// Raw records for one entity kind
  async fn fetch_snapshot(&self, kind: EntityKind) -> Result<Vec<Value>, RemoteError>;

  async fn evaluate_compliance(&self, device: &Device) -> Result<ComplianceVerdict, RemoteError>;

  async fn suggest_playbook(&self, case: &Case) -> Result<PlaybookSuggestion, RemoteError>;

  async fn campaign_risk(&self, threats: &[Threat]) -> Result<CampaignRisk, RemoteError>;
}

/// Stand-in used when no remote URL is configured. Every call fails
/// immediately, so callers resolve everything locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

#[async_trait]
impl RemoteService for OfflineRemote {
  async fn fetch_snapshot(&self, _kind: EntityKind) -> Result<Vec<Value>, RemoteError> {
    Err(RemoteError::Offline)
  }

  async fn evaluate_compliance(&self, _device: &Device) -> Result<ComplianceVerdict, RemoteError> {
    Err(RemoteError::Offline)
  }

  async fn suggest_playbook(&self, _case: &Case) -> Result<PlaybookSuggestion, RemoteError> {
    Err(RemoteError::Offline)
  }

  async fn campaign_risk(&self, _threats: &[Threat]) -> Result<CampaignRisk, RemoteError> {
    Err(RemoteError::Offline)
  }
}
