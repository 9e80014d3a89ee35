//! Remote domain operations paired with their local fallbacks.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::AccessConfig;
use crate::model::{decode_batch, Case, Decoded, Device, Threat};
use crate::remote::{CampaignRisk, ComplianceVerdict, PlaybookSuggestion, RemoteService};
use crate::store::{Entity, EntityStore};

use super::client::{CallOptions, FallbackResult, ResilientClient};
use super::fallback;

/// Analysis client with transparent fallback support.
///
/// This wraps the remote service and provides the same operations, but every
/// call resolves to a value: the remote answer when it is reachable, the local
/// heuristic otherwise.
#[derive(Clone)]
pub struct AnalysisClient {
  remote: Arc<dyn RemoteService>,
  resilient: ResilientClient,
  access: AccessConfig,
}

impl AnalysisClient {
  pub fn new(remote: Arc<dyn RemoteService>, resilient: ResilientClient, access: AccessConfig) -> Self {
    Self {
      remote,
      resilient,
      access,
    }
  }

  /// Remote snapshot of one collection; falls back to the local contents.
  pub async fn snapshot<T: Entity>(&self, local: &EntityStore<T>, options: CallOptions) -> FallbackResult<Decoded<T>> {
    let kind = T::kind();
    let operation = format!("snapshot {}", kind);
    let remote = async {
      let records = self.remote.fetch_snapshot(kind).await?;
      Ok::<_, crate::remote::RemoteError>(decode_batch::<T>(records))
    };
    self
      .resilient
      .call(
        &operation,
        remote,
        || Decoded {
          entities: local.get_all(),
          rejected: 0,
        },
        options,
      )
      .await
  }

  pub async fn evaluate_compliance(
    &self,
    device: &Device,
    now: DateTime<Utc>,
    options: CallOptions,
  ) -> FallbackResult<ComplianceVerdict> {
    self
      .resilient
      .call(
        "compliance evaluation",
        self.remote.evaluate_compliance(device),
        || fallback::compliance(device, now, &self.access),
        options,
      )
      .await
  }

  pub async fn suggest_playbook(&self, case: &Case, options: CallOptions) -> FallbackResult<PlaybookSuggestion> {
    self
      .resilient
      .call(
        "playbook suggestion",
        self.remote.suggest_playbook(case),
        || fallback::playbook(case),
        options,
      )
      .await
  }

  pub async fn campaign_risk(&self, threats: &[Threat], options: CallOptions) -> FallbackResult<CampaignRisk> {
    self
      .resilient
      .call(
        "campaign risk",
        self.remote.campaign_risk(threats),
        || fallback::campaign_risk(threats),
        options,
      )
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Priority, Severity};
  use crate::remote::{HttpRemote, OfflineRemote};
  use crate::resilient::Provenance;
  use serde_json::json;
  use std::time::Duration;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn analysis(remote: Arc<dyn RemoteService>) -> AnalysisClient {
    AnalysisClient::new(
      remote,
      ResilientClient::new(Duration::from_millis(500)),
      AccessConfig::default(),
    )
  }

  #[tokio::test]
  async fn test_snapshot_falls_back_to_local_contents() {
    let store = EntityStore::with_entities([Threat {
      id: "t-1".to_string(),
      ..Threat::default()
    }]);
    let result = analysis(Arc::new(OfflineRemote))
      .snapshot(&store, CallOptions::silent())
      .await;
    assert_eq!(result.provenance, Provenance::Local);
    assert_eq!(result.value.entities, store.get_all());
  }

  #[tokio::test]
  async fn test_remote_and_local_results_share_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/v1/analysis/playbook"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "playbook": "vendor-escalation",
        "steps": ["call vendor"]
      })))
      .mount(&server)
      .await;

    let case = Case {
      title: "Credential stuffing".to_string(),
      priority: Priority::High,
      ..Case::default()
    };
    let online = analysis(Arc::new(HttpRemote::new(&server.uri(), None).unwrap()));
    let offline = analysis(Arc::new(OfflineRemote));

    let remote = online.suggest_playbook(&case, CallOptions::silent()).await;
    let local = offline.suggest_playbook(&case, CallOptions::silent()).await;

    assert_eq!(remote.provenance, Provenance::Remote);
    assert_eq!(remote.value.playbook, "vendor-escalation");
    assert_eq!(local.provenance, Provenance::Local);
    assert_eq!(local.value.playbook, "account-compromise");
    assert!(!local.value.steps.is_empty());
  }

  #[tokio::test]
  async fn test_server_error_degrades_campaign_risk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/v1/analysis/campaign-risk"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    let threats = [Threat {
      severity: Severity::Critical,
      confidence: 100,
      ..Threat::default()
    }];
    let client = analysis(Arc::new(HttpRemote::new(&server.uri(), None).unwrap()));
    let risk = client.campaign_risk(&threats, CallOptions::silent()).await;

    assert!(risk.is_degraded());
    assert_eq!(risk.value.score, 100);
    assert_eq!(risk.value.level, Severity::Critical);
  }
}
