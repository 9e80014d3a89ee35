use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::config::RemoteConfig;
use crate::model::{Case, Device, Threat};
use crate::store::EntityKind;

use super::api_types::{snapshot_records, CampaignRisk, ComplianceVerdict, PlaybookSuggestion};
use super::service::{RemoteError, RemoteService};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP/JSON client for the remote entity and analysis service
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base: Url,
}

impl HttpRemote {
  pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
    let mut base = Url::parse(base_url).map_err(|e| eyre!("Invalid remote url {}: {}", base_url, e))?;
    // Url::join drops the last path segment unless it ends with a slash
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    let mut headers = HeaderMap::new();
    if let Some(token) = token {
      let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid API token: {}", e))?;
      value.set_sensitive(true);
      headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .connect_timeout(CONNECT_TIMEOUT)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base })
  }

  /// Build from configuration, if a remote url is set
  pub fn from_config(config: &RemoteConfig, token: Option<&str>) -> Result<Option<Self>> {
    config.url.as_deref().map(|url| Self::new(url, token)).transpose()
  }

  fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
    self.base.join(path).map_err(|e| RemoteError::Endpoint {
      path: path.to_string(),
      reason: e.to_string(),
    })
  }

  async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, RemoteError> {
    let url = self.endpoint(path)?;
    let request = self.client.get(url.clone());
    self.send(url, request).await
  }

  async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, RemoteError>
  where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
  {
    let url = self.endpoint(path)?;
    let request = self.client.post(url.clone()).json(body);
    self.send(url, request).await
  }

  async fn send<R: DeserializeOwned>(&self, url: Url, request: reqwest::RequestBuilder) -> Result<R, RemoteError> {
    let endpoint = url.path().to_string();
    let response = request.send().await.map_err(|source| RemoteError::Transport {
      endpoint: endpoint.clone(),
      source,
    })?;

    let status = response.status();
    if !status.is_success() {
      return Err(RemoteError::Status {
        endpoint,
        status: status.as_u16(),
      });
    }

    let body = response.bytes().await.map_err(|source| RemoteError::Transport {
      endpoint: endpoint.clone(),
      source,
    })?;
    serde_json::from_slice(&body).map_err(|e| RemoteError::Decode {
      endpoint,
      reason: e.to_string(),
    })
  }
}

#[async_trait]
impl RemoteService for HttpRemote {
  async fn fetch_snapshot(&self, kind: EntityKind) -> Result<Vec<Value>, RemoteError> {
    let path = format!("api/v1/entities/{}", kind.as_str());
    let body: Value = self.get_json(&path).await?;
    snapshot_records(body).ok_or_else(|| RemoteError::Decode {
      endpoint: format!("/{}", path),
      reason: "expected an array of records".to_string(),
    })
  }

  async fn evaluate_compliance(&self, device: &Device) -> Result<ComplianceVerdict, RemoteError> {
    self.post_json("api/v1/analysis/compliance", device).await
  }

  async fn suggest_playbook(&self, case: &Case) -> Result<PlaybookSuggestion, RemoteError> {
    self.post_json("api/v1/analysis/playbook", case).await
  }

  async fn campaign_risk(&self, threats: &[Threat]) -> Result<CampaignRisk, RemoteError> {
    self.post_json("api/v1/analysis/campaign-risk", threats).await
  }
}
