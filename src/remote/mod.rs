//! Client side of the authoritative entity and analysis service.

pub mod api_types;
mod http;
mod service;

use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;

pub use api_types::{CampaignRisk, ComplianceVerdict, PlaybookSuggestion};
pub use http::HttpRemote;
pub use service::{OfflineRemote, RemoteError, RemoteService};

/// Pick the remote implementation for `config`: HTTP when a url is set,
/// offline otherwise.
pub fn connect(config: &Config) -> Result<Arc<dyn RemoteService>> {
  let token = Config::api_token();
  match HttpRemote::from_config(&config.remote, token.as_deref())? {
    Some(remote) => {
      info!(url = config.remote.url.as_deref().unwrap_or_default(), "using remote service");
      Ok(Arc::new(remote))
    }
    None => {
      info!("no remote url configured, running offline");
      Ok(Arc::new(OfflineRemote))
    }
  }
}
