//! Remote-first calls with a local fallback.

use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::event::{Event, Notice, NotificationHub};

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
  /// Authoritative remote service
  Remote,
  /// Local heuristic, used because the remote call failed
  Local,
}

/// Result of a [`ResilientClient::call`], tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackResult<T> {
  pub value: T,
  pub provenance: Provenance,
  /// Why the remote call failed, for Local results
  #[serde(skip_serializing_if = "Option::is_none")]
  pub degraded_reason: Option<String>,
}

impl<T> FallbackResult<T> {
  pub fn remote(value: T) -> Self {
    Self {
      value,
      provenance: Provenance::Remote,
      degraded_reason: None,
    }
  }

  pub fn local(value: T, reason: impl Into<String>) -> Self {
    Self {
      value,
      provenance: Provenance::Local,
      degraded_reason: Some(reason.into()),
    }
  }

  pub fn is_degraded(&self) -> bool {
    self.provenance == Provenance::Local
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FallbackResult<U> {
    FallbackResult {
      value: f(self.value),
      provenance: self.provenance,
      degraded_reason: self.degraded_reason,
    }
  }
}

/// Per-call options for [`ResilientClient::call`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
  /// Background call: log failures but do not notify the user
  pub silent: bool,
  /// Override the client's default timeout
  pub timeout: Option<Duration>,
}

impl CallOptions {
  pub fn silent() -> Self {
    Self {
      silent: true,
      timeout: None,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

/// Wraps remote operations so callers always get a value.
///
/// The remote future is raced against a timeout. Any failure resolves to the
/// local fallback tagged [`Provenance::Local`]. There are no retries; the
/// next periodic tick simply tries again.
#[derive(Clone)]
pub struct ResilientClient {
  default_timeout: Duration,
  hub: Option<NotificationHub>,
}

impl ResilientClient {
  pub fn new(default_timeout: Duration) -> Self {
    Self {
      default_timeout,
      hub: None,
    }
  }

  /// Report non-silent failures as user notifications on `hub`.
  pub fn with_hub(mut self, hub: NotificationHub) -> Self {
    self.hub = Some(hub);
    self
  }

  pub fn default_timeout(&self) -> Duration {
    self.default_timeout
  }

  /// Run `remote`, falling back to `fallback` on any failure.
  ///
  /// `fallback` must be a pure approximation of the same operation, so the
  /// value has the same shape regardless of provenance.
  pub async fn call<T, E, Fut, L>(
    &self,
    operation: &str,
    remote: Fut,
    fallback: L,
    options: CallOptions,
  ) -> FallbackResult<T>
  where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    L: FnOnce() -> T,
  {
    let limit = options.timeout.unwrap_or(self.default_timeout);
    let reason = match tokio::time::timeout(limit, remote).await {
      Ok(Ok(value)) => return FallbackResult::remote(value),
      Ok(Err(e)) => e.to_string(),
      Err(_) => format!("timed out after {}ms", limit.as_millis()),
    };

    if options.silent {
      debug!(operation, reason = %reason, "remote call failed, using local fallback");
    } else {
      warn!(operation, reason = %reason, "remote call failed, using local fallback");
      if let Some(hub) = &self.hub {
        hub.publish(Event::UserNotification(Notice::warning(format!(
          "{} is using a local estimate: {}",
          operation, reason
        ))));
      }
    }

    FallbackResult::local(fallback(), reason)
  }
}
