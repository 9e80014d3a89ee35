//! Core traits and types for the entity store.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Entity collections held by the engine, one store per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
  #[serde(rename = "threats")]
  Threat,
  #[serde(rename = "cases")]
  Case,
  #[serde(rename = "feeds")]
  Feed,
  #[serde(rename = "users")]
  User,
  #[serde(rename = "devices")]
  Device,
}

impl EntityKind {
  pub const ALL: [EntityKind; 5] = [
    EntityKind::Threat,
    EntityKind::Case,
    EntityKind::Feed,
    EntityKind::User,
    EntityKind::Device,
  ];

  /// Collection name, also used as the remote path segment.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Threat => "threats",
      Self::Case => "cases",
      Self::Feed => "feeds",
      Self::User => "users",
      Self::Device => "devices",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Trait for records that can live in an [`EntityStore`](super::EntityStore).
///
/// Implementors provide a stable id and optionally an observation timestamp
/// used for last-write-wins reconciliation against remote snapshots.
pub trait Entity: Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Stable identifier, unique within the entity kind
  fn id(&self) -> &str;

  /// When the record was last observed or modified.
  /// Returns None if the entity doesn't track it, in which case the remote copy always wins.
  fn observed_at(&self) -> Option<DateTime<Utc>>;

  /// Collection this type belongs to
  fn kind() -> EntityKind;

  /// Combine a remote copy with the local one.
  ///
  /// Defaults to taking the remote copy wholesale. Types with locally owned
  /// fields (circuit state, telemetry) override this to keep them.
  fn merge_remote(&self, remote: Self) -> Self {
    remote
  }
}
