//! Store and deduplication trait implementations for model types.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::filter::Deduplicate;
use crate::store::{Entity, EntityKind};

use super::types::{Case, Device, Feed, Threat, ThreatStatus, User, UserStatus};

// ============================================================================
// Entity implementations
// ============================================================================

impl Entity for Threat {
  fn id(&self) -> &str {
    &self.id
  }

  fn observed_at(&self) -> Option<DateTime<Utc>> {
    Some(self.last_seen)
  }

  fn kind() -> EntityKind {
    EntityKind::Threat
  }

  fn merge_remote(&self, remote: Self) -> Self {
    // Local decay stands until the remote has seen the indicator again
    if remote.last_seen > self.last_seen || self.last_decayed.is_none() {
      return remote;
    }
    Self {
      confidence: self.confidence,
      last_decayed: self.last_decayed,
      status: self.status,
      ..remote
    }
  }
}

impl Entity for Case {
  fn id(&self) -> &str {
    &self.id
  }

  fn observed_at(&self) -> Option<DateTime<Utc>> {
    // Cases don't carry a modification time
    None
  }

  fn kind() -> EntityKind {
    EntityKind::Case
  }

  fn merge_remote(&self, remote: Self) -> Self {
    // A breach recorded locally is never un-flipped by a lagging remote copy
    Self {
      sla_breached: self.sla_breached || remote.sla_breached,
      ..remote
    }
  }
}

impl Entity for Feed {
  fn id(&self) -> &str {
    &self.id
  }

  fn observed_at(&self) -> Option<DateTime<Utc>> {
    None
  }

  fn kind() -> EntityKind {
    EntityKind::Feed
  }

  fn merge_remote(&self, remote: Self) -> Self {
    // Circuit and polling bookkeeping are local to this client
    Self {
      circuit: self.circuit.clone(),
      last_polled: self.last_polled,
      records_ingested: self.records_ingested,
      latency_ms: self.latency_ms,
      ..remote
    }
  }
}

impl Entity for User {
  fn id(&self) -> &str {
    &self.id
  }

  fn observed_at(&self) -> Option<DateTime<Utc>> {
    Some(self.last_activity)
  }

  fn kind() -> EntityKind {
    EntityKind::User
  }

  fn merge_remote(&self, remote: Self) -> Self {
    // Dormancy is lifted only by activity the local copy has not seen
    let stale_active = remote.status == UserStatus::Active && remote.last_activity <= self.last_activity;
    if self.status == UserStatus::Dormant && stale_active {
      return Self {
        status: UserStatus::Dormant,
        ..remote
      };
    }
    remote
  }
}

impl Entity for Device {
  fn id(&self) -> &str {
    &self.id
  }

  fn observed_at(&self) -> Option<DateTime<Utc>> {
    None
  }

  fn kind() -> EntityKind {
    EntityKind::Device
  }

  fn merge_remote(&self, remote: Self) -> Self {
    // Telemetry fields belong to the telemetry loop
    let merged = Self {
      cpu_load: self.cpu_load,
      latency_ms: self.latency_ms,
      ..remote
    };
    // A local revocation holds until the remote reports a newer patch
    if !self.compliant && merged.compliant && merged.last_patched <= self.last_patched {
      return Self {
        compliant: false,
        risk_score: self.risk_score,
        findings: self.findings.clone(),
        ..merged
      };
    }
    merged
  }
}

// ============================================================================
// Deduplication
// ============================================================================

impl Threat {
  /// Stable id derived from the natural key, used for ingested indicators.
  pub fn derive_id(natural_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(natural_key.as_bytes());
    let digest = hasher.finalize();
    format!("ioc-{}", hex::encode(&digest[..8]))
  }
}

impl Deduplicate for Threat {
  fn natural_key(&self) -> String {
    format!(
      "{}|{}",
      self.indicator.trim().to_lowercase(),
      self.threat_type.as_str()
    )
  }

  fn merge_from(&self, candidate: &Self, increment: u8) -> Self {
    let mut merged = self.clone();
    merged.confidence = self.confidence.saturating_add(increment).min(100);
    merged.last_seen = self.last_seen.max(candidate.last_seen);
    merged.severity = self.severity.max(candidate.severity);
    if merged.status == ThreatStatus::Closed {
      merged.status = ThreatStatus::Active;
    }
    for tag in &candidate.tags {
      if !merged.tags.contains(tag) {
        merged.tags.push(tag.clone());
      }
    }
    merged
  }
}
