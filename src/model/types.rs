//! Entity types held by the engine.
//!
//! All structs deserialize leniently (see [`super::lenient`]) so that remote
//! snapshots, seed files and feed records are normalized rather than rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lenient::{self, normalize_label, Lenient, DEFAULT_PERCENT};
use crate::rules::circuit::CircuitBreaker;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
  Ip,
  Domain,
  Url,
  Hash,
  Email,
  #[default]
  Unknown,
}

impl ThreatType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Ip => "ip",
      Self::Domain => "domain",
      Self::Url => "url",
      Self::Hash => "hash",
      Self::Email => "email",
      Self::Unknown => "unknown",
    }
  }
}

impl Lenient for ThreatType {
  fn parse_lenient(s: &str) -> Self {
    match normalize_label(s).as_str() {
      "ip" | "ipv4" | "ipv6" | "ip_address" => Self::Ip,
      "domain" | "hostname" | "fqdn" => Self::Domain,
      "url" | "uri" => Self::Url,
      "hash" | "md5" | "sha1" | "sha256" | "file_hash" => Self::Hash,
      "email" | "email_address" => Self::Email,
      _ => Self::Unknown,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  Low,
  #[default]
  Medium,
  High,
  Critical,
}

impl Severity {
  /// Relative weight used by risk heuristics.
  pub fn weight(&self) -> u32 {
    match self {
      Self::Low => 1,
      Self::Medium => 2,
      Self::High => 3,
      Self::Critical => 4,
    }
  }
}

impl Lenient for Severity {
  fn parse_lenient(s: &str) -> Self {
    match normalize_label(s).as_str() {
      "low" | "info" | "informational" => Self::Low,
      "high" => Self::High,
      "critical" | "crit" => Self::Critical,
      _ => Self::Medium,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatStatus {
  #[default]
  Active,
  Investigating,
  Closed,
}

impl Lenient for ThreatStatus {
  fn parse_lenient(s: &str) -> Self {
    match normalize_label(s).as_str() {
      "investigating" | "triage" => Self::Investigating,
      "closed" | "resolved" | "expired" => Self::Closed,
      _ => Self::Active,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
  Critical,
  High,
  #[default]
  Medium,
  Low,
}

impl Lenient for Priority {
  fn parse_lenient(s: &str) -> Self {
    match normalize_label(s).as_str() {
      "critical" | "p1" => Self::Critical,
      "high" | "p2" => Self::High,
      "low" | "p4" => Self::Low,
      _ => Self::Medium,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
  #[default]
  Open,
  InProgress,
  Resolved,
  Closed,
}

impl CaseStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Resolved | Self::Closed)
  }
}

impl Lenient for CaseStatus {
  fn parse_lenient(s: &str) -> Self {
    match normalize_label(s).as_str() {
      "in_progress" | "investigating" | "assigned" => Self::InProgress,
      "resolved" | "done" => Self::Resolved,
      "closed" => Self::Closed,
      _ => Self::Open,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
  #[default]
  Active,
  Paused,
  Error,
}

impl Lenient for FeedStatus {
  fn parse_lenient(s: &str) -> Self {
    match normalize_label(s).as_str() {
      "paused" | "disabled" | "inactive" => Self::Paused,
      "error" | "failed" => Self::Error,
      _ => Self::Active,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
  #[default]
  Active,
  Dormant,
  Disabled,
}

impl Lenient for UserStatus {
  fn parse_lenient(s: &str) -> Self {
    match normalize_label(s).as_str() {
      "dormant" | "inactive" => Self::Dormant,
      "disabled" | "locked" | "suspended" => Self::Disabled,
      _ => Self::Active,
    }
  }
}

// ============================================================================
// Entities
// ============================================================================

/// Threat indicator (IOC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Threat {
  #[serde(deserialize_with = "lenient::string")]
  pub id: String,
  #[serde(deserialize_with = "lenient::string")]
  pub indicator: String,
  #[serde(rename = "type", deserialize_with = "lenient::enum_value")]
  pub threat_type: ThreatType,
  #[serde(deserialize_with = "lenient::enum_value")]
  pub severity: Severity,
  #[serde(deserialize_with = "lenient::percent")]
  pub confidence: u8,
  #[serde(deserialize_with = "lenient::enum_value")]
  pub status: ThreatStatus,
  /// Feed id the indicator was first observed on
  #[serde(deserialize_with = "lenient::string")]
  pub source: String,
  #[serde(deserialize_with = "lenient::timestamp")]
  pub first_seen: DateTime<Utc>,
  #[serde(deserialize_with = "lenient::timestamp")]
  pub last_seen: DateTime<Utc>,
  /// Last time confidence decay was applied
  #[serde(deserialize_with = "lenient::optional_timestamp")]
  pub last_decayed: Option<DateTime<Utc>>,
  #[serde(deserialize_with = "lenient::string_list")]
  pub tags: Vec<String>,
}

impl Default for Threat {
  fn default() -> Self {
    let now = Utc::now();
    Self {
      id: String::new(),
      indicator: String::new(),
      threat_type: ThreatType::default(),
      severity: Severity::default(),
      confidence: DEFAULT_PERCENT,
      status: ThreatStatus::default(),
      source: String::new(),
      first_seen: now,
      last_seen: now,
      last_decayed: None,
      tags: Vec::new(),
    }
  }
}

/// Incident case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Case {
  #[serde(deserialize_with = "lenient::string")]
  pub id: String,
  #[serde(deserialize_with = "lenient::string")]
  pub title: String,
  #[serde(deserialize_with = "lenient::enum_value")]
  pub priority: Priority,
  #[serde(deserialize_with = "lenient::enum_value")]
  pub status: CaseStatus,
  #[serde(deserialize_with = "lenient::timestamp")]
  pub created_at: DateTime<Utc>,
  #[serde(deserialize_with = "lenient::optional_string")]
  pub assignee: Option<String>,
  /// Threat ids
  #[serde(deserialize_with = "lenient::string_list")]
  pub related_threats: Vec<String>,
  #[serde(deserialize_with = "lenient::flag")]
  pub sla_breached: bool,
  #[serde(deserialize_with = "lenient::optional_string")]
  pub playbook: Option<String>,
}

impl Default for Case {
  fn default() -> Self {
    Self {
      id: String::new(),
      title: String::new(),
      priority: Priority::default(),
      status: CaseStatus::default(),
      created_at: Utc::now(),
      assignee: None,
      related_threats: Vec::new(),
      sla_breached: false,
      playbook: None,
    }
  }
}

/// External intelligence feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Feed {
  #[serde(deserialize_with = "lenient::string")]
  pub id: String,
  #[serde(deserialize_with = "lenient::string")]
  pub name: String,
  #[serde(deserialize_with = "lenient::enum_value")]
  pub status: FeedStatus,
  #[serde(deserialize_with = "crate::rules::circuit::lenient")]
  pub circuit: CircuitBreaker,
  #[serde(deserialize_with = "lenient::optional_timestamp")]
  pub last_polled: Option<DateTime<Utc>>,
  #[serde(deserialize_with = "lenient::count_u64")]
  pub records_ingested: u64,
  #[serde(deserialize_with = "lenient::count_u32")]
  pub latency_ms: u32,
}

/// Platform user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
  #[serde(deserialize_with = "lenient::string")]
  pub id: String,
  #[serde(deserialize_with = "lenient::string")]
  pub name: String,
  #[serde(deserialize_with = "lenient::string")]
  pub email: String,
  #[serde(deserialize_with = "lenient::string")]
  pub role: String,
  #[serde(deserialize_with = "lenient::enum_value")]
  pub status: UserStatus,
  #[serde(deserialize_with = "lenient::timestamp")]
  pub last_activity: DateTime<Utc>,
  #[serde(deserialize_with = "lenient::flag")]
  pub mfa_enabled: bool,
}

impl Default for User {
  fn default() -> Self {
    Self {
      id: String::new(),
      name: String::new(),
      email: String::new(),
      role: String::new(),
      status: UserStatus::default(),
      last_activity: Utc::now(),
      mfa_enabled: false,
    }
  }
}

/// Managed endpoint / asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
  #[serde(deserialize_with = "lenient::string")]
  pub id: String,
  #[serde(deserialize_with = "lenient::string")]
  pub hostname: String,
  /// User id
  #[serde(deserialize_with = "lenient::optional_string")]
  pub owner: Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub os: String,
  #[serde(deserialize_with = "lenient::flag")]
  pub compliant: bool,
  #[serde(deserialize_with = "lenient::timestamp")]
  pub last_patched: DateTime<Utc>,
  #[serde(deserialize_with = "lenient::percent")]
  pub risk_score: u8,
  #[serde(deserialize_with = "lenient::string_list")]
  pub findings: Vec<String>,
  /// CPU load percentage, owned by the telemetry loop
  #[serde(deserialize_with = "lenient::load")]
  pub cpu_load: f32,
  /// Round-trip latency, owned by the telemetry loop
  #[serde(deserialize_with = "lenient::count_u32")]
  pub latency_ms: u32,
}

impl Default for Device {
  fn default() -> Self {
    Self {
      id: String::new(),
      hostname: String::new(),
      owner: None,
      os: String::new(),
      compliant: true,
      last_patched: Utc::now(),
      risk_score: 0,
      findings: Vec::new(),
      cpu_load: 0.0,
      latency_ms: 0,
    }
  }
}
