use chrono::Duration as ChronoDuration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::Priority;
use crate::store::EntityKind;

/// Engine configuration. Every field has a default, so an empty file
/// (or no file at all) yields a working offline engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub remote: RemoteConfig,
  pub sync: SyncConfig,
  /// Bloom filter sizing per entity kind
  pub filters: BTreeMap<EntityKind, FilterSizing>,
  pub dedup: DedupConfig,
  pub sla: SlaConfig,
  pub decay: DecayConfig,
  pub circuit: CircuitConfig,
  pub access: AccessConfig,
  pub scheduler: SchedulerConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  /// Base URL of the entity/analysis service. None runs fully offline.
  pub url: Option<String>,
  /// Upper bound on every remote call
  pub timeout_ms: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      url: None,
      timeout_ms: 3_000,
    }
  }
}

impl RemoteConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Reconciliation loop period
  pub interval_secs: u64,
  /// Telemetry loop period
  pub telemetry_interval_secs: u64,
  /// Max records committed per feed per tick
  pub ingest_batch_size: usize,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: 30,
      telemetry_interval_secs: 3,
      ingest_batch_size: 5,
    }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }

  pub fn telemetry_interval(&self) -> Duration {
    Duration::from_secs(self.telemetry_interval_secs)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilterSizing {
  pub expected_items: usize,
  pub false_positive_rate: f64,
}

impl Default for FilterSizing {
  fn default() -> Self {
    Self {
      expected_items: 10_000,
      false_positive_rate: 0.01,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
  /// Confidence added when a duplicate is re-observed (result capped at 100)
  pub confidence_increment: u8,
}

impl Default for DedupConfig {
  fn default() -> Self {
    Self {
      confidence_increment: 5,
    }
  }
}

/// Hours a case may stay open before breaching, by priority.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
  pub critical_hours: u32,
  pub high_hours: u32,
  pub medium_hours: u32,
  pub low_hours: u32,
}

impl Default for SlaConfig {
  fn default() -> Self {
    Self {
      critical_hours: 4,
      high_hours: 24,
      medium_hours: 72,
      low_hours: 168,
    }
  }
}

impl SlaConfig {
  pub fn limit_for(&self, priority: Priority) -> ChronoDuration {
    let hours = match priority {
      Priority::Critical => self.critical_hours,
      Priority::High => self.high_hours,
      Priority::Medium => self.medium_hours,
      Priority::Low => self.low_hours,
    };
    ChronoDuration::hours(i64::from(hours))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
  /// Threats not seen for this long start decaying
  pub stale_after_hours: u32,
  /// Minimum time between two decay steps of the same threat
  pub interval_hours: u32,
  /// Percentage of current confidence removed per step
  pub percent: u8,
  /// Below this confidence the threat is closed
  pub floor: u8,
}

impl Default for DecayConfig {
  fn default() -> Self {
    Self {
      stale_after_hours: 72,
      interval_hours: 24,
      percent: 10,
      floor: 20,
    }
  }
}

impl DecayConfig {
  pub fn stale_after(&self) -> ChronoDuration {
    ChronoDuration::hours(i64::from(self.stale_after_hours))
  }

  pub fn interval(&self) -> ChronoDuration {
    ChronoDuration::hours(i64::from(self.interval_hours))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
  /// Consecutive failures that open a feed's circuit
  pub failure_threshold: u32,
  /// How long an open circuit waits before a trial poll
  pub cooldown_secs: u64,
}

impl Default for CircuitConfig {
  fn default() -> Self {
    Self {
      failure_threshold: 3,
      cooldown_secs: 300,
    }
  }
}

impl CircuitConfig {
  pub fn cooldown(&self) -> ChronoDuration {
    ChronoDuration::seconds(self.cooldown_secs.min(i64::MAX as u64) as i64)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
  /// Users inactive longer than this become dormant
  pub dormant_after_days: u32,
  /// Devices unpatched longer than this lose compliance
  pub patch_window_days: u32,
}

impl Default for AccessConfig {
  fn default() -> Self {
    Self {
      dormant_after_days: 90,
      patch_window_days: 30,
    }
  }
}

impl AccessConfig {
  pub fn dormant_after(&self) -> ChronoDuration {
    ChronoDuration::days(i64::from(self.dormant_after_days))
  }

  pub fn patch_window(&self) -> ChronoDuration {
    ChronoDuration::days(i64::from(self.patch_window_days))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Longest a background task may be deferred before it is forced to run
  pub max_wait_ms: u64,
  /// How often a deferred task re-checks for spare capacity
  pub poll_interval_ms: u64,
  /// Fixed delay used when no capacity probe is available
  pub fallback_delay_ms: u64,
  /// Interactive operations in flight at which the host counts as busy
  pub busy_threshold: usize,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      max_wait_ms: 5_000,
      poll_interval_ms: 100,
      fallback_delay_ms: 50,
      busy_threshold: 1,
    }
  }
}

impl SchedulerConfig {
  pub fn max_wait(&self) -> Duration {
    Duration::from_millis(self.max_wait_ms)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub fn fallback_delay(&self) -> Duration {
    Duration::from_millis(self.fallback_delay_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// tracing EnvFilter directive, overridden by RUST_LOG
  pub filter: String,
  /// Log to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      filter: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./threatsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/threatsync/config.yaml
  ///
  /// If no file is found the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("threatsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("threatsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse YAML. An empty document yields the defaults.
  pub fn parse(contents: &str) -> Result<Self> {
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Reject values the engine cannot run with.
  pub fn validate(&self) -> Result<()> {
    if self.sync.interval_secs == 0 || self.sync.telemetry_interval_secs == 0 {
      return Err(eyre!("sync intervals must be greater than zero"));
    }
    if self.remote.timeout_ms == 0 {
      return Err(eyre!("remote.timeout_ms must be greater than zero"));
    }
    if self.circuit.failure_threshold == 0 {
      return Err(eyre!("circuit.failure_threshold must be at least 1"));
    }
    if self.decay.percent > 100 || self.decay.floor > 100 {
      return Err(eyre!("decay.percent and decay.floor must be within 0..=100"));
    }
    for (kind, sizing) in &self.filters {
      if !(sizing.false_positive_rate > 0.0 && sizing.false_positive_rate < 1.0) {
        return Err(eyre!(
          "filters.{}.false_positive_rate must be in (0, 1), got {}",
          kind,
          sizing.false_positive_rate
        ));
      }
      if sizing.expected_items == 0 {
        return Err(eyre!("filters.{}.expected_items must be at least 1", kind));
      }
    }
    if self.scheduler.poll_interval_ms == 0 {
      return Err(eyre!("scheduler.poll_interval_ms must be greater than zero"));
    }
    Ok(())
  }

  /// Bloom filter sizing for `kind`, falling back to the defaults.
  pub fn filter_sizing(&self, kind: EntityKind) -> FilterSizing {
    self.filters.get(&kind).copied().unwrap_or_default()
  }

  /// Bearer token for the remote service.
  ///
  /// Checks THREATSYNC_API_TOKEN.
  pub fn api_token() -> Option<String> {
    std::env::var("THREATSYNC_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}
