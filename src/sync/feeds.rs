//! Threat-intelligence feed sources.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::model::Feed;

#[derive(Debug, Error)]
pub enum FeedError {
  #[error("feed {feed} unreachable: {reason}")]
  Unreachable { feed: String, reason: String },
  #[error("poll of feed {feed} timed out after {after_ms}ms")]
  Timeout { feed: String, after_ms: u64 },
}

/// Produces raw indicator records for a feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
  /// Up to `batch_size` raw records from `feed`.
  async fn poll(&self, feed: &Feed, batch_size: usize) -> Result<Vec<Value>, FeedError>;
}

/// Poll `feed`, failing with [`FeedError::Timeout`] after `limit`.
pub async fn poll_with_timeout(
  source: &dyn FeedSource,
  feed: &Feed,
  batch_size: usize,
  limit: Duration,
) -> Result<Vec<Value>, FeedError> {
  tokio::time::timeout(limit, source.poll(feed, batch_size))
    .await
    .unwrap_or_else(|_| {
      Err(FeedError::Timeout {
        feed: feed.id.clone(),
        after_ms: limit.as_millis() as u64,
      })
    })
}

/// A source with nothing to report.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuietFeeds;

#[async_trait]
impl FeedSource for QuietFeeds {
  async fn poll(&self, _feed: &Feed, _batch_size: usize) -> Result<Vec<Value>, FeedError> {
    Ok(Vec::new())
  }
}

const DOMAINS: &[&str] = &[
  "login-verify.example",
  "cdn-update.example",
  "invoice-portal.example",
  "auth-reset.example",
  "mail-sync.example",
];
const TAGS: &[&str] = &["botnet", "phishing", "c2", "scanner", "malspam"];
const SEVERITIES: &[&str] = &["low", "medium", "high", "critical"];

/// Random indicator stream for demos and soak runs.
///
/// Indicators come from a small pool, so re-observations (and therefore
/// deduplication merges) are common. A small share of records carries no
/// indicator at all.
#[derive(Debug, Clone)]
pub struct SimulatedFeeds {
  failure_rate: f64,
}

impl Default for SimulatedFeeds {
  fn default() -> Self {
    Self { failure_rate: 0.1 }
  }
}

impl SimulatedFeeds {
  pub fn new(failure_rate: f64) -> Self {
    Self {
      failure_rate: failure_rate.clamp(0.0, 1.0),
    }
  }

  fn generate(&self, feed: &Feed, batch_size: usize) -> Result<Vec<Value>, FeedError> {
    let mut rng = rand::thread_rng();
    if rng.gen_bool(self.failure_rate) {
      return Err(FeedError::Unreachable {
        feed: feed.id.clone(),
        reason: "connection reset by peer".to_string(),
      });
    }

    let count = rng.gen_range(0..=batch_size);
    Ok((0..count).map(|_| random_record(&mut rng)).collect())
  }
}

fn random_record(rng: &mut impl Rng) -> Value {
  if rng.gen_ratio(1, 20) {
    return json!({ "type": "ip", "severity": "high" });
  }

  let (indicator, kind) = match rng.gen_range(0..3) {
    0 => (format!("198.51.100.{}", rng.gen_range(1..32)), "ip"),
    1 => (DOMAINS.choose(rng).copied().unwrap_or("unknown.example").to_string(), "domain"),
    _ => (format!("{:064x}", rng.gen_range(0u64..16)), "hash"),
  };
  json!({
    "indicator": indicator,
    "type": kind,
    "severity": SEVERITIES.choose(rng).copied().unwrap_or("medium"),
    "confidence": rng.gen_range(30..=90),
    "tags": TAGS.choose(rng).map(|t| vec![*t]).unwrap_or_default(),
  })
}

#[async_trait]
impl FeedSource for SimulatedFeeds {
  async fn poll(&self, feed: &Feed, batch_size: usize) -> Result<Vec<Value>, FeedError> {
    self.generate(feed, batch_size)
  }
}
