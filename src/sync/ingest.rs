//! Feed ingestion: circuit check, poll, normalize, deduplicate, commit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{CircuitConfig, Config};
use crate::filter::{DeduplicationFilter, Deduplicate};
use crate::model::{normalize_indicator, Feed, FeedStatus, Threat};
use crate::rules::circuit::Transition;
use crate::store::{EntityKind, EntityStore, Stores};

use super::feeds::{poll_with_timeout, FeedSource};

/// Per-tick ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
  pub polled: usize,
  /// Feeds skipped because their circuit is open
  pub skipped: usize,
  pub failed: usize,
  /// New indicators committed
  pub ingested: usize,
  /// Re-observed indicators merged into existing threats
  pub merged: usize,
  /// Records dropped at normalization
  pub rejected: usize,
}

/// Pulls indicator batches from active feeds into the threat store.
pub struct Ingestor {
  source: Arc<dyn FeedSource>,
  dedup: Mutex<DeduplicationFilter>,
  circuit: CircuitConfig,
  batch_size: usize,
  poll_timeout: Duration,
}

impl Ingestor {
  /// Build an ingestor whose duplicate filter is primed from `threats`.
  pub fn new(source: Arc<dyn FeedSource>, config: &Config, threats: &EntityStore<Threat>) -> Self {
    let mut dedup = DeduplicationFilter::new(
      &config.filter_sizing(EntityKind::Threat),
      config.dedup.confidence_increment,
    );
    let existing = threats.get_all();
    dedup.prime(existing.iter());
    debug!(primed = existing.len(), "threat filter primed");

    Self {
      source,
      dedup: Mutex::new(dedup),
      circuit: config.circuit.clone(),
      batch_size: config.sync.ingest_batch_size,
      poll_timeout: config.remote.timeout(),
    }
  }

  /// Poll every active feed whose circuit allows it.
  pub async fn run(&self, stores: &Stores, now: DateTime<Utc>) -> IngestReport {
    let mut report = IngestReport::default();

    for feed in stores.feeds.get_all() {
      if feed.status != FeedStatus::Active {
        continue;
      }
      if !feed.circuit.allows_request() {
        debug!(feed = %feed.id, "circuit open, skipping feed");
        report.skipped += 1;
        continue;
      }

      report.polled += 1;
      match poll_with_timeout(self.source.as_ref(), &feed, self.batch_size, self.poll_timeout).await {
        Ok(records) => {
          let before = report.ingested + report.merged;
          for record in records.into_iter().take(self.batch_size) {
            match normalize_indicator(record, &feed.id, now) {
              Some(threat) => self.commit(&stores.threats, threat, &mut report),
              None => report.rejected += 1,
            }
          }
          let committed = report.ingested + report.merged - before;
          self.record_poll(stores, &feed, now, Some(committed as u64));
        }
        Err(e) => {
          warn!(feed = %feed.id, error = %e, "feed poll failed");
          report.failed += 1;
          self.record_poll(stores, &feed, now, None);
        }
      }
    }

    let stats = self.dedup.lock().unwrap_or_else(PoisonError::into_inner).stats();
    debug!(
      checked = stats.checked,
      confirmation_queries = stats.confirmation_queries,
      duplicates = stats.duplicates,
      false_positives = stats.false_positives,
      "dedup stats"
    );
    report
  }

  fn commit(&self, threats: &EntityStore<Threat>, candidate: Threat, report: &mut IngestReport) {
    let outcome = self
      .dedup
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .should_add(candidate, |key| threats.find(|t| t.natural_key() == key));

    if outcome.is_new {
      report.ingested += 1;
    } else {
      report.merged += 1;
    }
    threats.upsert(outcome.merged);
  }

  /// Write the poll outcome back onto the feed: `Some(committed)` on success,
  /// None on failure. Only the circuit and poll bookkeeping are touched, so
  /// telemetry updates are never lost.
  fn record_poll(&self, stores: &Stores, feed: &Feed, now: DateTime<Utc>, committed: Option<u64>) {
    let mut transition = None;
    let updated = stores.feeds.update(&feed.id, |current| {
      let mut next = current.clone();
      transition = match committed {
        Some(committed) => {
          next.last_polled = Some(now);
          next.records_ingested = next.records_ingested.saturating_add(committed);
          next.circuit.record_success()
        }
        None => next.circuit.record_failure(now, &self.circuit),
      };
      Some(next)
    });

    if let Err(e) = updated {
      debug!(error = %e, "feed removed during poll");
      return;
    }
    if let Some(Transition { from, to }) = transition {
      info!(feed = %feed.id, ?from, ?to, "circuit transition");
    }
  }

  pub fn dedup_stats(&self) -> crate::filter::DedupStats {
    self.dedup.lock().unwrap_or_else(PoisonError::into_inner).stats()
  }
}
