//! Bloom-guarded deduplication for incoming records.

use tracing::trace;

use crate::config::FilterSizing;

use super::bloom::MembershipFilter;

/// Records that can be deduplicated by a natural key.
pub trait Deduplicate: Clone {
  /// Key identifying "the same" record across sources (e.g. indicator + type)
  fn natural_key(&self) -> String;

  /// Fold a re-observed `candidate` into `self`.
  ///
  /// Confidence grows by `increment` capped at 100, and recency is never
  /// moved backwards.
  fn merge_from(&self, candidate: &Self, increment: u8) -> Self;
}

/// Result of [`DeduplicationFilter::should_add`].
#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome<T> {
  /// True when the candidate should be committed as a new entity
  pub is_new: bool,
  /// The candidate itself when new, otherwise the refreshed existing record
  pub merged: T,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
  pub checked: u64,
  /// Filter said "definitely new", no lookup needed
  pub definitely_new: u64,
  /// Filter said "maybe", exact lookup performed
  pub confirmation_queries: u64,
  pub duplicates: u64,
  /// Filter said "maybe" but the lookup found nothing
  pub false_positives: u64,
}

/// Probabilistic pre-check in front of an exact lookup.
///
/// The membership filter only decides the cheap "definitely new" case.
/// Every positive is confirmed against the authoritative collection, so an
/// under-provisioned filter costs extra lookups but never a wrong answer.
#[derive(Debug, Clone)]
pub struct DeduplicationFilter {
  filter: MembershipFilter,
  increment: u8,
  stats: DedupStats,
}

impl DeduplicationFilter {
  pub fn new(sizing: &FilterSizing, confidence_increment: u8) -> Self {
    Self {
      filter: MembershipFilter::new(sizing.expected_items, sizing.false_positive_rate),
      increment: confidence_increment,
      stats: DedupStats::default(),
    }
  }

  /// Register records already present in the store.
  pub fn prime<'a, T: Deduplicate + 'a>(&mut self, existing: impl IntoIterator<Item = &'a T>) {
    for record in existing {
      self.filter.add(&record.natural_key());
    }
  }

  /// Decide whether `candidate` is new.
  ///
  /// `exact_lookup` receives the natural key and must search the real
  /// collection. It is only called when every filter bit is already set.
  pub fn should_add<T, L>(&mut self, candidate: T, exact_lookup: L) -> DedupOutcome<T>
  where
    T: Deduplicate,
    L: FnOnce(&str) -> Option<T>,
  {
    self.stats.checked += 1;
    let key = candidate.natural_key();

    if !self.filter.test(&key) {
      self.stats.definitely_new += 1;
      self.filter.add(&key);
      return DedupOutcome {
        is_new: true,
        merged: candidate,
      };
    }

    self.stats.confirmation_queries += 1;
    match exact_lookup(&key) {
      Some(existing) => {
        self.stats.duplicates += 1;
        DedupOutcome {
          is_new: false,
          merged: existing.merge_from(&candidate, self.increment),
        }
      }
      None => {
        trace!(key = %key, "membership filter false positive");
        self.stats.false_positives += 1;
        self.filter.add(&key);
        DedupOutcome {
          is_new: true,
          merged: candidate,
        }
      }
    }
  }

  pub fn stats(&self) -> DedupStats {
    self.stats
  }
}
