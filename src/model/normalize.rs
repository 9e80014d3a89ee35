//! Ingestion boundary: turn untrusted JSON records into entities.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::filter::Deduplicate;
use crate::store::Entity;

use super::types::Threat;

/// Entities decoded from a batch plus the number of records that had to be dropped.
#[derive(Debug, Clone)]
pub struct Decoded<T> {
  pub entities: Vec<T>,
  pub rejected: usize,
}

/// Decode a snapshot batch.
///
/// Fields are normalized by the lenient deserializers. Only records that are
/// not JSON objects or that carry no id are dropped, since they cannot be keyed.
pub fn decode_batch<T: Entity>(records: Vec<Value>) -> Decoded<T> {
  let total = records.len();
  let entities: Vec<T> = records
    .into_iter()
    .filter(Value::is_object)
    .filter_map(|record| match serde_json::from_value::<T>(record) {
      Ok(entity) if !entity.id().trim().is_empty() => Some(entity),
      Ok(_) => None,
      Err(e) => {
        debug!(kind = %T::kind(), error = %e, "dropping undecodable record");
        None
      }
    })
    .collect();

  Decoded {
    rejected: total - entities.len(),
    entities,
  }
}

/// Normalize one raw feed record into a threat observed now.
///
/// Returns None when the record has no indicator. Missing ids are derived
/// from the natural key so the same indicator always maps to the same id.
pub fn normalize_indicator(record: Value, feed_id: &str, now: DateTime<Utc>) -> Option<Threat> {
  if !record.is_object() {
    return None;
  }
  let mut threat: Threat = serde_json::from_value(record).ok()?;
  threat.indicator = threat.indicator.trim().to_string();
  if threat.indicator.is_empty() {
    return None;
  }
  if threat.id.trim().is_empty() {
    threat.id = Threat::derive_id(&threat.natural_key());
  }
  if threat.source.is_empty() {
    threat.source = feed_id.to_string();
  }
  threat.first_seen = now;
  threat.last_seen = now;
  threat.last_decayed = None;
  Some(threat)
}
