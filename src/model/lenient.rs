//! Lenient field deserializers used at the ingestion boundary.
//!
//! Remote snapshots, seed files and feed records are not trusted to be
//! well-formed. Instead of rejecting a record, each field falls back to a
//! safe default: unknown enum strings map to the enum default, numbers are
//! clamped, unparseable timestamps become "now". One bad field never
//! discards the whole batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Enums that can be parsed from arbitrary strings without failing.
pub trait Lenient: Default {
  /// Parse `s`, returning the default variant for anything unrecognized.
  fn parse_lenient(s: &str) -> Self;
}

/// Normalize an enum label: trim, lowercase, treat spaces and dashes as underscores.
pub fn normalize_label(s: &str) -> String {
  s.trim().to_lowercase().replace([' ', '-'], "_")
}

fn value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
  D: Deserializer<'de>,
{
  Option::<Value>::deserialize(deserializer)
}

pub fn enum_value<'de, D, E>(deserializer: D) -> Result<E, D::Error>
where
  D: Deserializer<'de>,
  E: Lenient,
{
  Ok(
    value(deserializer)?
      .as_ref()
      .and_then(Value::as_str)
      .map(E::parse_lenient)
      .unwrap_or_default(),
  )
}

pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match value(deserializer)? {
    Some(Value::String(s)) => s,
    Some(Value::Number(n)) => n.to_string(),
    Some(Value::Bool(b)) => b.to_string(),
    _ => String::new(),
  })
}

pub fn optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match value(deserializer)? {
    Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
    _ => None,
  })
}

pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match value(deserializer)? {
    Some(Value::Array(items)) => items
      .into_iter()
      .filter_map(|item| match item {
        Value::String(s) => Some(s),
        _ => None,
      })
      .collect(),
    _ => Vec::new(),
  })
}

pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match value(deserializer)? {
    Some(Value::Bool(b)) => b,
    Some(Value::String(s)) => matches!(normalize_label(&s).as_str(), "true" | "yes" | "1"),
    Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
    _ => false,
  })
}

/// Clamp any numeric value into 0..=100.
pub fn clamp_percent(value: &Value) -> Option<u8> {
  let n = match value {
    Value::Number(n) => n.as_f64()?,
    Value::String(s) => s.trim().parse::<f64>().ok()?,
    _ => return None,
  };
  if n.is_nan() {
    return None;
  }
  Some(n.round().clamp(0.0, 100.0) as u8)
}

/// Confidence and risk scores. Missing or garbage values become 50.
pub fn percent<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(
    value(deserializer)?
      .as_ref()
      .and_then(clamp_percent)
      .unwrap_or(DEFAULT_PERCENT),
  )
}

pub const DEFAULT_PERCENT: u8 = 50;

fn non_negative(value: Option<Value>) -> Option<f64> {
  let n = match value? {
    Value::Number(n) => n.as_f64()?,
    Value::String(s) => s.trim().parse::<f64>().ok()?,
    _ => return None,
  };
  (n.is_finite()).then(|| n.max(0.0))
}

pub fn count_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(non_negative(value(deserializer)?).map_or(0, |n| n as u64))
}

pub fn count_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(non_negative(value(deserializer)?).map_or(0, |n| n.min(f64::from(u32::MAX)) as u32))
}

pub fn load<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(non_negative(value(deserializer)?).map_or(0.0, |n| n.min(100.0) as f32))
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
  match value {
    Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
      .ok()
      .map(|dt| dt.with_timezone(&Utc)),
    Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
    _ => None,
  }
}

/// RFC 3339 string or epoch milliseconds. Anything else becomes now.
pub fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(
    value(deserializer)?
      .as_ref()
      .and_then(parse_timestamp)
      .unwrap_or_else(Utc::now),
  )
}

pub fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(value(deserializer)?.as_ref().and_then(parse_timestamp))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_clamp_percent() {
    assert_eq!(clamp_percent(&json!(150)), Some(100));
    assert_eq!(clamp_percent(&json!(-3)), Some(0));
    assert_eq!(clamp_percent(&json!(72.6)), Some(73));
    assert_eq!(clamp_percent(&json!("41")), Some(41));
    assert_eq!(clamp_percent(&json!("high")), None);
  }

  #[test]
  fn test_normalize_label() {
    assert_eq!(normalize_label(" In-Progress "), "in_progress");
    assert_eq!(normalize_label("HALF OPEN"), "half_open");
  }

  #[test]
  fn test_parse_timestamp_forms() {
    let parsed = parse_timestamp(&json!("2024-05-01T12:00:00Z")).unwrap();
    assert_eq!(parsed.timestamp(), 1_714_564_800);

    let millis = parse_timestamp(&json!(1_714_564_800_000_i64)).unwrap();
    assert_eq!(millis, parsed);

    assert!(parse_timestamp(&json!("yesterday")).is_none());
  }
}
