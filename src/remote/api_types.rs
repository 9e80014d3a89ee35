//! Wire types for the analysis endpoints.
//!
//! Responses pass through the same lenient deserializers as entity records,
//! so a partially filled verdict still decodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::lenient;
use crate::model::Severity;

/// Device compliance evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceVerdict {
  #[serde(deserialize_with = "lenient::flag")]
  pub compliant: bool,
  #[serde(deserialize_with = "lenient::percent")]
  pub risk_score: u8,
  #[serde(deserialize_with = "lenient::string_list")]
  pub findings: Vec<String>,
}

/// Recommended response playbook for a case
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybookSuggestion {
  #[serde(deserialize_with = "lenient::string")]
  pub playbook: String,
  #[serde(deserialize_with = "lenient::string_list")]
  pub steps: Vec<String>,
}

/// Aggregate risk across the active threat set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignRisk {
  #[serde(deserialize_with = "lenient::percent")]
  pub score: u8,
  #[serde(deserialize_with = "lenient::enum_value")]
  pub level: Severity,
  /// Number of threats that contributed to the score
  #[serde(deserialize_with = "lenient::count_u32")]
  pub contributing: u32,
}

/// Unwrap a snapshot body. Accepts a bare array or an `{ "items": [...] }` /
/// `{ "data": [...] }` envelope.
pub fn snapshot_records(body: Value) -> Option<Vec<Value>> {
  match body {
    Value::Array(records) => Some(records),
    Value::Object(mut envelope) => ["items", "data"].iter().find_map(|key| match envelope.remove(*key) {
      Some(Value::Array(records)) => Some(records),
      _ => None,
    }),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_verdict_tolerates_partial_body() {
    let verdict: ComplianceVerdict = serde_json::from_value(json!({
      "compliant": "yes",
      "risk_score": 140,
      "findings": ["disk-unencrypted", 7]
    }))
    .unwrap();
    assert!(verdict.compliant);
    assert_eq!(verdict.risk_score, 100);
    assert_eq!(verdict.findings, vec!["disk-unencrypted"]);
  }

  #[test]
  fn test_campaign_risk_unknown_level() {
    let risk: CampaignRisk = serde_json::from_value(json!({ "score": 61.6, "level": "dire" })).unwrap();
    assert_eq!(risk.score, 62);
    assert_eq!(risk.level, Severity::Medium);
    assert_eq!(risk.contributing, 0);
  }

  #[test]
  fn test_snapshot_envelopes() {
    assert_eq!(snapshot_records(json!([{ "id": "a" }])).map(|r| r.len()), Some(1));
    assert_eq!(snapshot_records(json!({ "items": [1, 2] })).map(|r| r.len()), Some(2));
    assert_eq!(snapshot_records(json!({ "data": [] })).map(|r| r.len()), Some(0));
    assert!(snapshot_records(json!({ "items": "nope" })).is_none());
    assert!(snapshot_records(json!("text")).is_none());
  }
}
