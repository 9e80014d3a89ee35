//! SLA breach detection for open cases.

use chrono::{DateTime, Utc};
use std::borrow::Cow;

use crate::config::SlaConfig;
use crate::model::Case;

/// Flag a case once it has been open longer than its priority allows.
///
/// One-way: an already breached case is returned unchanged, and resolved or
/// closed cases are never flagged.
pub fn apply<'a>(case: &'a Case, now: DateTime<Utc>, policy: &SlaConfig) -> Cow<'a, Case> {
  if case.sla_breached || case.status.is_terminal() {
    return Cow::Borrowed(case);
  }
  if now - case.created_at <= policy.limit_for(case.priority) {
    return Cow::Borrowed(case);
  }
  Cow::Owned(Case {
    sla_breached: true,
    ..case.clone()
  })
}
