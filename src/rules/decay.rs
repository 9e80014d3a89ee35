//! Confidence decay for stale threat indicators.

use chrono::{DateTime, Utc};
use std::borrow::Cow;

use crate::config::DecayConfig;
use crate::model::{Threat, ThreatStatus};

/// Decay one threat.
///
/// A threat decays when it has not been seen for `stale_after`, is not
/// closed, and has not decayed within the last `interval`. Each step removes
/// `percent` of the current confidence (rounded up, at least one point).
/// Dropping below `floor` closes the threat, which ends decay for good.
pub fn apply<'a>(threat: &'a Threat, now: DateTime<Utc>, policy: &DecayConfig) -> Cow<'a, Threat> {
  if threat.status == ThreatStatus::Closed || policy.percent == 0 {
    return Cow::Borrowed(threat);
  }
  if now - threat.last_seen <= policy.stale_after() {
    return Cow::Borrowed(threat);
  }
  if let Some(decayed_at) = threat.last_decayed {
    if now - decayed_at < policy.interval() {
      return Cow::Borrowed(threat);
    }
  }

  let current = u32::from(threat.confidence);
  let loss = (current * u32::from(policy.percent)).div_ceil(100).max(1);
  let confidence = current.saturating_sub(loss) as u8;

  let mut next = threat.clone();
  next.confidence = confidence;
  next.last_decayed = Some(now);
  if confidence < policy.floor {
    next.status = ThreatStatus::Closed;
  }
  Cow::Owned(next)
}
