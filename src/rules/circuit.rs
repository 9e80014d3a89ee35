//! Per-feed circuit breaker.
//!
//! ```text
//! CLOSED --N consecutive failures--> OPEN --cooldown elapsed--> HALF_OPEN
//!   ^                                  ^                            |
//!   |                                  +---------failure------------+
//!   +--------------------------------success------------------------+
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::borrow::Cow;

use crate::config::CircuitConfig;
use crate::model::Feed;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
  #[default]
  Closed,
  Open,
  HalfOpen,
}

/// A state change, reported so callers can log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
  pub from: CircuitState,
  pub to: CircuitState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreaker {
  pub state: CircuitState,
  pub consecutive_failures: u32,
  /// When the circuit last opened
  pub opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
  /// OPEN circuits are skipped entirely.
  pub fn allows_request(&self) -> bool {
    self.state != CircuitState::Open
  }

  pub fn record_success(&mut self) -> Option<Transition> {
    let from = self.state;
    self.state = CircuitState::Closed;
    self.consecutive_failures = 0;
    self.opened_at = None;
    (from != CircuitState::Closed).then_some(Transition {
      from,
      to: CircuitState::Closed,
    })
  }

  pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &CircuitConfig) -> Option<Transition> {
    let from = self.state;
    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    let trips = match from {
      CircuitState::Closed => self.consecutive_failures >= policy.failure_threshold.max(1),
      // A failed trial poll re-opens immediately
      CircuitState::HalfOpen => true,
      CircuitState::Open => false,
    };
    if !trips {
      return None;
    }
    self.state = CircuitState::Open;
    self.opened_at = Some(now);
    Some(Transition {
      from,
      to: CircuitState::Open,
    })
  }

  /// OPEN -> HALF_OPEN once the cooldown has elapsed.
  pub fn cool_down(&mut self, now: DateTime<Utc>, policy: &CircuitConfig) -> Option<Transition> {
    if self.state != CircuitState::Open {
      return None;
    }
    // An open circuit without a timestamp is treated as opened just now
    let opened_at = *self.opened_at.get_or_insert(now);
    if now - opened_at < policy.cooldown() {
      return None;
    }
    self.state = CircuitState::HalfOpen;
    Some(Transition {
      from: CircuitState::Open,
      to: CircuitState::HalfOpen,
    })
  }
}

/// Periodic rule: move a feed's circuit out of OPEN after the cooldown.
pub fn cooldown<'a>(feed: &'a Feed, now: DateTime<Utc>, policy: &CircuitConfig) -> Cow<'a, Feed> {
  let mut circuit = feed.circuit.clone();
  if circuit.cool_down(now, policy).is_none() && circuit == feed.circuit {
    return Cow::Borrowed(feed);
  }
  Cow::Owned(Feed {
    circuit,
    ..feed.clone()
  })
}

/// Lenient deserializer so a garbled circuit field never drops a feed record.
pub fn lenient<'de, D>(deserializer: D) -> Result<CircuitBreaker, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(
    Option::<Value>::deserialize(deserializer)?
      .and_then(|value| serde_json::from_value(value).ok())
      .unwrap_or_default(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn policy(failure_threshold: u32, cooldown_secs: u64) -> CircuitConfig {
    CircuitConfig {
      failure_threshold,
      cooldown_secs,
    }
  }

  #[test]
  fn test_opens_after_exactly_threshold_failures() {
    let policy = policy(3, 60);
    let now = Utc::now();
    let mut breaker = CircuitBreaker::default();

    assert!(breaker.record_failure(now, &policy).is_none());
    assert!(breaker.record_failure(now, &policy).is_none());
    assert_eq!(breaker.state, CircuitState::Closed);
    assert!(breaker.allows_request());

    let transition = breaker.record_failure(now, &policy).unwrap();
    assert_eq!(transition.to, CircuitState::Open);
    assert_eq!(breaker.opened_at, Some(now));
    assert!(!breaker.allows_request());
  }

  #[test]
  fn test_success_resets_failure_count() {
    let policy = policy(3, 60);
    let now = Utc::now();
    let mut breaker = CircuitBreaker::default();

    breaker.record_failure(now, &policy);
    breaker.record_failure(now, &policy);
    assert!(breaker.record_success().is_none());
    breaker.record_failure(now, &policy);
    breaker.record_failure(now, &policy);

    assert_eq!(breaker.state, CircuitState::Closed);
  }

  #[test]
  fn test_half_open_only_after_cooldown() {
    let policy = policy(1, 300);
    let opened = Utc::now();
    let mut breaker = CircuitBreaker::default();
    breaker.record_failure(opened, &policy);

    assert!(breaker
      .cool_down(opened + Duration::seconds(299), &policy)
      .is_none());
    assert_eq!(breaker.state, CircuitState::Open);

    let transition = breaker
      .cool_down(opened + Duration::seconds(300), &policy)
      .unwrap();
    assert_eq!(transition.to, CircuitState::HalfOpen);
    assert!(breaker.allows_request());
  }

  #[test]
  fn test_half_open_outcomes() {
    let policy = policy(2, 10);
    let t0 = Utc::now();

    let mut breaker = CircuitBreaker {
      state: CircuitState::HalfOpen,
      consecutive_failures: 2,
      opened_at: Some(t0),
    };
    let mut failed = breaker.clone();

    let closed = breaker.record_success().unwrap();
    assert_eq!(closed.to, CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures, 0);

    let t1 = t0 + Duration::seconds(30);
    let reopened = failed.record_failure(t1, &policy).unwrap();
    assert_eq!(reopened.from, CircuitState::HalfOpen);
    assert_eq!(failed.state, CircuitState::Open);
    assert_eq!(failed.opened_at, Some(t1));
  }

  #[test]
  fn test_cooldown_rule_returns_borrowed_when_unchanged() {
    let policy = policy(3, 60);
    let feed = Feed::default();
    assert!(matches!(cooldown(&feed, Utc::now(), &policy), Cow::Borrowed(_)));

    let opened = Utc::now() - Duration::seconds(120);
    let open_feed = Feed {
      circuit: CircuitBreaker {
        state: CircuitState::Open,
        consecutive_failures: 3,
        opened_at: Some(opened),
      },
      ..Feed::default()
    };
    let cooled = cooldown(&open_feed, Utc::now(), &policy);
    assert_eq!(cooled.circuit.state, CircuitState::HalfOpen);

    // Idempotent
    let again = cooldown(&cooled, Utc::now(), &policy);
    assert!(matches!(again, Cow::Borrowed(_)));
  }

  #[test]
  fn test_lenient_circuit_field() {
    let feed: Feed = serde_json::from_value(serde_json::json!({
      "id": "f-1",
      "circuit": "definitely broken",
    }))
    .unwrap();
    assert_eq!(feed.circuit, CircuitBreaker::default());

    let feed: Feed = serde_json::from_value(serde_json::json!({
      "id": "f-2",
      "circuit": { "state": "half_open" },
    }))
    .unwrap();
    assert_eq!(feed.circuit.state, CircuitState::HalfOpen);
  }
}
