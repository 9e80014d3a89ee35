//! High-frequency telemetry refresh for devices and feeds.
//!
//! Only the telemetry-owned fields (`cpu_load`, `latency_ms`) are written,
//! always through [`EntityStore::update`](crate::store::EntityStore::update),
//! so concurrent reconciliation never loses a write.

use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::trace;

use crate::model::FeedStatus;
use crate::store::{Stores, Updated};

const MAX_LATENCY_MS: i64 = 5_000;

/// Apply one round of telemetry jitter. Returns the number of entities changed.
pub fn sample(stores: &Stores, rng: &mut impl Rng) -> usize {
  let mut changed = 0;

  for device in stores.devices.get_all() {
    let load_step: f32 = rng.gen_range(-8.0..=8.0);
    let latency_step: i64 = rng.gen_range(-15..=15);
    let result = stores.devices.update(&device.id, |current| {
      let mut next = current.clone();
      next.cpu_load = (current.cpu_load + load_step).clamp(0.0, 100.0);
      next.latency_ms = jitter_latency(current.latency_ms, latency_step);
      Some(next)
    });
    if matches!(result, Ok(Updated::Changed(_))) {
      changed += 1;
    }
  }

  for feed in stores.feeds.get_all() {
    if feed.status != FeedStatus::Active {
      continue;
    }
    let latency_step: i64 = rng.gen_range(-25..=25);
    let result = stores.feeds.update(&feed.id, |current| {
      let mut next = current.clone();
      next.latency_ms = jitter_latency(current.latency_ms, latency_step);
      Some(next)
    });
    if matches!(result, Ok(Updated::Changed(_))) {
      changed += 1;
    }
  }

  changed
}

fn jitter_latency(current: u32, step: i64) -> u32 {
  (i64::from(current) + step).clamp(1, MAX_LATENCY_MS) as u32
}

/// Run [`sample`] every `period` until `shutdown` flips to true.
///
/// This loop has no failure path and never talks to the remote service.
pub fn spawn(stores: Stores, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      if *shutdown.borrow() {
        break;
      }
      tokio::select! {
        biased;
        _ = shutdown.changed() => break,
        _ = ticker.tick() => {}
      }
      let changed = sample(&stores, &mut rand::thread_rng());
      trace!(changed, "telemetry sampled");
    }
  })
}
