use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use threatsync::config::Config;
use threatsync::event::{Event, NotificationHub, Topic};
use threatsync::model::Feed;
use threatsync::remote::OfflineRemote;
use threatsync::resilient::{AnalysisClient, ResilientClient};
use threatsync::rules::circuit::CircuitState;
use threatsync::scheduler::{BackgroundScheduler, LoadGauge};
use threatsync::store::Stores;
use threatsync::sync::{FeedError, FeedSource, SyncCoordinator};

/// Feed that fails while `down` is set and counts every poll.
struct FlakyFeed {
  down: AtomicBool,
  polls: AtomicUsize,
}

#[async_trait]
impl FeedSource for FlakyFeed {
  async fn poll(&self, feed: &Feed, _batch_size: usize) -> Result<Vec<Value>, FeedError> {
    self.polls.fetch_add(1, Ordering::SeqCst);
    if self.down.load(Ordering::SeqCst) {
      return Err(FeedError::Unreachable {
        feed: feed.id.clone(),
        reason: "503 from upstream".to_string(),
      });
    }
    Ok(vec![
      json!({ "indicator": "203.0.113.77", "type": "ip", "severity": "high" }),
      json!({ "indicator": "beacon.example", "type": "domain" }),
    ])
  }
}

#[tokio::test]
async fn feed_circuit_opens_skips_and_recovers() {
  let config = Config::default();
  let stores = Stores::new();
  stores.feeds.upsert(Feed {
    id: "feed-x".to_string(),
    name: "Feed X".to_string(),
    ..Feed::default()
  });

  let hub = NotificationHub::new();
  let mut ticks = hub.subscribe(&[Topic::SystemTick]);
  let mut notices = hub.subscribe(&[Topic::UserNotification]);

  let source = Arc::new(FlakyFeed {
    down: AtomicBool::new(true),
    polls: AtomicUsize::new(0),
  });
  let (scheduler, scheduler_handle) =
    BackgroundScheduler::start(config.scheduler.clone(), Some(Arc::new(LoadGauge::new(1))));
  let analysis = AnalysisClient::new(
    Arc::new(OfflineRemote),
    ResilientClient::new(config.remote.timeout()).with_hub(hub.clone()),
    config.access.clone(),
  );
  let coordinator = SyncCoordinator::new(
    stores.clone(),
    config.clone(),
    analysis,
    scheduler,
    source.clone(),
    hub.clone(),
  );

  let start = Utc::now();
  let circuit = || stores.feeds.get("feed-x").unwrap().circuit;

  // Three consecutive failures trip the breaker on the third
  for (i, expected) in [CircuitState::Closed, CircuitState::Closed, CircuitState::Open]
    .into_iter()
    .enumerate()
  {
    let summary = coordinator
      .run_tick_at(start + Duration::seconds(30 * i as i64))
      .await;
    assert_eq!(summary.ingest.failed, 1);
    assert_eq!(circuit().state, expected);
  }
  assert_eq!(circuit().consecutive_failures, 3);
  assert_eq!(source.polls.load(Ordering::SeqCst), 3);

  // Fourth tick, inside the cooldown: skipped without polling
  source.down.store(false, Ordering::SeqCst);
  let skipped = coordinator.run_tick_at(start + Duration::seconds(90)).await;
  assert_eq!(skipped.ingest.skipped, 1);
  assert_eq!(skipped.ingest.polled, 0);
  assert_eq!(source.polls.load(Ordering::SeqCst), 3);
  assert!(stores.threats.is_empty());

  // After the cooldown a single trial poll succeeds and closes the circuit
  let opened_at = circuit().opened_at.unwrap();
  let recovered = coordinator
    .run_tick_at(opened_at + config.circuit.cooldown() + Duration::seconds(1))
    .await;
  assert_eq!(recovered.ingest.polled, 1);
  assert_eq!(recovered.ingest.ingested, 2);
  assert_eq!(circuit().state, CircuitState::Closed);
  assert_eq!(circuit().consecutive_failures, 0);
  assert_eq!(stores.threats.len(), 2);
  assert_eq!(stores.feeds.get("feed-x").unwrap().records_ingested, 2);

  // One SystemTick per tick; feed failures and open circuits are not user-facing
  let published: Vec<u64> = ticks
    .drain()
    .into_iter()
    .filter_map(|e| match e {
      Event::SystemTick(summary) => Some(summary.tick),
      _ => None,
    })
    .collect();
  assert_eq!(published, vec![1, 2, 3, 4, 5]);
  assert!(notices.drain().is_empty());

  scheduler_handle.shutdown().await;
}

#[tokio::test]
async fn reobserved_indicator_raises_confidence() {
  let config = Config::default();
  let stores = Stores::new();
  stores.feeds.upsert(Feed {
    id: "feed-y".to_string(),
    ..Feed::default()
  });
  let source = Arc::new(FlakyFeed {
    down: AtomicBool::new(false),
    polls: AtomicUsize::new(0),
  });
  let (scheduler, scheduler_handle) = BackgroundScheduler::start(config.scheduler.clone(), None);
  let coordinator = SyncCoordinator::new(
    stores.clone(),
    config.clone(),
    AnalysisClient::new(
      Arc::new(OfflineRemote),
      ResilientClient::new(config.remote.timeout()),
      config.access.clone(),
    ),
    scheduler,
    source,
    NotificationHub::new(),
  );

  let first = coordinator.run_tick().await;
  let second = coordinator.run_tick().await;

  assert_eq!(first.ingest.ingested, 2);
  assert_eq!(second.ingest.ingested, 0);
  assert_eq!(second.ingest.merged, 2);
  assert_eq!(stores.threats.len(), 2);
  assert!(stores
    .threats
    .get_all()
    .iter()
    .all(|t| t.confidence == 50 + config.dedup.confidence_increment));

  scheduler_handle.shutdown().await;
}
