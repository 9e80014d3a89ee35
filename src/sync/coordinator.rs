//! Periodic reconciliation of the local stores against the remote service.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::Config;
use crate::event::{Event, NotificationHub};
use crate::model::{Case, Device, Feed, Threat, User};
use crate::remote::CampaignRisk;
use crate::resilient::{AnalysisClient, CallOptions, FallbackResult};
use crate::rules::dormancy::{self, PATCH_WINDOW_FINDING};
use crate::rules::{self, circuit, decay, sla};
use crate::scheduler::BackgroundScheduler;
use crate::store::{Entity, EntityStore, Stores, Updated};

use super::feeds::FeedSource;
use super::ingest::{IngestReport, Ingestor};

/// Phase of the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
  Idle,
  Fetching,
  Reconciling,
  Notifying,
}

/// What one tick did, published as [`Event::SystemTick`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
  pub tick: u64,
  pub at: DateTime<Utc>,
  /// Entities inserted or updated from remote snapshots
  pub reconciled: usize,
  /// Entities changed by lifecycle rules and remote checks
  pub updated: usize,
  pub ingest: IngestReport,
  /// Remote calls that resolved locally
  pub degraded_calls: usize,
  pub campaign_risk: FallbackResult<CampaignRisk>,
}

/// Drives the sync loop: fetch, reconcile, ingest, notify.
pub struct SyncCoordinator {
  stores: Stores,
  config: Config,
  analysis: AnalysisClient,
  scheduler: BackgroundScheduler,
  ingestor: Ingestor,
  hub: NotificationHub,
  state: watch::Sender<SyncState>,
  ticks: AtomicU64,
  /// Bumped on teardown; passes queued under an older generation do nothing
  generation: Arc<AtomicU64>,
}

/// Ties a queued lifecycle pass to the coordinator generation it was scheduled in.
#[derive(Clone)]
struct PassGuard {
  generation: Arc<AtomicU64>,
  scheduled: u64,
}

impl PassGuard {
  fn is_current(&self) -> bool {
    self.generation.load(Ordering::SeqCst) == self.scheduled
  }
}

impl SyncCoordinator {
  pub fn new(
    stores: Stores,
    config: Config,
    analysis: AnalysisClient,
    scheduler: BackgroundScheduler,
    feeds: Arc<dyn FeedSource>,
    hub: NotificationHub,
  ) -> Self {
    let ingestor = Ingestor::new(feeds, &config, &stores.threats);
    let (state, _) = watch::channel(SyncState::Idle);
    Self {
      stores,
      config,
      analysis,
      scheduler,
      ingestor,
      hub,
      state,
      ticks: AtomicU64::new(0),
      generation: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Drop every lifecycle pass this coordinator has queued but not yet run.
  ///
  /// Passes still waiting on the scheduler become no-ops, so nothing is
  /// written or published on their behalf after teardown.
  pub fn cancel_pending(&self) {
    self.generation.fetch_add(1, Ordering::SeqCst);
  }

  /// Observe tick phases.
  pub fn state(&self) -> watch::Receiver<SyncState> {
    self.state.subscribe()
  }

  fn enter(&self, state: SyncState) {
    self.state.send_replace(state);
  }

  pub async fn run_tick(&self) -> TickSummary {
    self.run_tick_at(Utc::now()).await
  }

  /// Run one full tick with `now` as the rule clock.
  pub async fn run_tick_at(&self, now: DateTime<Utc>) -> TickSummary {
    let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
    let mut degraded_calls = 0;

    self.enter(SyncState::Fetching);
    let mut reconciled = 0;
    for (merged, degraded) in [
      self.reconcile(&self.stores.threats).await,
      self.reconcile(&self.stores.cases).await,
      self.reconcile(&self.stores.feeds).await,
      self.reconcile(&self.stores.users).await,
      self.reconcile(&self.stores.devices).await,
    ] {
      reconciled += merged;
      degraded_calls += usize::from(degraded);
    }

    self.enter(SyncState::Reconciling);
    let mut updated = self.run_lifecycle_passes(now).await;
    let (checked, degraded) = self.run_remote_checks(now).await;
    updated += checked;
    degraded_calls += degraded;
    let ingest = self.ingestor.run(&self.stores, now).await;

    self.enter(SyncState::Notifying);
    let threats = self.stores.threats.get_all();
    let campaign_risk = self.analysis.campaign_risk(&threats, CallOptions::silent()).await;
    degraded_calls += usize::from(campaign_risk.is_degraded());

    let summary = TickSummary {
      tick,
      at: now,
      reconciled,
      updated,
      ingest,
      degraded_calls,
      campaign_risk,
    };
    info!(
      tick,
      reconciled,
      updated,
      ingested = ingest.ingested,
      merged = ingest.merged,
      skipped_feeds = ingest.skipped,
      risk = summary.campaign_risk.value.score,
      provenance = ?summary.campaign_risk.provenance,
      "sync tick complete"
    );
    self.hub.publish(Event::SystemTick(summary.clone()));
    self.enter(SyncState::Idle);
    summary
  }

  /// Merge the remote snapshot of one collection. Returns (entities changed, degraded).
  async fn reconcile<T: Entity>(&self, store: &EntityStore<T>) -> (usize, bool) {
    let snapshot = self.analysis.snapshot(store, CallOptions::silent()).await;
    if snapshot.is_degraded() {
      return (0, true);
    }
    let decoded = snapshot.value;
    if decoded.rejected > 0 {
      debug!(kind = %T::kind(), rejected = decoded.rejected, "remote records dropped");
    }
    let counts = store.merge_remote(decoded.entities);
    (counts.inserted + counts.updated, false)
  }

  /// Schedule every lifecycle rule as background work and wait for all of them.
  async fn run_lifecycle_passes(&self, now: DateTime<Utc>) -> usize {
    let changed = Arc::new(AtomicUsize::new(0));
    let stores = &self.stores;
    let config = &self.config;
    let guard = PassGuard {
      generation: Arc::clone(&self.generation),
      scheduled: self.generation.load(Ordering::SeqCst),
    };
    let pass = |rule: &'static str| (rule, guard.clone(), Arc::clone(&changed));

    let tickets = vec![
      self.scheduler.schedule(
        "confidence decay",
        rule_pass(Arc::clone(&stores.threats), pass("confidence decay"), {
          let policy = config.decay.clone();
          move |threat: &Threat| rules::changed(decay::apply(threat, now, &policy))
        }),
      ),
      self.scheduler.schedule(
        "sla breach",
        rule_pass(Arc::clone(&stores.cases), pass("sla breach"), {
          let policy = config.sla.clone();
          move |case: &Case| rules::changed(sla::apply(case, now, &policy))
        }),
      ),
      self.scheduler.schedule(
        "circuit cooldown",
        rule_pass(Arc::clone(&stores.feeds), pass("circuit cooldown"), {
          let policy = config.circuit.clone();
          move |feed: &Feed| rules::changed(circuit::cooldown(feed, now, &policy))
        }),
      ),
      self.scheduler.schedule(
        "dormant accounts",
        rule_pass(Arc::clone(&stores.users), pass("dormant accounts"), {
          let policy = config.access.clone();
          move |user: &User| rules::changed(dormancy::dormant_account(user, now, &policy))
        }),
      ),
      self.scheduler.schedule(
        "stale patches",
        rule_pass(Arc::clone(&stores.devices), pass("stale patches"), {
          let policy = config.access.clone();
          move |device: &Device| rules::changed(dormancy::stale_patch(device, now, &policy))
        }),
      ),
    ];

    let completed = join_all(tickets.into_iter().map(|t| t.wait())).await;
    let skipped = completed.iter().filter(|done| !**done).count();
    if skipped > 0 {
      debug!(skipped, "lifecycle passes dropped by scheduler shutdown");
    }
    changed.load(Ordering::SeqCst)
  }

  /// Compliance for every device, playbooks for open cases without one.
  /// Returns (entities changed, degraded calls).
  async fn run_remote_checks(&self, now: DateTime<Utc>) -> (usize, usize) {
    let mut changed = 0;
    let mut degraded = 0;

    let devices = self.stores.devices.get_all();
    let verdicts = join_all(
      devices
        .iter()
        .map(|device| self.analysis.evaluate_compliance(device, now, CallOptions::silent())),
    )
    .await;
    for (device, verdict) in devices.iter().zip(verdicts) {
      degraded += usize::from(verdict.is_degraded());
      let verdict = verdict.value;
      let result = self.stores.devices.update(&device.id, |current| {
        // A verdict cannot restore compliance while the patch window is exceeded
        let overdue = dormancy::patch_overdue(current, now, &self.config.access);
        let mut findings = verdict.findings.clone();
        if overdue && !findings.iter().any(|f| f == PATCH_WINDOW_FINDING) {
          findings.push(PATCH_WINDOW_FINDING.to_string());
        }
        Some(Device {
          compliant: verdict.compliant && !overdue,
          risk_score: verdict.risk_score,
          findings,
          ..current.clone()
        })
      });
      changed += usize::from(matches!(result, Ok(Updated::Changed(_))));
    }

    let cases: Vec<_> = self
      .stores
      .cases
      .get_all()
      .into_iter()
      .filter(|c| c.playbook.is_none() && !c.status.is_terminal())
      .collect();
    let suggestions = join_all(
      cases
        .iter()
        .map(|case| self.analysis.suggest_playbook(case, CallOptions::silent())),
    )
    .await;
    for (case, suggestion) in cases.iter().zip(suggestions) {
      degraded += usize::from(suggestion.is_degraded());
      let playbook = suggestion.value.playbook;
      let result = self.stores.cases.update(&case.id, |current| {
        current.playbook.is_none().then(|| {
          let mut next = current.clone();
          next.playbook = Some(playbook);
          next
        })
      });
      changed += usize::from(matches!(result, Ok(Updated::Changed(_))));
    }

    (changed, degraded)
  }

  /// Run ticks every `period` until `shutdown` flips to true.
  ///
  /// A tick in flight when shutdown arrives is dropped along with the
  /// lifecycle passes it queued, so no notification is published after
  /// teardown.
  pub fn spawn(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
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
        tokio::select! {
          biased;
          _ = shutdown.changed() => break,
          _ = self.run_tick() => {}
        }
      }
      self.cancel_pending();
      self.enter(SyncState::Idle);
      debug!("sync loop stopped");
    })
  }
}

/// Apply `rule` to every entity through [`EntityStore::update`]. Returns the
/// number of entities changed.
pub fn apply_rule<T: Entity>(store: &EntityStore<T>, rule: impl Fn(&T) -> Option<T>) -> usize {
  store
    .get_all()
    .iter()
    .filter(|entity| matches!(store.update(entity.id(), &rule), Ok(Updated::Changed(_))))
    .count()
}

fn rule_pass<T, R>(
  store: Arc<EntityStore<T>>,
  (name, guard, changed): (&'static str, PassGuard, Arc<AtomicUsize>),
  rule: R,
) -> impl Future<Output = ()> + Send + 'static
where
  T: Entity,
  R: Fn(&T) -> Option<T> + Send + 'static,
{
  async move {
    if !guard.is_current() {
      debug!(pass = name, "lifecycle pass cancelled by teardown");
      return;
    }
    let count = apply_rule(&store, rule);
    changed.fetch_add(count, Ordering::SeqCst);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::SchedulerConfig;
  use crate::event::Topic;
  use crate::model::{Priority, Severity, ThreatStatus, UserStatus};
  use crate::remote::{HttpRemote, OfflineRemote, RemoteService};
  use crate::resilient::{Provenance, ResilientClient};
  use crate::scheduler::{LoadGauge, SchedulerHandle};
  use crate::sync::feeds::QuietFeeds;
  use chrono::Duration as ChronoDuration;
  use serde_json::json;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn coordinator(stores: &Stores, remote: Arc<dyn RemoteService>, hub: &NotificationHub) -> (SyncCoordinator, SchedulerHandle) {
    coordinator_with_gauge(stores, remote, hub, LoadGauge::new(1))
  }

  fn coordinator_with_gauge(
    stores: &Stores,
    remote: Arc<dyn RemoteService>,
    hub: &NotificationHub,
    gauge: LoadGauge,
  ) -> (SyncCoordinator, SchedulerHandle) {
    let config = Config::default();
    let (scheduler, handle) = BackgroundScheduler::start(SchedulerConfig::default(), Some(Arc::new(gauge)));
    let analysis = AnalysisClient::new(
      remote,
      ResilientClient::new(config.remote.timeout()).with_hub(hub.clone()),
      config.access.clone(),
    );
    let coordinator = SyncCoordinator::new(
      stores.clone(),
      config,
      analysis,
      scheduler,
      Arc::new(QuietFeeds),
      hub.clone(),
    );
    (coordinator, handle)
  }

  fn seeded(now: DateTime<Utc>) -> Stores {
    let stores = Stores::new();
    stores.threats.upsert(Threat {
      id: "t-stale".to_string(),
      indicator: "old.example".to_string(),
      severity: Severity::High,
      confidence: 80,
      last_seen: now - ChronoDuration::days(10),
      ..Threat::default()
    });
    stores.cases.upsert(Case {
      id: "c-late".to_string(),
      title: "Ransomware note on file server".to_string(),
      priority: Priority::Critical,
      created_at: now - ChronoDuration::hours(6),
      ..Case::default()
    });
    stores.users.upsert(User {
      id: "u-gone".to_string(),
      last_activity: now - ChronoDuration::days(200),
      ..User::default()
    });
    stores.devices.upsert(Device {
      id: "d-old".to_string(),
      last_patched: now - ChronoDuration::days(60),
      ..Device::default()
    });
    stores
  }

  #[tokio::test]
  async fn test_offline_tick_applies_rules_and_notifies_once() {
    let now = Utc::now();
    let stores = seeded(now);
    let hub = NotificationHub::new();
    let mut ticks = hub.subscribe(&[Topic::SystemTick]);
    let mut notices = hub.subscribe(&[Topic::UserNotification]);
    let (coordinator, handle) = coordinator(&stores, Arc::new(OfflineRemote), &hub);

    let summary = coordinator.run_tick_at(now).await;

    assert_eq!(stores.threats.get("t-stale").unwrap().confidence, 72);
    assert!(stores.cases.get("c-late").unwrap().sla_breached);
    assert_eq!(
      stores.cases.get("c-late").unwrap().playbook.as_deref(),
      Some("ransomware-containment")
    );
    assert_eq!(stores.users.get("u-gone").unwrap().status, UserStatus::Dormant);
    assert!(!stores.devices.get("d-old").unwrap().compliant);

    assert_eq!(summary.tick, 1);
    assert_eq!(summary.reconciled, 0);
    assert!(summary.updated >= 5);
    assert_eq!(summary.campaign_risk.provenance, Provenance::Local);
    // 5 snapshots + 1 device + 1 case + campaign risk
    assert_eq!(summary.degraded_calls, 8);

    assert_eq!(ticks.drain(), vec![Event::SystemTick(summary)]);
    assert!(notices.drain().is_empty());
    assert_eq!(*coordinator.state().borrow(), SyncState::Idle);
    handle.shutdown().await;
  }

  #[tokio::test]
  async fn test_second_tick_is_stable() {
    let now = Utc::now();
    let stores = seeded(now);
    let hub = NotificationHub::new();
    let (coordinator, handle) = coordinator(&stores, Arc::new(OfflineRemote), &hub);

    coordinator.run_tick_at(now).await;
    let before = stores.threats.get_all();
    let second = coordinator.run_tick_at(now).await;

    assert_eq!(second.updated, 0);
    assert_eq!(stores.threats.get_all(), before);
    handle.shutdown().await;
  }

  #[tokio::test]
  async fn test_remote_snapshot_is_reconciled() {
    let now = Utc::now();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/entities/threats"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([
        {
          "id": "t-stale",
          "indicator": "old.example",
          "confidence": 95,
          "status": "investigating",
          "last_seen": now.to_rfc3339()
        },
        { "id": "t-new", "indicator": "fresh.example", "type": "domain", "last_seen": now.to_rfc3339() }
      ])))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/v1/analysis/campaign-risk"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "score": 40, "level": "medium", "contributing": 2
      })))
      .mount(&server)
      .await;

    let stores = seeded(now);
    let hub = NotificationHub::new();
    let remote = Arc::new(HttpRemote::new(&server.uri(), None).unwrap());
    let (coordinator, handle) = coordinator(&stores, remote, &hub);

    let summary = coordinator.run_tick_at(now).await;

    assert_eq!(summary.reconciled, 2);
    let threat = stores.threats.get("t-stale").unwrap();
    assert_eq!(threat.confidence, 95);
    assert_eq!(threat.status, ThreatStatus::Investigating);
    assert!(stores.threats.get("t-new").is_ok());
    assert_eq!(summary.campaign_risk.provenance, Provenance::Remote);
    assert_eq!(summary.campaign_risk.value.score, 40);
    handle.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_state_machine_phases() {
    struct Hung;

    #[async_trait::async_trait]
    impl RemoteService for Hung {
      async fn fetch_snapshot(&self, _kind: crate::store::EntityKind) -> Result<Vec<serde_json::Value>, crate::remote::RemoteError> {
        std::future::pending().await
      }
      async fn evaluate_compliance(&self, _device: &Device) -> Result<crate::remote::ComplianceVerdict, crate::remote::RemoteError> {
        std::future::pending().await
      }
      async fn suggest_playbook(&self, _case: &Case) -> Result<crate::remote::PlaybookSuggestion, crate::remote::RemoteError> {
        std::future::pending().await
      }
      async fn campaign_risk(&self, _threats: &[Threat]) -> Result<CampaignRisk, crate::remote::RemoteError> {
        std::future::pending().await
      }
    }

    let hub = NotificationHub::new();
    let (coordinator, handle) = coordinator(&Stores::new(), Arc::new(Hung), &hub);
    let coordinator = Arc::new(coordinator);
    let mut state = coordinator.state();

    let running = tokio::spawn({
      let coordinator = Arc::clone(&coordinator);
      async move { coordinator.run_tick().await }
    });

    // Reconciling is too short-lived to observe reliably with nothing to reconcile
    for phase in [SyncState::Fetching, SyncState::Notifying, SyncState::Idle] {
      state.wait_for(|s| *s == phase).await.unwrap();
    }
    let summary = running.await.unwrap();
    assert_eq!(summary.degraded_calls, 6);
    handle.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_no_tick_after_shutdown() {
    let hub = NotificationHub::new();
    let mut ticks = hub.subscribe(&[Topic::SystemTick]);
    let (coordinator, handle) = coordinator(&Stores::new(), Arc::new(OfflineRemote), &hub);
    let (stop, stopped) = watch::channel(false);

    let sync = Arc::new(coordinator).spawn(Duration::from_secs(30), stopped);
    tokio::time::sleep(Duration::from_secs(65)).await;
    stop.send(true).unwrap();
    sync.await.unwrap();

    let delivered = ticks.drain().len();
    assert_eq!(delivered, 3);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(ticks.drain().is_empty());
    handle.shutdown().await;
  }

  #[tokio::test]
  async fn test_online_ticks_do_not_undo_lifecycle_rules() {
    let start = Utc::now();
    let long_ago = (start - ChronoDuration::days(200)).to_rfc3339();
    let server = MockServer::start().await;
    let snapshots = [
      (
        "threats",
        json!([{
          "id": "t-1",
          "indicator": "old.example",
          "type": "domain",
          "confidence": 80,
          "first_seen": long_ago.as_str(),
          "last_seen": long_ago.as_str()
        }]),
      ),
      (
        "users",
        json!([{ "id": "u-1", "name": "Ana", "status": "active", "last_activity": long_ago.as_str() }]),
      ),
      (
        "devices",
        json!([{
          "id": "d-1",
          "hostname": "ws-01",
          "compliant": true,
          "risk_score": 0,
          "findings": [],
          "last_patched": long_ago.as_str()
        }]),
      ),
    ];
    for (kind, body) in snapshots {
      Mock::given(method("GET"))
        .and(path(format!("/api/v1/entities/{}", kind)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    }
    Mock::given(method("POST"))
      .and(path("/api/v1/analysis/compliance"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "compliant": true, "risk_score": 5, "findings": []
      })))
      .mount(&server)
      .await;

    let stores = Stores::new();
    let hub = NotificationHub::new();
    let _forward = hub.watch_store(&stores.users);
    let mut user_changes = hub.subscribe(&[Topic::EntityChanged]);
    let remote = Arc::new(HttpRemote::new(&server.uri(), None).unwrap());
    let (coordinator, handle) = coordinator(&stores, remote, &hub);

    let mut confidence = Vec::new();
    let mut reconciled = Vec::new();
    for day in 0..4 {
      let summary = coordinator.run_tick_at(start + ChronoDuration::days(day)).await;
      reconciled.push(summary.reconciled);
      confidence.push(stores.threats.get("t-1").unwrap().confidence);
      assert_eq!(stores.users.get("u-1").unwrap().status, UserStatus::Dormant);
      let device = stores.devices.get("d-1").unwrap();
      assert!(!device.compliant);
      assert!(device.findings.iter().any(|f| f == PATCH_WINDOW_FINDING));
    }

    // Decay advances one step per day instead of being reset by each snapshot
    assert_eq!(confidence, vec![72, 64, 57, 51]);
    assert_eq!(reconciled, vec![3, 0, 0, 0]);
    // Inserted, then marked dormant; never flipped back
    assert_eq!(user_changes.drain().len(), 2);
    handle.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_teardown_cancels_queued_lifecycle_passes() {
    let stores = Stores::new();
    stores.users.upsert(User {
      id: "u-1".to_string(),
      last_activity: Utc::now() - ChronoDuration::days(200),
      ..User::default()
    });
    let hub = NotificationHub::new();
    let _forward = hub.watch_store(&stores.users);
    let mut changes = hub.subscribe(&[Topic::EntityChanged]);

    // Interactive load keeps the passes queued until the forcing bound
    let gauge = LoadGauge::new(1);
    let busy = gauge.begin();
    let (coordinator, handle) = coordinator_with_gauge(&stores, Arc::new(OfflineRemote), &hub, gauge.clone());
    let (stop, stopped) = watch::channel(false);
    let sync = Arc::new(coordinator).spawn(Duration::from_secs(30), stopped);

    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.send(true).unwrap();
    sync.await.unwrap();
    assert!(changes.drain().is_empty());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(changes.drain().is_empty());
    assert_eq!(stores.users.get("u-1").unwrap().status, UserStatus::Active);

    drop(busy);
    handle.shutdown().await;
  }

  #[tokio::test]
  async fn test_cancel_pending_only_affects_queued_passes() {
    let now = Utc::now();
    let stores = seeded(now);
    let hub = NotificationHub::new();
    let (coordinator, handle) = coordinator(&stores, Arc::new(OfflineRemote), &hub);

    coordinator.cancel_pending();
    coordinator.run_tick_at(now).await;

    assert_eq!(stores.users.get("u-gone").unwrap().status, UserStatus::Dormant);
    handle.shutdown().await;
  }
}
