use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::event::NotificationHub;
use crate::model::{Case, Device, Feed, Threat, User};
use crate::remote;
use crate::resilient::{AnalysisClient, ResilientClient};
use crate::scheduler::{BackgroundScheduler, LoadGauge, SchedulerHandle};
use crate::store::{Stores, Unsubscribe};
use crate::sync::{telemetry, FeedSource, QuietFeeds, SimulatedFeeds, SyncCoordinator, TickSummary};

/// Startup options that are not part of the config file
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
  /// JSON seed snapshot loaded before the first tick
  pub seed: Option<PathBuf>,
  /// Attach the random feed source instead of the quiet one
  pub simulate_feeds: bool,
}

/// Store subscriptions that republish changes on the hub
struct ChangeForwarding {
  threats: Unsubscribe<Threat>,
  cases: Unsubscribe<Case>,
  feeds: Unsubscribe<Feed>,
  users: Unsubscribe<User>,
  devices: Unsubscribe<Device>,
}

impl ChangeForwarding {
  fn attach(hub: &NotificationHub, stores: &Stores) -> Self {
    Self {
      threats: hub.watch_store(&stores.threats),
      cases: hub.watch_store(&stores.cases),
      feeds: hub.watch_store(&stores.feeds),
      users: hub.watch_store(&stores.users),
      devices: hub.watch_store(&stores.devices),
    }
  }

  fn detach(self) {
    self.threats.unsubscribe();
    self.cases.unsubscribe();
    self.feeds.unsubscribe();
    self.users.unsubscribe();
    self.devices.unsubscribe();
  }
}

/// One engine instance: stores, hub, scheduler and the two periodic loops.
pub struct Engine {
  config: Config,
  stores: Stores,
  hub: NotificationHub,
  gauge: LoadGauge,
  coordinator: Arc<SyncCoordinator>,
  scheduler: SchedulerHandle,
  forwarding: ChangeForwarding,
}

impl Engine {
  /// Wire up an engine. Must be called inside a tokio runtime.
  pub fn new(config: Config, options: EngineOptions) -> Result<Self> {
    let stores = Stores::new();
    if let Some(seed) = &options.seed {
      stores.load_seed(seed)?;
    }

    let hub = NotificationHub::new();
    let forwarding = ChangeForwarding::attach(&hub, &stores);

    let gauge = LoadGauge::new(config.scheduler.busy_threshold);
    let (scheduler, scheduler_handle) =
      BackgroundScheduler::start(config.scheduler.clone(), Some(Arc::new(gauge.clone())));

    let resilient = ResilientClient::new(config.remote.timeout()).with_hub(hub.clone());
    let analysis = AnalysisClient::new(remote::connect(&config)?, resilient, config.access.clone());

    let feeds: Arc<dyn FeedSource> = if options.simulate_feeds {
      Arc::new(SimulatedFeeds::default())
    } else {
      Arc::new(QuietFeeds)
    };

    let coordinator = Arc::new(SyncCoordinator::new(
      stores.clone(),
      config.clone(),
      analysis,
      scheduler,
      feeds,
      hub.clone(),
    ));

    Ok(Self {
      config,
      stores,
      hub,
      gauge,
      coordinator,
      scheduler: scheduler_handle,
      forwarding,
    })
  }

  pub fn stores(&self) -> &Stores {
    &self.stores
  }

  pub fn hub(&self) -> &NotificationHub {
    &self.hub
  }

  /// Interactive hosts mark foreground work here to defer maintenance.
  pub fn load_gauge(&self) -> &LoadGauge {
    &self.gauge
  }

  pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
    &self.coordinator
  }

  /// Run a single sync tick and tear down.
  pub async fn run_once(self) -> Result<TickSummary> {
    let summary = self.coordinator.run_tick().await;
    self.shutdown().await;
    Ok(summary)
  }

  /// Run both loops until Ctrl-C.
  pub async fn run(self) -> Result<()> {
    let (stop_sync, sync_shutdown) = watch::channel(false);
    let (stop_telemetry, telemetry_shutdown) = watch::channel(false);

    let sync = Arc::clone(&self.coordinator).spawn(self.config.sync.interval(), sync_shutdown);
    let telemetry = telemetry::spawn(
      self.stores.clone(),
      self.config.sync.telemetry_interval(),
      telemetry_shutdown,
    );
    info!(
      interval_secs = self.config.sync.interval_secs,
      telemetry_interval_secs = self.config.sync.telemetry_interval_secs,
      entities = ?self.stores.counts(),
      "engine started"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
      warn!(error = %e, "failed to listen for ctrl-c, shutting down");
    }
    info!("shutting down");

    let _ = stop_sync.send(true);
    let _ = stop_telemetry.send(true);
    let _ = sync.await;
    let _ = telemetry.await;
    self.shutdown().await;
    Ok(())
  }

  async fn shutdown(self) {
    self.scheduler.shutdown().await;
    self.forwarding.detach();
  }
}
