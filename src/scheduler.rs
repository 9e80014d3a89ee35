//! Deferred execution of low-priority maintenance work.
//!
//! Tasks wait until a [`CapacityProbe`] reports spare capacity, so periodic
//! maintenance does not compete with interactive work. A task that has
//! waited `max_wait` runs regardless, which keeps the queue live under
//! constant load.

use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::config::SchedulerConfig;

/// Reports whether the host has room for background work right now.
pub trait CapacityProbe: Send + Sync {
  fn has_capacity(&self) -> bool;
}

/// Counts in-flight interactive operations.
#[derive(Clone)]
pub struct LoadGauge {
  in_flight: Arc<AtomicUsize>,
  busy_threshold: usize,
}

impl LoadGauge {
  pub fn new(busy_threshold: usize) -> Self {
    Self {
      in_flight: Arc::new(AtomicUsize::new(0)),
      busy_threshold: busy_threshold.max(1),
    }
  }

  /// Mark an interactive operation as running until the guard drops.
  pub fn begin(&self) -> InteractiveGuard {
    self.in_flight.fetch_add(1, Ordering::SeqCst);
    InteractiveGuard {
      in_flight: Arc::clone(&self.in_flight),
    }
  }

  pub fn in_flight(&self) -> usize {
    self.in_flight.load(Ordering::SeqCst)
  }
}

impl CapacityProbe for LoadGauge {
  fn has_capacity(&self) -> bool {
    self.in_flight() < self.busy_threshold
  }
}

/// RAII marker for one interactive operation
pub struct InteractiveGuard {
  in_flight: Arc<AtomicUsize>,
}

impl Drop for InteractiveGuard {
  fn drop(&mut self) {
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
  }
}

/// Completion handle for a scheduled task
pub struct TaskTicket {
  done: oneshot::Receiver<()>,
}

impl TaskTicket {
  /// Wait for the task. Returns false if the scheduler stopped before it ran.
  pub async fn wait(self) -> bool {
    self.done.await.is_ok()
  }
}

struct Queued {
  name: String,
  job: BoxFuture<'static, ()>,
  enqueued: Instant,
  done: oneshot::Sender<()>,
}

/// Enqueue side of the scheduler. Cheap to clone.
#[derive(Clone)]
pub struct BackgroundScheduler {
  tx: mpsc::UnboundedSender<Queued>,
}

/// Owns the dispatcher task. Dropping it also stops the dispatcher.
pub struct SchedulerHandle {
  shutdown: watch::Sender<bool>,
  dispatcher: JoinHandle<()>,
}

impl SchedulerHandle {
  /// Stop dispatching. Queued and running tasks are dropped and their
  /// tickets resolve to false.
  pub async fn shutdown(self) {
    let _ = self.shutdown.send(true);
    let _ = self.dispatcher.await;
  }
}

impl BackgroundScheduler {
  /// Spawn the dispatcher. With no probe, every task runs after
  /// `fallback_delay`.
  pub fn start(config: SchedulerConfig, probe: Option<Arc<dyn CapacityProbe>>) -> (Self, SchedulerHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = tokio::spawn(dispatch(rx, shutdown_rx, probe, config));
    (
      Self { tx },
      SchedulerHandle {
        shutdown: shutdown_tx,
        dispatcher,
      },
    )
  }

  /// Enqueue a low-priority task.
  pub fn schedule<F>(&self, name: impl Into<String>, task: F) -> TaskTicket
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let (done_tx, done_rx) = oneshot::channel();
    let queued = Queued {
      name: name.into(),
      job: Box::pin(task),
      enqueued: Instant::now(),
      done: done_tx,
    };
    // A closed channel drops the sender, so the ticket resolves to false
    let _ = self.tx.send(queued);
    TaskTicket { done: done_rx }
  }
}

async fn dispatch(
  mut rx: mpsc::UnboundedReceiver<Queued>,
  mut shutdown: watch::Receiver<bool>,
  probe: Option<Arc<dyn CapacityProbe>>,
  config: SchedulerConfig,
) {
  let mut queue: VecDeque<Queued> = VecDeque::new();

  loop {
    if queue.is_empty() {
      tokio::select! {
        biased;
        _ = shutdown.changed() => break,
        next = rx.recv() => match next {
          Some(task) => queue.push_back(task),
          None => break,
        },
      }
    }
    while let Ok(task) = rx.try_recv() {
      queue.push_back(task);
    }
    let Some(task) = queue.pop_front() else {
      continue;
    };

    let ready = match &probe {
      None => {
        tokio::select! {
          biased;
          _ = shutdown.changed() => break,
          _ = sleep(config.fallback_delay()) => true,
        }
      }
      Some(probe) if probe.has_capacity() => true,
      Some(_) => {
        let waited = task.enqueued.elapsed();
        if waited >= config.max_wait() {
          debug!(task = %task.name, waited_ms = waited.as_millis() as u64, "forcing deferred task");
          true
        } else {
          false
        }
      }
    };

    if !ready {
      trace!(task = %task.name, "no spare capacity, deferring");
      queue.push_front(task);
      tokio::select! {
        biased;
        _ = shutdown.changed() => break,
        _ = sleep(config.poll_interval()) => continue,
      }
    }

    let Queued { name, job, done, .. } = task;
    trace!(task = %name, "running background task");
    tokio::select! {
      biased;
      _ = shutdown.changed() => break,
      _ = job => {
        let _ = done.send(());
      }
    }
  }

  if !queue.is_empty() {
    debug!(dropped = queue.len(), "scheduler stopped with queued tasks");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicBool;
  use std::time::Duration;

  fn config() -> SchedulerConfig {
    SchedulerConfig {
      max_wait_ms: 5_000,
      poll_interval_ms: 100,
      fallback_delay_ms: 50,
      busy_threshold: 1,
    }
  }

  fn flag_task(flag: &Arc<AtomicBool>) -> impl Future<Output = ()> + Send + 'static {
    let flag = Arc::clone(flag);
    async move { flag.store(true, Ordering::SeqCst) }
  }

  #[tokio::test(start_paused = true)]
  async fn test_without_probe_runs_after_fallback_delay() {
    let (scheduler, handle) = BackgroundScheduler::start(config(), None);
    let ran = Arc::new(AtomicBool::new(false));
    let start = Instant::now();

    assert!(scheduler.schedule("decay", flag_task(&ran)).wait().await);

    assert!(ran.load(Ordering::SeqCst));
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(start.elapsed() < Duration::from_millis(500));
    handle.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_idle_gauge_runs_immediately() {
    let gauge = LoadGauge::new(1);
    let (scheduler, handle) = BackgroundScheduler::start(config(), Some(Arc::new(gauge)));
    let start = Instant::now();

    assert!(scheduler.schedule("sla", async {}).wait().await);
    assert!(start.elapsed() < Duration::from_millis(50));
    handle.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_constant_load_still_makes_progress() {
    let gauge = LoadGauge::new(1);
    let _busy = gauge.begin();
    let (scheduler, handle) = BackgroundScheduler::start(config(), Some(Arc::new(gauge.clone())));
    let start = Instant::now();

    let first = scheduler.schedule("a", async {});
    let second = scheduler.schedule("b", async {});
    assert!(first.wait().await);
    assert!(second.wait().await);

    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_secs(6));
    handle.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_runs_once_capacity_frees_up() {
    let gauge = LoadGauge::new(1);
    let busy = gauge.begin();
    let (scheduler, handle) = BackgroundScheduler::start(config(), Some(Arc::new(gauge.clone())));
    let start = Instant::now();

    let ticket = scheduler.schedule("dormancy", async {});
    tokio::spawn(async move {
      sleep(Duration::from_secs(1)).await;
      drop(busy);
    });

    assert!(ticket.wait().await);
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(gauge.in_flight(), 0);
    handle.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_shutdown_resolves_pending_tickets_false() {
    let gauge = LoadGauge::new(1);
    let _busy = gauge.begin();
    let (scheduler, handle) = BackgroundScheduler::start(config(), Some(Arc::new(gauge.clone())));
    let ran = Arc::new(AtomicBool::new(false));

    let ticket = scheduler.schedule("never", flag_task(&ran));
    sleep(Duration::from_millis(250)).await;
    handle.shutdown().await;

    assert!(!ticket.wait().await);
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!scheduler.schedule("late", async {}).wait().await);
  }

  #[test]
  fn test_gauge_counts_guards() {
    let gauge = LoadGauge::new(2);
    let a = gauge.begin();
    assert!(gauge.has_capacity());
    let b = gauge.begin();
    assert!(!gauge.has_capacity());
    drop(a);
    drop(b);
    assert_eq!(gauge.in_flight(), 0);
  }
}
