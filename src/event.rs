use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

use crate::store::{Entity, EntityKind, EntityStore, StoreChange, Unsubscribe};
use crate::sync::TickSummary;

/// Notification topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
  EntityChanged,
  SystemTick,
  UserNotification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
  Upserted,
  Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
  Info,
  Warning,
}

/// User-visible message, e.g. a degraded remote call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
  pub level: NoticeLevel,
  pub message: String,
  pub at: DateTime<Utc>,
}

impl Notice {
  pub fn warning(message: impl Into<String>) -> Self {
    Self {
      level: NoticeLevel::Warning,
      message: message.into(),
      at: Utc::now(),
    }
  }
}

/// Engine notifications
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
  /// A store committed a mutation
  EntityChanged {
    kind: EntityKind,
    id: String,
    change: ChangeKind,
  },
  /// Coarse "something changed" signal, once per sync tick
  SystemTick(TickSummary),
  UserNotification(Notice),
}

impl Event {
  pub fn topic(&self) -> Topic {
    match self {
      Event::EntityChanged { .. } => Topic::EntityChanged,
      Event::SystemTick(_) => Topic::SystemTick,
      Event::UserNotification(_) => Topic::UserNotification,
    }
  }
}

/// Events buffered per subscriber before the oldest are dropped
pub const DEFAULT_CAPACITY: usize = 1024;

struct Subscriber {
  id: u64,
  topics: Vec<Topic>,
  tx: broadcast::Sender<Event>,
}

struct HubState {
  next_id: u64,
  capacity: usize,
  subscribers: Vec<Subscriber>,
}

/// Publish point for engine notifications.
///
/// Owned by the engine and passed by handle to whoever needs it. Any number
/// of subscribers may attach or detach at any time; events of one topic
/// reach each subscriber in publish order.
///
/// Each subscriber has a bounded queue. A subscriber that falls more than
/// `capacity` events behind loses the oldest ones, counted by
/// [`Subscription::lagged`]; publishing never blocks or grows without bound.
#[derive(Clone)]
pub struct NotificationHub {
  state: Arc<Mutex<HubState>>,
}

impl Default for NotificationHub {
  fn default() -> Self {
    Self::with_capacity(DEFAULT_CAPACITY)
  }
}

impl NotificationHub {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      state: Arc::new(Mutex::new(HubState {
        next_id: 0,
        capacity: capacity.max(1),
        subscribers: Vec::new(),
      })),
    }
  }

  fn lock(&self) -> MutexGuard<'_, HubState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Subscribe to `topics`. An empty slice subscribes to everything.
  pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
    let mut state = self.lock();
    let (tx, rx) = broadcast::channel(state.capacity);
    state.next_id += 1;
    let id = state.next_id;
    state.subscribers.push(Subscriber {
      id,
      topics: topics.to_vec(),
      tx,
    });
    Subscription {
      id,
      rx,
      lagged: 0,
      hub: self.clone(),
    }
  }

  /// Deliver `event` to every interested subscriber. Returns the number reached.
  ///
  /// Subscribers whose receiver was dropped are pruned here.
  pub fn publish(&self, event: Event) -> usize {
    let topic = event.topic();
    let mut state = self.lock();
    let mut delivered = 0;
    state.subscribers.retain(|s| {
      if !s.topics.is_empty() && !s.topics.contains(&topic) {
        return s.tx.receiver_count() > 0;
      }
      match s.tx.send(event.clone()) {
        Ok(_) => {
          delivered += 1;
          true
        }
        Err(_) => false,
      }
    });
    delivered
  }

  pub fn subscriber_count(&self) -> usize {
    self.lock().subscribers.len()
  }

  fn remove(&self, id: u64) {
    self.lock().subscribers.retain(|s| s.id != id);
  }

  /// Forward a store's committed mutations as [`Event::EntityChanged`].
  pub fn watch_store<T: Entity>(&self, store: &EntityStore<T>) -> Unsubscribe<T> {
    let hub = self.clone();
    store.subscribe(move |change: &StoreChange<T>| {
      let change_kind = match change {
        StoreChange::Upserted(_) => ChangeKind::Upserted,
        StoreChange::Deleted { .. } => ChangeKind::Deleted,
      };
      hub.publish(Event::EntityChanged {
        kind: T::kind(),
        id: change.id().to_string(),
        change: change_kind,
      });
    })
  }
}

/// Receiving end of a hub subscription
pub struct Subscription {
  id: u64,
  rx: broadcast::Receiver<Event>,
  lagged: u64,
  hub: NotificationHub,
}

impl Subscription {
  /// Receive the next event. Returns None once unsubscribed.
  pub async fn next(&mut self) -> Option<Event> {
    loop {
      match self.rx.recv().await {
        Ok(event) => return Some(event),
        Err(RecvError::Lagged(skipped)) => self.skip(skipped),
        Err(RecvError::Closed) => return None,
      }
    }
  }

  /// Receive without waiting
  pub fn try_next(&mut self) -> Option<Event> {
    loop {
      match self.rx.try_recv() {
        Ok(event) => return Some(event),
        Err(TryRecvError::Lagged(skipped)) => self.skip(skipped),
        Err(_) => return None,
      }
    }
  }

  /// Events dropped because this subscriber fell behind
  pub fn lagged(&self) -> u64 {
    self.lagged
  }

  fn skip(&mut self, skipped: u64) {
    self.lagged += skipped;
    debug!(subscriber = self.id, skipped, "slow subscriber dropped events");
  }

  /// Drain everything currently queued
  pub fn drain(&mut self) -> Vec<Event> {
    std::iter::from_fn(|| self.try_next()).collect()
  }

  pub fn unsubscribe(self) {
    self.hub.remove(self.id);
  }
}
