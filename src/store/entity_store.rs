//! In-memory keyed collection with change notification.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use thiserror::Error;

use super::traits::{Entity, EntityKind};

/// Tagged lookup failure. Callers handle it locally (e.g. abort one mutation).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} entry '{id}' not found")]
pub struct NotFound {
  pub kind: EntityKind,
  pub id: String,
}

/// A committed mutation, delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange<T> {
  Upserted(T),
  Deleted { id: String },
}

impl<T: Entity> StoreChange<T> {
  pub fn id(&self) -> &str {
    match self {
      Self::Upserted(entity) => entity.id(),
      Self::Deleted { id } => id,
    }
  }
}

/// Outcome of [`EntityStore::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum Updated<T> {
  Changed(T),
  Unchanged,
}

impl<T> Updated<T> {
  pub fn is_changed(&self) -> bool {
    matches!(self, Self::Changed(_))
  }
}

/// Counts from merging a remote snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
  pub inserted: usize,
  pub updated: usize,
  pub unchanged: usize,
}

type Callback<T> = Arc<dyn Fn(&StoreChange<T>) + Send + Sync>;

struct Subscriber<T> {
  id: u64,
  callback: Callback<T>,
}

type SubscriberList<T> = Mutex<Vec<Subscriber<T>>>;

/// Handle returned by [`EntityStore::subscribe`].
#[must_use = "dropping the handle keeps the subscription alive; call unsubscribe() to detach"]
pub struct Unsubscribe<T> {
  id: u64,
  subscribers: Weak<SubscriberList<T>>,
}

impl<T> Unsubscribe<T> {
  /// Detach the subscriber. Returns false if it was already gone.
  pub fn unsubscribe(self) -> bool {
    let Some(subscribers) = self.subscribers.upgrade() else {
      return false;
    };
    let mut list = lock(&subscribers);
    let before = list.len();
    list.retain(|s| s.id != self.id);
    list.len() != before
  }
}

fn lock<G>(mutex: &Mutex<G>) -> MutexGuard<'_, G> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Committed changes waiting for delivery, in commit order.
struct Outbox<T> {
  queue: VecDeque<StoreChange<T>>,
  draining: bool,
}

/// Clears the draining flag if a subscriber panics mid-delivery.
struct DrainGuard<'a, T>(&'a Mutex<Outbox<T>>);

impl<T> Drop for DrainGuard<'_, T> {
  fn drop(&mut self) {
    if std::thread::panicking() {
      lock(self.0).draining = false;
    }
  }
}

/// Keyed collection for one entity kind.
///
/// Writes are serialized through a single writer gate and are last-write-wins.
/// Each committed change is queued while the gate is held and delivered after
/// it is released, so subscribers observe the new state, may read the store,
/// and may write back to it. Delivery follows commit order; a change made from
/// inside a subscriber is delivered once the current change has reached every
/// subscriber.
pub struct EntityStore<T: Entity> {
  entities: RwLock<HashMap<String, T>>,
  write_gate: Mutex<()>,
  outbox: Mutex<Outbox<T>>,
  subscribers: Arc<SubscriberList<T>>,
  next_subscriber: AtomicU64,
}

impl<T: Entity> Default for EntityStore<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Entity> EntityStore<T> {
  pub fn new() -> Self {
    Self {
      entities: RwLock::new(HashMap::new()),
      write_gate: Mutex::new(()),
      outbox: Mutex::new(Outbox {
        queue: VecDeque::new(),
        draining: false,
      }),
      subscribers: Arc::new(Mutex::new(Vec::new())),
      next_subscriber: AtomicU64::new(1),
    }
  }

  /// Create a store pre-populated with `items` (no notifications).
  pub fn with_entities(items: impl IntoIterator<Item = T>) -> Self {
    let store = Self::new();
    {
      let mut map = store.entities.write().unwrap_or_else(PoisonError::into_inner);
      for item in items {
        map.insert(item.id().to_string(), item);
      }
    }
    store
  }

  fn not_found(id: &str) -> NotFound {
    NotFound {
      kind: T::kind(),
      id: id.to_string(),
    }
  }

  /// Snapshot of every entity, ordered by id.
  pub fn get_all(&self) -> Vec<T> {
    let map = self.entities.read().unwrap_or_else(PoisonError::into_inner);
    let mut all: Vec<T> = map.values().cloned().collect();
    all.sort_by(|a, b| a.id().cmp(b.id()));
    all
  }

  pub fn get(&self, id: &str) -> Result<T, NotFound> {
    let map = self.entities.read().unwrap_or_else(PoisonError::into_inner);
    map.get(id).cloned().ok_or_else(|| Self::not_found(id))
  }

  /// First entity matching `predicate`.
  pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
    let map = self.entities.read().unwrap_or_else(PoisonError::into_inner);
    map.values().find(|e| predicate(e)).cloned()
  }

  pub fn len(&self) -> usize {
    self.entities.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Insert or replace the entity under its id and notify every subscriber once.
  pub fn upsert(&self, entity: T) -> T {
    {
      let _gate = lock(&self.write_gate);
      self.commit(entity.clone());
      self.enqueue(StoreChange::Upserted(entity.clone()));
    }
    self.flush();
    entity
  }

  /// Remove an entity, returning the removed value.
  pub fn delete(&self, id: &str) -> Result<T, NotFound> {
    let removed = {
      let _gate = lock(&self.write_gate);
      let removed = self
        .entities
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(id)
        .ok_or_else(|| Self::not_found(id))?;
      self.enqueue(StoreChange::Deleted { id: id.to_string() });
      removed
    };
    self.flush();
    Ok(removed)
  }

  /// Read-modify-write against the current value.
  ///
  /// `f` returns None to leave the entity untouched, in which case no
  /// notification fires. Returning a value equal to the current one is
  /// also treated as unchanged.
  pub fn update<F>(&self, id: &str, f: F) -> Result<Updated<T>, NotFound>
  where
    F: FnOnce(&T) -> Option<T>,
  {
    let outcome = {
      let _gate = lock(&self.write_gate);
      let current = self.get(id)?;
      match f(&current) {
        Some(next) if next != current => {
          self.commit(next.clone());
          self.enqueue(StoreChange::Upserted(next.clone()));
          Updated::Changed(next)
        }
        _ => Updated::Unchanged,
      }
    };
    self.flush();
    Ok(outcome)
  }

  /// Replace the whole collection with `items`.
  ///
  /// Every incoming entity is reported as upserted; ids that disappear are
  /// reported as deleted.
  pub fn replace_all(&self, items: impl IntoIterator<Item = T>) -> usize {
    let count = self.replace_all_queued(items);
    self.flush();
    count
  }

  fn replace_all_queued(&self, items: impl IntoIterator<Item = T>) -> usize {
    let _gate = lock(&self.write_gate);
    let incoming: HashMap<String, T> = items
      .into_iter()
      .map(|item| (item.id().to_string(), item))
      .collect();
    let previous = std::mem::replace(
      &mut *self.entities.write().unwrap_or_else(PoisonError::into_inner),
      incoming.clone(),
    );

    let mut removed: Vec<&String> = previous.keys().filter(|id| !incoming.contains_key(*id)).collect();
    removed.sort();
    for id in removed {
      self.enqueue(StoreChange::Deleted { id: id.clone() });
    }
    let mut upserted: Vec<T> = incoming.into_values().collect();
    upserted.sort_by(|a, b| a.id().cmp(b.id()));
    let count = upserted.len();
    for entity in upserted {
      self.enqueue(StoreChange::Upserted(entity));
    }
    count
  }

  /// Merge a remote snapshot, last-write-wins by [`Entity::observed_at`].
  ///
  /// The remote copy wins ties and wins whenever either side lacks a
  /// timestamp. Entities only present locally are kept.
  pub fn merge_remote(&self, remote: Vec<T>) -> MergeCounts {
    let mut counts = MergeCounts::default();
    for incoming in remote {
      let _gate = lock(&self.write_gate);
      let next = match self.get(incoming.id()) {
        Err(_) => {
          counts.inserted += 1;
          incoming
        }
        Ok(current) => {
          let remote_is_newer = match (current.observed_at(), incoming.observed_at()) {
            (Some(local), Some(remote)) => remote >= local,
            _ => true,
          };
          let merged = current.merge_remote(incoming);
          if !remote_is_newer || merged == current {
            counts.unchanged += 1;
            continue;
          }
          counts.updated += 1;
          merged
        }
      };
      self.commit(next.clone());
      self.enqueue(StoreChange::Upserted(next));
    }
    self.flush();
    counts
  }

  /// Attach a change listener.
  pub fn subscribe<F>(&self, callback: F) -> Unsubscribe<T>
  where
    F: Fn(&StoreChange<T>) + Send + Sync + 'static,
  {
    let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
    lock(&self.subscribers).push(Subscriber {
      id,
      callback: Arc::new(callback),
    });
    Unsubscribe {
      id,
      subscribers: Arc::downgrade(&self.subscribers),
    }
  }

  pub fn subscriber_count(&self) -> usize {
    lock(&self.subscribers).len()
  }

  fn commit(&self, entity: T) {
    self
      .entities
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(entity.id().to_string(), entity);
  }

  fn enqueue(&self, change: StoreChange<T>) {
    lock(&self.outbox).queue.push_back(change);
  }

  /// Deliver queued changes unless another caller is already doing so, in
  /// which case that caller delivers ours too.
  fn flush(&self) {
    {
      let mut outbox = lock(&self.outbox);
      if outbox.draining {
        return;
      }
      outbox.draining = true;
    }
    let _guard = DrainGuard(&self.outbox);
    loop {
      let next = {
        let mut outbox = lock(&self.outbox);
        match outbox.queue.pop_front() {
          Some(change) => change,
          None => {
            outbox.draining = false;
            return;
          }
        }
      };
      self.notify(&next);
    }
  }

  fn notify(&self, change: &StoreChange<T>) {
    // Snapshot so callbacks can (un)subscribe without deadlocking
    let callbacks: Vec<Callback<T>> = lock(&self.subscribers)
      .iter()
      .map(|s| Arc::clone(&s.callback))
      .collect();
    for callback in callbacks {
      callback(change);
    }
  }
}
