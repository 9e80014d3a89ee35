//! The set of entity stores owned by one engine instance.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::model::{decode_batch, Case, Device, Feed, Threat, User};

use super::entity_store::EntityStore;
use super::traits::{Entity, EntityKind};

/// One store per entity kind. Cheap to clone; clones share the same stores.
#[derive(Clone, Default)]
pub struct Stores {
  pub threats: Arc<EntityStore<Threat>>,
  pub cases: Arc<EntityStore<Case>>,
  pub feeds: Arc<EntityStore<Feed>>,
  pub users: Arc<EntityStore<User>>,
  pub devices: Arc<EntityStore<Device>>,
}

impl Stores {
  pub fn new() -> Self {
    Self::default()
  }

  /// Load a seed snapshot from a JSON file of the form
  /// `{ "threats": [...], "cases": [...], ... }`.
  ///
  /// Records go through the same lenient decoding as remote snapshots.
  /// Unknown top-level keys are ignored.
  pub fn load_seed(&self, path: &Path) -> Result<usize> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read seed file {}: {}", path.display(), e))?;
    let root: Value = serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse seed file {}: {}", path.display(), e))?;
    let Value::Object(mut sections) = root else {
      return Err(eyre!("Seed file {} must contain a JSON object", path.display()));
    };

    let mut loaded = 0;
    for kind in EntityKind::ALL {
      let records = match sections.remove(kind.as_str()) {
        Some(Value::Array(records)) => records,
        Some(_) => {
          warn!(%kind, "seed section is not an array, skipping");
          continue;
        }
        None => continue,
      };
      loaded += match kind {
        EntityKind::Threat => seed_into(&self.threats, records),
        EntityKind::Case => seed_into(&self.cases, records),
        EntityKind::Feed => seed_into(&self.feeds, records),
        EntityKind::User => seed_into(&self.users, records),
        EntityKind::Device => seed_into(&self.devices, records),
      };
    }

    info!(loaded, path = %path.display(), "seed snapshot loaded");
    Ok(loaded)
  }

  /// Entity counts per kind, for status output.
  pub fn counts(&self) -> Vec<(EntityKind, usize)> {
    vec![
      (EntityKind::Threat, self.threats.len()),
      (EntityKind::Case, self.cases.len()),
      (EntityKind::Feed, self.feeds.len()),
      (EntityKind::User, self.users.len()),
      (EntityKind::Device, self.devices.len()),
    ]
  }
}

fn seed_into<T: Entity>(store: &EntityStore<T>, records: Vec<Value>) -> usize {
  let decoded = decode_batch::<T>(records);
  if decoded.rejected > 0 {
    warn!(kind = %T::kind(), rejected = decoded.rejected, "seed records dropped");
  }
  store.replace_all(decoded.entities)
}
