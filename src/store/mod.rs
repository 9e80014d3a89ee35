//! Optimistic in-memory entity cache.
//!
//! This module provides the local copy of every entity collection:
//! - One keyed store per entity kind, last-write-wins
//! - Subscriber notification after every committed mutation
//! - Read-modify-write updates serialized per collection
//! - Last-write-wins merging of remote snapshots

mod entity_store;
mod stores;
mod traits;

pub use entity_store::{EntityStore, MergeCounts, NotFound, StoreChange, Unsubscribe, Updated};
pub use stores::Stores;
pub use traits::{Entity, EntityKind};
