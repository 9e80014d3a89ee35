//! Lifecycle rules.
//!
//! Each rule is a pure, total function over one entity returning
//! `Cow::Borrowed` when nothing changes and `Cow::Owned` with the modified
//! copy otherwise. Rules are idempotent and independent of each other, so
//! they can run repeatedly and in any order.

pub mod circuit;
pub mod decay;
pub mod dormancy;
pub mod sla;

use std::borrow::Cow;

/// Owned value if the rule changed anything, for [`EntityStore::update`](crate::store::EntityStore::update).
pub fn changed<T: Clone>(outcome: Cow<'_, T>) -> Option<T> {
  match outcome {
    Cow::Owned(next) => Some(next),
    Cow::Borrowed(_) => None,
  }
}
