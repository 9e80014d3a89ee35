//! Security-intelligence entities and the ingestion boundary that normalizes them.

mod impls;
pub mod lenient;
pub mod normalize;
mod types;

pub use normalize::{decode_batch, normalize_indicator, Decoded};
pub use types::{
  Case, CaseStatus, Device, Feed, FeedStatus, Priority, Severity, Threat, ThreatStatus,
  ThreatType, User, UserStatus,
};
