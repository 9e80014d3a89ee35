//! Background loops keeping the local stores current.
//!
//! Two independent loops share the stores: the sync loop reconciles against
//! the remote service, applies lifecycle rules and ingests feeds; the
//! telemetry loop refreshes fast-moving device and feed metrics. Both write
//! only through `EntityStore::update`, so neither loses the other's fields.

mod coordinator;
pub mod feeds;
mod ingest;
pub mod telemetry;

pub use coordinator::{apply_rule, SyncCoordinator, SyncState, TickSummary};
pub use feeds::{FeedError, FeedSource, QuietFeeds, SimulatedFeeds};
pub use ingest::{IngestReport, Ingestor};
