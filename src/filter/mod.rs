//! Cheap duplicate detection for high-volume ingestion.

mod bloom;
mod dedup;

pub use bloom::MembershipFilter;
pub use dedup::{DedupOutcome, DedupStats, DeduplicationFilter, Deduplicate};
