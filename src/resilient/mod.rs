//! Remote-first operations that degrade to local heuristics instead of failing.

pub mod analysis;
mod client;
pub mod fallback;

pub use analysis::AnalysisClient;
pub use client::{CallOptions, FallbackResult, Provenance, ResilientClient};
