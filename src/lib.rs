//! Adaptive sync and lifecycle engine for a client-resident cache of
//! security-intelligence entities.
//!
//! The engine keeps threats, cases, feeds, users and devices in local
//! stores, reconciles them against a remote service when it is reachable,
//! degrades to local heuristics when it is not, and runs lifecycle rules
//! (decay, SLA breach, circuit cooldown, dormancy) as deferred background
//! work.

pub mod app;
pub mod config;
pub mod event;
pub mod filter;
pub mod logging;
pub mod model;
pub mod remote;
pub mod resilient;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod sync;

pub use app::{Engine, EngineOptions};
pub use config::Config;
pub use event::{Event, NotificationHub, Topic};
pub use resilient::{FallbackResult, Provenance};
pub use store::{EntityStore, NotFound, Stores};
