//! Floodgate - Embedded Request Throttling Engine
//!
//! This crate implements the rate-limiting engine for the marketplace
//! backend: per-request admit/deny decisions under concurrent access, with
//! four competing counting algorithms, scope-based identifier resolution,
//! priority-ordered rule matching with IP allow/deny overrides, and a
//! blocking layer for repeat offenders. Rules are supplied by an external
//! store through the [`rules::RuleProvider`] trait and can change at
//! runtime without a restart; the engine itself holds all counting state
//! in memory and fails open whenever it cannot decide reliably.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod rules;
pub mod throttle;

pub use config::EngineConfig;
pub use error::{FloodgateError, Result};
pub use throttle::{CheckMode, RequestContext, ThrottleEngine, ThrottleResult};
