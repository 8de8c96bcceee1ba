//! The throttling engine: resolution, strategies, state, matching, facade.

mod context;
mod engine;
pub mod identifier;
mod matcher;
mod result;
mod store;
mod strategy;

pub use context::RequestContext;
pub use engine::{CheckMode, ThrottleEngine};
pub use identifier::ThrottleKey;
pub use matcher::{RuleMatch, RuleMatcher};
pub use result::{DenyReason, ThrottleResult};
pub use store::{BlockRecord, StateStore};
pub use strategy::{implementation_for, CounterRecord, RateStrategy, StrategyOutcome};
