//! The four counting algorithms.
//!
//! Each strategy is a pure transformation from `(existing record, now,
//! limits)` to `(decision, successor record)`. No strategy touches shared
//! state or the wall clock, so every decision is reproducible under an
//! injected clock.

use crate::rules::{LimitParams, Strategy};

/// Per-key counter state held in the state store.
///
/// `tokens` and `last_refill_at` are only meaningful for the bucket
/// strategies; the window strategies carry them at their initial values.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterRecord {
    /// Requests observed in the current window.
    pub count: u64,
    /// When the current window ends (epoch ms). Also the sweep horizon:
    /// a record is removable once this has passed.
    pub window_reset_at: u64,
    /// Available tokens (bucket strategies).
    pub tokens: f64,
    /// Last refill instant (epoch ms, bucket strategies).
    pub last_refill_at: u64,
}

/// The outcome of one strategy evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutcome {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Quota left after this request.
    pub remaining: u64,
    /// When the counted window resets (epoch ms).
    pub reset_at: u64,
    /// Seconds the caller should wait before retrying, on a deny.
    pub retry_after_secs: Option<u64>,
    /// Successor record to store for the key.
    pub record: CounterRecord,
}

/// A rate-limiting algorithm.
pub trait RateStrategy: Send + Sync {
    /// Evaluate one request against the existing record for its key.
    fn evaluate(
        &self,
        existing: Option<&CounterRecord>,
        now_ms: u64,
        limits: &LimitParams,
    ) -> StrategyOutcome;
}

/// Look up the implementation for a strategy kind.
pub fn implementation_for(strategy: Strategy) -> &'static dyn RateStrategy {
    match strategy {
        Strategy::FixedWindow => &FixedWindow,
        Strategy::SlidingWindow => &SlidingWindow,
        Strategy::TokenBucket => &TokenBucket,
        Strategy::LeakyBucket => &LeakyBucket,
    }
}

/// Seconds until `later_ms`, rounded up. Never returns zero on a deny path.
fn secs_until(now_ms: u64, later_ms: u64) -> u64 {
    let delta = later_ms.saturating_sub(now_ms);
    delta.div_ceil(1000).max(1)
}

/// Fixed calendar windows aligned to `floor(now / window) * window`.
///
/// All keys observed in the same boundary share one counter that resets
/// hard at the boundary. A client can spend one full quota just before the
/// boundary and another just after; that 2x edge burst is an accepted
/// property of this strategy, not a defect.
pub struct FixedWindow;

impl RateStrategy for FixedWindow {
    fn evaluate(
        &self,
        existing: Option<&CounterRecord>,
        now_ms: u64,
        limits: &LimitParams,
    ) -> StrategyOutcome {
        match existing {
            Some(record) if record.window_reset_at > now_ms => {
                let count = record.count.saturating_add(1);
                let allowed = count <= limits.max_requests;
                let successor = CounterRecord {
                    count,
                    ..record.clone()
                };
                StrategyOutcome {
                    allowed,
                    remaining: limits.max_requests.saturating_sub(count),
                    reset_at: record.window_reset_at,
                    retry_after_secs: (!allowed)
                        .then(|| secs_until(now_ms, record.window_reset_at)),
                    record: successor,
                }
            }
            _ => {
                let boundary = now_ms / limits.window_ms * limits.window_ms;
                let reset_at = boundary + limits.window_ms;
                fresh_window_outcome(now_ms, reset_at, limits)
            }
        }
    }
}

/// Decaying single counter: the window starts at the first request and the
/// counter resets wholesale once it elapses.
///
/// This is a variable-phase fixed window per key, not a sliding log. The
/// weaker semantic is intentional: O(1) memory per key and exactly the
/// behavior callers have built against. Do not upgrade it to a log or
/// bucketed approximation.
pub struct SlidingWindow;

impl RateStrategy for SlidingWindow {
    fn evaluate(
        &self,
        existing: Option<&CounterRecord>,
        now_ms: u64,
        limits: &LimitParams,
    ) -> StrategyOutcome {
        match existing {
            Some(record) if record.window_reset_at > now_ms => {
                let count = record.count.saturating_add(1);
                let allowed = count <= limits.max_requests;
                let successor = CounterRecord {
                    count,
                    ..record.clone()
                };
                StrategyOutcome {
                    allowed,
                    remaining: limits.max_requests.saturating_sub(count),
                    reset_at: record.window_reset_at,
                    retry_after_secs: (!allowed)
                        .then(|| secs_until(now_ms, record.window_reset_at)),
                    record: successor,
                }
            }
            _ => fresh_window_outcome(now_ms, now_ms + limits.window_ms, limits),
        }
    }
}

/// First observation of a window strategy: initialize and admit.
fn fresh_window_outcome(now_ms: u64, reset_at: u64, limits: &LimitParams) -> StrategyOutcome {
    StrategyOutcome {
        allowed: true,
        remaining: limits.max_requests - 1,
        reset_at,
        retry_after_secs: None,
        record: CounterRecord {
            count: 1,
            window_reset_at: reset_at,
            tokens: 0.0,
            last_refill_at: now_ms,
        },
    }
}

/// Classic token bucket: starts full, refills continuously, admits while at
/// least one whole token is available. Allows bursts up to the bucket size.
pub struct TokenBucket;

impl RateStrategy for TokenBucket {
    fn evaluate(
        &self,
        existing: Option<&CounterRecord>,
        now_ms: u64,
        limits: &LimitParams,
    ) -> StrategyOutcome {
        bucket_evaluate(existing, now_ms, limits, limits.bucket_size as f64)
    }
}

/// Same refill and consume math as the token bucket, but the bucket starts
/// at one token instead of full. New keys ramp up at the refill rate rather
/// than getting an initial burst; that smoother start is the distinguishing
/// behavior between the two bucket strategies.
pub struct LeakyBucket;

impl RateStrategy for LeakyBucket {
    fn evaluate(
        &self,
        existing: Option<&CounterRecord>,
        now_ms: u64,
        limits: &LimitParams,
    ) -> StrategyOutcome {
        bucket_evaluate(existing, now_ms, limits, 1.0)
    }
}

/// Shared bucket accounting. Continuous (not tick-based) refill:
/// `tokens = min(capacity, tokens + elapsed_secs * refill_rate)`.
fn bucket_evaluate(
    existing: Option<&CounterRecord>,
    now_ms: u64,
    limits: &LimitParams,
    initial_tokens: f64,
) -> StrategyOutcome {
    let capacity = limits.bucket_size as f64;

    let (mut tokens, count) = match existing {
        Some(record) => {
            let elapsed_secs = now_ms.saturating_sub(record.last_refill_at) as f64 / 1000.0;
            let refilled = (record.tokens + elapsed_secs * limits.refill_rate).min(capacity);
            (refilled, record.count)
        }
        None => (initial_tokens.min(capacity), 0),
    };

    let allowed = tokens >= 1.0;
    if allowed {
        tokens -= 1.0;
    }

    let retry_after_secs =
        (!allowed).then(|| ((1.0 - tokens) / limits.refill_rate).ceil().max(1.0) as u64);

    // The reset horizon doubles as the sweep horizon: a bucket untouched for
    // a full window is refilled to capacity on its next observation anyway,
    // so its record can be dropped.
    let reset_at = now_ms + limits.window_ms;

    StrategyOutcome {
        allowed,
        remaining: tokens.floor() as u64,
        reset_at,
        retry_after_secs,
        record: CounterRecord {
            count: count.saturating_add(1),
            window_reset_at: reset_at,
            tokens,
            last_refill_at: now_ms,
        },
    }
}
