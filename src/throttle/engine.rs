//! The throttle facade.
//!
//! `ThrottleEngine` ties the resolver, matcher, strategies, state store and
//! blocking layer into the single decision API the request path calls. One
//! invariant governs everything here: the engine itself must never be the
//! reason legitimate traffic is rejected, so every internal failure
//! resolves to an allow.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::context::RequestContext;
use super::identifier::{self, ThrottleKey};
use super::matcher::{RuleMatch, RuleMatcher};
use super::result::{DenyReason, ThrottleResult};
use super::store::StateStore;
use super::strategy::implementation_for;
use crate::audit::{AuditDispatcher, AuditRecord, AuditSink, TracingAuditSink};
use crate::clock::{SharedClock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{FloodgateError, Result};
use crate::rules::{LimitParams, RuleDefinition, RuleProvider, Strategy};

/// How a check selects the rules to enforce.
pub enum CheckMode {
    /// Enforce a caller-supplied rule, bypassing the rule store.
    Inline(RuleDefinition),
    /// Enforce a single persisted rule. Missing or inactive rules allow.
    ById(Uuid),
    /// Fetch all active rules and enforce every one that matches.
    Auto,
}

/// The embedded throttling engine.
///
/// One instance owns all throttling state; construct it once at startup and
/// share it across request handlers. Construction must happen inside a
/// tokio runtime (the audit worker is spawned immediately).
pub struct ThrottleEngine {
    config: EngineConfig,
    clock: SharedClock,
    store: StateStore,
    matcher: RuleMatcher,
    provider: Arc<dyn RuleProvider>,
    audit: AuditDispatcher,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ThrottleEngine {
    /// Create an engine with the wall clock and the tracing audit sink.
    pub fn new(config: EngineConfig, provider: Arc<dyn RuleProvider>) -> Self {
        Self::with_instrumentation(
            config,
            provider,
            Arc::new(SystemClock),
            Arc::new(TracingAuditSink),
        )
    }

    /// Create an engine with an explicit clock and audit sink.
    pub fn with_instrumentation(
        config: EngineConfig,
        provider: Arc<dyn RuleProvider>,
        clock: SharedClock,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        let audit = AuditDispatcher::spawn(audit_sink, config.audit_queue_capacity);
        Self {
            config,
            clock,
            store: StateStore::new(),
            matcher: RuleMatcher::new(),
            provider,
            audit,
            sweeper: parking_lot::Mutex::new(None),
        }
    }

    /// Decide whether a request may proceed.
    ///
    /// Never returns an error: rule store failures and timeouts resolve to
    /// an allow, and the cause is logged at error level instead.
    pub async fn check(&self, ctx: &RequestContext, mode: CheckMode) -> ThrottleResult {
        let result = match mode {
            CheckMode::Inline(rule) => self.check_inline(ctx, rule),
            CheckMode::ById(id) => self.check_by_id(ctx, id).await,
            CheckMode::Auto => self.check_auto(ctx).await,
        };

        self.emit_audit(ctx, &result);
        result
    }

    fn check_inline(&self, ctx: &RequestContext, rule: RuleDefinition) -> ThrottleResult {
        let endpoint = ctx.endpoint();
        let client_ip = identifier::client_ip(ctx).parse().ok();

        match self.matcher.match_rule(&rule, ctx, &endpoint, client_ip) {
            Some(matched) => self.enforce(ctx, &[matched]),
            None => ThrottleResult::unlimited(),
        }
    }

    async fn check_by_id(&self, ctx: &RequestContext, id: Uuid) -> ThrottleResult {
        let rule = match self.fetch_rule(id).await {
            Ok(Some(rule)) if rule.active => rule,
            Ok(_) => {
                debug!(rule_id = %id, "Rule missing or inactive, allowing");
                return ThrottleResult::unlimited();
            }
            Err(e) => {
                error!(rule_id = %id, error = %e, "Rule lookup failed, failing open");
                return ThrottleResult::unlimited();
            }
        };

        self.check_inline(ctx, rule)
    }

    async fn check_auto(&self, ctx: &RequestContext) -> ThrottleResult {
        let rules = match self.fetch_active_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                error!(error = %e, "Active rule fetch failed, failing open");
                return ThrottleResult::unlimited();
            }
        };

        let matched = self.matcher.matches(&rules, ctx);
        self.enforce(ctx, &matched)
    }

    /// Enforce the matched rules in priority order.
    ///
    /// Every matched rule is counted until one denies; the deny wins the
    /// whole request. An admitted request reports the quota numbers of the
    /// first (highest-priority) matched rule.
    fn enforce(&self, ctx: &RequestContext, matched: &[RuleMatch]) -> ThrottleResult {
        let now_ms = self.clock.now_ms();
        let mut headline: Option<ThrottleResult> = None;

        for candidate in matched {
            let result = self.enforce_one(ctx, candidate, now_ms);
            if !result.allowed {
                return result;
            }
            headline.get_or_insert(result);
        }

        headline.unwrap_or_else(ThrottleResult::unlimited)
    }

    /// Run one rule: blocking layer first, then the strategy.
    fn enforce_one(&self, ctx: &RequestContext, candidate: &RuleMatch, now_ms: u64) -> ThrottleResult {
        let rule = &candidate.rule;
        let key = ThrottleKey::for_rule(ctx, rule.scope, Some(rule.id));
        let limits = LimitParams::from_rule(rule);

        if candidate.hard_deny {
            debug!(rule = %rule.name, key = %key, "Denylisted client, hard deny");
            return ThrottleResult {
                allowed: false,
                limit: Some(limits.max_requests),
                remaining: Some(0),
                reset_at: None,
                retry_after_secs: None,
                reason: Some(DenyReason::AccessDenied),
                rule_id: Some(rule.id),
                scope: Some(rule.scope),
                identifier: Some(key.identifier),
            };
        }

        let base_key = key.to_key_string();

        // A live block short-circuits the strategy entirely; blocked time
        // neither consumes nor refreshes the underlying counter.
        if let Some(block) = self.store.active_block(&base_key, now_ms) {
            let retry = block.blocked_until.saturating_sub(now_ms).div_ceil(1000).max(1);
            debug!(rule = %rule.name, key = %base_key, "Key is blocked");
            return ThrottleResult {
                allowed: false,
                limit: Some(limits.max_requests),
                remaining: Some(0),
                reset_at: Some(block.blocked_until),
                retry_after_secs: Some(retry),
                reason: Some(DenyReason::TemporarilyBlocked),
                rule_id: Some(rule.id),
                scope: Some(rule.scope),
                identifier: Some(key.identifier),
            };
        }

        let counter_key = key.qualified(rule.strategy);
        let strategy = implementation_for(rule.strategy);
        let outcome = self.store.apply(&counter_key, |existing| {
            let outcome = strategy.evaluate(existing, now_ms, &limits);
            let record = outcome.record.clone();
            (outcome, record)
        });

        if !outcome.allowed {
            if let Some(duration_ms) = rule.block_duration_ms.filter(|d| *d > 0) {
                let blocked_until = now_ms + duration_ms;
                self.store.put_block(&base_key, blocked_until);
                info!(
                    rule = %rule.name,
                    key = %base_key,
                    blocked_until,
                    "Limit exceeded, key blocked"
                );
            }
        }

        let reason = (!outcome.allowed).then(|| match rule.strategy {
            Strategy::TokenBucket | Strategy::LeakyBucket => DenyReason::TokenBucketEmpty,
            Strategy::SlidingWindow | Strategy::FixedWindow => DenyReason::RateLimitExceeded,
        });

        ThrottleResult {
            allowed: outcome.allowed,
            limit: Some(limits.max_requests),
            remaining: Some(outcome.remaining),
            reset_at: Some(outcome.reset_at),
            retry_after_secs: outcome.retry_after_secs,
            reason,
            rule_id: Some(rule.id),
            scope: Some(rule.scope),
            identifier: Some(key.identifier),
        }
    }

    fn emit_audit(&self, ctx: &RequestContext, result: &ThrottleResult) {
        self.audit.dispatch(AuditRecord {
            rule_id: result.rule_id,
            scope: result.scope.map(|s| s.as_str().to_string()),
            identifier: result.identifier.clone(),
            allowed: result.allowed,
            remaining: result.remaining,
            ip_address: identifier::client_ip(ctx),
            user_agent: ctx.user_agent.clone(),
            endpoint: ctx.endpoint(),
            retry_after_secs: result.retry_after_secs,
            reason: result.reason.map(|r| r.to_string()),
            timestamp: Utc::now(),
        });
    }

    async fn fetch_rule(&self, id: Uuid) -> Result<Option<RuleDefinition>> {
        let timeout = Duration::from_millis(self.config.rule_fetch_timeout_ms);
        tokio::time::timeout(timeout, self.provider.rule_by_id(id))
            .await
            .map_err(|_| FloodgateError::Timeout(self.config.rule_fetch_timeout_ms))?
    }

    async fn fetch_active_rules(&self) -> Result<Vec<RuleDefinition>> {
        let timeout = Duration::from_millis(self.config.rule_fetch_timeout_ms);
        tokio::time::timeout(timeout, self.provider.active_rules())
            .await
            .map_err(|_| FloodgateError::Timeout(self.config.rule_fetch_timeout_ms))?
    }

    /// Run one sweep now, returning the number of records removed.
    pub fn sweep(&self) -> usize {
        self.store.sweep(self.clock.now_ms())
    }

    /// Start the periodic sweep task.
    ///
    /// Idempotent: a second call replaces nothing and is ignored.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }

        let engine = Arc::clone(self);
        let interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh engine
            // does not sweep an empty store.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                engine.store.sweep(engine.clock.now_ms());
            }
        }));
        info!(
            interval_secs = self.config.sweep_interval_secs,
            "Started state store sweeper"
        );
    }

    /// Stop the sweeper and drain the audit queue.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        self.audit.shutdown().await;
        info!("Throttle engine stopped");
    }

    /// Number of live counter records, for operational introspection.
    pub fn counter_count(&self) -> usize {
        self.store.counter_count()
    }
}
