//! Rule matching.
//!
//! Given the active rule set and a request context, the matcher yields the
//! rules that apply to the request, most important first. Allow/deny list
//! overrides are resolved here; quota accounting happens later.

use std::net::IpAddr;

use dashmap::DashMap;
use regex::Regex;
use tracing::{debug, warn};

use super::context::RequestContext;
use super::identifier;
use crate::rules::{parse_ip_entry, RuleDefinition};

/// One applicable rule for a request.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    /// The matched rule.
    pub rule: RuleDefinition,
    /// The client IP is on the rule's denylist: deny with zero quota,
    /// bypassing the strategy entirely.
    pub hard_deny: bool,
}

/// Matches rule definitions against request contexts.
///
/// Compiled endpoint patterns are cached so repeat decisions against the
/// same rule set stay cheap.
#[derive(Debug, Default)]
pub struct RuleMatcher {
    pattern_cache: DashMap<String, Regex>,
}

impl RuleMatcher {
    /// Create a matcher with an empty pattern cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// All rules applicable to the request, priority descending.
    ///
    /// Inactive rules never match. Equal priorities keep the rule store's
    /// ordering.
    pub fn matches(&self, rules: &[RuleDefinition], ctx: &RequestContext) -> Vec<RuleMatch> {
        let endpoint = ctx.endpoint();
        let client_ip = identifier::client_ip(ctx).parse::<IpAddr>().ok();

        let mut candidates: Vec<&RuleDefinition> = rules.iter().filter(|r| r.active).collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        candidates
            .into_iter()
            .filter_map(|rule| self.match_rule(rule, ctx, &endpoint, client_ip))
            .collect()
    }

    /// Evaluate a single rule's applicability to the request.
    pub fn match_rule(
        &self,
        rule: &RuleDefinition,
        ctx: &RequestContext,
        endpoint: &str,
        client_ip: Option<IpAddr>,
    ) -> Option<RuleMatch> {
        if !rule.active {
            return None;
        }

        if let Some(ref pattern) = rule.endpoint_pattern {
            if !self.pattern_matches(pattern, endpoint) {
                return None;
            }
        }

        if !rule.user_roles.is_empty() {
            match ctx.role.as_deref() {
                Some(role) if rule.user_roles.iter().any(|r| r == role) => {}
                _ => return None,
            }
        }

        if let Some(ip) = client_ip {
            if ip_in_list(ip, &rule.ip_allowlist) {
                debug!(
                    rule = %rule.name,
                    ip = %ip,
                    "Client IP allowlisted, rule bypassed"
                );
                return None;
            }
        }

        let hard_deny = client_ip.is_some_and(|ip| ip_in_list(ip, &rule.ip_denylist));

        Some(RuleMatch {
            rule: rule.clone(),
            hard_deny,
        })
    }

    fn pattern_matches(&self, pattern: &str, endpoint: &str) -> bool {
        if let Some(compiled) = self.pattern_cache.get(pattern) {
            return compiled.is_match(endpoint);
        }
        match Regex::new(pattern) {
            Ok(compiled) => {
                let matched = compiled.is_match(endpoint);
                self.pattern_cache.insert(pattern.to_string(), compiled);
                matched
            }
            Err(e) => {
                // validate() rejects these at load time; a pattern arriving
                // here anyway must not take the rule down with it.
                warn!(pattern, error = %e, "Skipping rule with invalid endpoint pattern");
                false
            }
        }
    }
}

/// Whether an address is covered by any entry in an allow/deny list.
///
/// Unparseable entries are skipped with a warning.
pub fn ip_in_list(ip: IpAddr, list: &[String]) -> bool {
    list.iter().any(|entry| match parse_ip_entry(entry) {
        Some(net) => net.contains(&ip),
        None => {
            warn!(entry, "Ignoring unparseable IP list entry");
            false
        }
    })
}
