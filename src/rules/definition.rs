//! Rule definitions consumed by the engine.
//!
//! Rules are owned and administered by the external rule store; the engine
//! treats each definition as an immutable snapshot for the duration of one
//! decision. `validate` exists for load-time rejection of malformed rules;
//! the engine itself only applies the defensive clamps in [`LimitParams`].

use std::net::IpAddr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FloodgateError, Result};

/// Minimum accepted window span. Anything shorter is a configuration error.
pub const MIN_WINDOW_MS: u64 = 1000;
/// Floor applied to configured refill rates, in tokens per second.
pub const MIN_REFILL_RATE: f64 = 0.1;

/// The counting algorithm a rule enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    SlidingWindow,
    TokenBucket,
    LeakyBucket,
    FixedWindow,
}

impl Strategy {
    /// Stable name used to qualify state store keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SlidingWindow => "sliding-window",
            Strategy::TokenBucket => "token-bucket",
            Strategy::LeakyBucket => "leaky-bucket",
            Strategy::FixedWindow => "fixed-window",
        }
    }
}

/// The dimension along which requests are grouped for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Global,
    User,
    Ip,
    Endpoint,
    UserEndpoint,
    IpEndpoint,
}

impl Scope {
    /// Stable name used in throttle keys and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::User => "user",
            Scope::Ip => "ip",
            Scope::Endpoint => "endpoint",
            Scope::UserEndpoint => "user-endpoint",
            Scope::IpEndpoint => "ip-endpoint",
        }
    }
}

/// A single throttling rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Rule identifier, assigned by the administrative surface.
    pub id: Uuid,
    /// Human-readable rule name.
    pub name: String,
    /// Counting algorithm.
    pub strategy: Strategy,
    /// Grouping dimension.
    pub scope: Scope,
    /// Maximum admitted requests per window.
    pub max_requests: u64,
    /// Window span in milliseconds.
    pub window_ms: u64,
    /// Bucket capacity for token/leaky bucket. Defaults to `max_requests`.
    #[serde(default)]
    pub bucket_size: Option<u64>,
    /// Refill rate in tokens per second for token/leaky bucket.
    /// Defaults to `max_requests / (window_ms / 1000)`.
    #[serde(default)]
    pub refill_rate: Option<f64>,
    /// Once a denial occurs, short-circuit all decisions for the key for
    /// this long. Zero or absent means no blocking.
    #[serde(default)]
    pub block_duration_ms: Option<u64>,
    /// Regex matched against `"<METHOD> <PATH>"`. Absent means any endpoint.
    #[serde(default)]
    pub endpoint_pattern: Option<String>,
    /// Roles this rule applies to. Empty means all roles.
    #[serde(default)]
    pub user_roles: Vec<String>,
    /// IP literals or CIDR blocks exempt from this rule.
    #[serde(default)]
    pub ip_allowlist: Vec<String>,
    /// IP literals or CIDR blocks hard-denied by this rule.
    #[serde(default)]
    pub ip_denylist: Vec<String>,
    /// Inactive rules are never matched.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Higher priority rules are evaluated and enforced first.
    #[serde(default)]
    pub priority: i32,
}

fn default_active() -> bool {
    true
}

impl RuleDefinition {
    /// Minimal constructor for the common case; optional fields start unset.
    pub fn new(name: &str, strategy: Strategy, scope: Scope, max_requests: u64, window_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            strategy,
            scope,
            max_requests,
            window_ms,
            bucket_size: None,
            refill_rate: None,
            block_duration_ms: None,
            endpoint_pattern: None,
            user_roles: Vec::new(),
            ip_allowlist: Vec::new(),
            ip_denylist: Vec::new(),
            active: true,
            priority: 0,
        }
    }

    /// Reject malformed definitions at load time.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(FloodgateError::Config(format!(
                "rule '{}': max_requests must be greater than 0",
                self.name
            )));
        }
        if self.window_ms < MIN_WINDOW_MS {
            return Err(FloodgateError::Config(format!(
                "rule '{}': window_ms must be at least {}",
                self.name, MIN_WINDOW_MS
            )));
        }
        if let Some(size) = self.bucket_size {
            if size == 0 {
                return Err(FloodgateError::Config(format!(
                    "rule '{}': bucket_size must be at least 1",
                    self.name
                )));
            }
        }
        if let Some(rate) = self.refill_rate {
            if rate < MIN_REFILL_RATE {
                return Err(FloodgateError::Config(format!(
                    "rule '{}': refill_rate must be at least {}",
                    self.name, MIN_REFILL_RATE
                )));
            }
        }
        if let Some(ref pattern) = self.endpoint_pattern {
            regex::Regex::new(pattern).map_err(|e| {
                FloodgateError::Config(format!(
                    "rule '{}': invalid endpoint_pattern: {}",
                    self.name, e
                ))
            })?;
        }
        for entry in self.ip_allowlist.iter().chain(self.ip_denylist.iter()) {
            if parse_ip_entry(entry).is_none() {
                return Err(FloodgateError::Config(format!(
                    "rule '{}': invalid IP list entry '{}'",
                    self.name, entry
                )));
            }
        }
        Ok(())
    }
}

/// Effective numeric parameters for one strategy evaluation.
///
/// Derivation applies the token/leaky bucket defaults and clamps impossible
/// values that slipped past the administrative surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitParams {
    /// Admits per window.
    pub max_requests: u64,
    /// Window span in milliseconds.
    pub window_ms: u64,
    /// Bucket capacity (token/leaky bucket).
    pub bucket_size: u64,
    /// Tokens per second (token/leaky bucket).
    pub refill_rate: f64,
}

impl LimitParams {
    /// Derive the effective parameters from a rule definition.
    pub fn from_rule(rule: &RuleDefinition) -> Self {
        let max_requests = rule.max_requests.max(1);
        let window_ms = rule.window_ms.max(MIN_WINDOW_MS);
        let bucket_size = rule.bucket_size.unwrap_or(max_requests).max(1);
        let refill_rate = rule
            .refill_rate
            .unwrap_or(max_requests as f64 / (window_ms as f64 / 1000.0))
            .max(MIN_REFILL_RATE);

        Self {
            max_requests,
            window_ms,
            bucket_size,
            refill_rate,
        }
    }
}

/// Parse an allow/deny list entry as a CIDR block or a bare IP literal.
///
/// Bare literals become single-address networks (/32 for v4, /128 for v6).
pub fn parse_ip_entry(entry: &str) -> Option<IpNet> {
    if let Ok(net) = entry.parse::<IpNet>() {
        return Some(net);
    }
    match entry.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => Ipv4Net::new(v4, 32).ok().map(IpNet::V4),
        Ok(IpAddr::V6(v6)) => Ipv6Net::new(v6, 128).ok().map(IpNet::V6),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_serde_kebab_case() {
        let s: Strategy = serde_yaml::from_str("token-bucket").unwrap();
        assert_eq!(s, Strategy::TokenBucket);
        assert_eq!(serde_yaml::to_string(&Strategy::SlidingWindow).unwrap().trim(), "sliding-window");
    }

    #[test]
    fn test_rule_yaml_defaults() {
        let yaml = r#"
id: 9f0e2f9c-4b1c-4f52-a6ce-5a2ff9f2f001
name: checkout-burst
strategy: fixed-window
scope: ip
max_requests: 30
window_ms: 60000
"#;
        let rule: RuleDefinition = serde_yaml::from_str(yaml).unwrap();
        assert!(rule.active);
        assert_eq!(rule.priority, 0);
        assert!(rule.user_roles.is_empty());
        assert!(rule.endpoint_pattern.is_none());
        rule.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_short_window() {
        let mut rule = RuleDefinition::new("bad", Strategy::FixedWindow, Scope::Ip, 10, 500);
        assert!(rule.validate().is_err());
        rule.window_ms = 1000;
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_max_requests() {
        let rule = RuleDefinition::new("bad", Strategy::FixedWindow, Scope::Ip, 0, 1000);
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_pattern_and_ips() {
        let mut rule = RuleDefinition::new("bad", Strategy::FixedWindow, Scope::Ip, 10, 1000);
        rule.endpoint_pattern = Some("(unclosed".to_string());
        assert!(rule.validate().is_err());

        rule.endpoint_pattern = None;
        rule.ip_denylist = vec!["not-an-ip".to_string()];
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_limit_params_token_bucket_defaults() {
        let rule = RuleDefinition::new("tb", Strategy::TokenBucket, Scope::User, 10, 2000);
        let params = LimitParams::from_rule(&rule);
        assert_eq!(params.bucket_size, 10);
        assert!((params.refill_rate - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_limit_params_clamps() {
        let mut rule = RuleDefinition::new("clamped", Strategy::TokenBucket, Scope::User, 10, 2000);
        rule.max_requests = 0;
        rule.window_ms = 10;
        rule.refill_rate = Some(0.0001);
        let params = LimitParams::from_rule(&rule);
        assert_eq!(params.max_requests, 1);
        assert_eq!(params.window_ms, MIN_WINDOW_MS);
        assert!((params.refill_rate - MIN_REFILL_RATE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_ip_entry() {
        assert_eq!(
            parse_ip_entry("192.168.0.0/16").unwrap().to_string(),
            "192.168.0.0/16"
        );
        assert_eq!(
            parse_ip_entry("10.0.0.1").unwrap().to_string(),
            "10.0.0.1/32"
        );
        assert!(parse_ip_entry("fe80::1").is_some());
        assert!(parse_ip_entry("garbage").is_none());
    }
}
