//! Decision results returned to the request path.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rules::Scope;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    /// A window strategy's quota is exhausted.
    RateLimitExceeded,
    /// A bucket strategy has no whole token available.
    TokenBucketEmpty,
    /// A block from an earlier denial is still in force.
    TemporarilyBlocked,
    /// The client IP is on the rule's denylist.
    AccessDenied,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DenyReason::RateLimitExceeded => "Rate limit exceeded",
            DenyReason::TokenBucketEmpty => "Token bucket empty",
            DenyReason::TemporarilyBlocked => "Temporarily blocked",
            DenyReason::AccessDenied => "Access denied",
        };
        write!(f, "{}", text)
    }
}

/// The outcome of one throttle check.
///
/// `remaining = None` means no rule matched the request and no quota
/// applies. Never persisted; the caller turns it into response headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleResult {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The governing rule's quota, when one matched.
    pub limit: Option<u64>,
    /// Quota left after this request, when a rule matched.
    pub remaining: Option<u64>,
    /// When the governing window resets (epoch ms).
    pub reset_at: Option<u64>,
    /// Seconds to wait before retrying, on a deny.
    pub retry_after_secs: Option<u64>,
    /// Denial cause, absent on allows.
    pub reason: Option<DenyReason>,
    /// The governing rule, when a persisted rule matched.
    pub rule_id: Option<Uuid>,
    /// Scope the request was counted under.
    pub scope: Option<Scope>,
    /// Resolved identifier the request was counted under.
    pub identifier: Option<String>,
}

impl ThrottleResult {
    /// An allow with no matching rule: nothing was counted.
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            limit: None,
            remaining: None,
            reset_at: None,
            retry_after_secs: None,
            reason: None,
            rule_id: None,
            scope: None,
            identifier: None,
        }
    }

    /// Header name/value pairs for the request-path integration contract.
    ///
    /// `X-RateLimit-Reset` is reported in unix seconds; `Retry-After` only
    /// appears on denials that carry a wait hint.
    pub fn rate_limit_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(4);
        if let Some(limit) = self.limit {
            headers.push(("X-RateLimit-Limit", limit.to_string()));
        }
        if let Some(remaining) = self.remaining {
            headers.push(("X-RateLimit-Remaining", remaining.to_string()));
        }
        if let Some(reset_at) = self.reset_at {
            headers.push(("X-RateLimit-Reset", (reset_at / 1000).to_string()));
        }
        if let Some(retry) = self.retry_after_secs {
            headers.push(("Retry-After", retry.to_string()));
        }
        headers
    }

    /// Status code the caller is expected to surface.
    ///
    /// Denylist blocks are a 403; all other denials are a 429.
    pub fn http_status(&self) -> u16 {
        if self.allowed {
            200
        } else if self.reason == Some(DenyReason::AccessDenied) {
            403
        } else {
            429
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings_are_fixed() {
        assert_eq!(DenyReason::RateLimitExceeded.to_string(), "Rate limit exceeded");
        assert_eq!(DenyReason::TokenBucketEmpty.to_string(), "Token bucket empty");
        assert_eq!(DenyReason::TemporarilyBlocked.to_string(), "Temporarily blocked");
        assert_eq!(DenyReason::AccessDenied.to_string(), "Access denied");
    }

    #[test]
    fn test_unlimited_has_no_headers() {
        let result = ThrottleResult::unlimited();
        assert!(result.rate_limit_headers().is_empty());
        assert_eq!(result.http_status(), 200);
    }

    #[test]
    fn test_headers_and_status_on_deny() {
        let result = ThrottleResult {
            allowed: false,
            limit: Some(10),
            remaining: Some(0),
            reset_at: Some(1_700_000_123_400),
            retry_after_secs: Some(2),
            reason: Some(DenyReason::RateLimitExceeded),
            rule_id: None,
            scope: Some(Scope::Ip),
            identifier: Some("10.0.0.1".to_string()),
        };

        let headers = result.rate_limit_headers();
        assert!(headers.contains(&("X-RateLimit-Limit", "10".to_string())));
        assert!(headers.contains(&("X-RateLimit-Remaining", "0".to_string())));
        assert!(headers.contains(&("X-RateLimit-Reset", "1700000123".to_string())));
        assert!(headers.contains(&("Retry-After", "2".to_string())));
        assert_eq!(result.http_status(), 429);
    }

    #[test]
    fn test_denylist_block_is_403() {
        let result = ThrottleResult {
            allowed: false,
            limit: Some(10),
            remaining: Some(0),
            reset_at: None,
            retry_after_secs: None,
            reason: Some(DenyReason::AccessDenied),
            rule_id: None,
            scope: Some(Scope::Ip),
            identifier: Some("198.51.100.40".to_string()),
        };
        assert_eq!(result.http_status(), 403);
    }
}
