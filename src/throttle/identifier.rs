//! Identifier resolution and throttle keys.
//!
//! `resolve` is pure and total: the same context and scope always produce
//! the same identifier, and absent fields degrade to fixed fallbacks
//! instead of failing.

use std::fmt;

use uuid::Uuid;

use super::context::RequestContext;
use crate::rules::Scope;

/// Identifier used when no user is attached to the request.
pub const ANONYMOUS_USER: &str = "anonymous";
/// Identifier used when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";
/// Delimiter joining the two halves of a composite identifier.
const COMPOSITE_DELIMITER: char = ':';

/// Resolve the identifier for a context under the given scope.
pub fn resolve(ctx: &RequestContext, scope: Scope) -> String {
    match scope {
        Scope::Global => "global".to_string(),
        Scope::User => user_identifier(ctx),
        Scope::Ip => client_ip(ctx),
        Scope::Endpoint => ctx.endpoint(),
        Scope::UserEndpoint => {
            format!("{}{}{}", user_identifier(ctx), COMPOSITE_DELIMITER, ctx.endpoint())
        }
        Scope::IpEndpoint => {
            format!("{}{}{}", client_ip(ctx), COMPOSITE_DELIMITER, ctx.endpoint())
        }
    }
}

fn user_identifier(ctx: &RequestContext) -> String {
    ctx.user_id
        .as_deref()
        .unwrap_or(ANONYMOUS_USER)
        .to_string()
}

/// Resolve the client address.
///
/// Precedence is forwarded-for (first hop, trimmed), then real-IP, then the
/// transport peer. This is the standard load-balancer convention; changing
/// the order misattributes clients behind proxies.
pub fn client_ip(ctx: &RequestContext) -> String {
    ctx.forwarded_for
        .as_deref()
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or(ctx.real_ip.as_deref())
        .or(ctx.peer_addr.as_deref())
        .unwrap_or(UNKNOWN_IP)
        .to_string()
}

/// The key one rule counts a request under.
///
/// Derived per decision, never stored on its own. The string form keys the
/// block map; [`ThrottleKey::qualified`] prefixes the strategy name for the
/// counter map so the same key never mixes records of two algorithms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    /// Grouping dimension.
    pub scope: Scope,
    /// Resolved identifier for that dimension.
    pub identifier: String,
    /// Owning rule, when the decision runs under a persisted rule.
    pub rule_id: Option<Uuid>,
}

impl ThrottleKey {
    /// Build the key for a context under a scope, attributed to a rule.
    pub fn for_rule(ctx: &RequestContext, scope: Scope, rule_id: Option<Uuid>) -> Self {
        Self {
            scope,
            identifier: resolve(ctx, scope),
            rule_id,
        }
    }

    /// Stable string form: `<scope>:<identifier>` plus `#<rule_id>` when
    /// rule-attributed.
    pub fn to_key_string(&self) -> String {
        match self.rule_id {
            Some(id) => format!("{}:{}#{}", self.scope.as_str(), self.identifier, id),
            None => format!("{}:{}", self.scope.as_str(), self.identifier),
        }
    }

    /// Counter map key, qualified by the algorithm that owns the record.
    pub fn qualified(&self, strategy: crate::rules::Strategy) -> String {
        format!("{}|{}", strategy.as_str(), self.to_key_string())
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key_string())
    }
}
