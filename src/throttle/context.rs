//! Request context handed to the engine by the request path.

use serde::{Deserialize, Serialize};

/// Already-identified request attributes the engine counts against.
///
/// Every field except method and path is optional; resolution degrades to
/// fixed fallback identifiers when a field is absent. The three IP
/// candidates mirror the usual proxy chain: the caller passes the raw
/// forwarded-for header value, the real-IP header value, and the
/// transport-level peer address, and the resolver picks in that order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    /// Authenticated user id, if any.
    pub user_id: Option<String>,
    /// Role of the authenticated user, if any.
    pub role: Option<String>,
    /// Raw `X-Forwarded-For` header value (comma-separated hops).
    pub forwarded_for: Option<String>,
    /// Raw `X-Real-IP` header value.
    pub real_ip: Option<String>,
    /// Transport-level peer address.
    pub peer_addr: Option<String>,
    /// HTTP method, upper-cased by the caller.
    pub method: String,
    /// Request path.
    pub path: String,
    /// User agent string, carried through to audit records.
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Create a context for the given method and path.
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Set the authenticated user.
    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Set the user's role.
    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    /// Set the forwarded-for header value.
    pub fn with_forwarded_for(mut self, value: &str) -> Self {
        self.forwarded_for = Some(value.to_string());
        self
    }

    /// Set the real-IP header value.
    pub fn with_real_ip(mut self, value: &str) -> Self {
        self.real_ip = Some(value.to_string());
        self
    }

    /// Set the transport peer address.
    pub fn with_peer_addr(mut self, value: &str) -> Self {
        self.peer_addr = Some(value.to_string());
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, value: &str) -> Self {
        self.user_agent = Some(value.to_string());
        self
    }

    /// The endpoint identity string rules match against.
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}
