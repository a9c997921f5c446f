//! # token-gate
//!
//! Shared-secret authentication for the edgegate proxy. Every non-exempt
//! request -- plain HTTP and WebSocket handshakes alike -- must present the
//! configured token before it is forwarded upstream.
//!
//! The gate sees a transport-neutral [`GateRequest`] so that the same policy
//! applies to both request shapes. The only difference between the two is
//! where the credential may come from: plain HTTP requests must use the
//! `x-proxy-token` header, while upgrade handshakes may fall back to a
//! `token` query parameter, because browsers cannot attach arbitrary headers
//! to a WebSocket handshake. The header always wins when both are present,
//! to keep tokens out of access logs whenever a header is available.

use http::Method;
use tracing::warn;

/// Header carrying the client credential.
pub const TOKEN_HEADER: &str = "x-proxy-token";

/// Path exempted from authentication so monitoring works pre-auth.
pub const HEALTH_PATH: &str = "/health";

/// The facts about one inbound request that the gate needs to decide.
///
/// Built per request by the proxy layer and dropped immediately after the
/// decision; nothing here is retained between requests.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    /// Value of the `x-proxy-token` header, if present.
    pub header_token: Option<&'a str>,
    /// Value of the `token` query parameter, if present. Only consulted for
    /// upgrade handshakes.
    pub query_token: Option<&'a str>,
    /// Whether this request is a WebSocket upgrade handshake.
    pub is_upgrade: bool,
}

/// Outcome of authenticating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Unauthorized,
}

/// The authentication gate itself. Immutable after construction; safe to
/// share across connections without locking.
#[derive(Debug)]
pub struct TokenGate {
    shared_token: Option<String>,
    dev_bypass: bool,
}

impl TokenGate {
    /// Build the gate from the resolved configuration.
    ///
    /// A configured token always disables the development bypass, whatever
    /// the environment marker said. An active bypass is announced once here,
    /// at process start, so it can never be enabled silently.
    pub fn new(shared_token: Option<String>, dev_bypass: bool) -> Self {
        let dev_bypass = dev_bypass && shared_token.is_none();
        if dev_bypass {
            warn!("PROXY_TOKEN not set - authentication bypassed (development environment)");
        }
        Self {
            shared_token,
            dev_bypass,
        }
    }

    /// True when the gate waves everything through (development only).
    pub fn bypassed(&self) -> bool {
        self.dev_bypass
    }

    /// Authenticate one request.
    ///
    /// Exemptions are evaluated in a fixed order, each short-circuiting to
    /// [`GateDecision::Allow`]:
    ///
    /// 1. CORS preflight (`OPTIONS`) -- carries no credential by design and
    ///    must complete for CORS to function at all;
    /// 2. the health path on a safe method -- monitoring works pre-auth;
    /// 3. the development bypass.
    ///
    /// Everything else must present the shared token. With no token
    /// configured and no bypass active, the gate fails closed.
    pub fn authenticate(&self, request: &GateRequest<'_>) -> GateDecision {
        if request.method == Method::OPTIONS {
            return GateDecision::Allow;
        }

        if request.path == HEALTH_PATH
            && (request.method == Method::GET || request.method == Method::HEAD)
        {
            return GateDecision::Allow;
        }

        if self.dev_bypass {
            return GateDecision::Allow;
        }

        let expected = match &self.shared_token {
            Some(token) => token.as_str(),
            // No token configured and not in development: nothing can pass.
            None => return GateDecision::Unauthorized,
        };

        let provided = match request.header_token {
            Some(token) => Some(token),
            None if request.is_upgrade => request.query_token,
            None => None,
        };

        match provided {
            Some(token) if token == expected => GateDecision::Allow,
            _ => GateDecision::Unauthorized,
        }
    }
}
