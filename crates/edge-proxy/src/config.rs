use std::net::SocketAddr;

use url::Url;

/// Process-wide gateway configuration.
///
/// Loaded once at startup (see the `edgegate` binary) and shared read-only
/// with every connection task; nothing in here changes after construction,
/// which is what makes unsynchronized concurrent request handling safe.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the gateway listens on.
    pub listen_addr: SocketAddr,
    /// Base URL of the single upstream everything is forwarded to.
    pub target: Url,
    /// Shared secret clients must present. `None` means no token is
    /// configured; whether that rejects everything or bypasses the gate is
    /// decided by `dev_bypass`.
    pub shared_token: Option<String>,
    /// Disable the token check. Only honored when no token is configured;
    /// the token gate re-checks that invariant on construction.
    pub dev_bypass: bool,
    /// Raw allowlist entries (exact origins and `*` wildcard patterns).
    pub allowed_origins: Vec<String>,
}

impl GatewayConfig {
    /// Target base without a trailing slash, ready for path concatenation
    /// and display. `Url` normalizes a bare host to end in `/`, which would
    /// otherwise leak double slashes into forward targets.
    pub fn target_base(&self) -> &str {
        self.target.as_str().trim_end_matches('/')
    }

    /// `host[:port]` of the target, for the upstream `Host` header.
    pub fn target_authority(&self) -> String {
        let host = self.target.host_str().unwrap_or_default();
        match self.target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Origin of the target (`scheme://host[:port]`), used to rewrite the
    /// `Origin` header on forwarded WebSocket handshakes.
    pub fn target_origin(&self) -> String {
        self.target.origin().ascii_serialization()
    }

    /// The target with its scheme flipped to the streaming-transport
    /// equivalent (`http` -> `ws`, `https` -> `wss`). The tunnel itself
    /// speaks plain HTTP during the handshake; this form is for operators.
    pub fn target_ws_display(&self) -> String {
        let base = self.target_base();
        match base.split_once("://") {
            Some(("https", rest)) => format!("wss://{rest}"),
            Some(("http", rest)) => format!("ws://{rest}"),
            _ => base.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(target: &str) -> GatewayConfig {
        GatewayConfig {
            listen_addr: "127.0.0.1:3000".parse().unwrap(),
            target: Url::parse(target).unwrap(),
            shared_token: None,
            dev_bypass: false,
            allowed_origins: Vec::new(),
        }
    }

    #[test]
    fn target_base_has_no_trailing_slash() {
        assert_eq!(
            config("https://demo.example.com").target_base(),
            "https://demo.example.com"
        );
        assert_eq!(
            config("https://demo.example.com/").target_base(),
            "https://demo.example.com"
        );
    }

    #[test]
    fn target_authority_includes_explicit_port_only() {
        assert_eq!(
            config("https://demo.example.com").target_authority(),
            "demo.example.com"
        );
        assert_eq!(
            config("http://localhost:8080").target_authority(),
            "localhost:8080"
        );
    }

    #[test]
    fn ws_display_flips_the_scheme() {
        assert_eq!(
            config("https://demo.example.com").target_ws_display(),
            "wss://demo.example.com"
        );
        assert_eq!(
            config("http://localhost:8080").target_ws_display(),
            "ws://localhost:8080"
        );
    }

    #[test]
    fn target_origin_is_scheme_and_authority() {
        assert_eq!(
            config("https://demo.example.com/base/path").target_origin(),
            "https://demo.example.com"
        );
    }
}
