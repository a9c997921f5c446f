//! # edge-proxy
//!
//! The forwarding core of edgegate: a single-upstream edge gateway that
//! authenticates inbound HTTP and WebSocket-upgrade traffic and relays it to
//! the configured target host.
//!
//! # Architecture
//!
//! ```text
//! Browser/CLI  --HTTP-->  edge-proxy  --HTTP(S)-->  target host
//!      |                     |
//!      |               [origin-guard]   (cross-origin HTTP only)
//!      |               [token-gate]     (all non-exempt traffic)
//!      |                     |
//!      +--WS upgrade--> raw byte tunnel <--WS upgrade--+
//! ```
//!
//! Plain requests under `/api` are forwarded with the prefix stripped and
//! both bodies streamed, never buffered. Upgrade handshakes are
//! authenticated (header token first, `token` query parameter as the
//! browser fallback), normalized (credential stripped from the forwarded
//! target, `Origin` rewritten to the upstream's own origin), and then
//! spliced into a bidirectional byte tunnel.
//!
//! Every connection runs in its own task; any failure terminates that
//! connection alone, never the process.

pub mod config;
pub mod cors;
pub mod error;
pub mod forward;
pub mod server;
pub mod tunnel;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use server::Gateway;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;

/// Boxed error type carried by proxied body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified body type for every response the gateway produces, whether a
/// small fixed body or a streamed upstream one.
pub type ProxyBody = BoxBody<Bytes, BoxError>;

/// HTTPS-capable client shared by the HTTP forwarder and the WS tunnel.
pub(crate) type HttpClient = Client<HttpsConnector<HttpConnector>, ProxyBody>;

pub(crate) fn full_body(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

pub(crate) fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// Adapt a hyper body into the unified streaming type without buffering.
pub(crate) fn incoming_body(body: hyper::body::Incoming) -> ProxyBody {
    body.map_err(|err| Box::new(err) as BoxError).boxed()
}
