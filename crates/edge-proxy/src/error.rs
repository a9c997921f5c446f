use thiserror::Error;

/// Failures that terminate a single request or tunnel.
///
/// Nothing here is fatal to the process: the server maps every variant to a
/// terminal client response (or a closed connection) and keeps accepting.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The upstream could not be reached, timed out, or refused the request.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    /// A forward target could not be assembled into a valid URI.
    #[error("invalid forward target: {0}")]
    Target(#[from] http::uri::InvalidUri),

    /// An outbound request or response could not be built.
    #[error("http message assembly failed: {0}")]
    Message(#[from] http::Error),

    /// The HTTPS connector could not be constructed at startup.
    #[error("https connector setup failed: {0}")]
    Tls(String),
}
