//! Plain-HTTP forwarding to the configured upstream.
//!
//! Requests under `/api` reach this module after passing the origin and
//! token gates. The forward is at-most-once: one attempt, no retry, no
//! fallback host. Both bodies are streamed through as they arrive; a
//! connect failure before any response bytes have been sent surfaces as a
//! 502 from the caller's terminal error handler.

use std::net::SocketAddr;

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Request, Response, Uri};
use hyper::body::Incoming;
use tracing::debug;

use crate::error::GatewayError;
use crate::{incoming_body, GatewayConfig, HttpClient, ProxyBody};

/// Request-identifier header echoed to clients and passed upstream.
pub(crate) const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Hop-by-hop headers (RFC 7230 §6.1) that must not cross the proxy in
/// either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Names listed in the Connection header are hop-by-hop too.
    let listed: Vec<String> = headers
        .get(header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(|token| token.trim().to_ascii_lowercase())
                .filter(|token| !token.is_empty())
                .collect()
        })
        .unwrap_or_default();
    for name in listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Compute the upstream URI for an inbound request: the `/api` prefix is
/// stripped and the query string carried over untouched. Computed fresh per
/// request; the upstream is static but the path never is.
pub(crate) fn forward_target(
    base: &str,
    path: &str,
    query: Option<&str>,
) -> Result<Uri, GatewayError> {
    let stripped = path.strip_prefix("/api").unwrap_or(path);
    let stripped = if stripped.is_empty() { "/" } else { stripped };
    let uri = match query {
        Some(query) => format!("{base}{stripped}?{query}"),
        None => format!("{base}{stripped}"),
    };
    Ok(uri.parse()?)
}

/// Standard forwarded-for augmentation: append this hop to the client
/// chain and record the inbound protocol and host.
fn append_forwarded_headers(
    headers: &mut HeaderMap,
    remote_addr: SocketAddr,
    original_host: Option<&HeaderValue>,
) {
    let ip = remote_addr.ip().to_string();
    let chain = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {ip}"),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    if let Some(host) = original_host {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }
}

/// Forward one request to the target and stream the response back.
pub(crate) async fn forward(
    client: &HttpClient,
    config: &GatewayConfig,
    remote_addr: SocketAddr,
    request_id: &HeaderValue,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, GatewayError> {
    let (mut parts, body) = req.into_parts();

    let target = forward_target(
        config.target_base(),
        parts.uri.path(),
        parts.uri.query(),
    )?;

    let original_host = parts.headers.get(header::HOST).cloned();
    strip_hop_by_hop(&mut parts.headers);
    append_forwarded_headers(&mut parts.headers, remote_addr, original_host.as_ref());

    // The upstream serves its own virtual host.
    if let Ok(host) = HeaderValue::from_str(&config.target_authority()) {
        parts.headers.insert(header::HOST, host);
    }
    parts.headers.insert(X_REQUEST_ID, request_id.clone());

    debug!(
        method = %parts.method,
        target = %target,
        client = %remote_addr,
        "forwarding http request"
    );

    let mut upstream_req = Request::builder()
        .method(parts.method)
        .uri(target)
        .body(incoming_body(body))?;
    *upstream_req.headers_mut() = parts.headers;

    let upstream_res = client.request(upstream_req).await?;

    let (mut res_parts, res_body) = upstream_res.into_parts();
    strip_hop_by_hop(&mut res_parts.headers);

    Ok(Response::from_parts(res_parts, incoming_body(res_body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // forward_target
    // -----------------------------------------------------------------------

    #[test]
    fn strips_the_api_prefix() {
        let uri = forward_target("https://demo.example.com", "/api/foo/bar", None).unwrap();
        assert_eq!(uri.to_string(), "https://demo.example.com/foo/bar");
    }

    #[test]
    fn bare_api_path_maps_to_target_root() {
        let uri = forward_target("https://demo.example.com", "/api", None).unwrap();
        assert_eq!(uri.to_string(), "https://demo.example.com/");
    }

    #[test]
    fn query_string_is_preserved() {
        let uri =
            forward_target("https://demo.example.com", "/api/items", Some("page=2&q=a%20b"))
                .unwrap();
        assert_eq!(
            uri.to_string(),
            "https://demo.example.com/items?page=2&q=a%20b"
        );
    }

    // -----------------------------------------------------------------------
    // strip_hop_by_hop
    // -----------------------------------------------------------------------

    #[test]
    fn removes_standard_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert!(headers.get(header::CONTENT_TYPE).is_some());
    }

    #[test]
    fn removes_headers_named_in_the_connection_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("x-custom-hop"));
        headers.insert("x-custom-hop", HeaderValue::from_static("1"));
        headers.insert("x-kept", HeaderValue::from_static("1"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get("x-custom-hop").is_none());
        assert!(headers.get("x-kept").is_some());
    }

    // -----------------------------------------------------------------------
    // append_forwarded_headers
    // -----------------------------------------------------------------------

    #[test]
    fn forwarded_for_is_appended_to_an_existing_chain() {
        let mut headers = HeaderMap::new();
        headers.insert(&X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1"));
        let addr: SocketAddr = "192.168.1.5:50000".parse().unwrap();

        append_forwarded_headers(&mut headers, addr, None);

        assert_eq!(
            headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()),
            Some("10.0.0.1, 192.168.1.5")
        );
    }

    #[test]
    fn forwarded_host_records_the_inbound_host() {
        let mut headers = HeaderMap::new();
        let host = HeaderValue::from_static("gateway.example.com");
        let addr: SocketAddr = "192.168.1.5:50000".parse().unwrap();

        append_forwarded_headers(&mut headers, addr, Some(&host));

        assert_eq!(headers.get(&X_FORWARDED_HOST), Some(&host));
        assert_eq!(
            headers.get(&X_FORWARDED_PROTO).and_then(|v| v.to_str().ok()),
            Some("http")
        );
    }
}
