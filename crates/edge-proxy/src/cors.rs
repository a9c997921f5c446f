//! CORS response shaping for browser clients.
//!
//! The allow/deny decision itself lives in `origin-guard`; this module only
//! renders the response side: the headers attached to ordinary responses for
//! an allowed origin, and the short-circuit answer to a preflight. Denied
//! origins get neither -- the caller returns a 403 without CORS headers, so
//! the browser script never sees a usable response.

use http::header::{self, HeaderMap, HeaderValue};
use http::{Response, StatusCode};

use crate::{empty_body, ProxyBody};

/// Response headers the browser is allowed to read, beyond the CORS-safe
/// defaults.
const EXPOSED_HEADERS: &str = "Content-Length, X-Request-Id";

const ALLOWED_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

/// Attach the CORS response headers for an origin that already passed the
/// allowlist. Credentials are permitted, so the origin is echoed verbatim
/// rather than `*`.
pub fn apply(headers: &mut HeaderMap, origin: &HeaderValue) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
}

/// Answer a CORS preflight without forwarding it. Preflights carry no
/// credential by design, so they bypass the token gate entirely.
pub fn preflight(origin: Option<&HeaderValue>, request_headers: &HeaderMap) -> Response<ProxyBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::NO_CONTENT;

    let headers = response.headers_mut();
    if let Some(origin) = origin {
        apply(headers, origin);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    // Echo whatever headers the browser asked about; the token header is
    // among them on authenticated calls.
    if let Some(requested) = request_headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_echoes_the_origin_and_allows_credentials() {
        let mut headers = HeaderMap::new();
        let origin = HeaderValue::from_static("https://app.example.com");
        apply(&mut headers, &origin);

        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&origin)
        );
        assert_eq!(
            headers
                .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
                .and_then(|v| v.to_str().ok()),
            Some("true")
        );
        assert!(headers
            .get(header::ACCESS_CONTROL_EXPOSE_HEADERS)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("X-Request-Id")));
    }

    #[test]
    fn preflight_is_no_content_and_echoes_requested_headers() {
        let mut request_headers = HeaderMap::new();
        request_headers.insert(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            HeaderValue::from_static("x-proxy-token, content-type"),
        );
        let origin = HeaderValue::from_static("https://app.example.com");

        let response = preflight(Some(&origin), &request_headers);

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
                .and_then(|v| v.to_str().ok()),
            Some("x-proxy-token, content-type")
        );
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .is_some());
    }

    #[test]
    fn preflight_without_origin_sets_no_allow_origin() {
        let response = preflight(None, &HeaderMap::new());
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }
}
