//! WebSocket upgrade interception and byte tunneling.
//!
//! An upgrade handshake walks a fixed sequence: parse the request target,
//! extract (and strip) the `token` query parameter, authenticate, rewrite
//! the `Origin` header to the upstream's own origin, then forward the
//! handshake and splice both upgraded streams into a raw bidirectional
//! tunnel. The sequence is terminal once resolved; every failure path ends
//! in a closed connection, never an unwound task.
//!
//! No frame parsing happens here. Once both sides have upgraded, the
//! gateway is a dumb pipe: bytes are relayed in arrival order until either
//! end closes, and a close or error on one side tears down the other.

use futures_util::future;
use http::header::{self, HeaderValue};
use http::{Request, Response, StatusCode, Uri};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::io::{copy_bidirectional, AsyncWriteExt};
use tracing::{debug, warn};

use token_gate::{GateDecision, GateRequest, TokenGate, TOKEN_HEADER};

use crate::error::GatewayError;
use crate::forward::X_REQUEST_ID;
use crate::{empty_body, incoming_body, GatewayConfig, HttpClient, ProxyBody};

/// Hop headers that must not reach the upstream handshake. `Connection` and
/// `Upgrade` deliberately stay: the upstream needs them to switch protocols.
const HANDSHAKE_DROP: &[&str] = &[
    "proxy-connection",
    "keep-alive",
    "te",
    "transfer-encoding",
    "trailers",
];

/// True when the request asks the connection to switch protocols.
pub(crate) fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    let connection_upgrade = req
        .headers()
        .get(header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    connection_upgrade && req.headers().contains_key(header::UPGRADE)
}

/// Split a request target into the path-and-query to forward and the
/// credential found in a `token` query parameter, if any.
///
/// Every `token` pair is removed -- the credential must never reach the
/// upstream -- while the remaining parameters keep their original relative
/// order and encoding. The first token value is form-decoded and retained
/// as the fallback credential. There is no failure mode: a target that does
/// not parse as expected simply yields no token.
pub(crate) fn strip_token_param(path_and_query: &str) -> (String, Option<String>) {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, query),
        None => return (path_and_query.to_string(), None),
    };

    let mut kept: Vec<&str> = Vec::new();
    let mut token = None;

    for pair in query.split('&') {
        let key = pair.split('=').next().unwrap_or(pair);
        if key == "token" {
            if token.is_none() {
                token = url::form_urlencoded::parse(pair.as_bytes())
                    .next()
                    .map(|(_, value)| value.into_owned());
            }
        } else if !pair.is_empty() {
            kept.push(pair);
        }
    }

    let rebuilt = if kept.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", kept.join("&"))
    };
    (rebuilt, token)
}

/// The typed rejection for a handshake that failed authentication: a 401 on
/// the not-yet-upgraded connection, no body, connection closed.
pub(crate) fn unauthorized_handshake() -> Response<ProxyBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Authenticate and forward one upgrade handshake, then tunnel the raw
/// streams until either side closes.
pub(crate) async fn forward_upgrade(
    client: &HttpClient,
    config: &GatewayConfig,
    gate: &TokenGate,
    request_id: &HeaderValue,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, GatewayError> {
    let raw_target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let (forward_path, query_token) = strip_token_param(raw_target);

    let header_token = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    let decision = gate.authenticate(&GateRequest {
        method: req.method(),
        path: req.uri().path(),
        header_token,
        query_token: query_token.as_deref(),
        is_upgrade: true,
    });
    if decision == GateDecision::Unauthorized {
        let peer = req
            .headers()
            .get(header::ORIGIN)
            .or_else(|| req.headers().get(header::HOST))
            .and_then(|value| value.to_str().ok())
            .unwrap_or("<unknown>");
        warn!(peer, "websocket upgrade rejected: missing or invalid token");
        return Ok(unauthorized_handshake());
    }

    let target: Uri = format!("{}{forward_path}", config.target_base()).parse()?;

    let mut builder = Request::builder()
        .method(req.method())
        .uri(target)
        .version(req.version());
    for (name, value) in req.headers() {
        builder = builder.header(name, value);
    }

    let (parts, body) = req.into_parts();
    let mut upstream_req = builder.body(incoming_body(body))?;

    let headers = upstream_req.headers_mut();
    // Some upstreams enforce same-origin on the handshake; present the
    // tunnel as a same-origin client.
    if let Ok(origin) = HeaderValue::from_str(&config.target_origin()) {
        headers.insert(header::ORIGIN, origin);
    }
    if let Ok(host) = HeaderValue::from_str(&config.target_authority()) {
        headers.insert(header::HOST, host);
    }
    for name in HANDSHAKE_DROP {
        headers.remove(*name);
    }
    headers.insert(X_REQUEST_ID, request_id.clone());

    debug!(
        target = %config.target_ws_display(),
        path = %forward_path,
        "forwarding websocket handshake"
    );

    let upstream_res = client.request(upstream_req).await?;

    if upstream_res.status() != StatusCode::SWITCHING_PROTOCOLS {
        warn!(status = %upstream_res.status(), "upstream declined websocket upgrade");
        let (res_parts, res_body) = upstream_res.into_parts();
        return Ok(Response::from_parts(res_parts, incoming_body(res_body)));
    }

    // Mirror the 101 to the client, then splice the two raw streams.
    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    for (name, value) in upstream_res.headers() {
        response.headers_mut().insert(name, value.clone());
    }
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("upgrade"));

    let client_side = Request::from_parts(parts, ());
    let tunnel_id = request_id.clone();
    tokio::spawn(async move {
        match future::try_join(
            hyper::upgrade::on(client_side),
            hyper::upgrade::on(upstream_res),
        )
        .await
        {
            Ok((client_upgraded, upstream_upgraded)) => {
                let mut client_io = TokioIo::new(client_upgraded);
                let mut upstream_io = TokioIo::new(upstream_upgraded);

                match copy_bidirectional(&mut client_io, &mut upstream_io).await {
                    Ok((to_upstream, to_client)) => {
                        debug!(request_id = ?tunnel_id, to_upstream, to_client, "tunnel closed");
                    }
                    Err(err) => {
                        debug!(request_id = ?tunnel_id, %err, "tunnel closed with error");
                    }
                }

                // Teardown is best-effort and independent per side; a failed
                // shutdown on one must not leave the other half-open.
                let _ = client_io.shutdown().await;
                let _ = upstream_io.shutdown().await;
            }
            Err(err) => {
                warn!(request_id = ?tunnel_id, %err, "websocket upgrade completion failed");
            }
        }
    });

    Ok(response)
}
