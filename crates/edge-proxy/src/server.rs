//! Accept loop, request routing, and the terminal error handler.
//!
//! Every accepted connection runs in its own task; a failing connection
//! logs and dies alone. The request handler is infallible at the hyper
//! boundary: any internal failure that surfaces before response headers are
//! sent becomes a 502, and faults after headers are flushed end the body
//! stream, which terminates the connection without a second status line.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use http::header::{self, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use origin_guard::OriginAllowlist;
use token_gate::{GateDecision, GateRequest, TokenGate, HEALTH_PATH, TOKEN_HEADER};

use crate::error::GatewayError;
use crate::{cors, forward, tunnel};
use crate::{full_body, GatewayConfig, HttpClient, ProxyBody};

/// The gateway: gate state plus the shared upstream client.
///
/// Cheap to clone (arcs and a pooled client); one clone per connection.
#[derive(Clone)]
pub struct Gateway {
    config: Arc<GatewayConfig>,
    allowlist: Arc<OriginAllowlist>,
    gate: Arc<TokenGate>,
    client: HttpClient,
}

impl Gateway {
    /// Build the gateway from its resolved configuration: compile the
    /// allowlist, construct the token gate, and set up the HTTPS-capable
    /// upstream client.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        // rustls needs a process-wide crypto provider; installing twice is
        // an error, so the first caller wins.
        static RUSTLS_INIT: OnceLock<Result<(), ()>> = OnceLock::new();
        let init = RUSTLS_INIT.get_or_init(|| {
            rustls::crypto::ring::default_provider()
                .install_default()
                .map_err(|_| ())
        });
        if init.is_err() {
            return Err(GatewayError::Tls(
                "failed to install rustls crypto provider".to_string(),
            ));
        }

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let https_connector = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|err| GatewayError::Tls(format!("failed to load native TLS roots: {err}")))?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client: HttpClient = Client::builder(TokioExecutor::new()).build(https_connector);

        let allowlist = OriginAllowlist::compile(&config.allowed_origins);
        info!(rules = allowlist.len(), "origin allowlist compiled");

        let gate = TokenGate::new(config.shared_token.clone(), config.dev_bypass);

        Ok(Self {
            config: Arc::new(config),
            allowlist: Arc::new(allowlist),
            gate: Arc::new(gate),
            client,
        })
    }

    /// Run the gateway.
    ///
    /// Binds the listen address and loops forever accepting connections;
    /// each one is served (with upgrade support) in its own task.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(
            addr = %self.config.listen_addr,
            target = %self.config.target_base(),
            "edgegate listening; forwarding /api/* and ws upgrades"
        );

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let gateway = self.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let gateway = gateway.clone();
                    async move { gateway.handle(req, remote_addr).await }
                });

                let connection = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades();
                if let Err(err) = connection.await {
                    debug!(%remote_addr, %err, "connection ended with error");
                }
            });
        }
    }

    /// Handle one request. Infallible by construction: every error becomes
    /// a terminal response here, before headers have gone out.
    async fn handle(
        self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<ProxyBody>, Infallible> {
        let request_id = Uuid::new_v4();
        let header_id = HeaderValue::from_str(&request_id.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("edgegate"));

        let result = if tunnel::is_upgrade_request(&req) {
            tunnel::forward_upgrade(&self.client, &self.config, &self.gate, &header_id, req).await
        } else {
            self.handle_http(req, remote_addr, &header_id).await
        };

        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                error!(%request_id, %remote_addr, %err, "proxy error");
                bad_gateway()
            }
        };
        response.headers_mut().insert(forward::X_REQUEST_ID, header_id);
        Ok(response)
    }

    /// The plain-HTTP path: origin allowlist, preflight short-circuit,
    /// token gate, then routing.
    async fn handle_http(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
        request_id: &HeaderValue,
    ) -> Result<Response<ProxyBody>, GatewayError> {
        let origin = req.headers().get(header::ORIGIN).cloned();

        // Cross-origin gate first: a denied origin never reaches the
        // forwarder, and the 403 carries no CORS headers so the browser
        // script sees nothing usable.
        if let Some(origin_value) = &origin {
            match origin_value.to_str() {
                Ok(declared) if self.allowlist.allows(Some(declared)) => {}
                Ok(declared) => {
                    warn!(origin = declared, "blocking cross-origin request");
                    return Ok(cors_blocked());
                }
                Err(_) => {
                    warn!("blocking request with malformed Origin header");
                    return Ok(cors_blocked());
                }
            }
        }

        if req.method() == Method::OPTIONS {
            return Ok(cors::preflight(origin.as_ref(), req.headers()));
        }

        let header_token = req
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        let decision = self.gate.authenticate(&GateRequest {
            method: req.method(),
            path: req.uri().path(),
            header_token,
            // Query credentials are an upgrade-only fallback; plain HTTP
            // must use the header.
            query_token: None,
            is_upgrade: false,
        });
        if decision == GateDecision::Unauthorized {
            debug!(path = %req.uri().path(), "rejecting request without valid token");
            return Ok(unauthorised());
        }

        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let mut response = if path == HEALTH_PATH && (method == Method::GET || method == Method::HEAD)
        {
            self.health()
        } else if path == "/" && method == Method::GET {
            self.banner()
        } else if path == "/api" || path.starts_with("/api/") {
            forward::forward(&self.client, &self.config, remote_addr, request_id, req).await?
        } else {
            not_found()
        };

        if let Some(origin_value) = &origin {
            cors::apply(response.headers_mut(), origin_value);
        }
        Ok(response)
    }

    fn health(&self) -> Response<ProxyBody> {
        let body = json!({ "ok": true, "target": self.config.target_base() });
        let mut response = Response::new(full_body(body.to_string()));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }

    fn banner(&self) -> Response<ProxyBody> {
        let mut response = Response::new(full_body(format!(
            "edgegate -> {}\n",
            self.config.target_base()
        )));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

fn unauthorised() -> Response<ProxyBody> {
    let mut response = Response::new(full_body(r#"{"error":"unauthorised"}"#));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn cors_blocked() -> Response<ProxyBody> {
    let mut response = Response::new(full_body("CORS blocked"));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn not_found() -> Response<ProxyBody> {
    let mut response = Response::new(full_body("Not found"));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// The last line of defense: emitted whenever forwarding fails before any
/// response bytes have been sent.
fn bad_gateway() -> Response<ProxyBody> {
    let mut response = Response::new(full_body("Proxy error"));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
