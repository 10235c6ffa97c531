use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use url::form_urlencoded;

use crate::dispatch::{DispatchRequest, DispatchResult, Dispatcher};

use super::admin;

/// HTTP body type for responses
pub(crate) type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Hop-by-hop headers never relayed from the upstream response; the relayed
/// body is fully buffered, so Content-Length is recomputed as well
const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// The gateway's HTTP front: one listener serving the admin surface, the
/// liveness endpoint and every proxied path
pub struct GatewayServer {
    dispatcher: Arc<Dispatcher>,
    listen: String,
}

impl GatewayServer {
    pub fn new(dispatcher: Arc<Dispatcher>, listen: String) -> Self {
        Self { dispatcher, listen }
    }

    /// Bind and serve until the process exits. A bind failure is fatal;
    /// per-request failures never are.
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = self
            .listen
            .parse()
            .context(format!("Invalid listen address: {}", self.listen))?;

        let listener = TcpListener::bind(addr)
            .await
            .context(format!("Failed to bind to {}", addr))?;

        info!("gateway listening on {}", addr);

        let server = Arc::new(self);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let server = Arc::clone(&server);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { server.handle_request(req).await }
                });

                if let Err(e) = http1::Builder::new()
                    .keep_alive(true)
                    .serve_connection(io, service)
                    .await
                {
                    // Filter out benign connection reset errors
                    let err_str = format!("{}", e);
                    if !err_str.contains("connection reset") && !err_str.contains("broken pipe") {
                        error!("Error serving connection from {}: {}", remote_addr, e);
                    }
                }
            });
        }
    }

    /// Top of the per-request path: anything unexpected below becomes a
    /// synthesized 500 instead of tearing down the connection
    async fn handle_request(&self, req: Request<Incoming>) -> Result<Response<BoxBody>> {
        match self.route_request(req).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!(error = %e, "request handling failed");
                Ok(json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": format!("gateway error: {}", e)}),
                ))
            }
        }
    }

    async fn route_request(&self, req: Request<Incoming>) -> Result<Response<BoxBody>> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();
        let path = parts.uri.path().to_string();

        let response = match (&parts.method, path.as_str()) {
            (&Method::GET, "/health") => health_response(),

            (&Method::POST, "/gateway/register") => {
                admin::handle_register(&self.dispatcher, &body).await
            }
            (&Method::POST, "/gateway/deregister") => {
                admin::handle_deregister(&self.dispatcher, &body).await
            }
            (&Method::GET, "/gateway/status") => admin::handle_status(&self.dispatcher).await,
            (&Method::GET, "/gateway/circuit-breaker-status") => {
                admin::handle_breaker_status(&self.dispatcher).await
            }
            (&Method::GET, "/gateway/test-dispatch") => {
                admin::handle_test_dispatch(&self.dispatcher).await
            }
            (&Method::POST, "/gateway/dispatch") => {
                let host = parts
                    .headers
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                admin::handle_dispatch(&self.dispatcher, host, &body).await
            }

            _ if path.starts_with("/gateway/") => json_response(
                StatusCode::NOT_FOUND,
                json!({"error": "unknown gateway endpoint"}),
            ),

            // Everything else is proxied
            _ => self.proxy(parts, body).await,
        };

        Ok(response)
    }

    /// Direct path dispatch: build a DispatchRequest from the inbound
    /// request and relay whatever the pipeline produced
    async fn proxy(&self, parts: hyper::http::request::Parts, body: Bytes) -> Response<BoxBody> {
        let mut request = DispatchRequest::new(parts.method, parts.uri.path().to_string());
        request.parameters = parts
            .uri
            .query()
            .map(parse_query)
            .unwrap_or_default();
        request.headers = parts.headers;
        request.body = body;

        let request_id = request.request_id.clone();
        let result = self.dispatcher.dispatch(&request).await;

        if result.success {
            relay_response(result)
        } else {
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": result.message(), "requestId": request_id}),
            )
        }
    }
}

/// Decode a raw query string into ordered pairs
fn parse_query(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Relay an upstream response: status and headers as-is minus hop-by-hop,
/// body from the buffered bytes
fn relay_response(result: DispatchResult) -> Response<BoxBody> {
    let mut builder = Response::builder().status(result.status);

    for (name, value) in result.headers.iter() {
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }

    builder.body(full_body(result.body)).unwrap()
}

/// The constant liveness reply
fn health_response() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        json!({
            "status": "UP",
            "timestamp": chrono::Utc::now().timestamp_millis(),
            "gateway": "svcgate",
        }),
    )
}

pub(crate) fn json_response(status: StatusCode, value: serde_json::Value) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(full_body(Bytes::from(value.to_string())))
        .unwrap()
}

fn full_body(bytes: Bytes) -> BoxBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}
