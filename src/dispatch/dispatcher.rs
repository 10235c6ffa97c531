use std::sync::Arc;
use std::time::Instant;

use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderValue};
use hyper::{HeaderMap, Request, Uri};
use tracing::{debug, error, info};
use url::form_urlencoded;

use crate::breaker::BreakerRegistry;
use crate::client::{ClientError, ClientPool};
use crate::lb::LoadBalancer;
use crate::registry::Registry;
use crate::router::Router;

use super::types::{DispatchRequest, DispatchResult};

/// Headers stripped before the request leaves the gateway, beyond the
/// blanket `sec-` prefix rule
const DROPPED_HEADERS: &[&str] = &[
    "upgrade-insecure-requests",
    "sec-fetch-site",
    "sec-fetch-mode",
    "sec-fetch-dest",
    "sec-fetch-user",
    "dnt",
    "save-data",
];

/// Failure paths of a single dispatch
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no available replicas: {0}")]
    NoAvailableReplicas(String),

    #[error("circuit open for service: {0}")]
    CircuitOpen(String),

    #[error("upstream failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// The request-dispatch fabric: routing, admission, selection, forwarding.
///
/// One instance per process, shared across all connections. Every component
/// handle is an `Arc`, so the dispatcher itself is cheap to share.
pub struct Dispatcher {
    registry: Arc<Registry>,
    router: Arc<Router>,
    balancer: Arc<LoadBalancer>,
    breakers: Arc<BreakerRegistry>,
    clients: Arc<ClientPool>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        router: Arc<Router>,
        balancer: Arc<LoadBalancer>,
        breakers: Arc<BreakerRegistry>,
        clients: Arc<ClientPool>,
    ) -> Self {
        Self {
            registry,
            router,
            balancer,
            breakers,
            clients,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Run one request through the full pipeline.
    ///
    /// Never panics and never returns an error: every failure path is folded
    /// into a synthesized `DispatchResult` so the caller always has a
    /// response to relay.
    pub async fn dispatch(&self, request: &DispatchRequest) -> DispatchResult {
        let started = Instant::now();

        match self.try_dispatch(request).await {
            Ok(result) => result,
            Err(err) => {
                debug!(
                    request_id = %request.request_id,
                    error = %err,
                    "dispatch failed"
                );
                DispatchResult::failure(err.to_string(), started.elapsed().as_millis() as u64)
            }
        }
    }

    async fn try_dispatch(
        &self,
        request: &DispatchRequest,
    ) -> Result<DispatchResult, DispatchError> {
        // Routing and candidate selection
        let service = self.router.resolve(&request.path, request.host());
        debug!(
            request_id = %request.request_id,
            path = %request.path,
            service = %service,
            "resolved target service"
        );

        let candidates = self.registry.healthy(&service).await;
        if candidates.is_empty() {
            return Err(DispatchError::NoAvailableReplicas(service));
        }

        // Admission check; a denial is neither a success nor a failure for
        // the breaker itself
        if !self.breakers.allow(&service).await {
            return Err(DispatchError::CircuitOpen(service));
        }

        let replica = self
            .balancer
            .select(&candidates, request)
            .ok_or_else(|| DispatchError::NoAvailableReplicas(service.clone()))?;

        info!(
            request_id = %request.request_id,
            endpoint = %replica.endpoint,
            "dispatching"
        );

        // Duration covers client acquisition through response body
        let upstream_started = Instant::now();
        let client = self.clients.client_for(&replica.endpoint).await?;

        let uri = outbound_uri(&replica.endpoint, request)?;
        let mut outbound = Request::builder()
            .method(request.method.clone())
            .uri(uri)
            .body(Full::new(request.body.clone()))
            .map_err(|e| DispatchError::Upstream(e.to_string()))?;
        *outbound.headers_mut() = sanitize_headers(&request.headers, replica.authority());

        let response = match client.request(outbound).await {
            Ok(response) => response,
            Err(e) => {
                self.breakers.record(&service, false).await;
                error!(
                    request_id = %request.request_id,
                    endpoint = %replica.endpoint,
                    error = %e,
                    "upstream request failed"
                );
                return Err(DispatchError::Upstream(e.to_string()));
            }
        };

        let status = response.status();
        let response_headers = response.headers().clone();

        let body = match response.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                self.breakers.record(&service, false).await;
                return Err(DispatchError::Upstream(format!(
                    "reading response body: {}",
                    e
                )));
            }
        };

        let duration_ms = upstream_started.elapsed().as_millis() as u64;
        self.breakers.record(&service, status.as_u16() < 400).await;

        debug!(
            request_id = %request.request_id,
            endpoint = %replica.endpoint,
            status = status.as_u16(),
            duration_ms = duration_ms,
            "dispatch complete"
        );

        Ok(DispatchResult::upstream(
            body,
            replica.endpoint.clone(),
            duration_ms,
            status,
            response_headers,
        ))
    }

    /// The canned request used by `GET /gateway/test-dispatch`
    pub fn test_request() -> DispatchRequest {
        let mut request =
            DispatchRequest::new(hyper::Method::GET, "/user-orch/profile".to_string());
        request
            .headers
            .insert(header::HOST, HeaderValue::from_static("dushu.com"));
        request
    }
}

/// Build the outbound URL as endpoint + original path, query preserved
fn outbound_uri(endpoint: &str, request: &DispatchRequest) -> Result<Uri, DispatchError> {
    let mut url = format!("{}{}", endpoint.trim_end_matches('/'), request.path);

    if !request.parameters.is_empty() {
        let query: String = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(
                request
                    .parameters
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            )
            .finish();
        url.push('?');
        url.push_str(&query);
    }

    url.parse()
        .map_err(|_| DispatchError::Upstream(format!("invalid outbound URL: {}", url)))
}

/// Copy inbound headers onto the outbound request.
///
/// Browser fingerprinting headers (`sec-*` and friends) are dropped, Host is
/// rewritten to the replica's authority, Content-Length is left for the
/// client to recompute from the buffered body, and Content-Type/Accept
/// default to JSON when the caller supplied none.
fn sanitize_headers(inbound: &HeaderMap, authority: &str) -> HeaderMap {
    let mut outbound = HeaderMap::new();

    for (name, value) in inbound {
        let lower = name.as_str();
        if lower.starts_with("sec-") || DROPPED_HEADERS.contains(&lower) {
            continue;
        }
        if name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }

    if let Ok(host) = HeaderValue::from_str(authority) {
        outbound.insert(header::HOST, host);
    }

    if !outbound.contains_key(header::CONTENT_TYPE) {
        outbound.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }
    if !outbound.contains_key(header::ACCEPT) {
        outbound.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    }

    outbound
}
