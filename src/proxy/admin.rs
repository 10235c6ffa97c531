use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use hyper::header::{self, HeaderValue};
use hyper::{HeaderMap, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::registry::Replica;

use super::server::{json_response, BoxBody};

/// Body of `/gateway/register` and `/gateway/deregister`.
///
/// All fields optional so that missing ones surface as a uniform 400 rather
/// than a deserialization error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplicaPayload {
    service_name: Option<String>,
    project_name: Option<String>,
    endpoint: Option<String>,
    /// Selection weight, defaults to 1
    weight: Option<u32>,
}

impl ReplicaPayload {
    fn fields(self) -> Option<(String, String, String, u32)> {
        Some((
            self.service_name?,
            self.project_name?,
            self.endpoint?,
            self.weight.unwrap_or(1),
        ))
    }
}

/// Body of `POST /gateway/dispatch`
#[derive(Debug, Deserialize)]
struct DispatchPayload {
    #[serde(default = "default_dispatch_path")]
    path: String,

    #[serde(default = "default_dispatch_method")]
    method: String,

    #[serde(default)]
    headers: HashMap<String, String>,

    #[serde(default)]
    body: String,

    #[serde(default)]
    parameters: HashMap<String, String>,
}

fn default_dispatch_path() -> String {
    "/".to_string()
}

fn default_dispatch_method() -> String {
    "GET".to_string()
}

/// `POST /gateway/register`
pub(crate) async fn handle_register(dispatcher: &Arc<Dispatcher>, body: &Bytes) -> Response<BoxBody> {
    let Ok(payload) = serde_json::from_slice::<ReplicaPayload>(body) else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "request body must be JSON"}),
        );
    };

    let Some((service, name, endpoint, weight)) = payload.fields() else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "missing required field"}),
        );
    };

    let replica = match Replica::new(&name, &endpoint, &service, weight) {
        Ok(replica) => replica,
        Err(e) => {
            warn!(endpoint = %endpoint, error = %e, "registration rejected");
            return json_response(StatusCode::BAD_REQUEST, json!({"error": e.to_string()}));
        }
    };

    dispatcher.registry().register(replica).await;
    dispatcher.breakers().ensure(&service).await;

    json_response(
        StatusCode::OK,
        json!({"message": format!("registered: {} -> {}", service, endpoint)}),
    )
}

/// `POST /gateway/deregister`
pub(crate) async fn handle_deregister(dispatcher: &Arc<Dispatcher>, body: &Bytes) -> Response<BoxBody> {
    let Ok(payload) = serde_json::from_slice::<ReplicaPayload>(body) else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "request body must be JSON"}),
        );
    };

    let Some((service, name, endpoint, _)) = payload.fields() else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "missing required field"}),
        );
    };

    let removed = dispatcher
        .registry()
        .deregister(&service, &name, &endpoint)
        .await;

    let message = if removed {
        format!("deregistered: {} -> {}", service, endpoint)
    } else {
        format!("no matching replica: {} -> {}", service, endpoint)
    };
    json_response(StatusCode::OK, json!({"message": message}))
}

/// `GET /gateway/status`
pub(crate) async fn handle_status(dispatcher: &Arc<Dispatcher>) -> Response<BoxBody> {
    let snapshot = dispatcher.registry().snapshot().await;

    let mut status = serde_json::Map::new();
    for (service, replicas) in snapshot {
        let healthy = replicas.iter().filter(|r| r.is_healthy()).count();
        let endpoints: Vec<&str> = replicas.iter().map(|r| r.endpoint.as_str()).collect();
        status.insert(
            service,
            json!({
                "totalProjects": replicas.len(),
                "healthyProjects": healthy,
                "endpoints": endpoints,
            }),
        );
    }

    json_response(StatusCode::OK, serde_json::Value::Object(status))
}

/// `GET /gateway/circuit-breaker-status`
pub(crate) async fn handle_breaker_status(dispatcher: &Arc<Dispatcher>) -> Response<BoxBody> {
    let all = dispatcher.breakers().observe_all().await;
    match serde_json::to_value(&all) {
        Ok(value) => json_response(StatusCode::OK, value),
        Err(e) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": e.to_string()}),
        ),
    }
}

/// `GET /gateway/test-dispatch`: a canned request through the full pipeline
pub(crate) async fn handle_test_dispatch(dispatcher: &Arc<Dispatcher>) -> Response<BoxBody> {
    let request = Dispatcher::test_request();
    let result = dispatcher.dispatch(&request).await;

    let message = if result.success {
        format!("test dispatch succeeded: {}", result.message())
    } else {
        format!("test dispatch failed: {}", result.message())
    };
    json_response(StatusCode::OK, json!({"message": message}))
}

/// `POST /gateway/dispatch`: run a JSON-described request through the
/// pipeline and report the outcome instead of relaying it
pub(crate) async fn handle_dispatch(
    dispatcher: &Arc<Dispatcher>,
    inbound_host: Option<String>,
    body: &Bytes,
) -> Response<BoxBody> {
    let Ok(payload) = serde_json::from_slice::<DispatchPayload>(body) else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "request body must be JSON"}),
        );
    };

    let Ok(method) = Method::from_bytes(payload.method.as_bytes()) else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": format!("invalid method: {}", payload.method)}),
        );
    };

    let mut request = DispatchRequest::new(method, payload.path);
    request.headers = header_map_from(&payload.headers);
    request.body = Bytes::from(payload.body);
    request.parameters = payload.parameters.into_iter().collect();

    // The caller's own Host wins over one named in the payload
    if let Some(host) = inbound_host {
        if let Ok(value) = HeaderValue::from_str(&host) {
            request.headers.insert(header::HOST, value);
        }
    }

    let request_id = request.request_id.clone();
    let result = dispatcher.dispatch(&request).await;

    json_response(
        StatusCode::OK,
        json!({
            "requestId": request_id,
            "success": result.success,
            "message": result.message(),
            "targetEndpoint": result.target_endpoint.unwrap_or_default(),
            "processingTime": result.duration_ms,
        }),
    )
}

fn header_map_from(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let Ok(name) = header::HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value) else {
            continue;
        };
        map.append(name, value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_missing_field_is_detected() {
        let payload: ReplicaPayload =
            serde_json::from_str(r#"{"serviceName": "user-orch", "endpoint": "http://h:1"}"#)
                .unwrap();
        assert!(payload.fields().is_none());

        let payload: ReplicaPayload = serde_json::from_str(
            r#"{"serviceName": "user-orch", "projectName": "u1", "endpoint": "http://h:1"}"#,
        )
        .unwrap();
        let (service, name, endpoint, weight) = payload.fields().unwrap();
        assert_eq!(service, "user-orch");
        assert_eq!(name, "u1");
        assert_eq!(endpoint, "http://h:1");
        assert_eq!(weight, 1);
    }

    #[test]
    fn test_payload_weight_override() {
        let payload: ReplicaPayload = serde_json::from_str(
            r#"{"serviceName": "s", "projectName": "p", "endpoint": "http://h:1", "weight": 9}"#,
        )
        .unwrap();
        assert_eq!(payload.fields().unwrap().3, 9);
    }

    #[test]
    fn test_dispatch_payload_defaults() {
        let payload: DispatchPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(payload.path, "/");
        assert_eq!(payload.method, "GET");
        assert!(payload.headers.is_empty());
        assert!(payload.body.is_empty());
        assert!(payload.parameters.is_empty());
    }

    #[test]
    fn test_header_map_from_skips_invalid_names() {
        let mut headers = HashMap::new();
        headers.insert("X-Ok".to_string(), "v".to_string());
        headers.insert("bad name".to_string(), "v".to_string());

        let map = header_map_from(&headers);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("x-ok").unwrap(), "v");
    }
}
