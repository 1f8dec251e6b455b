//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::auth::{ResolvedAuthConfig, auth_middleware};
use super::envelope;
use crate::LogLevelHandle;
use crate::dispatch::{Dispatcher, RequestContext};
use crate::error::rpc_codes;
use crate::normalize::normalize;
use crate::protocol::{
    Info, InitializeParams, InitializeResult, JsonRpcResponse, LoggingSetLevelParams, RequestId,
    SUPPORTED_VERSIONS, ServerCapabilities, ToolsCallParams, ToolsCapability, ToolsListResult,
    negotiate_version,
};

const SESSION_HEADER: &str = "mcp-session-id";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state
pub struct AppState {
    /// Tool dispatcher
    pub dispatcher: Arc<Dispatcher>,
    /// Authentication configuration
    pub auth_config: Arc<ResolvedAuthConfig>,
    /// Live log level
    pub log_level: LogLevelHandle,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let auth_config = Arc::clone(&state.auth_config);
    let max_body_size = state.max_body_size;

    Router::new()
        .route("/", get(root_handler).post(mcp_handler))
        .route("/mcp", post(mcp_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        // Authentication middleware (applied before other layers)
        .layer(middleware::from_fn_with_state(auth_config, auth_middleware))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Service banner
async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoint": "/mcp",
        "protocol_versions": SUPPORTED_VERSIONS,
    }))
}

/// Liveness; never touches the backend
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness: a backend session can be established
async fn ready_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.dispatcher.session().ensure_session().await {
        Ok(session) => Json(json!({
            "status": "ready",
            "server_version": session.server_version,
            "series": session.profile.series,
            "uid": session.uid,
        }))
        .into_response(),
        Err(fault) => {
            warn!(fault = %fault, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "error": normalize(&fault),
                })),
            )
                .into_response()
        }
    }
}

/// JSON-RPC handler (POST /mcp and POST /)
async fn mcp_handler(State(state): State<Arc<AppState>>, http_request: Request<Body>) -> Response {
    let headers = http_request.headers().clone();
    let session_id = header_str(&headers, SESSION_HEADER).map(String::from);

    let body_bytes = match axum::body::to_bytes(http_request.into_body(), state.max_body_size).await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            let rpc = JsonRpcResponse::error(
                None,
                rpc_codes::PARSE_ERROR,
                format!("Failed to read body: {e}"),
            );
            return build_response(&rpc, session_id.as_deref(), StatusCode::BAD_REQUEST);
        }
    };

    let request: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            let rpc =
                JsonRpcResponse::error(None, rpc_codes::PARSE_ERROR, format!("Invalid JSON: {e}"));
            return build_response(&rpc, session_id.as_deref(), StatusCode::BAD_REQUEST);
        }
    };

    let (id, method, params) = match parse_request(&request) {
        Ok(parsed) => parsed,
        Err(rpc) => return build_response(&rpc, session_id.as_deref(), StatusCode::BAD_REQUEST),
    };

    debug!(method = %method, "MCP request");

    // Notifications get no JSON-RPC response
    if is_notification_method(&method) {
        debug!(notification = %method, "Handling notification");
        return with_header(
            StatusCode::ACCEPTED.into_response(),
            SESSION_HEADER,
            session_id.as_deref(),
        );
    }

    let Some(id) = id else {
        let rpc = JsonRpcResponse::error(None, rpc_codes::INVALID_REQUEST, "Missing id");
        return build_response(&rpc, session_id.as_deref(), StatusCode::BAD_REQUEST);
    };

    match method.as_str() {
        "initialize" => {
            let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let rpc = handle_initialize(id, params);
            build_response(&rpc, Some(&session_id), StatusCode::OK)
        }
        "tools/list" => {
            let result = ToolsListResult {
                tools: state.dispatcher.registry().list(),
            };
            build_response(&to_success(id, &result), session_id.as_deref(), StatusCode::OK)
        }
        "tools/call" => {
            let call: ToolsCallParams = match parse_params(&id, params) {
                Ok(call) => call,
                Err(rpc) => return build_response(&rpc, session_id.as_deref(), StatusCode::OK),
            };
            let ctx = RequestContext::new(header_str(&headers, REQUEST_ID_HEADER));
            let outcome = state
                .dispatcher
                .dispatch(&call.name, call.arguments, &ctx)
                .await;
            let result = envelope::tool_call_result(&outcome, &ctx.correlation_id);
            let response =
                build_response(&to_success(id, &result), session_id.as_deref(), StatusCode::OK);
            with_header(response, REQUEST_ID_HEADER, Some(&ctx.correlation_id))
        }
        "ping" => build_response(
            &JsonRpcResponse::success(id, json!({})),
            session_id.as_deref(),
            StatusCode::OK,
        ),
        "logging/setLevel" => {
            let rpc = match parse_params::<LoggingSetLevelParams>(&id, params) {
                Ok(p) => match state.log_level.set_level(p.level.as_filter_directive()) {
                    Ok(()) => JsonRpcResponse::success(id, json!({})),
                    Err(e) => JsonRpcResponse::error(Some(id), rpc_codes::INTERNAL_ERROR, e.to_string()),
                },
                Err(rpc) => rpc,
            };
            build_response(&rpc, session_id.as_deref(), StatusCode::OK)
        }
        _ => {
            let rpc = JsonRpcResponse::error(
                Some(id),
                rpc_codes::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            );
            build_response(&rpc, session_id.as_deref(), StatusCode::OK)
        }
    }
}

fn handle_initialize(id: RequestId, params: Option<Value>) -> JsonRpcResponse {
    let params: InitializeParams = match params {
        None | Some(Value::Null) => InitializeParams::default(),
        Some(value) => match serde_json::from_value(value) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(
                    Some(id),
                    rpc_codes::INVALID_PARAMS,
                    format!("Invalid params: {e}"),
                );
            }
        },
    };

    let protocol_version = negotiate_version(params.protocol_version.as_deref());
    if let Some(ref client) = params.client_info {
        debug!(client = %client.name, client_version = %client.version, protocol_version, "Client initialized");
    }

    let result = InitializeResult {
        protocol_version: protocol_version.to_string(),
        capabilities: ServerCapabilities {
            logging: Some(std::collections::HashMap::new()),
            tools: Some(ToolsCapability { list_changed: false }),
        },
        server_info: Info {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Odoo MCP Gateway".to_string()),
        },
        instructions: Some(
            "Tools operate on an Odoo database. Use list_models and get_model_fields to discover \
             model and field names before searching or writing records. Every tool result is a \
             JSON envelope: check 'ok', then read 'data' or 'error'."
                .to_string(),
        ),
    };
    to_success(id, &result)
}

/// Deserialize typed params, answering `-32602` on mismatch
fn parse_params<T: DeserializeOwned>(
    id: &RequestId,
    params: Option<Value>,
) -> Result<T, JsonRpcResponse> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
        JsonRpcResponse::error(
            Some(id.clone()),
            rpc_codes::INVALID_PARAMS,
            format!("Invalid params: {e}"),
        )
    })
}

fn to_success<T: serde::Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(Some(id), rpc_codes::INTERNAL_ERROR, e.to_string()),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn with_header(mut response: Response, name: &'static str, value: Option<&str>) -> Response {
    if let Some(value) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(name), value);
    }
    response
}

fn build_response(rpc: &JsonRpcResponse, session_id: Option<&str>, status: StatusCode) -> Response {
    let response = (status, Json(rpc)).into_response();
    with_header(response, SESSION_HEADER, session_id)
}

fn extract_request_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        _ => None,
    }
}

fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

fn parse_request(
    value: &Value,
) -> Result<(Option<RequestId>, String, Option<Value>), JsonRpcResponse> {
    // Check jsonrpc version
    let jsonrpc = value.get("jsonrpc").and_then(|v| v.as_str());
    if jsonrpc != Some("2.0") {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }

    // Get ID (required for requests, missing for notifications)
    let id = value.get("id").and_then(extract_request_id);

    // Get method
    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method")
        })?;

    // Get params (optional)
    let params = value.get("params").cloned();

    // For notifications (methods starting with "notifications/"), id is optional
    // For requests, id is required
    if !is_notification_method(method) && id.is_none() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Missing id",
        ));
    }

    Ok((id, method.to_string(), params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extract_request_id_string_value() {
        let id = extract_request_id(&json!("abc-123")).unwrap();
        assert_eq!(id, RequestId::String("abc-123".to_string()));
    }

    #[test]
    fn extract_request_id_integer() {
        assert_eq!(extract_request_id(&json!(42)), Some(RequestId::Number(42)));
        assert_eq!(extract_request_id(&json!(-1)), Some(RequestId::Number(-1)));
    }

    #[test]
    fn extract_request_id_rejects_other_types() {
        assert!(extract_request_id(&json!(null)).is_none());
        assert!(extract_request_id(&json!(true)).is_none());
        assert!(extract_request_id(&json!(3.14)).is_none());
        assert!(extract_request_id(&json!([1, 2])).is_none());
    }

    #[test]
    fn notification_method_recognized() {
        assert!(is_notification_method("notifications/initialized"));
        assert!(!is_notification_method("tools/list"));
    }

    #[test]
    fn parse_request_requires_version_method_and_id() {
        let err = parse_request(&json!({"id": 1, "method": "ping"})).unwrap_err();
        assert_eq!(err.error.unwrap().code, rpc_codes::INVALID_REQUEST);

        let err = parse_request(&json!({"jsonrpc": "2.0", "id": 1})).unwrap_err();
        assert_eq!(err.error.unwrap().message, "Missing method");

        let err = parse_request(&json!({"jsonrpc": "2.0", "method": "ping"})).unwrap_err();
        assert_eq!(err.error.unwrap().message, "Missing id");

        let (id, method, _) =
            parse_request(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .unwrap();
        assert!(id.is_none());
        assert_eq!(method, "notifications/initialized");
    }

    #[test]
    fn initialize_negotiates_protocol_version() {
        let rpc = handle_initialize(
            RequestId::Number(1),
            Some(json!({"protocolVersion": "2024-11-05", "capabilities": {}})),
        );
        let result = rpc.result.unwrap();
        assert_eq!(result["protocolVersion"], json!("2024-11-05"));
        assert_eq!(result["serverInfo"]["name"], json!("odoo-mcp-gateway"));
        assert_eq!(result["capabilities"]["tools"]["listChanged"], json!(false));
    }

    #[test]
    fn initialize_with_bad_params_is_invalid_params() {
        let rpc = handle_initialize(RequestId::Number(1), Some(json!({"protocolVersion": 7})));
        assert_eq!(rpc.error.unwrap().code, rpc_codes::INVALID_PARAMS);
    }
}
