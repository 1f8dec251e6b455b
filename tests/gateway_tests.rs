//! HTTP surface: auth gate, JSON-RPC framing and envelopes

mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{MockOdoo, config, gateway};

const KEY: &str = "gw-secret";

fn router(odoo: &std::sync::Arc<MockOdoo>, api_key: Option<&str>) -> Router {
    let mut config = config();
    config.auth.api_key = api_key.map(str::to_string);
    gateway(odoo, config).router()
}

fn rpc(method: &str, params: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}).to_string(),
        ))
        .unwrap()
}

fn with_key(mut request: Request<Body>) -> Request<Body> {
    request
        .headers_mut()
        .insert("x-api-key", KEY.parse().unwrap());
    request
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Parse the envelope out of a `tools/call` response
fn envelope(body: &Value) -> Value {
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}

#[tokio::test]
async fn missing_key_is_rejected_before_any_backend_call() {
    let odoo = MockOdoo::new();
    let app = router(&odoo, Some(KEY));

    let response = app
        .oneshot(rpc("tools/call", json!({"name": "search_records", "arguments": {"model": "res.partner"}})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["www-authenticate"], "Bearer");
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!(-32000));
    assert_eq!(body["id"], Value::Null);
    assert_eq!(odoo.call_count(), 0);
}

#[tokio::test]
async fn wrong_key_is_rejected() {
    let odoo = MockOdoo::new();
    let app = router(&odoo, Some(KEY));

    let mut request = rpc("tools/list", json!({}));
    request
        .headers_mut()
        .insert("authorization", "Bearer not-the-key".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(odoo.call_count(), 0);
}

#[tokio::test]
async fn health_is_public_and_offline() {
    let odoo = MockOdoo::new();
    let app = router(&odoo, Some(KEY));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], json!("healthy"));
    assert_eq!(odoo.call_count(), 0);
}

#[tokio::test]
async fn ready_reports_negotiated_version() {
    let odoo = MockOdoo::with_version("16.0+e");
    let app = router(&odoo, None);

    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["series"], json!("16.0"));
    assert_eq!(body["server_version"], json!("16.0+e"));
}

#[tokio::test]
async fn ready_is_unavailable_when_login_fails() {
    let odoo = MockOdoo::new();
    odoo.reject_login
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let app = router(&odoo, None);

    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"]["kind"], json!("auth_failed"));
}

#[tokio::test]
async fn initialize_assigns_a_session_id() {
    let odoo = MockOdoo::new();
    let app = router(&odoo, Some(KEY));

    let response = app
        .oneshot(with_key(rpc(
            "initialize",
            json!({"protocolVersion": "2025-03-26", "capabilities": {}, "clientInfo": {"name": "t", "version": "1"}}),
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("mcp-session-id"));
    let body = body_json(response).await;
    assert_eq!(body["result"]["protocolVersion"], json!("2025-03-26"));
    assert_eq!(odoo.call_count(), 0);
}

#[tokio::test]
async fn tools_list_hides_gated_tools() {
    let odoo = MockOdoo::new();
    let app = router(&odoo, None);

    let body = body_json(app.oneshot(rpc("tools/list", json!({}))).await.unwrap()).await;
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();

    assert!(names.contains(&"search_records"));
    assert!(!names.contains(&"execute_kw"));
    assert!(!names.contains(&"list_databases"));
}

#[tokio::test]
async fn tools_call_success_envelope_carries_meta() {
    let odoo = MockOdoo::new();
    let app = router(&odoo, None);

    let mut request = rpc(
        "tools/call",
        json!({"name": "get_model_fields", "arguments": {"model": "res.partner", "fields": ["name"]}}),
    );
    request
        .headers_mut()
        .insert("x-request-id", "req-42".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-42");
    let body = body_json(response).await;
    assert_eq!(body["result"]["isError"], json!(false));
    let envelope = envelope(&body);
    assert_eq!(envelope["ok"], json!(true));
    assert_eq!(envelope["data"]["fields"]["name"]["type"], json!("char"));
    assert_eq!(
        envelope["meta"],
        json!({"backend_version": "17.0", "cache": "miss", "correlation_id": "req-42"})
    );
}

#[tokio::test]
async fn tools_call_failure_is_an_error_result_not_an_rpc_error() {
    let odoo = MockOdoo::new();
    let app = router(&odoo, None);

    let body = body_json(
        app.oneshot(rpc(
            "tools/call",
            json!({"name": "search_records", "arguments": {"model": "res.partner", "limit": 5000}}),
        ))
        .await
        .unwrap(),
    )
    .await;

    assert!(body.get("error").is_none());
    assert_eq!(body["result"]["isError"], json!(true));
    let envelope = envelope(&body);
    assert_eq!(envelope["ok"], json!(false));
    assert_eq!(envelope["error"]["kind"], json!("invalid_domain"));
    assert!(envelope["meta"]["correlation_id"].is_string());
    assert_eq!(odoo.call_count(), 0);
}

#[tokio::test]
async fn notifications_are_accepted_without_body() {
    let odoo = MockOdoo::new();
    let app = router(&odoo, None);

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .body(Body::from(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn malformed_json_is_a_parse_error() {
    let odoo = MockOdoo::new();
    let app = router(&odoo, None);

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .body(Body::from("{not json"))
        .unwrap();
    let body = body_json(app.oneshot(request).await.unwrap()).await;

    assert_eq!(body["error"]["code"], json!(-32700));
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let odoo = MockOdoo::new();
    let app = router(&odoo, None);

    let body = body_json(app.oneshot(rpc("resources/list", json!({}))).await.unwrap()).await;
    assert_eq!(body["error"]["code"], json!(-32601));
    assert_eq!(body["id"], json!(1));
}

#[tokio::test]
async fn set_level_rejects_unknown_levels() {
    let odoo = MockOdoo::new();
    let app = router(&odoo, None);

    let ok = body_json(
        app.clone()
            .oneshot(rpc("logging/setLevel", json!({"level": "warning"})))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(ok["result"], json!({}));

    let bad = body_json(
        app.oneshot(rpc("logging/setLevel", json!({"level": "verbose"})))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(bad["error"]["code"], json!(-32602));
}
