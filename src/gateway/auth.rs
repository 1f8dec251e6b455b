//! Authentication middleware for the gateway
//!
//! A single shared secret guards every non-public path. It may arrive in the
//! configured header (default `x-api-key`) or as `Authorization: Bearer`.
//! Rejection happens before the body is read.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::rpc_codes;

/// Resolved authentication configuration (secret expanded)
#[derive(Debug, Clone)]
pub struct ResolvedAuthConfig {
    /// Shared secret; None admits every request
    api_key: Option<String>,
    /// Header carrying the secret, lowercase
    pub header: String,
    /// Public paths
    pub public_paths: Vec<String>,
}

impl ResolvedAuthConfig {
    /// Create resolved config from `AuthConfig`
    pub fn from_config(config: &AuthConfig) -> Self {
        let api_key = config.resolve_api_key();

        if config.api_key.as_deref() == Some("auto") {
            if let Some(ref key) = api_key {
                tracing::info!("Auto-generated gateway API key: {}", key);
            }
        }

        Self::new(api_key, &config.header, config.public_paths.clone())
    }

    /// Build from already-resolved values
    #[must_use]
    pub fn new(api_key: Option<String>, header: &str, public_paths: Vec<String>) -> Self {
        Self {
            api_key,
            header: header.trim().to_ascii_lowercase(),
            public_paths,
        }
    }

    /// Whether a secret is configured
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Check if a path is public (bypasses auth)
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.starts_with(p))
    }

    /// Credential presented by the caller, configured header first
    fn presented<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .or_else(|| {
                headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| {
                        v.strip_prefix("Bearer ")
                            .or_else(|| v.strip_prefix("bearer "))
                    })
                    .map(str::trim)
            })
    }

    /// Whether a request for `path` carrying `headers` is admitted
    #[must_use]
    pub fn authorize(&self, path: &str, headers: &HeaderMap) -> bool {
        let Some(ref secret) = self.api_key else {
            return true;
        };
        if self.is_public_path(path) {
            return true;
        }
        self.presented(headers)
            .is_some_and(|token| bool::from(token.as_bytes().ct_eq(secret.as_bytes())))
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(auth_config): State<Arc<ResolvedAuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();

    if auth_config.authorize(path, request.headers()) {
        debug!(path = %path, "Request admitted");
        return next.run(request).await;
    }

    if auth_config.presented(request.headers()).is_none() {
        warn!(path = %path, "Missing API key");
        unauthorized_response(&format!(
            "Missing API key. Use: {}: <key> or Authorization: Bearer <key>",
            auth_config.header
        ))
    } else {
        warn!(path = %path, "Invalid API key");
        unauthorized_response("Invalid API key")
    }
}

/// Create a 401 Unauthorized response
fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Bearer")],
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": rpc_codes::UNAUTHORIZED,
                "message": message
            },
            "id": null
        })),
    )
        .into_response()
}
