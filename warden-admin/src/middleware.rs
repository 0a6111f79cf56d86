use crate::server::AdminState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Admin API key authentication middleware.
///
/// Open when no key is configured.
pub async fn api_key_auth(
    State(state): State<Arc<AdminState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ref expected) = state.api_key else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if presented == Some(expected.as_str()) {
        next.run(request).await
    } else {
        tracing::warn!(path = %request.uri().path(), "admin: rejected request without valid API key");
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "missing or invalid API key", "status": 401 })),
        )
            .into_response()
    }
}
