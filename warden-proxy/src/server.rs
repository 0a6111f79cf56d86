use crate::pipeline::{ForwardingPipeline, InboundRequest, ProxyResponse};
use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get, post};
use axum::Router as AxumRouter;
use bytes::Bytes;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Largest request body the proxy will buffer.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state for the caller-facing surface.
pub struct ProxyState {
    pub pipeline: ForwardingPipeline,
    pub mount_prefix: String,
    pub identity_header: HeaderName,
}

impl ProxyState {
    pub fn new(
        pipeline: ForwardingPipeline,
        mount_prefix: &str,
        identity_header: &str,
    ) -> anyhow::Result<Self> {
        let identity_header = HeaderName::from_bytes(identity_header.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid identity header '{identity_header}': {e}"))?;
        Ok(Self {
            pipeline,
            mount_prefix: mount_prefix.trim_end_matches('/').to_string(),
            identity_header,
        })
    }

    fn identity(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(&self.identity_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Build the proxy router: status, simulate and the catch-all forward.
///
/// Non-matching methods on the fixed routes fall through to the pipeline.
pub fn build_proxy_router(state: Arc<ProxyState>) -> AxumRouter {
    let mount = state.mount_prefix.clone();
    AxumRouter::new()
        .route(&format!("{mount}/status"), get(proxy_status).fallback(forward))
        .route(
            &format!("{mount}/users/simulate"),
            post(simulate_user_request).fallback(forward),
        )
        .route(&format!("{mount}/{{*path}}"), any(forward))
        .route(&mount_root(&mount), any(forward))
        .with_state(state)
}

/// Bind `addr` and serve the proxy until `shutdown` resolves.
pub async fn start_proxy(
    state: Arc<ProxyState>,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_proxy_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Starting proxy listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

fn mount_root(mount: &str) -> String {
    if mount.is_empty() { "/".to_string() } else { mount.to_string() }
}

// ── Handlers ──────────────────────────────────────────────────

async fn proxy_status(State(state): State<Arc<ProxyState>>) -> Response {
    match state.pipeline.cache().counts().await {
        Ok((active, total)) => Json(serde_json::json!({
            "status": "active",
            "target_api": state.pipeline.default_base(),
            "active_rules": active,
            "total_rules": total,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "message": "Error getting proxy status",
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn forward(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, path = %parts.uri.path(), "proxy: failed to read request body");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({ "message": "Request body could not be read" })),
            )
                .into_response();
        }
    };

    let client_ip = client_ip(&parts.headers, parts.extensions.get::<ConnectInfo<SocketAddr>>());
    let inbound = InboundRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        requested_by: state.identity(&parts.headers),
        headers: parts.headers,
        body,
        client_ip,
        simulated: false,
    };
    state.pipeline.handle(inbound).await.into_response()
}

/// Run one fixed `GET /users` through the pipeline on the caller's behalf.
async fn simulate_user_request(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    let mut headers = HeaderMap::new();
    if let Some(ua) = parts.headers.get(header::USER_AGENT) {
        headers.insert(header::USER_AGENT, ua.clone());
    }
    let inbound = InboundRequest {
        method: Method::GET,
        path: format!("{}/users", state.mount_prefix),
        query: None,
        requested_by: state.identity(&parts.headers),
        client_ip: client_ip(&parts.headers, parts.extensions.get::<ConnectInfo<SocketAddr>>()),
        headers,
        body: Bytes::new(),
        simulated: true,
    };
    state.pipeline.handle(inbound).await.into_response()
}

/// First `x-forwarded-for` hop, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
}
