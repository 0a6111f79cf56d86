use crate::handlers;
use crate::middleware::api_key_auth;
use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router as AxumRouter;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use warden_observability::MetricsCollector;
use warden_store::{LogRecorder, RuleStore};

/// Shared state for the Admin API.
pub struct AdminState {
    pub rules: RuleStore,
    pub logs: LogRecorder,
    pub metrics: Arc<MetricsCollector>,
    /// When set, every route except `/health` requires `X-API-KEY`.
    pub api_key: Option<String>,
    pub metrics_path: String,
    pub state_file: Option<PathBuf>,
    pub log_journal: Option<PathBuf>,
}

/// Build the Axum router with all admin routes.
pub fn build_admin_router(state: Arc<AdminState>) -> AxumRouter {
    let metrics_path = if state.metrics_path.starts_with('/') {
        state.metrics_path.clone()
    } else {
        format!("/{}", state.metrics_path)
    };

    let protected = AxumRouter::new()
        // Rules
        .route(
            "/api/proxy-rules",
            get(handlers::rules::list_rules).post(handlers::rules::create_rule),
        )
        .route("/api/proxy-rules/reset", post(handlers::rules::reset_rules))
        .route(
            "/api/proxy-rules/{id}",
            get(handlers::rules::get_rule)
                .put(handlers::rules::update_rule)
                .delete(handlers::rules::delete_rule),
        )
        // Logs
        .route(
            "/api/logs",
            get(handlers::logs::list_logs).delete(handlers::logs::delete_all_logs),
        )
        .route("/api/logs/stats", get(handlers::logs::log_stats))
        .route("/api/logs/recent", get(handlers::logs::recent_logs))
        .route("/api/logs/export", get(handlers::logs::export_logs))
        .route(
            "/api/logs/{id}",
            get(handlers::logs::get_log).delete(handlers::logs::delete_log),
        )
        // Metrics
        .route(&metrics_path, get(metrics_handler))
        .route_layer(from_fn_with_state(state.clone(), api_key_auth));

    AxumRouter::new()
        .route("/health", get(handlers::health::health_check))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve the admin API until `shutdown` resolves.
pub async fn start_admin(
    state: Arc<AdminState>,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_admin_router(state);
    info!(addr = %addr, "Starting Admin API server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<Arc<AdminState>>) -> Response {
    state
        .metrics
        .set_cache_reloads(state.rules.cache().reload_count());
    let mut response = state.metrics.render().into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
