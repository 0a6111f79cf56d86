use crate::server::AdminState;
use axum::extract::State;
use axum::response::Json;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

pub async fn health_check(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let (active_rules, total_rules) = state.rules.cache().counts().await.unwrap_or((0, 0));

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rules": {
            "active": active_rules,
            "total": total_rules,
            "cache_reloads": state.rules.cache().reload_count(),
        },
        "persistence": {
            "rules": file_info(state.state_file.as_deref()),
            "logs": file_info(state.log_journal.as_deref()),
        },
        "metrics_enabled": state.metrics.is_enabled(),
    }))
}

/// Persistence metadata for an optional backing file.
fn file_info(path: Option<&Path>) -> Value {
    let Some(path) = path else {
        return json!({ "mode": "memory", "path": null });
    };
    let meta = std::fs::metadata(path).ok();
    let last_modified_unix = meta
        .as_ref()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    json!({
        "mode": "file",
        "path": path.to_string_lossy(),
        "file_exists": meta.is_some(),
        "size_bytes": meta.as_ref().map(|m| m.len()),
        "last_modified_unix": last_modified_unix,
    })
}
