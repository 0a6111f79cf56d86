use crate::error::ApiResult;
use crate::server::AdminState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use warden_core::WardenError;
use warden_core::log_record::{DatePreset, LogFilter};
use warden_core::page::PageRequest;

#[derive(Debug, Default, Deserialize)]
pub struct ListLogsQuery {
    pub method: Option<String>,
    pub status: Option<u16>,
    pub date: Option<DatePreset>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub since: Option<DateTime<Utc>>,
}

fn page_request(page: Option<u32>, limit: Option<u32>) -> PageRequest {
    let defaults = PageRequest::default();
    PageRequest::new(page.unwrap_or(defaults.page), limit.unwrap_or(defaults.limit))
}

pub async fn list_logs(
    State(state): State<Arc<AdminState>>,
    Query(q): Query<ListLogsQuery>,
) -> ApiResult<Json<Value>> {
    let mut filter = LogFilter {
        method: q.method.filter(|m| !m.trim().is_empty()),
        status: q.status,
        search: q.search,
        ..Default::default()
    };
    if let Some(preset) = q.date {
        filter = filter.with_preset(preset, Utc::now());
    }

    let page = state.logs.list(&filter, page_request(q.page, q.limit)).await?;
    Ok(Json(json!({
        "total": page.total,
        "page": page.page,
        "limit": page.limit,
        "total_pages": page.total_pages(),
        "list": page.items,
    })))
}

pub async fn get_log(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let record = state.logs.get(&id).await?;
    Ok(Json(json!({ "value": record })))
}

pub async fn delete_log(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.logs.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_all_logs(State(state): State<Arc<AdminState>>) -> ApiResult<Json<Value>> {
    let deleted = state.logs.delete_all().await?;
    Ok(Json(json!({ "deleted_count": deleted })))
}

pub async fn log_stats(
    State(state): State<Arc<AdminState>>,
    Query(q): Query<StatsQuery>,
) -> ApiResult<Json<Value>> {
    let stats = state.logs.stats(q.since).await?;
    Ok(Json(json!(stats)))
}

pub async fn recent_logs(
    State(state): State<Arc<AdminState>>,
    Query(q): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let page = state.logs.recent(page_request(q.page, q.limit)).await?;
    Ok(Json(json!({
        "total": page.total,
        "page": page.page,
        "limit": page.limit,
        "total_pages": page.total_pages(),
        "list": page.items,
    })))
}

/// Every record as a downloadable JSON document.
pub async fn export_logs(State(state): State<Arc<AdminState>>) -> ApiResult<Response> {
    let records = state.logs.export().await?;
    let body = serde_json::to_vec_pretty(&records).map_err(WardenError::from)?;
    let disposition = format!(
        "attachment; filename=\"logs-{}.json\"",
        Utc::now().format("%Y-%m-%d")
    );

    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
