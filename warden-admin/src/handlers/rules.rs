use crate::error::{ApiError, ApiResult};
use crate::server::AdminState;
use axum::{
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use warden_core::WardenError;
use warden_core::page::PageRequest;
use warden_core::rule::{RuleDraft, RulePatch};

#[derive(Debug, Default, Deserialize)]
pub struct ListRulesQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
}

/// Malformed bodies (bad JSON, unknown verbs, wrong types) are validation failures.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError(WardenError::Validation(e.body_text())))
}

pub async fn list_rules(
    State(state): State<Arc<AdminState>>,
    Query(q): Query<ListRulesQuery>,
) -> ApiResult<Json<Value>> {
    let defaults = PageRequest::default();
    let req = PageRequest::new(q.page.unwrap_or(defaults.page), q.limit.unwrap_or(defaults.limit));
    let page = state.rules.list(req, q.search.as_deref()).await?;
    Ok(Json(json!({
        "total": page.total,
        "page": page.page,
        "limit": page.limit,
        "total_pages": page.total_pages(),
        "list": page.items,
    })))
}

pub async fn get_rule(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let rule = state.rules.get(&id).await?;
    Ok(Json(json!({ "value": rule })))
}

pub async fn create_rule(
    State(state): State<Arc<AdminState>>,
    payload: Result<Json<RuleDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let rule = state.rules.create(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(json!({ "value": rule }))))
}

pub async fn update_rule(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    payload: Result<Json<RulePatch>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let rule = state.rules.update(&id, body(payload)?).await?;
    Ok(Json(json!({ "value": rule })))
}

pub async fn delete_rule(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.rules.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_rules(State(state): State<Arc<AdminState>>) -> ApiResult<Json<Value>> {
    let rules = state.rules.reset_to_defaults().await?;
    Ok(Json(json!({
        "total": rules.len(),
        "list": rules,
    })))
}
