use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::{
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::{errors::ServiceError, master_data::MasterDataService},
};

pub fn router() -> Router {
    Router::new()
        .route("/account-items", get(account_items))
        .route("/partners", get(partners))
        .route("/sections", get(sections))
        .route("/tags", get(tags))
        .route("/tax-codes", get(tax_codes))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

async fn account_items(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = MasterDataService::new(state);
    let items = service
        .search_account_items(&user, query.q.as_deref())
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "accountItems": items })))
}

async fn partners(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = MasterDataService::new(state);
    let partners = service
        .search_partners(&user, query.q.as_deref())
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "partners": partners })))
}

async fn sections(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = MasterDataService::new(state);
    let sections = service.list_sections(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "sections": sections })))
}

async fn tags(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = MasterDataService::new(state);
    let tags = service.list_memo_tags(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "tags": tags })))
}

async fn tax_codes(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = MasterDataService::new(state);
    let tax_codes = service.list_tax_codes(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "taxCodes": tax_codes })))
}

/// Departments back the submission form, so any signed-in user may list them.
pub async fn departments(
    Extension(state): Extension<Arc<AppState>>,
    _user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = MasterDataService::new(state);
    let departments = service.list_departments().await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "departments": departments })))
}

fn to_response(err: ServiceError) -> (StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
