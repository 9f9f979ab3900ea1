use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::{
        approvals::{ApprovalService, DecisionRequest},
        errors::ServiceError,
        requests::{EnrichmentPatch, ListQuery, RequestPage, RequestService, SubmitRequest},
        sync::SyncService,
    },
};

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit).get(list))
        .route("/:id", get(detail).patch(enrich))
        .route("/:id/decision", post(decide))
        .route("/:id/sync", post(synchronize))
}

async fn submit(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = RequestService::new(state);
    let request = service.submit(&user, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "request": request })))
}

async fn list(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<RequestPage>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = RequestService::new(state);
    let page = service.list(&user, query).await.map_err(to_response)?;
    Ok(Json(page))
}

async fn detail(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = RequestService::new(state);
    let request = service.get(&user, id).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "request": request })))
}

async fn enrich(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<EnrichmentPatch>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = RequestService::new(state);
    let request = service
        .apply_enrichment(&user, id, patch)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "request": request })))
}

async fn decide(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = ApprovalService::new(state);
    let request = service.decide(&user, id, payload).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "request": request })))
}

async fn synchronize(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, Json<serde_json::Value>)> {
    let service = SyncService::new(state);
    let request = service.synchronize(&user, id).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({
        "dealId": request.freee_deal_id,
        "request": request,
    })))
}

fn to_response(err: ServiceError) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
