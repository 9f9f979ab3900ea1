use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::{
        connection::ConnectionService, errors::ServiceError, ledger::LedgerService,
        master_data::MasterDataService, reconcile::ReconcileService,
    },
};

pub fn router() -> Router {
    Router::new()
        .route("/connect", get(connect))
        .route("/callback", get(callback))
        .route("/status", get(status))
        .route("/disconnect", post(disconnect))
        .route("/sync", post(sync_masters))
        .route("/sweep", post(sweep))
        .route("/ledger/sync", post(pull_ledger))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
}

async fn connect(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = ConnectionService::new(state);
    let url = service.connect_url(&user).map_err(to_response)?;
    Ok(Json(serde_json::json!({ "url": url })))
}

async fn callback(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = ConnectionService::new(state);
    let result = service
        .complete_callback(&user, &query.code)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!(result)))
}

async fn status(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = ConnectionService::new(state);
    let status = service.status(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!(status)))
}

async fn disconnect(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = ConnectionService::new(state);
    service.disconnect(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "disconnected": true })))
}

async fn sync_masters(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = MasterDataService::new(state);
    let report = service.trigger(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!(report)))
}

async fn sweep(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = ReconcileService::new(state);
    let report = service.sweep_deletions(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!(report)))
}

async fn pull_ledger(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = LedgerService::new(state);
    let report = service.trigger(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!(report)))
}

fn to_response(err: ServiceError) -> (StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
