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
    services::{
        dashboard::{DashboardData, DashboardService},
        errors::ServiceError,
    },
};

pub fn router() -> Router {
    Router::new().route("/", get(overview))
}

#[derive(Debug, Deserialize)]
struct OverviewQuery {
    year: Option<i32>,
}

async fn overview(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<OverviewQuery>,
) -> Result<Json<DashboardData>, (StatusCode, Json<serde_json::Value>)> {
    let service = DashboardService::new(state);
    let data = service.overview(&user, query.year).await.map_err(to_response)?;
    Ok(Json(data))
}

fn to_response(err: ServiceError) -> (StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
