use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{
    domain::models::{Role, User},
    infrastructure::{auth::issue_token, state::AppState},
    services::errors::ServiceError,
};

pub fn router() -> Router {
    Router::new().route("/login", post(login))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    credential: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    role: Role,
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<serde_json::Value>)> {
    let configured = state.config.auth.developer_credential.as_bytes();
    if configured.is_empty() || !bool::from(payload.credential.as_bytes().ct_eq(configured)) {
        return Err(unauthorized());
    }

    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, display_name, role, department_id, freee_partner_id, created_at \
         FROM users WHERE email = $1",
    )
    .bind(&payload.email)
    .fetch_optional(&state.pool)
    .await
    .map_err(|err| to_response(ServiceError::Internal(err.to_string())))?;

    let Some(user) = user else {
        return Err(unauthorized());
    };

    let token = issue_token(&state, &user).map_err(to_response)?;

    Ok(Json(LoginResponse {
        token,
        role: user.role,
    }))
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "invalid_credentials" })),
    )
}

fn to_response(err: ServiceError) -> (StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
