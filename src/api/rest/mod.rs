use axum::{routing::get, Router};

use crate::api::rest::{
    attachments::router as attachments_router, auth::router as auth_router,
    dashboard::router as dashboard_router, freee::router as freee_router,
    master::router as master_router, requests::router as requests_router,
};

pub mod attachments;
pub mod auth;
pub mod dashboard;
pub mod freee;
pub mod health;
pub mod master;
pub mod requests;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/departments", get(master::departments))
        .nest("/auth", auth_router())
        .nest("/requests", requests_router())
        .nest("/attachments", attachments_router())
        .nest("/freee", freee_router())
        .nest("/master", master_router())
        .nest("/dashboard", dashboard_router())
}
