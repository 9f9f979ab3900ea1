use std::net::SocketAddr;
use std::sync::Arc;

use axum::{serve, Extension};
use cost_portal::{
    api,
    infrastructure::{config::Config, db, mailer, state::AppState, storage},
    jobs, telemetry,
};
use dotenvy::dotenv;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    telemetry::init();

    let config = Arc::new(Config::from_env()?);
    let pool = db::connect(&config.database).await?;
    db::run_migrations(&pool).await?;

    let storage = storage::build_storage(&config.storage)?;
    let mailer = mailer::build_mailer(&config.mailer)?;
    let state = Arc::new(AppState::new(Arc::clone(&config), pool, storage, mailer)?);

    let _worker_handles = jobs::spawn_workers(Arc::clone(&state));

    let router = api::build_router(Arc::clone(&config)).layer(Extension(Arc::clone(&state)));
    let addr: SocketAddr = config.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "cost portal api listening");

    serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
