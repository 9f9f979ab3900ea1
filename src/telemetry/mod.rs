//! JSON log output with `RUST_LOG`-style filtering.

use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static TELEMETRY: OnceLock<()> = OnceLock::new();

/// Per-statement sqlx logging drowns out request logs at the default level.
const DEFAULT_FILTER: &str = "info,sqlx::query=warn";

pub fn init() {
    TELEMETRY.get_or_init(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    });
}
