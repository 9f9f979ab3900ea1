use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    infrastructure::state::AppState,
    services::{ledger::LedgerService, notify::NotifyService},
};

const DAY: Duration = Duration::from_secs(60 * 60 * 24);

/// 13:00 JST, when payroll transfers have settled for the day.
const NOTIFY_HOUR_UTC: u32 = 4;

pub fn spawn_workers(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    vec![
        spawn_ledger_worker(Arc::clone(&state)),
        spawn_payment_notifier(state),
    ]
}

fn spawn_ledger_worker(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(DAY).await;
            let service = LedgerService::new(Arc::clone(&state));
            match service.pull().await {
                Ok(report) => {
                    info!(
                        deals = report.deals,
                        rows = report.rows,
                        "scheduled ledger pull finished"
                    );
                }
                Err(err) => error!(error = %err, "scheduled ledger pull failed"),
            }
        }
    })
}

fn spawn_payment_notifier(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(until_next_notify(Utc::now())).await;
            let service = NotifyService::new(Arc::clone(&state));
            if let Err(err) = service.run().await {
                error!(error = %err, "payment notifier failed");
            }
        }
    })
}

fn until_next_notify(now: DateTime<Utc>) -> Duration {
    let Some(run_at) = now.date_naive().and_hms_opt(NOTIFY_HOUR_UTC, 0, 0) else {
        return DAY;
    };
    let run_at = run_at.and_utc();
    let next = if now < run_at {
        run_at
    } else {
        run_at + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(DAY)
}
