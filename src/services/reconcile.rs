//! Reconciles synchronized requests against freee.
//!
//! A deal deleted on the freee side leaves the local request claiming a
//! transaction that no longer exists. The sweep walks every synchronized
//! request, probes the deal, and marks vanished ones `freee_deleted`.

use std::sync::Arc;

use serde::Serialize;
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

use crate::{
    domain::models::RequestStatus,
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{ensure_admin, errors::ServiceError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub checked: usize,
    pub deleted: usize,
    pub titles: Vec<String>,
}

#[derive(FromRow)]
struct SyncedRequest {
    id: Uuid,
    freee_deal_id: i64,
    title: String,
}

pub struct ReconcileService {
    pub state: Arc<AppState>,
}

impl ReconcileService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn sweep_deletions(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<SweepReport, ServiceError> {
        ensure_admin(actor)?;

        let config = self.state.freee.load_config().await?;
        let Some(company_id) = config.company_id.filter(|_| config.is_connected()) else {
            return Err(ServiceError::Unavailable("freee is not connected".into()));
        };

        let requests = sqlx::query_as::<_, SyncedRequest>(
            "SELECT id, freee_deal_id, title FROM cost_requests \
             WHERE status = $1 AND freee_deal_id IS NOT NULL",
        )
        .bind(RequestStatus::SyncedToFreee)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let checked = requests.len();
        let mut titles = Vec::new();

        for request in requests {
            match self
                .state
                .freee
                .deal_exists(company_id, request.freee_deal_id)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    let result = sqlx::query(
                        "UPDATE cost_requests SET status = $1, updated_at = now() WHERE id = $2",
                    )
                    .bind(RequestStatus::FreeeDeleted)
                    .bind(request.id)
                    .execute(&self.state.pool)
                    .await;
                    match result {
                        Ok(_) => titles.push(request.title),
                        Err(err) => {
                            warn!(title = %request.title, error = %err, "failed to mark request deleted");
                        }
                    }
                }
                Err(err) => {
                    warn!(title = %request.title, error = %err, "deal check skipped");
                }
            }
        }

        Ok(SweepReport {
            checked,
            deleted: titles.len(),
            titles,
        })
    }
}
