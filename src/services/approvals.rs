//! Review decisions on submitted cost requests.
//!
//! A decision names an action (approve, reject, hold, revert) and may carry
//! the same enrichment fields as the standalone PATCH endpoint, so reviewers
//! can fix up accounting data in the same round trip that moves the status.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::{
    domain::{
        lifecycle::{next_status, DecisionAction},
        models::CostRequest,
    },
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{
    ensure_admin,
    errors::ServiceError,
    requests::{apply_patch, persist_enrichment, EnrichmentPatch},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub action: DecisionAction,
    #[serde(flatten)]
    pub enrichment: EnrichmentPatch,
}

pub struct ApprovalService {
    pub state: Arc<AppState>,
}

impl ApprovalService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Applies a review decision. Enrichment is merged before the transition
    /// is checked, so approving with an account item in the same payload is
    /// enough to satisfy the approval requirement.
    pub async fn decide(
        &self,
        actor: &AuthenticatedUser,
        request_id: Uuid,
        payload: DecisionRequest,
    ) -> Result<CostRequest, ServiceError> {
        ensure_admin(actor)?;
        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let mut request = sqlx::query_as::<_, CostRequest>(
            "SELECT * FROM cost_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;

        apply_patch(&mut request, &payload.enrichment);

        let status = next_status(request.status, payload.action)
            .map_err(|err| ServiceError::InvalidState(err.to_string()))?;

        if payload.action == DecisionAction::Approve && request.account_item_id.is_none() {
            return Err(ServiceError::Validation(
                "an account item must be assigned before approval".into(),
            ));
        }

        request.status = status;
        let updated = persist_enrichment(&mut tx, &request).await?;
        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        Ok(updated)
    }
}
