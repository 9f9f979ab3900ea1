//! Receipt and document uploads attached to cost requests.

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::{
    domain::models::{Attachment, Role},
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    validation::rules,
};

use super::errors::ServiceError;

pub struct AttachmentService {
    pub state: Arc<AppState>,
}

impl AttachmentService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn upload(
        &self,
        actor: &AuthenticatedUser,
        request_id: Uuid,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<Attachment, ServiceError> {
        rules::validate_upload(
            content_type,
            data.len() as u64,
            self.state.config.uploads.max_bytes,
        )
        .map_err(ServiceError::Validation)?;

        let owner = sqlx::query_scalar::<_, Option<Uuid>>(
            "SELECT submitter_id FROM cost_requests WHERE id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;

        if actor.role == Role::Employee && owner != Some(actor.user_id) {
            return Err(ServiceError::NotFound);
        }

        let attachment_id = Uuid::new_v4();
        let storage_key = format!("requests/{request_id}/{attachment_id}");
        self.state
            .storage
            .put(&storage_key, data.clone(), content_type)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        let attachment = sqlx::query_as::<_, Attachment>(
            "INSERT INTO attachments (id, request_id, file_name, storage_key, mime_type, size_bytes) \
             VALUES ($1,$2,$3,$4,$5,$6) RETURNING *",
        )
        .bind(attachment_id)
        .bind(request_id)
        .bind(file_name)
        .bind(&storage_key)
        .bind(content_type)
        .bind(data.len() as i64)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        sqlx::query("UPDATE cost_requests SET has_receipt = TRUE, updated_at = now() WHERE id = $1")
            .bind(request_id)
            .execute(&mut *tx)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        Ok(attachment)
    }

    pub async fn download(
        &self,
        actor: &AuthenticatedUser,
        attachment_id: Uuid,
    ) -> Result<(Attachment, Bytes), ServiceError> {
        let attachment = sqlx::query_as::<_, Attachment>(
            "SELECT a.* FROM attachments a \
             JOIN cost_requests r ON r.id = a.request_id \
             WHERE a.id = $1 AND ($2::uuid IS NULL OR r.submitter_id = $2)",
        )
        .bind(attachment_id)
        .bind(match actor.role {
            Role::Admin => None,
            Role::Employee => Some(actor.user_id),
        })
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;

        let data = self
            .state
            .storage
            .get(&attachment.storage_key)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?
            .ok_or(ServiceError::NotFound)?;

        Ok((attachment, data))
    }
}
