//! OAuth connection lifecycle for the freee integration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::infrastructure::{auth::AuthenticatedUser, state::AppState};

use super::{ensure_admin, errors::ServiceError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterCounts {
    pub account_items: i64,
    pub partners: i64,
    pub sections: i64,
    pub memo_tags: i64,
    pub tax_codes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub company_id: Option<i64>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_pl_sync_at: Option<DateTime<Utc>>,
    pub master_counts: MasterCounts,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResult {
    pub connected: bool,
    pub company_id: i64,
}

pub struct ConnectionService {
    pub state: Arc<AppState>,
}

impl ConnectionService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn connect_url(&self, actor: &AuthenticatedUser) -> Result<String, ServiceError> {
        ensure_admin(actor)?;
        self.state.freee.authorize_url()
    }

    /// Completes the OAuth flow: exchanges the code, picks the first company
    /// the authorized user can access, and stores the connection.
    pub async fn complete_callback(
        &self,
        actor: &AuthenticatedUser,
        code: &str,
    ) -> Result<CallbackResult, ServiceError> {
        ensure_admin(actor)?;
        let tokens = self.state.freee.exchange_code(code).await?;
        let companies = self.state.freee.companies(&tokens.access_token).await?;
        let company = companies.first().ok_or_else(|| {
            ServiceError::ExternalApi("no freee company available for this account".into())
        })?;
        self.state
            .freee
            .persist_tokens(&tokens, Some(company.id))
            .await?;
        Ok(CallbackResult {
            connected: true,
            company_id: company.id,
        })
    }

    pub async fn status(&self, actor: &AuthenticatedUser) -> Result<ConnectionStatus, ServiceError> {
        ensure_admin(actor)?;
        let config = self.state.freee.load_config().await?;

        let account_items =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM account_item_cache")
                .fetch_one(&self.state.pool);
        let partners = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM partner_cache")
            .fetch_one(&self.state.pool);
        let sections = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM section_cache")
            .fetch_one(&self.state.pool);
        let memo_tags = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM memo_tag_cache")
            .fetch_one(&self.state.pool);
        let tax_codes = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tax_code_cache")
            .fetch_one(&self.state.pool);
        let (account_items, partners, sections, memo_tags, tax_codes) =
            futures::try_join!(account_items, partners, sections, memo_tags, tax_codes)
                .map_err(|err| ServiceError::Internal(err.to_string()))?;

        Ok(ConnectionStatus {
            connected: config.is_connected(),
            company_id: config.company_id,
            last_sync_at: config.last_sync_at,
            last_pl_sync_at: config.last_pl_sync_at,
            master_counts: MasterCounts {
                account_items,
                partners,
                sections,
                memo_tags,
                tax_codes,
            },
        })
    }

    pub async fn disconnect(&self, actor: &AuthenticatedUser) -> Result<(), ServiceError> {
        ensure_admin(actor)?;
        self.state.freee.clear_connection().await
    }
}
