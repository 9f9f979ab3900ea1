//! Pulls the expense ledger back out of freee.
//!
//! The ledger mirror is a full replacement: every expense deal is fetched,
//! flattened to one row per detail line, and swapped into
//! `freee_deal_ledger` in a single transaction. Names come from the deal
//! payload itself; only memo tags need the local cache because the API
//! returns bare tag ids.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::infrastructure::{auth::AuthenticatedUser, freee::types::DealPayload, state::AppState};

use super::{ensure_admin, errors::ServiceError};

const INSERT_BATCH: usize = 500;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerPullReport {
    pub deals: usize,
    pub rows: usize,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LedgerRow {
    pub freee_deal_id: i64,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub partner_name: Option<String>,
    pub section_name: Option<String>,
    pub account_item_name: Option<String>,
    pub amount: i64,
    pub memo_tag_names: Option<String>,
}

pub struct LedgerService {
    pub state: Arc<AppState>,
}

impl LedgerService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn trigger(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<LedgerPullReport, ServiceError> {
        ensure_admin(actor)?;
        self.pull().await
    }

    pub async fn pull(&self) -> Result<LedgerPullReport, ServiceError> {
        let config = self.state.freee.load_config().await?;
        let Some(company_id) = config.company_id.filter(|_| config.is_connected()) else {
            return Err(ServiceError::Unavailable("freee is not connected".into()));
        };

        let tag_rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT freee_id, name FROM memo_tag_cache",
        )
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
        let tag_names: HashMap<i64, String> = tag_rows.into_iter().collect();

        let deals = self.state.freee.expense_deals(company_id).await?;
        let now = Utc::now();
        let rows = build_ledger_rows(&deals, &tag_names);

        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        sqlx::query("DELETE FROM freee_deal_ledger")
            .execute(&mut *tx)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        for chunk in rows.chunks(INSERT_BATCH) {
            let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
                "INSERT INTO freee_deal_ledger (id, freee_deal_id, issue_date, due_date, \
                 partner_name, section_name, account_item_name, amount, memo_tag_names, synced_at) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(Uuid::new_v4())
                    .push_bind(row.freee_deal_id)
                    .push_bind(row.issue_date)
                    .push_bind(row.due_date)
                    .push_bind(&row.partner_name)
                    .push_bind(&row.section_name)
                    .push_bind(&row.account_item_name)
                    .push_bind(row.amount)
                    .push_bind(&row.memo_tag_names)
                    .push_bind(now);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
        }

        sqlx::query(
            "UPDATE freee_config SET last_pl_sync_at = $1, updated_at = now() WHERE id = 'default'",
        )
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        Ok(LedgerPullReport {
            deals: deals.len(),
            rows: rows.len(),
            synced_at: now,
        })
    }
}

/// Flattens deals to one ledger row per detail line. Amounts are stored as
/// absolute values; tag ids the cache does not know are dropped.
pub fn build_ledger_rows(
    deals: &[DealPayload],
    tag_names: &HashMap<i64, String>,
) -> Vec<LedgerRow> {
    let mut rows = Vec::new();
    for deal in deals {
        for detail in &deal.details {
            let names: Vec<&str> = detail
                .tag_ids
                .as_deref()
                .unwrap_or_default()
                .iter()
                .filter_map(|id| tag_names.get(id).map(String::as_str))
                .collect();
            rows.push(LedgerRow {
                freee_deal_id: deal.id,
                issue_date: deal.issue_date,
                due_date: deal.due_date,
                partner_name: deal.partner_name.clone(),
                section_name: detail.section_name.clone(),
                account_item_name: detail.account_item_name.clone(),
                amount: detail.amount.abs(),
                memo_tag_names: (!names.is_empty()).then(|| names.join(",")),
            });
        }
    }
    rows
}
