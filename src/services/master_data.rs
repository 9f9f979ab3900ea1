//! Local mirror of the freee master data.
//!
//! Account items, partners, sections, memo tags and tax codes are cached so
//! pickers and the synchronization path can resolve names without a round
//! trip. Each entity type is replaced in its own transaction; a type whose
//! fetch comes back empty keeps its previous contents, except partners,
//! which mirror the remote list verbatim.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    domain::models::{
        AccountItemCacheEntry, Department, MemoTagCacheEntry, PartnerCacheEntry,
        SectionCacheEntry, TaxCodeCacheEntry, PAYROLL_CONFIRMATION_TAG, PROVISIONAL_TAG,
        TRANSFER_CONFIRMATION_TAG,
    },
    infrastructure::{
        auth::AuthenticatedUser,
        freee::types::{
            AccountItemPayload, PartnerPayload, SectionPayload, TagPayload, TaxCodePayload,
        },
        state::AppState,
    },
};

use super::{ensure_admin, errors::ServiceError};

/// Tags the synchronization workflow relies on; created in freee when the
/// company does not have them yet.
const REQUIRED_MEMO_TAGS: [&str; 3] = [
    TRANSFER_CONFIRMATION_TAG,
    PAYROLL_CONFIRMATION_TAG,
    PROVISIONAL_TAG,
];

const INSERT_BATCH: usize = 500;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterSyncReport {
    pub account_items: usize,
    pub partners: usize,
    pub sections: usize,
    pub memo_tags: usize,
    pub tax_codes: usize,
    pub synced_at: DateTime<Utc>,
}

pub struct MasterDataService {
    pub state: Arc<AppState>,
}

impl MasterDataService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn trigger(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<MasterSyncReport, ServiceError> {
        ensure_admin(actor)?;
        self.refresh().await
    }

    pub async fn refresh(&self) -> Result<MasterSyncReport, ServiceError> {
        let config = self.state.freee.load_config().await?;
        let Some(company_id) = config.company_id.filter(|_| config.is_connected()) else {
            return Err(ServiceError::Unavailable("freee is not connected".into()));
        };
        let now = Utc::now();

        let account_items = self.state.freee.account_items(company_id).await?;
        if !account_items.is_empty() {
            self.replace_account_items(&account_items, now).await?;
        }

        let partners = self.state.freee.partners(company_id).await?;
        self.replace_partners(&partners, now).await?;

        let sections = self.state.freee.sections(company_id).await?;
        if !sections.is_empty() {
            self.replace_sections(&sections, now).await?;
        }

        let tags = self.ensure_required_tags(company_id).await?;
        self.replace_memo_tags(&tags, now).await?;

        let tax_codes = self.state.freee.tax_codes(company_id).await?;
        if !tax_codes.is_empty() {
            self.replace_tax_codes(&tax_codes, now).await?;
        }

        sqlx::query(
            "UPDATE freee_config SET last_sync_at = $1, updated_at = now() WHERE id = 'default'",
        )
        .bind(now)
        .execute(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        Ok(MasterSyncReport {
            account_items: account_items.len(),
            partners: partners.len(),
            sections: sections.len(),
            memo_tags: tags.len(),
            tax_codes: tax_codes.len(),
            synced_at: now,
        })
    }

    async fn ensure_required_tags(&self, company_id: i64) -> Result<Vec<TagPayload>, ServiceError> {
        let mut tags = self.state.freee.tags(company_id).await?;
        for required in REQUIRED_MEMO_TAGS {
            if !tags.iter().any(|tag| tag.name == required) {
                let created = self.state.freee.create_tag(company_id, required).await?;
                tags.push(created);
            }
        }
        Ok(tags)
    }

    async fn replace_account_items(
        &self,
        items: &[AccountItemPayload],
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        sqlx::query("DELETE FROM account_item_cache")
            .execute(&mut *tx)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        for chunk in items.chunks(INSERT_BATCH) {
            let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
                "INSERT INTO account_item_cache (freee_id, name, shortcut1, shortcut2, \
                 account_category, synced_at) ",
            );
            builder.push_values(chunk, |mut b, item| {
                b.push_bind(item.id)
                    .push_bind(&item.name)
                    .push_bind(&item.shortcut1)
                    .push_bind(&item.shortcut2)
                    .push_bind(&item.account_category)
                    .push_bind(now);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    async fn replace_partners(
        &self,
        partners: &[PartnerPayload],
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        sqlx::query("DELETE FROM partner_cache")
            .execute(&mut *tx)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        for chunk in partners.chunks(INSERT_BATCH) {
            let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
                "INSERT INTO partner_cache (freee_id, name, synced_at) ",
            );
            builder.push_values(chunk, |mut b, partner| {
                b.push_bind(partner.id)
                    .push_bind(&partner.name)
                    .push_bind(now);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    async fn replace_sections(
        &self,
        sections: &[SectionPayload],
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        sqlx::query("DELETE FROM section_cache")
            .execute(&mut *tx)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        for section in sections {
            sqlx::query("INSERT INTO section_cache (freee_id, name, synced_at) VALUES ($1,$2,$3)")
                .bind(section.id)
                .bind(&section.name)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    async fn replace_memo_tags(
        &self,
        tags: &[TagPayload],
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        sqlx::query("DELETE FROM memo_tag_cache")
            .execute(&mut *tx)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        for tag in tags {
            sqlx::query("INSERT INTO memo_tag_cache (freee_id, name, synced_at) VALUES ($1,$2,$3)")
                .bind(tag.id)
                .bind(&tag.name)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    async fn replace_tax_codes(
        &self,
        codes: &[TaxCodePayload],
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        sqlx::query("DELETE FROM tax_code_cache")
            .execute(&mut *tx)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        for code in codes {
            sqlx::query(
                "INSERT INTO tax_code_cache (code, name, name_ja, synced_at) VALUES ($1,$2,$3,$4)",
            )
            .bind(code.code)
            .bind(&code.name)
            .bind(&code.name_ja)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn search_account_items(
        &self,
        actor: &AuthenticatedUser,
        query: Option<&str>,
    ) -> Result<Vec<AccountItemCacheEntry>, ServiceError> {
        ensure_admin(actor)?;
        sqlx::query_as::<_, AccountItemCacheEntry>(
            "SELECT freee_id, name, shortcut1, shortcut2, account_category, synced_at \
             FROM account_item_cache \
             WHERE $1::text IS NULL \
                OR name ILIKE '%' || $1 || '%' \
                OR shortcut1 ILIKE '%' || $1 || '%' \
                OR shortcut2 ILIKE '%' || $1 || '%' \
             ORDER BY name LIMIT 50",
        )
        .bind(query)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn search_partners(
        &self,
        actor: &AuthenticatedUser,
        query: Option<&str>,
    ) -> Result<Vec<PartnerCacheEntry>, ServiceError> {
        ensure_admin(actor)?;
        sqlx::query_as::<_, PartnerCacheEntry>(
            "SELECT freee_id, name, synced_at FROM partner_cache \
             WHERE $1::text IS NULL OR name ILIKE '%' || $1 || '%' \
             ORDER BY name LIMIT 50",
        )
        .bind(query)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn list_sections(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<Vec<SectionCacheEntry>, ServiceError> {
        ensure_admin(actor)?;
        sqlx::query_as::<_, SectionCacheEntry>(
            "SELECT freee_id, name, synced_at FROM section_cache ORDER BY name",
        )
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn list_memo_tags(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<Vec<MemoTagCacheEntry>, ServiceError> {
        ensure_admin(actor)?;
        sqlx::query_as::<_, MemoTagCacheEntry>(
            "SELECT freee_id, name, synced_at FROM memo_tag_cache ORDER BY name",
        )
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn list_tax_codes(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<Vec<TaxCodeCacheEntry>, ServiceError> {
        ensure_admin(actor)?;
        sqlx::query_as::<_, TaxCodeCacheEntry>(
            "SELECT code, name, name_ja, synced_at FROM tax_code_cache ORDER BY code",
        )
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn list_departments(&self) -> Result<Vec<Department>, ServiceError> {
        sqlx::query_as::<_, Department>(
            "SELECT id, name, freee_section_id, created_at FROM departments ORDER BY name",
        )
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }
}
