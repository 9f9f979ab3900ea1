//! Submission, listing and enrichment of cost requests.
//!
//! Employees submit and read their own requests; administrators see
//! everything and maintain the accounting enrichment fields that later feed
//! the freee synchronization.

use std::{collections::HashMap, sync::Arc};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::models::{
        CostCategory, CostRequest, CostType, RequestStatus, Role, TaxType, User, YearMonth,
    },
    infrastructure::{auth::AuthenticatedUser, mailer::OutboundMail, state::AppState},
    validation::rules,
};

use super::{ensure_admin, errors::ServiceError};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[validate(length(min = 1, max = 200, message = "title must not be empty"))]
    pub title: String,
    pub description: Option<String>,
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount: i64,
    pub category: CostCategory,
    pub cost_type: CostType,
    pub tax_type: Option<TaxType>,
    pub usage_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub recording_month: Option<YearMonth>,
    pub payment_month: Option<YearMonth>,
    pub cost_end_date: Option<NaiveDate>,
    pub department_id: Option<Uuid>,
    pub billing_partner_name: Option<String>,
    pub billing_partner_id: Option<i64>,
    pub supervisor_name: Option<String>,
    pub sync_description: Option<bool>,
    pub is_qualified_invoice: Option<bool>,
}

/// Admin-maintained accounting fields. Each nullable field distinguishes
/// "absent from the payload" from an explicit null: absent keeps the stored
/// value, null clears it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentPatch {
    #[serde(default, with = "serde_with::rust::double_option")]
    pub account_item_id: Option<Option<i64>>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub account_item_name: Option<Option<String>>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub memo_tag_names: Option<Option<String>>,
    pub tax_type: Option<TaxType>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub recording_month: Option<Option<YearMonth>>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub payment_month: Option<Option<YearMonth>>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub department_id: Option<Option<Uuid>>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub admin_memo: Option<Option<String>>,
    pub sync_description: Option<bool>,
    pub is_qualified_invoice: Option<bool>,
}

pub fn apply_patch(request: &mut CostRequest, patch: &EnrichmentPatch) {
    if let Some(value) = &patch.account_item_id {
        request.account_item_id = *value;
    }
    if let Some(value) = &patch.account_item_name {
        request.account_item_name = value.clone();
    }
    if let Some(value) = &patch.memo_tag_names {
        request.memo_tag_names = value.clone();
    }
    if let Some(value) = patch.tax_type {
        request.tax_type = value;
    }
    if let Some(value) = &patch.due_date {
        request.due_date = *value;
    }
    if let Some(value) = &patch.recording_month {
        request.recording_month = *value;
    }
    if let Some(value) = &patch.payment_month {
        request.payment_month = *value;
    }
    if let Some(value) = &patch.department_id {
        request.department_id = *value;
    }
    if let Some(value) = &patch.admin_memo {
        request.admin_memo = value.clone();
    }
    if let Some(value) = patch.sync_description {
        request.sync_description = value;
    }
    if let Some(value) = patch.is_qualified_invoice {
        request.is_qualified_invoice = value;
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub status: Option<String>,
    pub category_group: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentSummary {
    pub id: Uuid,
    pub file_name: String,
}

#[derive(FromRow)]
struct AttachmentRow {
    id: Uuid,
    request_id: Uuid,
    file_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: CostRequest,
    pub submitter_name: Option<String>,
    pub department_name: Option<String>,
    pub attachments: Vec<AttachmentSummary>,
}

#[derive(FromRow)]
struct RequestRow {
    #[sqlx(flatten)]
    request: CostRequest,
    submitter_name: Option<String>,
    department_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPage {
    pub items: Vec<RequestDetail>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

pub struct RequestService {
    pub state: Arc<AppState>,
}

impl RequestService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn submit(
        &self,
        actor: &AuthenticatedUser,
        payload: SubmitRequest,
    ) -> Result<CostRequest, ServiceError> {
        payload
            .validate()
            .map_err(|err| ServiceError::Validation(err.to_string()))?;
        rules::usage_date_required(payload.category, payload.usage_date.is_some())
            .map_err(ServiceError::Validation)?;

        let submitter = sqlx::query_as::<_, User>(
            "SELECT id, email, display_name, role, department_id, freee_partner_id, created_at \
             FROM users WHERE id = $1",
        )
        .bind(actor.user_id)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::Forbidden)?;

        // Expense requests are charged to the submitter's own department;
        // company-level requests carry whichever department was entered.
        let department_id = if payload.category.is_expense() {
            submitter.department_id
        } else {
            payload.department_id
        };

        let request = sqlx::query_as::<_, CostRequest>(
            "INSERT INTO cost_requests (id, title, description, amount, category, cost_type, \
             tax_type, status, usage_date, due_date, recording_month, payment_month, \
             cost_end_date, department_id, billing_partner_name, billing_partner_id, \
             submitter_id, supervisor_name, sync_description, is_qualified_invoice) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20) \
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&payload.title)
        .bind(&payload.description)
        .bind(payload.amount)
        .bind(payload.category)
        .bind(payload.cost_type)
        .bind(payload.tax_type.unwrap_or(TaxType::Inclusive))
        .bind(RequestStatus::Submitted)
        .bind(payload.usage_date)
        .bind(payload.due_date)
        .bind(payload.recording_month)
        .bind(payload.payment_month)
        .bind(payload.cost_end_date)
        .bind(department_id)
        .bind(&payload.billing_partner_name)
        .bind(payload.billing_partner_id)
        .bind(submitter.id)
        .bind(&payload.supervisor_name)
        .bind(payload.sync_description.unwrap_or(false))
        .bind(payload.is_qualified_invoice.unwrap_or(false))
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let state = self.state.clone();
        let notification = request.clone();
        let submitter_name = submitter.display_name.clone();
        tokio::spawn(async move {
            notify_admins(state, notification, submitter_name).await;
        });

        Ok(request)
    }

    pub async fn list(
        &self,
        actor: &AuthenticatedUser,
        query: ListQuery,
    ) -> Result<RequestPage, ServiceError> {
        let statuses = query
            .status
            .as_deref()
            .map(resolve_status_filter)
            .transpose()?
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|status| status.as_str().to_string())
                    .collect::<Vec<_>>()
            });
        let categories = query
            .category_group
            .as_deref()
            .map(resolve_category_filter)
            .transpose()?
            .map(|categories| {
                categories
                    .iter()
                    .map(|category| category.as_str().to_string())
                    .collect::<Vec<_>>()
            });
        let submitter_scope = match actor.role {
            Role::Admin => None,
            Role::Employee => Some(actor.user_id),
        };
        let (page, per_page) = normalize_paging(query.page, query.per_page);
        let offset = i64::from(page - 1) * i64::from(per_page);

        let rows = sqlx::query_as::<_, RequestRow>(
            "SELECT r.*, u.display_name AS submitter_name, d.name AS department_name \
             FROM cost_requests r \
             LEFT JOIN users u ON u.id = r.submitter_id \
             LEFT JOIN departments d ON d.id = r.department_id \
             WHERE ($1::text[] IS NULL OR r.status = ANY($1)) \
               AND ($2::text[] IS NULL OR r.category = ANY($2)) \
               AND ($3::uuid IS NULL OR r.submitter_id = $3) \
             ORDER BY r.created_at DESC \
             LIMIT $4 OFFSET $5",
        )
        .bind(&statuses)
        .bind(&categories)
        .bind(submitter_scope)
        .bind(i64::from(per_page))
        .bind(offset)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM cost_requests r \
             WHERE ($1::text[] IS NULL OR r.status = ANY($1)) \
               AND ($2::text[] IS NULL OR r.category = ANY($2)) \
               AND ($3::uuid IS NULL OR r.submitter_id = $3)",
        )
        .bind(&statuses)
        .bind(&categories)
        .bind(submitter_scope)
        .fetch_one(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let ids: Vec<Uuid> = rows.iter().map(|row| row.request.id).collect();
        let mut attachments = self.attachments_for(&ids).await?;

        let items = rows
            .into_iter()
            .map(|row| RequestDetail {
                attachments: attachments.remove(&row.request.id).unwrap_or_default(),
                request: row.request,
                submitter_name: row.submitter_name,
                department_name: row.department_name,
            })
            .collect();

        Ok(RequestPage {
            items,
            total,
            page,
            per_page,
        })
    }

    pub async fn get(
        &self,
        actor: &AuthenticatedUser,
        request_id: Uuid,
    ) -> Result<RequestDetail, ServiceError> {
        let row = sqlx::query_as::<_, RequestRow>(
            "SELECT r.*, u.display_name AS submitter_name, d.name AS department_name \
             FROM cost_requests r \
             LEFT JOIN users u ON u.id = r.submitter_id \
             LEFT JOIN departments d ON d.id = r.department_id \
             WHERE r.id = $1 AND ($2::uuid IS NULL OR r.submitter_id = $2)",
        )
        .bind(request_id)
        .bind(match actor.role {
            Role::Admin => None,
            Role::Employee => Some(actor.user_id),
        })
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .ok_or(ServiceError::NotFound)?;

        let mut attachments = self.attachments_for(&[row.request.id]).await?;
        Ok(RequestDetail {
            attachments: attachments.remove(&row.request.id).unwrap_or_default(),
            request: row.request,
            submitter_name: row.submitter_name,
            department_name: row.department_name,
        })
    }

    /// Applies enrichment without touching the request status. Used by the
    /// standalone PATCH endpoint; decisions go through `ApprovalService`.
    pub async fn apply_enrichment(
        &self,
        actor: &AuthenticatedUser,
        request_id: Uuid,
        patch: EnrichmentPatch,
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

        apply_patch(&mut request, &patch);

        let updated = persist_enrichment(&mut tx, &request).await?;
        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        Ok(updated)
    }

    async fn attachments_for(
        &self,
        request_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<AttachmentSummary>>, ServiceError> {
        if request_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, AttachmentRow>(
            "SELECT id, request_id, file_name FROM attachments \
             WHERE request_id = ANY($1) ORDER BY created_at",
        )
        .bind(request_ids)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let mut grouped: HashMap<Uuid, Vec<AttachmentSummary>> = HashMap::new();
        for row in rows {
            grouped
                .entry(row.request_id)
                .or_default()
                .push(AttachmentSummary {
                    id: row.id,
                    file_name: row.file_name,
                });
        }
        Ok(grouped)
    }
}

/// Writes every enrichment-managed column back. Shared with the decision
/// path so both endpoints persist the same field set.
pub(crate) async fn persist_enrichment(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    request: &CostRequest,
) -> Result<CostRequest, ServiceError> {
    sqlx::query_as::<_, CostRequest>(
        "UPDATE cost_requests SET account_item_id = $1, account_item_name = $2, \
         memo_tag_names = $3, tax_type = $4, due_date = $5, recording_month = $6, \
         payment_month = $7, department_id = $8, admin_memo = $9, sync_description = $10, \
         is_qualified_invoice = $11, status = $12, updated_at = now() \
         WHERE id = $13 RETURNING *",
    )
    .bind(request.account_item_id)
    .bind(&request.account_item_name)
    .bind(&request.memo_tag_names)
    .bind(request.tax_type)
    .bind(request.due_date)
    .bind(request.recording_month)
    .bind(request.payment_month)
    .bind(request.department_id)
    .bind(&request.admin_memo)
    .bind(request.sync_description)
    .bind(request.is_qualified_invoice)
    .bind(request.status)
    .bind(request.id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| ServiceError::Internal(err.to_string()))
}

fn resolve_status_filter(value: &str) -> Result<Vec<RequestStatus>, ServiceError> {
    match value {
        "pending" => Ok(vec![RequestStatus::Submitted, RequestStatus::OnHold]),
        "approved_or_synced" => Ok(vec![
            RequestStatus::Approved,
            RequestStatus::SyncedToFreee,
        ]),
        other => other
            .parse::<RequestStatus>()
            .map(|status| vec![status])
            .map_err(ServiceError::Validation),
    }
}

fn resolve_category_filter(value: &str) -> Result<Vec<CostCategory>, ServiceError> {
    match value {
        "sga" => Ok(vec![CostCategory::Sga]),
        "expense" => Ok(vec![CostCategory::Expense]),
        "billable" => Ok(vec![
            CostCategory::SgaBillable,
            CostCategory::ExpenseBillable,
        ]),
        other => Err(ServiceError::Validation(format!(
            "unknown category group: {other}"
        ))),
    }
}

fn normalize_paging(page: Option<u32>, per_page: Option<u32>) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (page, per_page)
}

async fn notify_admins(state: Arc<AppState>, request: CostRequest, submitter_name: String) {
    let admins = match sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE role = 'admin'")
        .fetch_all(&state.pool)
        .await
    {
        Ok(emails) => emails,
        Err(err) => {
            warn!(error = %err, "failed to load admin recipients");
            return;
        }
    };

    let body = format!(
        "{submitter_name}さんから新しい申請が提出されました。\n\n件名: {}\n金額: {}円\n区分: {}\n",
        request.title,
        request.amount,
        request.category.as_str(),
    );
    for email in admins {
        let mail = OutboundMail {
            to: email,
            subject: format!("新しいコスト申請: {}", request.title),
            body: body.clone(),
        };
        if let Err(err) = state.mailer.send(mail).await {
            warn!(error = %err, "failed to send submission notification");
        }
    }
}
