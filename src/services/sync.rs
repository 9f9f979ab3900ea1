//! Pushes approved cost requests into freee as expense deals.
//!
//! Synchronization derives the deal from the enriched request: issue date
//! from the usage date or the recording month, the partner from the billing
//! partner or the submitter, the tax code from the request's tax handling,
//! and section and memo tags from the cached freee master data. A failure
//! after the preconditions leaves the request approved and records the error
//! on the row for the next attempt.

use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

use crate::{
    domain::models::{CostCategory, CostRequest, RequestStatus, TaxType},
    infrastructure::{
        auth::AuthenticatedUser,
        freee::types::{CreateDeal, CreateDealDetail},
        state::AppState,
    },
};

use super::{ensure_admin, errors::ServiceError};

pub const TAX_NAME_EXCLUDED: &str = "対象外";
pub const TAX_NAME_QUALIFIED: &str = "課対仕入10%";
pub const TAX_NAME_NON_QUALIFIED: &str = "課対仕入（控80）10%";

pub struct SyncService {
    pub state: Arc<AppState>,
}

#[derive(FromRow)]
struct DepartmentRef {
    name: String,
    freee_section_id: Option<i64>,
}

#[derive(FromRow)]
struct AttachmentRef {
    id: Uuid,
    file_name: String,
    storage_key: String,
    mime_type: String,
}

impl SyncService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn synchronize(
        &self,
        actor: &AuthenticatedUser,
        request_id: Uuid,
    ) -> Result<CostRequest, ServiceError> {
        ensure_admin(actor)?;

        let request =
            sqlx::query_as::<_, CostRequest>("SELECT * FROM cost_requests WHERE id = $1")
                .bind(request_id)
                .fetch_optional(&self.state.pool)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?
                .ok_or(ServiceError::NotFound)?;

        if request.status != RequestStatus::Approved {
            return Err(ServiceError::InvalidState(
                "only approved requests can be synchronized".into(),
            ));
        }
        let Some(account_item_id) = request.account_item_id else {
            return Err(ServiceError::Validation(
                "an account item must be assigned before synchronization".into(),
            ));
        };
        let config = self.state.freee.load_config().await?;
        let Some(company_id) = config.company_id.filter(|_| config.is_connected()) else {
            return Err(ServiceError::Unavailable("freee is not connected".into()));
        };

        match self.push_deal(&request, account_item_id, company_id).await {
            Ok(updated) => Ok(updated),
            Err(err) => {
                self.record_sync_error(request.id, &err).await;
                Err(err)
            }
        }
    }

    async fn push_deal(
        &self,
        request: &CostRequest,
        account_item_id: i64,
        company_id: i64,
    ) -> Result<CostRequest, ServiceError> {
        let issue_date = resolve_issue_date(request).map_err(ServiceError::Validation)?;
        let due_date = request.due_date.unwrap_or(issue_date);

        let partner_id = self.resolve_partner(request).await?;

        let tax_name = resolve_tax_name(
            request.category.is_billable(),
            request.tax_type == TaxType::Overseas,
            request.is_qualified_invoice,
        );
        let Some(tax_code) = self
            .state
            .freee
            .find_tax_code_by_name(company_id, tax_name)
            .await
        else {
            return Err(ServiceError::Validation(format!(
                "tax code not found in freee: {tax_name}"
            )));
        };

        let section_id = self.resolve_section(request).await?;
        let tag_ids = self.resolve_tags(request.memo_tag_names.as_deref()).await?;
        let description = build_description(
            request.sync_description,
            request.description.as_deref(),
            request.admin_memo.as_deref(),
        );
        let uploaded = self.upload_receipts(request.id, company_id).await?;
        let receipt_ids: Vec<i64> = uploaded.iter().map(|(_, receipt_id)| *receipt_id).collect();

        let deal = CreateDeal {
            company_id,
            issue_date,
            due_date,
            deal_type: "expense",
            partner_id,
            details: vec![CreateDealDetail {
                account_item_id,
                tax_code,
                amount: request.amount,
                section_id,
                tag_ids: (!tag_ids.is_empty()).then_some(tag_ids),
                description,
                receipt_ids: (!receipt_ids.is_empty()).then_some(receipt_ids),
            }],
        };
        let deal_id = self.state.freee.create_deal(&deal).await?;

        let mut tx = self
            .state
            .pool
            .begin()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        let updated = sqlx::query_as::<_, CostRequest>(
            "UPDATE cost_requests SET status = $1, freee_deal_id = $2, freee_partner_id = $3, \
             freee_synced_at = now(), freee_sync_error = NULL, updated_at = now() \
             WHERE id = $4 RETURNING *",
        )
        .bind(RequestStatus::SyncedToFreee)
        .bind(deal_id)
        .bind(partner_id)
        .bind(request.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        for (attachment_id, receipt_id) in uploaded {
            sqlx::query("UPDATE attachments SET freee_receipt_id = $1 WHERE id = $2")
                .bind(receipt_id)
                .bind(attachment_id)
                .execute(&mut *tx)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        Ok(updated)
    }

    async fn resolve_partner(&self, request: &CostRequest) -> Result<Option<i64>, ServiceError> {
        if request.category.is_billable() {
            return Ok(request.billing_partner_id);
        }
        if request.category.is_expense() {
            let Some(submitter_id) = request.submitter_id else {
                return Ok(None);
            };
            let partner = sqlx::query_scalar::<_, Option<i64>>(
                "SELECT freee_partner_id FROM users WHERE id = $1",
            )
            .bind(submitter_id)
            .fetch_optional(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
            return Ok(partner.flatten());
        }
        Ok(None)
    }

    /// Uses the department's registered freee section, falling back to a
    /// section cached under the department's name.
    async fn resolve_section(&self, request: &CostRequest) -> Result<Option<i64>, ServiceError> {
        let Some(department_id) = request.department_id else {
            return Ok(None);
        };
        let Some(department) = sqlx::query_as::<_, DepartmentRef>(
            "SELECT name, freee_section_id FROM departments WHERE id = $1",
        )
        .bind(department_id)
        .fetch_optional(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        else {
            return Ok(None);
        };

        if department.freee_section_id.is_some() {
            return Ok(department.freee_section_id);
        }
        sqlx::query_scalar::<_, i64>("SELECT freee_id FROM section_cache WHERE name = $1")
            .bind(&department.name)
            .fetch_optional(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Maps comma-separated tag names to cached freee tag ids. Names missing
    /// from the cache are dropped.
    async fn resolve_tags(&self, memo_tag_names: Option<&str>) -> Result<Vec<i64>, ServiceError> {
        let names = split_tag_names(memo_tag_names.unwrap_or_default());
        if names.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_scalar::<_, i64>("SELECT freee_id FROM memo_tag_cache WHERE name = ANY($1)")
            .bind(&names)
            .fetch_all(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    /// Uploads every stored attachment as a freee receipt. Individual upload
    /// failures are logged and skipped so one bad file does not block the
    /// deal.
    async fn upload_receipts(
        &self,
        request_id: Uuid,
        company_id: i64,
    ) -> Result<Vec<(Uuid, i64)>, ServiceError> {
        let attachments = sqlx::query_as::<_, AttachmentRef>(
            "SELECT id, file_name, storage_key, mime_type FROM attachments \
             WHERE request_id = $1 ORDER BY created_at",
        )
        .bind(request_id)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let mut uploaded = Vec::new();
        for attachment in attachments {
            let data = match self.state.storage.get(&attachment.storage_key).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    warn!(file = %attachment.file_name, "receipt skipped, object missing from storage");
                    continue;
                }
                Err(err) => {
                    warn!(file = %attachment.file_name, error = %err, "receipt skipped, storage read failed");
                    continue;
                }
            };
            match self
                .state
                .freee
                .upload_receipt(company_id, &attachment.file_name, &attachment.mime_type, data)
                .await
            {
                Ok(receipt_id) => uploaded.push((attachment.id, receipt_id)),
                Err(err) => {
                    warn!(file = %attachment.file_name, error = %err, "receipt upload skipped");
                }
            }
        }
        Ok(uploaded)
    }

    async fn record_sync_error(&self, request_id: Uuid, error: &ServiceError) {
        let result = sqlx::query(
            "UPDATE cost_requests SET freee_sync_error = $1, updated_at = now() WHERE id = $2",
        )
        .bind(error.to_string())
        .bind(request_id)
        .execute(&self.state.pool)
        .await;
        if let Err(err) = result {
            warn!(error = %err, "failed to record sync error");
        }
    }
}

/// Issue date of the deal: expenses use the day the cost was incurred,
/// company-level requests book on the last day of the recording month.
pub fn resolve_issue_date(request: &CostRequest) -> Result<NaiveDate, String> {
    if request.category.is_expense() {
        request
            .usage_date
            .ok_or_else(|| "usage date is required for expense requests".to_string())
    } else {
        request
            .recording_month
            .map(|month| month.end_of_month())
            .ok_or_else(|| "recording month is not set".to_string())
    }
}

pub fn resolve_tax_name(is_billable: bool, is_overseas: bool, is_qualified: bool) -> &'static str {
    if is_billable || is_overseas {
        TAX_NAME_EXCLUDED
    } else if is_qualified {
        TAX_NAME_QUALIFIED
    } else {
        TAX_NAME_NON_QUALIFIED
    }
}

pub fn build_description(
    sync_description: bool,
    description: Option<&str>,
    admin_memo: Option<&str>,
) -> Option<String> {
    let mut parts = Vec::new();
    if sync_description {
        if let Some(description) = description.filter(|text| !text.is_empty()) {
            parts.push(description);
        }
    }
    if let Some(memo) = admin_memo.filter(|text| !text.is_empty()) {
        parts.push(memo);
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

pub fn split_tag_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::models::YearMonth, services::requests::tests_support::sample_request};
    use chrono::NaiveDate;

    #[test]
    fn tax_name_selection() {
        assert_eq!(resolve_tax_name(true, false, true), TAX_NAME_EXCLUDED);
        assert_eq!(resolve_tax_name(false, true, true), TAX_NAME_EXCLUDED);
        assert_eq!(resolve_tax_name(false, false, true), TAX_NAME_QUALIFIED);
        assert_eq!(resolve_tax_name(false, false, false), TAX_NAME_NON_QUALIFIED);
    }

    #[test]
    fn description_respects_sync_flag() {
        assert_eq!(
            build_description(true, Some("タクシー代"), Some("承認済み")),
            Some("タクシー代\n承認済み".to_string())
        );
        assert_eq!(
            build_description(false, Some("タクシー代"), Some("承認済み")),
            Some("承認済み".to_string())
        );
        assert_eq!(build_description(false, Some("タクシー代"), None), None);
        assert_eq!(build_description(true, None, None), None);
    }

    #[test]
    fn tag_names_are_trimmed_and_filtered() {
        assert_eq!(
            split_tag_names(" 仮 , 給与振込確認用 ,,販管費振込確認用"),
            vec!["仮", "給与振込確認用", "販管費振込確認用"]
        );
        assert!(split_tag_names("").is_empty());
        assert!(split_tag_names(" , ").is_empty());
    }

    #[test]
    fn issue_date_for_monthly_booking_is_month_end() {
        let mut request = sample_request();
        request.category = CostCategory::Sga;
        request.recording_month = YearMonth::new(2024, 6);
        assert_eq!(
            resolve_issue_date(&request).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
        );

        request.recording_month = None;
        assert!(resolve_issue_date(&request).is_err());
    }

    #[test]
    fn issue_date_for_expense_is_usage_date() {
        let mut request = sample_request();
        request.category = CostCategory::Expense;
        request.usage_date = NaiveDate::from_ymd_opt(2024, 6, 12);
        assert_eq!(
            resolve_issue_date(&request).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 12).unwrap()
        );

        request.usage_date = None;
        assert!(resolve_issue_date(&request).is_err());
    }
}
