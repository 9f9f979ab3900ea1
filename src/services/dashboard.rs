//! Read-side aggregation behind the admin dashboard.
//!
//! Actual figures come from the pulled freee ledger, projections from cost
//! requests still moving through the approval flow. Both sides are bucketed
//! by month and filtered to a single requested year.

use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::{
    domain::models::{
        CostCategory, CostType, LedgerEntry, RequestStatus, YearMonth, PROVISIONAL_TAG,
    },
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{ensure_admin, errors::ServiceError};

/// Grouping label for rows whose department or account item was never set.
pub const UNSET_LABEL: &str = "unset";
/// Grouping label for rows whose counterparty could not be resolved.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Statuses whose requests count as committed spend for projections.
const PROJECTED_STATUSES: [RequestStatus; 3] = [
    RequestStatus::Submitted,
    RequestStatus::Approved,
    RequestStatus::SyncedToFreee,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlRow {
    pub department: String,
    pub account_item: String,
    pub partner: String,
    pub pl_month: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CfRow {
    pub due_month: String,
    pub partner: String,
    pub title: String,
    pub amount: i64,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningRow {
    pub department: String,
    pub account_item: String,
    pub partner: String,
    pub title: String,
    pub cost_type: CostType,
    pub amount: i64,
    pub recording_month: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub actual_pl_rows: Vec<PlRow>,
    pub projected_pl_rows: Vec<PlRow>,
    pub actual_cf_rows: Vec<CfRow>,
    pub projected_cf_rows: Vec<CfRow>,
    pub running_rows: Vec<RunningRow>,
    pub departments: Vec<String>,
    pub available_years: Vec<i32>,
    pub last_pl_sync_at: Option<DateTime<Utc>>,
}

/// Projection source row: a pending request joined with its submitter and
/// department names.
#[derive(Debug, Clone, FromRow)]
struct ProjectedRequest {
    category: CostCategory,
    cost_type: CostType,
    title: String,
    amount: i64,
    usage_date: Option<NaiveDate>,
    recording_month: Option<YearMonth>,
    payment_month: Option<YearMonth>,
    due_date: Option<NaiveDate>,
    account_item_name: Option<String>,
    billing_partner_name: Option<String>,
    submitter_name: Option<String>,
    department_name: Option<String>,
}

pub struct DashboardService {
    state: Arc<AppState>,
}

impl DashboardService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn overview(
        &self,
        actor: &AuthenticatedUser,
        year: Option<i32>,
    ) -> Result<DashboardData, ServiceError> {
        ensure_admin(actor)?;

        let current_year = Utc::now().year();
        let year = year.unwrap_or(current_year);

        let ledger: Vec<LedgerEntry> = sqlx::query_as("SELECT * FROM freee_deal_ledger")
            .fetch_all(&self.state.pool)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let statuses: Vec<String> = PROJECTED_STATUSES
            .iter()
            .map(|status| status.as_str().to_owned())
            .collect();
        let projected: Vec<ProjectedRequest> = sqlx::query_as(
            "SELECT r.category, r.cost_type, r.title, r.amount,
                    r.usage_date, r.recording_month, r.payment_month, r.due_date,
                    r.account_item_name, r.billing_partner_name,
                    u.display_name AS submitter_name,
                    d.name AS department_name
             FROM cost_requests r
             LEFT JOIN users u ON u.id = r.submitter_id
             LEFT JOIN departments d ON d.id = r.department_id
             WHERE r.status = ANY($1)",
        )
        .bind(&statuses)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let last_pl_sync_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT last_pl_sync_at FROM freee_config WHERE id = 'default'")
                .fetch_optional(&self.state.pool)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?
                .flatten();

        Ok(build_overview(
            year,
            current_year,
            &ledger,
            &projected,
            last_pl_sync_at,
        ))
    }
}

fn build_overview(
    year: i32,
    current_year: i32,
    ledger: &[LedgerEntry],
    projected: &[ProjectedRequest],
    last_pl_sync_at: Option<DateTime<Utc>>,
) -> DashboardData {
    let mut actual_pl_rows = Vec::new();
    let mut actual_cf_rows = Vec::new();
    let mut actual_years = BTreeSet::new();

    for entry in ledger {
        // Provisional bookings are not actuals yet.
        if has_memo_tag(entry.memo_tag_names.as_deref(), PROVISIONAL_TAG) {
            continue;
        }

        let pl_month = YearMonth::from_date(entry.issue_date);
        actual_years.insert(pl_month.year);
        if pl_month.year == year {
            actual_pl_rows.push(PlRow {
                department: label_or(entry.section_name.as_deref(), UNSET_LABEL),
                account_item: label_or(entry.account_item_name.as_deref(), UNKNOWN_LABEL),
                partner: label_or(entry.partner_name.as_deref(), UNKNOWN_LABEL),
                pl_month: pl_month.to_string(),
                amount: entry.amount,
            });
        }

        if let Some(due_date) = entry.due_date {
            let due_month = YearMonth::from_date(due_date);
            actual_years.insert(due_month.year);
            if due_month.year == year {
                actual_cf_rows.push(CfRow {
                    due_month: due_month.to_string(),
                    partner: label_or(entry.partner_name.as_deref(), UNKNOWN_LABEL),
                    title: label_or(entry.account_item_name.as_deref(), UNKNOWN_LABEL),
                    amount: entry.amount,
                    due_date: Some(due_date),
                });
            }
        }
    }

    let mut projected_pl_rows = Vec::new();
    let mut projected_cf_rows = Vec::new();
    let mut running_rows = Vec::new();
    let mut projected_years = BTreeSet::new();
    let mut departments = BTreeSet::new();

    for request in projected {
        let department = label_or(request.department_name.as_deref(), UNSET_LABEL);

        let pl_month = profit_month(request);
        if let Some(month) = pl_month {
            projected_years.insert(month.year);
            departments.insert(department.clone());

            if month.year == year {
                projected_pl_rows.push(PlRow {
                    department: department.clone(),
                    account_item: label_or(request.account_item_name.as_deref(), UNSET_LABEL),
                    partner: partner_for_display(request),
                    pl_month: month.to_string(),
                    amount: request.amount,
                });
            }
        }

        let cash_month = request
            .due_date
            .map(YearMonth::from_date)
            .or(request.payment_month);
        if let Some(month) = cash_month {
            projected_years.insert(month.year);
            if month.year == year {
                projected_cf_rows.push(CfRow {
                    due_month: month.to_string(),
                    partner: partner_for_display(request),
                    title: request.title.clone(),
                    amount: request.amount,
                    due_date: request.due_date,
                });
            }
        }

        let is_sga = matches!(
            request.category,
            CostCategory::Sga | CostCategory::SgaBillable
        );
        if is_sga && request.cost_type.is_running() {
            if let Some(month) = pl_month {
                if month.year == year {
                    running_rows.push(RunningRow {
                        department,
                        account_item: label_or(request.account_item_name.as_deref(), UNSET_LABEL),
                        partner: partner_for_display(request),
                        title: request.title.clone(),
                        cost_type: request.cost_type,
                        amount: request.amount,
                        recording_month: month.to_string(),
                    });
                }
            }
        }
    }

    let mut available_years: Vec<i32> = actual_years.union(&projected_years).copied().collect();
    if !available_years.contains(&current_year) {
        available_years.push(current_year);
    }
    available_years.sort_unstable_by(|a, b| b.cmp(a));

    DashboardData {
        actual_pl_rows,
        projected_pl_rows,
        actual_cf_rows,
        projected_cf_rows,
        running_rows,
        departments: departments.into_iter().collect(),
        available_years,
        last_pl_sync_at,
    }
}

/// Expense categories book against the month the cost was incurred, SG&A
/// against the chosen recording month.
fn profit_month(request: &ProjectedRequest) -> Option<YearMonth> {
    if request.category.is_expense() {
        request.usage_date.map(YearMonth::from_date)
    } else {
        request.recording_month
    }
}

/// Billable requests display the partner the cost is rebilled to; plain
/// expenses display the person who fronted the money.
fn partner_for_display(request: &ProjectedRequest) -> String {
    let submitter = request.submitter_name.as_deref();
    let billing = request.billing_partner_name.as_deref();
    let name = if request.category.is_billable() {
        billing.or(submitter)
    } else if request.category.is_expense() {
        submitter
    } else {
        billing.or(submitter)
    };
    name.unwrap_or(UNKNOWN_LABEL).to_owned()
}

fn label_or(value: Option<&str>, fallback: &str) -> String {
    value.unwrap_or(fallback).to_owned()
}

fn has_memo_tag(memo_tag_names: Option<&str>, tag: &str) -> bool {
    memo_tag_names
        .map(|names| names.split(',').any(|name| name.trim() == tag))
        .unwrap_or(false)
}
