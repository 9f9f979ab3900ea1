//! Daily payment-due notifier.
//!
//! Finds synced requests whose payment falls due today (Japan time) and
//! carries the payroll confirmation tag, then mails each submitter one
//! summary of what was paid out on their behalf.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use sqlx::FromRow;
use tracing::{error, info};

use crate::{
    domain::models::{CostCategory, PAYROLL_CONFIRMATION_TAG},
    infrastructure::{mailer::OutboundMail, state::AppState},
};

use super::errors::ServiceError;

#[derive(Debug, Clone, FromRow)]
struct DueRequest {
    title: String,
    category: CostCategory,
    amount: i64,
    memo_tag_names: Option<String>,
    submitter_name: String,
    submitter_email: String,
}

#[derive(Debug)]
struct Digest {
    submitter_name: String,
    requests: Vec<DueRequest>,
    total: i64,
}

#[derive(Debug)]
pub struct NotifyReport {
    pub date: NaiveDate,
    pub recipients: usize,
    pub sent: usize,
}

pub struct NotifyService {
    state: Arc<AppState>,
}

impl NotifyService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// One notification pass for today, on the Japan office calendar.
    pub async fn run(&self) -> Result<NotifyReport, ServiceError> {
        self.run_for(jst_date(Utc::now())).await
    }

    async fn run_for(&self, today: NaiveDate) -> Result<NotifyReport, ServiceError> {
        let rows: Vec<DueRequest> = sqlx::query_as(
            "SELECT r.title, r.category, r.amount, r.memo_tag_names,
                    u.display_name AS submitter_name,
                    u.email AS submitter_email
             FROM cost_requests r
             JOIN users u ON u.id = r.submitter_id
             WHERE r.status = 'synced_to_freee' AND r.due_date = $1
             ORDER BY r.created_at ASC",
        )
        .bind(today)
        .fetch_all(&self.state.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let digests = group_by_submitter(rows);
        let recipients = digests.len();
        let mut sent = 0usize;
        for (email, digest) in digests {
            let mail = compose_digest(today, &email, &digest);
            match self.state.mailer.send(mail).await {
                Ok(()) => sent += 1,
                Err(err) => {
                    error!(recipient = %email, error = %err, "payment notification failed");
                }
            }
        }
        info!(date = %today, recipients, sent, "payment-due notification pass finished");
        Ok(NotifyReport {
            date: today,
            recipients,
            sent,
        })
    }
}

/// Business dates follow the Japan office clock.
fn jst_date(now: DateTime<Utc>) -> NaiveDate {
    (now + Duration::hours(9)).date_naive()
}

/// Keeps only payroll-tagged requests and buckets them per submitter email.
fn group_by_submitter(rows: Vec<DueRequest>) -> BTreeMap<String, Digest> {
    let mut digests: BTreeMap<String, Digest> = BTreeMap::new();
    for row in rows {
        if !has_payroll_tag(row.memo_tag_names.as_deref()) {
            continue;
        }
        let digest = digests
            .entry(row.submitter_email.clone())
            .or_insert_with(|| Digest {
                submitter_name: row.submitter_name.clone(),
                requests: Vec::new(),
                total: 0,
            });
        digest.total += row.amount;
        digest.requests.push(row);
    }
    digests
}

fn has_payroll_tag(memo_tag_names: Option<&str>) -> bool {
    memo_tag_names
        .map(|names| {
            names
                .split(',')
                .any(|name| name.trim() == PAYROLL_CONFIRMATION_TAG)
        })
        .unwrap_or(false)
}

fn compose_digest(today: NaiveDate, email: &str, digest: &Digest) -> OutboundMail {
    let date = format_date_jp(today);
    let mut body = format!(
        "{} 様\n\n本日（{date}）を支払期日とする以下の経費をお支払いしました。\n\n",
        digest.submitter_name,
    );
    for request in &digest.requests {
        body.push_str(&format!(
            "・{}（{}） {}\n",
            request.title,
            category_label(request.category),
            format_yen(request.amount),
        ));
    }
    body.push_str(&format!(
        "\n合計 {}\n\nご不明点は経理担当までご連絡ください。\n",
        format_yen(digest.total),
    ));

    OutboundMail {
        to: email.to_owned(),
        subject: format!(
            "【経費支払い通知】{date} お支払い経費のご確認（{}）",
            format_yen(digest.total),
        ),
        body,
    }
}

fn category_label(category: CostCategory) -> &'static str {
    match category {
        CostCategory::Sga => "販管費",
        CostCategory::SgaBillable => "販管費（取引先請求予定）",
        CostCategory::Expense => "立替経費",
        CostCategory::ExpenseBillable => "立替経費（取引先請求予定）",
    }
}

fn format_date_jp(date: NaiveDate) -> String {
    format!("{}年{}月{}日", date.year(), date.month(), date.day())
}

fn format_yen(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if amount < 0 {
        format!("¥-{grouped}")
    } else {
        format!("¥{grouped}")
    }
}
