use std::{convert::TryFrom, fmt, str::FromStr};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use sqlx::{
    decode::Decode,
    encode::{Encode, IsNull},
    error::BoxDynError,
    postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef},
    FromRow, Postgres, Type,
};
use uuid::Uuid;

/// Memo tag marking deals whose outgoing transfer still needs confirmation.
pub const TRANSFER_CONFIRMATION_TAG: &str = "販管費振込確認用";
/// Memo tag marking payroll transfers; drives the payment-due reminder.
pub const PAYROLL_CONFIRMATION_TAG: &str = "給与振込確認用";
/// Memo tag for provisional bookings excluded from actuals reporting.
pub const PROVISIONAL_TAG: &str = "仮";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Employee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Employee => "employee",
        }
    }

    fn parse_normalized(value: &str) -> Result<Self, RoleParseError> {
        match value {
            "admin" => Ok(Role::Admin),
            "employee" => Ok(Role::Employee),
            _ => Err(RoleParseError::new(value)),
        }
    }
}

impl TryFrom<&str> for Role {
    type Error = RoleParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Role::parse_normalized(&normalized)
    }
}

impl Type<Postgres> for Role {
    fn type_info() -> PgTypeInfo {
        <&str as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for Role {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let value = self.as_str();
        <&str as Encode<Postgres>>::encode_by_ref(&value, buf)
    }

    fn size_hint(&self) -> usize {
        let value = self.as_str();
        <&str as Encode<Postgres>>::size_hint(&value)
    }
}

impl<'r> Decode<'r, Postgres> for Role {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Postgres>>::decode(value)?;
        Role::try_from(raw).map_err(|err| Box::new(err) as BoxDynError)
    }
}

#[derive(Debug, Clone)]
pub struct RoleParseError {
    value: String,
}

impl RoleParseError {
    fn new(value: &str) -> Self {
        Self {
            value: value.to_owned(),
        }
    }
}

impl fmt::Display for RoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported role value: {}", self.value)
    }
}

impl std::error::Error for RoleParseError {}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Submitted,
    OnHold,
    Approved,
    Rejected,
    SyncedToFreee,
    FreeeDeleted,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Submitted => "submitted",
            RequestStatus::OnHold => "on_hold",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::SyncedToFreee => "synced_to_freee",
            RequestStatus::FreeeDeleted => "freee_deleted",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(RequestStatus::Draft),
            "submitted" => Ok(RequestStatus::Submitted),
            "on_hold" => Ok(RequestStatus::OnHold),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "synced_to_freee" => Ok(RequestStatus::SyncedToFreee),
            "freee_deleted" => Ok(RequestStatus::FreeeDeleted),
            other => Err(format!("unsupported request status: {other}")),
        }
    }
}

impl Type<Postgres> for RequestStatus {
    fn type_info() -> PgTypeInfo {
        <&str as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for RequestStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let value = self.as_str();
        <&str as Encode<Postgres>>::encode_by_ref(&value, buf)
    }

    fn size_hint(&self) -> usize {
        let value = self.as_str();
        <&str as Encode<Postgres>>::size_hint(&value)
    }
}

impl<'r> Decode<'r, Postgres> for RequestStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Postgres>>::decode(value)?;
        raw.parse::<RequestStatus>().map_err(Into::into)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Sga,
    SgaBillable,
    Expense,
    ExpenseBillable,
}

impl CostCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostCategory::Sga => "sga",
            CostCategory::SgaBillable => "sga_billable",
            CostCategory::Expense => "expense",
            CostCategory::ExpenseBillable => "expense_billable",
        }
    }

    pub fn is_billable(&self) -> bool {
        matches!(self, CostCategory::SgaBillable | CostCategory::ExpenseBillable)
    }

    pub fn is_expense(&self) -> bool {
        matches!(self, CostCategory::Expense | CostCategory::ExpenseBillable)
    }
}

impl FromStr for CostCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sga" => Ok(CostCategory::Sga),
            "sga_billable" => Ok(CostCategory::SgaBillable),
            "expense" => Ok(CostCategory::Expense),
            "expense_billable" => Ok(CostCategory::ExpenseBillable),
            other => Err(format!("unsupported cost category: {other}")),
        }
    }
}

impl Type<Postgres> for CostCategory {
    fn type_info() -> PgTypeInfo {
        <&str as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for CostCategory {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let value = self.as_str();
        <&str as Encode<Postgres>>::encode_by_ref(&value, buf)
    }

    fn size_hint(&self) -> usize {
        let value = self.as_str();
        <&str as Encode<Postgres>>::size_hint(&value)
    }
}

impl<'r> Decode<'r, Postgres> for CostCategory {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Postgres>>::decode(value)?;
        raw.parse::<CostCategory>().map_err(Into::into)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CostType {
    RunningMonthly,
    RunningAnnual,
    Onetime,
}

impl CostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostType::RunningMonthly => "running_monthly",
            CostType::RunningAnnual => "running_annual",
            CostType::Onetime => "onetime",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, CostType::RunningMonthly | CostType::RunningAnnual)
    }
}

impl FromStr for CostType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running_monthly" => Ok(CostType::RunningMonthly),
            "running_annual" => Ok(CostType::RunningAnnual),
            "onetime" => Ok(CostType::Onetime),
            other => Err(format!("unsupported cost type: {other}")),
        }
    }
}

impl Type<Postgres> for CostType {
    fn type_info() -> PgTypeInfo {
        <&str as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for CostType {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let value = self.as_str();
        <&str as Encode<Postgres>>::encode_by_ref(&value, buf)
    }

    fn size_hint(&self) -> usize {
        let value = self.as_str();
        <&str as Encode<Postgres>>::size_hint(&value)
    }
}

impl<'r> Decode<'r, Postgres> for CostType {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Postgres>>::decode(value)?;
        raw.parse::<CostType>().map_err(Into::into)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaxType {
    Inclusive,
    Overseas,
}

impl TaxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxType::Inclusive => "inclusive",
            TaxType::Overseas => "overseas",
        }
    }
}

impl FromStr for TaxType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "inclusive" => Ok(TaxType::Inclusive),
            "overseas" => Ok(TaxType::Overseas),
            other => Err(format!("unsupported tax type: {other}")),
        }
    }
}

impl Type<Postgres> for TaxType {
    fn type_info() -> PgTypeInfo {
        <&str as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for TaxType {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let value = self.as_str();
        <&str as Encode<Postgres>>::encode_by_ref(&value, buf)
    }

    fn size_hint(&self) -> usize {
        let value = self.as_str();
        <&str as Encode<Postgres>>::size_hint(&value)
    }
}

impl<'r> Decode<'r, Postgres> for TaxType {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Postgres>>::decode(value)?;
        raw.parse::<TaxType>().map_err(Into::into)
    }
}

/// Calendar month in `YYYY-MM` form, used for recording and payment months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Last calendar day of the month.
    pub fn end_of_month(&self) -> NaiveDate {
        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MIN)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let err = || format!("invalid year-month: {value}");
        let (year, month) = value.split_once('-').ok_or_else(err)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(err());
        }
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;
        YearMonth::new(year, month).ok_or_else(err)
    }
}

impl Type<Postgres> for YearMonth {
    fn type_info() -> PgTypeInfo {
        <&str as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for YearMonth {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let value = self.to_string();
        <String as Encode<Postgres>>::encode_by_ref(&value, buf)
    }
}

impl<'r> Decode<'r, Postgres> for YearMonth {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Postgres>>::decode(value)?;
        raw.parse::<YearMonth>().map_err(Into::into)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub department_id: Option<Uuid>,
    pub freee_partner_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub freee_section_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CostRequest {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub amount: i64,
    pub category: CostCategory,
    pub cost_type: CostType,
    pub tax_type: TaxType,
    pub status: RequestStatus,
    pub usage_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub recording_month: Option<YearMonth>,
    pub payment_month: Option<YearMonth>,
    pub cost_end_date: Option<NaiveDate>,
    pub account_item_id: Option<i64>,
    pub account_item_name: Option<String>,
    pub memo_tag_names: Option<String>,
    pub department_id: Option<Uuid>,
    pub admin_memo: Option<String>,
    pub sync_description: bool,
    pub is_qualified_invoice: bool,
    pub billing_partner_name: Option<String>,
    pub billing_partner_id: Option<i64>,
    pub submitter_id: Option<Uuid>,
    pub supervisor_name: Option<String>,
    pub has_receipt: bool,
    pub freee_deal_id: Option<i64>,
    pub freee_partner_id: Option<i64>,
    pub freee_synced_at: Option<DateTime<Utc>>,
    pub freee_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: Uuid,
    pub request_id: Uuid,
    pub file_name: String,
    pub storage_key: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub freee_receipt_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AccountItemCacheEntry {
    pub freee_id: i64,
    pub name: String,
    pub shortcut1: Option<String>,
    pub shortcut2: Option<String>,
    pub account_category: Option<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PartnerCacheEntry {
    pub freee_id: i64,
    pub name: String,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MemoTagCacheEntry {
    pub freee_id: i64,
    pub name: String,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SectionCacheEntry {
    pub freee_id: i64,
    pub name: String,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TaxCodeCacheEntry {
    pub code: i64,
    pub name: String,
    pub name_ja: String,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub freee_deal_id: i64,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub partner_name: Option<String>,
    pub section_name: Option<String>,
    pub account_item_name: Option<String>,
    pub amount: i64,
    pub memo_tag_names: Option<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FreeeConfigRow {
    pub id: String,
    pub company_id: Option<i64>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_pl_sync_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl FreeeConfigRow {
    /// Connection is usable once the OAuth callback stored both the company
    /// and an access token.
    pub fn is_connected(&self) -> bool {
        self.company_id.is_some()
            && self
                .access_token
                .as_deref()
                .map(|t| !t.is_empty())
                .unwrap_or(false)
    }
}
