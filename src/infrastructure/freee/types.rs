//! Wire types for the freee accounting API.
//!
//! Response bodies are deserialized from the envelope objects the API wraps
//! its collections in (`{"partners": [...]}` and friends). Request bodies
//! skip optional fields entirely rather than sending nulls.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

impl TokenResponse {
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(self.expires_in)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyPayload {
    pub id: i64,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompaniesEnvelope {
    pub companies: Vec<CompanyPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountItemPayload {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub shortcut1: Option<String>,
    #[serde(default)]
    pub shortcut2: Option<String>,
    #[serde(default)]
    pub account_category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AccountItemsEnvelope {
    pub account_items: Vec<AccountItemPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartnerPayload {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PartnersEnvelope {
    pub partners: Vec<PartnerPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagPayload {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TagsEnvelope {
    pub tags: Vec<TagPayload>,
}

#[derive(Debug, Deserialize)]
pub struct TagEnvelope {
    pub tag: TagPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectionPayload {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SectionsEnvelope {
    pub sections: Vec<SectionPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaxCodePayload {
    pub code: i64,
    pub name: String,
    pub name_ja: String,
}

#[derive(Debug, Deserialize)]
pub struct TaxCodesEnvelope {
    pub taxes: Vec<TaxCodePayload>,
}

#[derive(Debug, Serialize)]
pub struct CreateDeal {
    pub company_id: i64,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(rename = "type")]
    pub deal_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<i64>,
    pub details: Vec<CreateDealDetail>,
}

#[derive(Debug, Serialize)]
pub struct CreateDealDetail {
    pub account_item_id: i64,
    pub tax_code: i64,
    pub amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_ids: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
pub struct CreatedDealEnvelope {
    pub deal: CreatedDeal,
}

#[derive(Debug, Deserialize)]
pub struct CreatedDeal {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DealPayload {
    pub id: i64,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub partner_name: Option<String>,
    #[serde(default)]
    pub details: Vec<DealDetailPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DealDetailPayload {
    #[serde(default)]
    pub account_item_name: Option<String>,
    #[serde(default)]
    pub section_name: Option<String>,
    #[serde(default)]
    pub tag_ids: Option<Vec<i64>>,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct DealsEnvelope {
    pub deals: Vec<DealPayload>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiptEnvelope {
    pub receipt: ReceiptPayload,
}

#[derive(Debug, Deserialize)]
pub struct ReceiptPayload {
    pub id: i64,
}
