//! HTTP client for the freee accounting API.
//!
//! Tokens live in the `freee_config` singleton row. Every authorized call
//! checks expiry up front and refreshes when the token is inside the expiry
//! window; a 401 from the API forces one refresh-and-retry before the error
//! is surfaced. Refreshed tokens are persisted with a compare-and-swap on the
//! stored refresh token so concurrent workers cannot clobber each other's
//! rotation.

pub mod types;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use reqwest::{multipart, Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;
use url::Url;

use crate::{
    domain::models::FreeeConfigRow,
    infrastructure::{config::FreeeConfig, db::PgPool},
    services::errors::ServiceError,
};

use types::{
    AccountItemPayload, AccountItemsEnvelope, CompaniesEnvelope, CompanyPayload, CreateDeal,
    CreatedDealEnvelope, DealPayload, DealsEnvelope, PartnerPayload, PartnersEnvelope,
    ReceiptEnvelope, SectionPayload, SectionsEnvelope, TagPayload, TagEnvelope, TagsEnvelope,
    TaxCodePayload, TaxCodesEnvelope, TokenResponse,
};

const PAGE_LIMIT: usize = 100;

/// A token is treated as stale once it is within five minutes of expiry.
pub fn needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(at) => at - now < Duration::minutes(5),
        None => true,
    }
}

fn not_connected() -> ServiceError {
    ServiceError::Unavailable("freee is not connected".into())
}

#[derive(Clone)]
pub struct FreeeClient {
    http: Client,
    settings: FreeeConfig,
    pool: PgPool,
}

impl FreeeClient {
    pub fn new(settings: FreeeConfig, pool: PgPool) -> anyhow::Result<Self> {
        Ok(Self {
            http: Client::builder().build()?,
            settings,
            pool,
        })
    }

    pub fn authorize_url(&self) -> Result<String, ServiceError> {
        let mut url = Url::parse(&self.settings.authorize_url)
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("prompt", "select_company");
        Ok(url.to_string())
    }

    pub async fn load_config(&self) -> Result<FreeeConfigRow, ServiceError> {
        sqlx::query_as::<_, FreeeConfigRow>(
            "SELECT id, company_id, access_token, refresh_token, token_expires_at, \
             last_sync_at, last_pl_sync_at, updated_at \
             FROM freee_config WHERE id = 'default'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))
    }

    pub async fn company_id(&self) -> Result<i64, ServiceError> {
        let config = self.load_config().await?;
        config.company_id.ok_or_else(not_connected)
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, ServiceError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
        ];
        let response = self
            .http
            .post(&self.settings.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|err| ServiceError::ExternalApi(format!("freee token request failed: {err}")))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalApi(format!(
                "freee token exchange failed: {status} {body}"
            )));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|err| ServiceError::ExternalApi(format!("invalid token response: {err}")))
    }

    /// Stores freshly exchanged tokens. The company id is only overwritten
    /// when a new one is supplied.
    pub async fn persist_tokens(
        &self,
        tokens: &TokenResponse,
        company_id: Option<i64>,
    ) -> Result<(), ServiceError> {
        let expires_at = tokens.expires_at(Utc::now());
        sqlx::query(
            "UPDATE freee_config SET access_token = $1, refresh_token = $2, \
             token_expires_at = $3, company_id = COALESCE($4, company_id), updated_at = now() \
             WHERE id = 'default'",
        )
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(expires_at)
        .bind(company_id)
        .execute(&self.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
        Ok(())
    }

    pub async fn clear_connection(&self) -> Result<(), ServiceError> {
        sqlx::query(
            "UPDATE freee_config SET access_token = NULL, refresh_token = NULL, \
             token_expires_at = NULL, company_id = NULL, updated_at = now() \
             WHERE id = 'default'",
        )
        .execute(&self.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;
        Ok(())
    }

    pub async fn valid_access_token(&self) -> Result<String, ServiceError> {
        let config = self.load_config().await?;
        let Some(access_token) = config.access_token.clone() else {
            return Err(not_connected());
        };
        if needs_refresh(config.token_expires_at, Utc::now()) {
            return self.refresh(&config).await;
        }
        Ok(access_token)
    }

    /// Rotates the access token using the stored refresh token.
    ///
    /// The new pair is written only if the stored refresh token still matches
    /// the one we refreshed with; losing that race means another worker
    /// already rotated, and we adopt its result instead.
    async fn refresh(&self, stale: &FreeeConfigRow) -> Result<String, ServiceError> {
        let Some(refresh_token) = stale.refresh_token.clone() else {
            return Err(not_connected());
        };
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        let response = self
            .http
            .post(&self.settings.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|err| ServiceError::ExternalApi(format!("freee token request failed: {err}")))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalApi(format!(
                "freee token refresh failed: {status} {body}"
            )));
        }
        let tokens = response
            .json::<TokenResponse>()
            .await
            .map_err(|err| ServiceError::ExternalApi(format!("invalid token response: {err}")))?;

        let expires_at = tokens.expires_at(Utc::now());
        let result = sqlx::query(
            "UPDATE freee_config SET access_token = $1, refresh_token = $2, \
             token_expires_at = $3, updated_at = now() \
             WHERE id = 'default' AND refresh_token = $4",
        )
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(expires_at)
        .bind(&refresh_token)
        .execute(&self.pool)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

        if result.rows_affected() == 0 {
            warn!("lost token refresh race, adopting the stored token");
            let current = self.load_config().await?;
            return current.access_token.ok_or_else(not_connected);
        }
        Ok(tokens.access_token)
    }

    async fn raw_send(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
        token: &str,
    ) -> Result<Response, ServiceError> {
        let url = format!("{}{}", self.settings.api_base, path);
        let mut request = self.http.request(method.clone(), &url).bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .map_err(|err| ServiceError::ExternalApi(format!("freee request failed: {err}")))
    }

    async fn api_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ServiceError> {
        let token = self.valid_access_token().await?;
        let response = self.raw_send(&method, path, query, body, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let stale = self.load_config().await?;
        let token = self.refresh(&stale).await?;
        self.raw_send(&method, path, query, body, &token).await
    }

    async fn api_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ServiceError> {
        let response = self.api_request(Method::GET, path, query, None).await?;
        let response = ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| ServiceError::ExternalApi(format!("invalid freee response: {err}")))
    }

    async fn api_post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ServiceError> {
        let response = self.api_request(Method::POST, path, &[], Some(body)).await?;
        let response = ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| ServiceError::ExternalApi(format!("invalid freee response: {err}")))
    }

    /// Lists the companies the freshly authorized user can access. Runs with
    /// an explicit token because it is called before tokens are persisted.
    pub async fn companies(&self, access_token: &str) -> Result<Vec<CompanyPayload>, ServiceError> {
        let response = self
            .http
            .get(format!("{}/api/1/companies", self.settings.api_base))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| ServiceError::ExternalApi(format!("freee request failed: {err}")))?;
        let response = ensure_success(response).await?;
        let envelope: CompaniesEnvelope = response
            .json()
            .await
            .map_err(|err| ServiceError::ExternalApi(format!("invalid freee response: {err}")))?;
        Ok(envelope.companies)
    }

    pub async fn account_items(&self, company_id: i64) -> Result<Vec<AccountItemPayload>, ServiceError> {
        let envelope: AccountItemsEnvelope = self
            .api_get(
                "/api/1/account_items",
                &[("company_id", company_id.to_string())],
            )
            .await?;
        Ok(envelope.account_items)
    }

    pub async fn partners(&self, company_id: i64) -> Result<Vec<PartnerPayload>, ServiceError> {
        let mut all = Vec::new();
        let mut offset = 0usize;
        loop {
            let envelope: PartnersEnvelope = self
                .api_get(
                    "/api/1/partners",
                    &[
                        ("company_id", company_id.to_string()),
                        ("limit", PAGE_LIMIT.to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;
            let page_len = envelope.partners.len();
            all.extend(envelope.partners);
            if page_len < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }
        Ok(all)
    }

    pub async fn tags(&self, company_id: i64) -> Result<Vec<TagPayload>, ServiceError> {
        let envelope: TagsEnvelope = self
            .api_get("/api/1/tags", &[("company_id", company_id.to_string())])
            .await?;
        Ok(envelope.tags)
    }

    pub async fn create_tag(&self, company_id: i64, name: &str) -> Result<TagPayload, ServiceError> {
        let body = serde_json::json!({ "company_id": company_id, "name": name });
        let envelope: TagEnvelope = self.api_post("/api/1/tags", &body).await?;
        Ok(envelope.tag)
    }

    pub async fn sections(&self, company_id: i64) -> Result<Vec<SectionPayload>, ServiceError> {
        let envelope: SectionsEnvelope = self
            .api_get("/api/1/sections", &[("company_id", company_id.to_string())])
            .await?;
        Ok(envelope.sections)
    }

    pub async fn tax_codes(&self, company_id: i64) -> Result<Vec<TaxCodePayload>, ServiceError> {
        let envelope: TaxCodesEnvelope = self
            .api_get("/api/1/taxes/codes", &[("company_id", company_id.to_string())])
            .await?;
        Ok(envelope.taxes)
    }

    /// Resolves a tax code by its exact Japanese display name. Lookup
    /// failures are reported as a miss so callers can fall back to their own
    /// error handling.
    pub async fn find_tax_code_by_name(&self, company_id: i64, name_ja: &str) -> Option<i64> {
        match self.tax_codes(company_id).await {
            Ok(codes) => codes
                .into_iter()
                .find(|code| code.name_ja == name_ja)
                .map(|code| code.code),
            Err(err) => {
                warn!(error = %err, name = %name_ja, "tax code lookup failed");
                None
            }
        }
    }

    pub async fn create_deal(&self, deal: &CreateDeal) -> Result<i64, ServiceError> {
        let body =
            serde_json::to_value(deal).map_err(|err| ServiceError::Internal(err.to_string()))?;
        let envelope: CreatedDealEnvelope = self.api_post("/api/1/deals", &body).await?;
        Ok(envelope.deal.id)
    }

    pub async fn deal_exists(&self, company_id: i64, deal_id: i64) -> Result<bool, ServiceError> {
        let path = format!("/api/1/deals/{deal_id}");
        let response = self
            .api_request(
                Method::GET,
                &path,
                &[("company_id", company_id.to_string())],
                None,
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response).await?;
        Ok(true)
    }

    pub async fn expense_deals(&self, company_id: i64) -> Result<Vec<DealPayload>, ServiceError> {
        let mut all = Vec::new();
        let mut offset = 0usize;
        loop {
            let envelope: DealsEnvelope = self
                .api_get(
                    "/api/1/deals",
                    &[
                        ("company_id", company_id.to_string()),
                        ("type", "expense".to_string()),
                        ("limit", PAGE_LIMIT.to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;
            let page_len = envelope.deals.len();
            all.extend(envelope.deals);
            if page_len < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }
        Ok(all)
    }

    pub async fn upload_receipt(
        &self,
        company_id: i64,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<i64, ServiceError> {
        let token = self.valid_access_token().await?;
        let response = self
            .send_receipt(company_id, file_name, content_type, data.clone(), &token)
            .await?;
        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let stale = self.load_config().await?;
            let token = self.refresh(&stale).await?;
            self.send_receipt(company_id, file_name, content_type, data, &token)
                .await?
        } else {
            response
        };
        let response = ensure_success(response).await?;
        let envelope: ReceiptEnvelope = response
            .json()
            .await
            .map_err(|err| ServiceError::ExternalApi(format!("invalid freee response: {err}")))?;
        Ok(envelope.receipt.id)
    }

    async fn send_receipt(
        &self,
        company_id: i64,
        file_name: &str,
        content_type: &str,
        data: Bytes,
        token: &str,
    ) -> Result<Response, ServiceError> {
        let part = multipart::Part::bytes(data.to_vec())
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|err| ServiceError::Validation(format!("invalid content type: {err}")))?;
        let form = multipart::Form::new()
            .text("company_id", company_id.to_string())
            .part("receipt", part);
        self.http
            .post(format!("{}/api/1/receipts", self.settings.api_base))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|err| ServiceError::ExternalApi(format!("freee request failed: {err}")))
    }
}

async fn ensure_success(response: Response) -> Result<Response, ServiceError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::ExternalApi(format!(
        "freee API error: {status} {body}"
    )))
}
