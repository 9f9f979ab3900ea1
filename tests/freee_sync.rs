use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Extension, Router,
};
use chrono::{Duration, Utc};
use cost_portal::{
    api,
    domain::models::{CostCategory, CostType, RequestStatus, Role, TaxType, YearMonth},
    infrastructure::{auth::issue_token, config::FreeeConfig},
};
use httpmock::prelude::*;
use serde_json::{json, Value};
use serial_test::serial;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

#[path = "test_harness.rs"]
mod test_harness;

use test_harness::{build_state, create_user, delete_users, maybe_connect_pool};

#[tokio::test]
#[serial]
async fn approved_request_becomes_expense_deal() -> Result<()> {
    let Some(pool) = maybe_connect_pool().await? else {
        return Ok(());
    };
    sqlx::migrate!("./migrations").run(&pool).await?;
    run_happy_path(pool).await
}

#[tokio::test]
#[serial]
async fn unauthorized_response_triggers_token_refresh() -> Result<()> {
    let Some(pool) = maybe_connect_pool().await? else {
        return Ok(());
    };
    sqlx::migrate!("./migrations").run(&pool).await?;
    run_token_refresh(pool).await
}

#[tokio::test]
#[serial]
async fn missing_receipt_object_does_not_block_the_deal() -> Result<()> {
    let Some(pool) = maybe_connect_pool().await? else {
        return Ok(());
    };
    sqlx::migrate!("./migrations").run(&pool).await?;
    run_partial_receipts(pool).await
}

#[tokio::test]
#[serial]
async fn sweep_marks_requests_whose_deal_vanished() -> Result<()> {
    let Some(pool) = maybe_connect_pool().await? else {
        return Ok(());
    };
    sqlx::migrate!("./migrations").run(&pool).await?;
    run_sweep(pool).await
}

#[tokio::test]
#[serial]
async fn oauth_callback_stores_company_connection() -> Result<()> {
    let Some(pool) = maybe_connect_pool().await? else {
        return Ok(());
    };
    sqlx::migrate!("./migrations").run(&pool).await?;
    run_oauth_callback(pool).await
}

async fn run_happy_path(pool: PgPool) -> Result<()> {
    let server = MockServer::start_async().await;
    let (config, state) = build_state(pool.clone(), mock_settings(&server)).await?;
    let app = api::build_router(Arc::clone(&config)).layer(Extension(Arc::clone(&state)));

    let admin = create_user(&pool, Role::Admin).await?;
    let admin_token = issue_token(&state, &admin)?;
    connect_freee(&pool, 123, "token-1", "refresh-1").await?;
    let request_id = seed_approved_sga(&pool, admin.id, "監視SaaS利用料").await?;

    let taxes = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/1/taxes/codes")
                .header("authorization", "Bearer token-1");
            then.status(200).json_body(taxes_body());
        })
        .await;
    let deals = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/1/deals")
                .header("authorization", "Bearer token-1")
                .json_body_partial(
                    r#"{
                        "company_id": 123,
                        "issue_date": "2024-06-30",
                        "due_date": "2024-06-30",
                        "type": "expense",
                        "details": [{"account_item_id": 501, "tax_code": 21, "amount": 50000}]
                    }"#,
                );
            then.status(201).json_body(json!({ "deal": { "id": 999 } }));
        })
        .await;

    let response = app
        .clone()
        .oneshot(post_request(
            &format!("/api/requests/{request_id}/sync"),
            &admin_token,
        ))
        .await
        .expect("service error");
    assert_eq!(response.status(), StatusCode::OK);

    let payload = read_json(response).await?;
    assert_eq!(payload.get("dealId").and_then(Value::as_i64), Some(999));
    assert_eq!(
        payload
            .get("request")
            .and_then(|request| request.get("status"))
            .and_then(Value::as_str),
        Some("synced_to_freee")
    );

    taxes.assert_async().await;
    deals.assert_async().await;

    let (status, deal_id, sync_error): (String, Option<i64>, Option<String>) = sqlx::query_as(
        "SELECT status, freee_deal_id, freee_sync_error FROM cost_requests WHERE id = $1",
    )
    .bind(request_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(status, "synced_to_freee");
    assert_eq!(deal_id, Some(999));
    assert_eq!(sync_error, None);

    let synced_at_set: bool = sqlx::query_scalar(
        "SELECT freee_synced_at IS NOT NULL FROM cost_requests WHERE id = $1",
    )
    .bind(request_id)
    .fetch_one(&pool)
    .await?;
    assert!(synced_at_set, "freee_synced_at missing");

    cleanup_requests(&pool, &[request_id]).await?;
    disconnect_freee(&pool).await?;
    delete_users(&pool, &[admin.id]).await
}

async fn run_token_refresh(pool: PgPool) -> Result<()> {
    let server = MockServer::start_async().await;
    let (config, state) = build_state(pool.clone(), mock_settings(&server)).await?;
    let app = api::build_router(Arc::clone(&config)).layer(Extension(Arc::clone(&state)));

    let admin = create_user(&pool, Role::Admin).await?;
    let admin_token = issue_token(&state, &admin)?;
    connect_freee(&pool, 123, "stale-token", "refresh-1").await?;
    let request_id = seed_approved_sga(&pool, admin.id, "会計ツール利用料").await?;

    // The stored token looks fresh locally but has been revoked upstream.
    let rejected = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/1/taxes/codes")
                .header("authorization", "Bearer stale-token");
            then.status(401)
                .json_body(json!({ "message": "expired_access_token" }));
        })
        .await;
    let token_exchange = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_contains("grant_type=refresh_token")
                .body_contains("refresh_token=refresh-1");
            then.status(200).json_body(json!({
                "access_token": "fresh-token",
                "refresh_token": "refresh-2",
                "expires_in": 21_600
            }));
        })
        .await;
    let accepted = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/1/taxes/codes")
                .header("authorization", "Bearer fresh-token");
            then.status(200).json_body(taxes_body());
        })
        .await;
    let deals = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/1/deals")
                .header("authorization", "Bearer fresh-token");
            then.status(201).json_body(json!({ "deal": { "id": 1000 } }));
        })
        .await;

    let response = app
        .clone()
        .oneshot(post_request(
            &format!("/api/requests/{request_id}/sync"),
            &admin_token,
        ))
        .await
        .expect("service error");
    assert_eq!(response.status(), StatusCode::OK);

    rejected.assert_async().await;
    token_exchange.assert_async().await;
    accepted.assert_async().await;
    deals.assert_async().await;

    let (access_token, refresh_token): (Option<String>, Option<String>) = sqlx::query_as(
        "SELECT access_token, refresh_token FROM freee_config WHERE id = 'default'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(access_token.as_deref(), Some("fresh-token"));
    assert_eq!(refresh_token.as_deref(), Some("refresh-2"));

    let deal_id: Option<i64> =
        sqlx::query_scalar("SELECT freee_deal_id FROM cost_requests WHERE id = $1")
            .bind(request_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(deal_id, Some(1000));

    cleanup_requests(&pool, &[request_id]).await?;
    disconnect_freee(&pool).await?;
    delete_users(&pool, &[admin.id]).await
}

async fn run_partial_receipts(pool: PgPool) -> Result<()> {
    let server = MockServer::start_async().await;
    let (config, state) = build_state(pool.clone(), mock_settings(&server)).await?;
    let app = api::build_router(Arc::clone(&config)).layer(Extension(Arc::clone(&state)));

    let admin = create_user(&pool, Role::Admin).await?;
    let admin_token = issue_token(&state, &admin)?;
    connect_freee(&pool, 123, "token-1", "refresh-1").await?;
    let request_id = seed_approved_sga(&pool, admin.id, "コワーキング利用料").await?;

    let uploaded_id = upload_attachment(&app, &admin_token, request_id).await?;

    // A second attachment row whose object was never stored: the receipt
    // upload is skipped while the deal still goes through.
    let orphan_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO attachments (id, request_id, file_name, storage_key, mime_type, size_bytes) \
         VALUES ($1,$2,$3,$4,$5,$6)",
    )
    .bind(orphan_id)
    .bind(request_id)
    .bind("missing.pdf")
    .bind(format!("requests/{request_id}/{}", Uuid::new_v4()))
    .bind("application/pdf")
    .bind(100_i64)
    .execute(&pool)
    .await?;

    let taxes = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/1/taxes/codes");
            then.status(200).json_body(taxes_body());
        })
        .await;
    let receipts = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/1/receipts")
                .header("authorization", "Bearer token-1");
            then.status(201).json_body(json!({ "receipt": { "id": 777 } }));
        })
        .await;
    let deals = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/1/deals")
                .json_body_partial(r#"{"details": [{"receipt_ids": [777]}]}"#);
            then.status(201).json_body(json!({ "deal": { "id": 1001 } }));
        })
        .await;

    let response = app
        .clone()
        .oneshot(post_request(
            &format!("/api/requests/{request_id}/sync"),
            &admin_token,
        ))
        .await
        .expect("service error");
    assert_eq!(response.status(), StatusCode::OK);

    taxes.assert_async().await;
    // Only the attachment with a stored object reaches the receipts API.
    receipts.assert_async().await;
    deals.assert_async().await;

    let receipt_id: Option<i64> =
        sqlx::query_scalar("SELECT freee_receipt_id FROM attachments WHERE id = $1")
            .bind(uploaded_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(receipt_id, Some(777));

    let orphan_receipt: Option<i64> =
        sqlx::query_scalar("SELECT freee_receipt_id FROM attachments WHERE id = $1")
            .bind(orphan_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(orphan_receipt, None);

    cleanup_requests(&pool, &[request_id]).await?;
    disconnect_freee(&pool).await?;
    delete_users(&pool, &[admin.id]).await
}

async fn run_sweep(pool: PgPool) -> Result<()> {
    let server = MockServer::start_async().await;
    let (config, state) = build_state(pool.clone(), mock_settings(&server)).await?;
    let app = api::build_router(Arc::clone(&config)).layer(Extension(Arc::clone(&state)));

    let admin = create_user(&pool, Role::Admin).await?;
    let admin_token = issue_token(&state, &admin)?;
    connect_freee(&pool, 123, "token-1", "refresh-1").await?;

    let kept_a = seed_synced(&pool, admin.id, "オフィス賃料", 9001).await?;
    let vanished = seed_synced(&pool, admin.id, "旧サーバー保守費", 9002).await?;
    let kept_b = seed_synced(&pool, admin.id, "会計顧問料", 9003).await?;

    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/1/deals/9001");
            then.status(200).json_body(json!({ "deal": { "id": 9001 } }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/1/deals/9002");
            then.status(404).json_body(json!({ "message": "not found" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/1/deals/9003");
            then.status(200).json_body(json!({ "deal": { "id": 9003 } }));
        })
        .await;

    let response = app
        .clone()
        .oneshot(post_request("/api/freee/sweep", &admin_token))
        .await
        .expect("service error");
    assert_eq!(response.status(), StatusCode::OK);

    let report = read_json(response).await?;
    assert_eq!(report.get("checked").and_then(Value::as_i64), Some(3));
    assert_eq!(report.get("deleted").and_then(Value::as_i64), Some(1));
    assert_eq!(
        report.get("titles").and_then(Value::as_array).map(Vec::len),
        Some(1)
    );

    let vanished_status: String =
        sqlx::query_scalar("SELECT status FROM cost_requests WHERE id = $1")
            .bind(vanished)
            .fetch_one(&pool)
            .await?;
    assert_eq!(vanished_status, "freee_deleted");

    for id in [kept_a, kept_b] {
        let status: String = sqlx::query_scalar("SELECT status FROM cost_requests WHERE id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await?;
        assert_eq!(status, "synced_to_freee");
    }

    cleanup_requests(&pool, &[kept_a, vanished, kept_b]).await?;
    disconnect_freee(&pool).await?;
    delete_users(&pool, &[admin.id]).await
}

async fn run_oauth_callback(pool: PgPool) -> Result<()> {
    let server = MockServer::start_async().await;
    let (config, state) = build_state(pool.clone(), mock_settings(&server)).await?;
    let app = api::build_router(Arc::clone(&config)).layer(Extension(Arc::clone(&state)));

    let admin = create_user(&pool, Role::Admin).await?;
    let employee = create_user(&pool, Role::Employee).await?;
    let admin_token = issue_token(&state, &admin)?;
    let employee_token = issue_token(&state, &employee)?;
    disconnect_freee(&pool).await?;

    let forbidden = app
        .clone()
        .oneshot(get_request("/api/freee/connect", &employee_token))
        .await
        .expect("service error");
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let connect = app
        .clone()
        .oneshot(get_request("/api/freee/connect", &admin_token))
        .await
        .expect("service error");
    assert_eq!(connect.status(), StatusCode::OK);
    let connect_body = read_json(connect).await?;
    let url = connect_body
        .get("url")
        .and_then(Value::as_str)
        .expect("authorize url");
    assert!(url.contains("response_type=code"));
    assert!(url.contains("client_id=portal-client"));

    let token_exchange = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_contains("grant_type=authorization_code")
                .body_contains("code=fresh-auth-code");
            then.status(200).json_body(json!({
                "access_token": "token-abc",
                "refresh_token": "refresh-abc",
                "expires_in": 21_600
            }));
        })
        .await;
    let companies = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/1/companies")
                .header("authorization", "Bearer token-abc");
            then.status(200).json_body(json!({
                "companies": [{ "id": 777, "display_name": "サンプル株式会社" }]
            }));
        })
        .await;

    let callback = app
        .clone()
        .oneshot(get_request(
            "/api/freee/callback?code=fresh-auth-code",
            &admin_token,
        ))
        .await
        .expect("service error");
    assert_eq!(callback.status(), StatusCode::OK);
    let callback_body = read_json(callback).await?;
    assert_eq!(callback_body.get("connected").and_then(Value::as_bool), Some(true));
    assert_eq!(callback_body.get("companyId").and_then(Value::as_i64), Some(777));

    token_exchange.assert_async().await;
    companies.assert_async().await;

    let status = app
        .clone()
        .oneshot(get_request("/api/freee/status", &admin_token))
        .await
        .expect("service error");
    assert_eq!(status.status(), StatusCode::OK);
    let status_body = read_json(status).await?;
    assert_eq!(status_body.get("connected").and_then(Value::as_bool), Some(true));
    assert_eq!(status_body.get("companyId").and_then(Value::as_i64), Some(777));
    assert!(status_body.get("masterCounts").is_some(), "masterCounts missing");

    disconnect_freee(&pool).await?;
    delete_users(&pool, &[admin.id, employee.id]).await
}

fn mock_settings(server: &MockServer) -> FreeeConfig {
    FreeeConfig {
        client_id: "portal-client".to_string(),
        client_secret: "portal-secret".to_string(),
        redirect_uri: "http://localhost:3000/freee/callback".to_string(),
        authorize_url: format!("{}/oauth/authorize", server.base_url()),
        token_url: format!("{}/oauth/token", server.base_url()),
        api_base: server.base_url(),
    }
}

fn taxes_body() -> Value {
    json!({
        "taxes": [
            { "code": 21, "name": "purchase_with_tax_80", "name_ja": "課対仕入（控80）10%" },
            { "code": 136, "name": "purchase_with_tax", "name_ja": "課対仕入10%" },
            { "code": 2, "name": "out_of_scope", "name_ja": "対象外" }
        ]
    })
}

async fn connect_freee(pool: &PgPool, company_id: i64, access: &str, refresh: &str) -> Result<()> {
    sqlx::query(
        "UPDATE freee_config SET company_id = $1, access_token = $2, refresh_token = $3, \
         token_expires_at = $4, updated_at = now() WHERE id = 'default'",
    )
    .bind(company_id)
    .bind(access)
    .bind(refresh)
    .bind(Utc::now() + Duration::hours(6))
    .execute(pool)
    .await?;
    Ok(())
}

async fn disconnect_freee(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "UPDATE freee_config SET company_id = NULL, access_token = NULL, refresh_token = NULL, \
         token_expires_at = NULL, updated_at = now() WHERE id = 'default'",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn seed_approved_sga(pool: &PgPool, submitter: Uuid, title: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO cost_requests (id, title, amount, category, cost_type, tax_type, status, \
         recording_month, account_item_id, account_item_name, submitter_id) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
    )
    .bind(id)
    .bind(title)
    .bind(50_000_i64)
    .bind(CostCategory::Sga)
    .bind(CostType::RunningMonthly)
    .bind(TaxType::Inclusive)
    .bind(RequestStatus::Approved)
    .bind(YearMonth::new(2024, 6).expect("valid month"))
    .bind(501_i64)
    .bind("支払手数料")
    .bind(submitter)
    .execute(pool)
    .await?;
    Ok(id)
}

async fn seed_synced(pool: &PgPool, submitter: Uuid, title: &str, deal_id: i64) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO cost_requests (id, title, amount, category, cost_type, tax_type, status, \
         recording_month, account_item_id, submitter_id, freee_deal_id, freee_synced_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11, now())",
    )
    .bind(id)
    .bind(title)
    .bind(30_000_i64)
    .bind(CostCategory::Sga)
    .bind(CostType::RunningMonthly)
    .bind(TaxType::Inclusive)
    .bind(RequestStatus::SyncedToFreee)
    .bind(YearMonth::new(2024, 4).expect("valid month"))
    .bind(501_i64)
    .bind(submitter)
    .bind(deal_id)
    .execute(pool)
    .await?;
    Ok(id)
}

async fn upload_attachment(app: &Router, token: &str, request_id: Uuid) -> Result<Uuid> {
    let boundary = "portal-upload-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"receipt.pdf\"\r\n\
         Content-Type: application/pdf\r\n\r\n\
         %PDF-1.4 mock receipt\r\n\
         --{boundary}--\r\n"
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/attachments/{request_id}"))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::from(body))
                .expect("failed to build upload request"),
        )
        .await
        .expect("service error");
    assert_eq!(response.status(), StatusCode::OK);

    let payload = read_json(response).await?;
    let id = payload
        .get("attachment")
        .and_then(|attachment| attachment.get("id"))
        .and_then(Value::as_str)
        .expect("attachment id");
    Ok(Uuid::parse_str(id)?)
}

fn post_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .expect("failed to build request")
}

fn get_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .expect("failed to build request")
}

async fn read_json(response: axum::response::Response) -> Result<Value> {
    let body = to_bytes(response.into_body(), 1024 * 1024).await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn cleanup_requests(pool: &PgPool, ids: &[Uuid]) -> Result<()> {
    sqlx::query("DELETE FROM cost_requests WHERE id = ANY($1)")
        .bind(ids)
        .execute(pool)
        .await?;
    Ok(())
}
