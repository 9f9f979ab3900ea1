use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Extension,
};
use chrono::{Datelike, NaiveDate, Utc};
use cost_portal::{
    api,
    domain::models::{CostCategory, CostType, RequestStatus, Role, TaxType, YearMonth},
    infrastructure::{auth::issue_token, config::FreeeConfig},
};
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

#[path = "test_harness.rs"]
mod test_harness;

use test_harness::{build_state, create_user, delete_users, maybe_connect_pool};

#[tokio::test]
async fn overview_combines_ledger_actuals_with_request_projections() -> Result<()> {
    let Some(pool) = maybe_connect_pool().await? else {
        return Ok(());
    };
    sqlx::migrate!("./migrations").run(&pool).await?;
    run_overview(pool).await
}

#[tokio::test]
async fn overview_is_admin_only_and_defaults_to_the_current_year() -> Result<()> {
    let Some(pool) = maybe_connect_pool().await? else {
        return Ok(());
    };
    sqlx::migrate!("./migrations").run(&pool).await?;
    run_access(pool).await
}

async fn run_overview(pool: PgPool) -> Result<()> {
    let (config, state) = build_state(pool.clone(), FreeeConfig::default()).await?;
    let app = api::build_router(Arc::clone(&config)).layer(Extension(Arc::clone(&state)));

    let admin = create_user(&pool, Role::Admin).await?;
    let employee = create_user(&pool, Role::Employee).await?;
    let admin_token = issue_token(&state, &admin)?;

    sqlx::query("DELETE FROM freee_deal_ledger")
        .execute(&pool)
        .await?;

    // An unnamed actual, a fully named actual, and a provisional booking
    // that must stay invisible. Years far in the future keep the assertions
    // independent of whatever other suites leave behind.
    insert_ledger(
        &pool,
        8101,
        date("2031-06-20"),
        Some(date("2031-07-10")),
        None,
        None,
        None,
        5_000,
        None,
    )
    .await?;
    insert_ledger(
        &pool,
        8102,
        date("2031-03-05"),
        None,
        Some("AWSジャパン"),
        Some("開発部"),
        Some("通信費"),
        120_000,
        None,
    )
    .await?;
    insert_ledger(
        &pool,
        8103,
        date("2029-05-05"),
        Some(date("2029-06-10")),
        Some("仮払い先"),
        None,
        Some("雑費"),
        9_999,
        Some("販管費振込確認用, 仮"),
    )
    .await?;

    let department_id = Uuid::new_v4();
    let department_name = format!("経理部-{}", department_id.simple());
    sqlx::query("INSERT INTO departments (id, name) VALUES ($1, $2)")
        .bind(department_id)
        .bind(&department_name)
        .execute(&pool)
        .await?;

    let projected_id = insert_request(
        &pool,
        employee.id,
        Some(department_id),
        "レンタルオフィス賃料",
        20_000,
        RequestStatus::Submitted,
        YearMonth::new(2031, 6).expect("valid month"),
        Some(YearMonth::new(2031, 7).expect("valid month")),
        Some("地代家賃"),
    )
    .await?;
    let draft_id = insert_request(
        &pool,
        employee.id,
        Some(department_id),
        "下書きの設備費",
        99_999,
        RequestStatus::Draft,
        YearMonth::new(2031, 4).expect("valid month"),
        None,
        Some("消耗品費"),
    )
    .await?;

    sqlx::query("UPDATE freee_config SET last_pl_sync_at = now() WHERE id = 'default'")
        .execute(&pool)
        .await?;

    let response = app
        .clone()
        .oneshot(get_request("/api/dashboard?year=2031", &admin_token))
        .await
        .expect("service error");
    assert_eq!(response.status(), StatusCode::OK);
    let data = read_json(response).await?;

    let actual_pl = rows(&data, "actualPlRows");
    assert_eq!(actual_pl.len(), 2);
    let unnamed = find_by(&actual_pl, "plMonth", "2031-06");
    assert_eq!(str_field(unnamed, "department"), "unset");
    assert_eq!(str_field(unnamed, "accountItem"), "unknown");
    assert_eq!(str_field(unnamed, "partner"), "unknown");
    assert_eq!(unnamed.get("amount").and_then(Value::as_i64), Some(5_000));
    let named = find_by(&actual_pl, "plMonth", "2031-03");
    assert_eq!(str_field(named, "department"), "開発部");
    assert_eq!(str_field(named, "accountItem"), "通信費");
    assert_eq!(str_field(named, "partner"), "AWSジャパン");

    let actual_cf = rows(&data, "actualCfRows");
    assert_eq!(actual_cf.len(), 1);
    assert_eq!(str_field(&actual_cf[0], "dueMonth"), "2031-07");
    assert_eq!(str_field(&actual_cf[0], "title"), "unknown");
    assert_eq!(str_field(&actual_cf[0], "dueDate"), "2031-07-10");

    let projected_pl: Vec<Value> = rows(&data, "projectedPlRows")
        .into_iter()
        .filter(|row| str_field(row, "department") == department_name)
        .collect();
    assert_eq!(projected_pl.len(), 1, "draft must not project");
    assert_eq!(str_field(&projected_pl[0], "accountItem"), "地代家賃");
    assert_eq!(str_field(&projected_pl[0], "partner"), "連携テスト担当");
    assert_eq!(str_field(&projected_pl[0], "plMonth"), "2031-06");
    assert_eq!(
        projected_pl[0].get("amount").and_then(Value::as_i64),
        Some(20_000)
    );

    let projected_cf: Vec<Value> = rows(&data, "projectedCfRows")
        .into_iter()
        .filter(|row| str_field(row, "title") == "レンタルオフィス賃料")
        .collect();
    assert_eq!(projected_cf.len(), 1);
    assert_eq!(str_field(&projected_cf[0], "dueMonth"), "2031-07");
    assert!(projected_cf[0].get("dueDate").map(Value::is_null).unwrap_or(true));

    let running: Vec<Value> = rows(&data, "runningRows")
        .into_iter()
        .filter(|row| str_field(row, "title") == "レンタルオフィス賃料")
        .collect();
    assert_eq!(running.len(), 1);
    assert_eq!(str_field(&running[0], "costType"), "running_monthly");
    assert_eq!(str_field(&running[0], "recordingMonth"), "2031-06");

    let years: Vec<i64> = data
        .get("availableYears")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
    assert!(years.contains(&2031));
    assert!(
        !years.contains(&2029),
        "provisional bookings must not contribute years"
    );
    assert!(years.contains(&i64::from(Utc::now().year())));

    let departments: Vec<&str> = data
        .get("departments")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    assert!(departments.contains(&department_name.as_str()));

    assert!(
        data.get("lastPlSyncAt")
            .map(|value| !value.is_null())
            .unwrap_or(false),
        "lastPlSyncAt missing"
    );

    sqlx::query("DELETE FROM cost_requests WHERE id = ANY($1)")
        .bind(&vec![projected_id, draft_id])
        .execute(&pool)
        .await?;
    sqlx::query("DELETE FROM freee_deal_ledger WHERE freee_deal_id = ANY($1)")
        .bind(&vec![8101_i64, 8102, 8103])
        .execute(&pool)
        .await?;
    sqlx::query("DELETE FROM departments WHERE id = $1")
        .bind(department_id)
        .execute(&pool)
        .await?;
    delete_users(&pool, &[admin.id, employee.id]).await
}

async fn run_access(pool: PgPool) -> Result<()> {
    let (config, state) = build_state(pool.clone(), FreeeConfig::default()).await?;
    let app = api::build_router(Arc::clone(&config)).layer(Extension(Arc::clone(&state)));

    let admin = create_user(&pool, Role::Admin).await?;
    let employee = create_user(&pool, Role::Employee).await?;
    let admin_token = issue_token(&state, &admin)?;
    let employee_token = issue_token(&state, &employee)?;

    let forbidden = app
        .clone()
        .oneshot(get_request("/api/dashboard", &employee_token))
        .await
        .expect("service error");
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    let body = read_json(forbidden).await?;
    assert_eq!(body.get("error").and_then(Value::as_str), Some("forbidden"));

    let default_year = app
        .clone()
        .oneshot(get_request("/api/dashboard", &admin_token))
        .await
        .expect("service error");
    assert_eq!(default_year.status(), StatusCode::OK);
    let data = read_json(default_year).await?;
    let years: Vec<i64> = data
        .get("availableYears")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
    assert!(years.contains(&i64::from(Utc::now().year())));

    delete_users(&pool, &[admin.id, employee.id]).await
}

fn date(value: &str) -> NaiveDate {
    value.parse().expect("valid date")
}

#[allow(clippy::too_many_arguments)]
async fn insert_ledger(
    pool: &PgPool,
    deal_id: i64,
    issue_date: NaiveDate,
    due_date: Option<NaiveDate>,
    partner: Option<&str>,
    section: Option<&str>,
    account_item: Option<&str>,
    amount: i64,
    memo_tags: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO freee_deal_ledger (id, freee_deal_id, issue_date, due_date, partner_name, \
         section_name, account_item_name, amount, memo_tag_names, synced_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9, now())",
    )
    .bind(Uuid::new_v4())
    .bind(deal_id)
    .bind(issue_date)
    .bind(due_date)
    .bind(partner)
    .bind(section)
    .bind(account_item)
    .bind(amount)
    .bind(memo_tags)
    .execute(pool)
    .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_request(
    pool: &PgPool,
    submitter: Uuid,
    department_id: Option<Uuid>,
    title: &str,
    amount: i64,
    status: RequestStatus,
    recording_month: YearMonth,
    payment_month: Option<YearMonth>,
    account_item_name: Option<&str>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO cost_requests (id, title, amount, category, cost_type, tax_type, status, \
         recording_month, payment_month, account_item_name, submitter_id, department_id) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
    )
    .bind(id)
    .bind(title)
    .bind(amount)
    .bind(CostCategory::Sga)
    .bind(CostType::RunningMonthly)
    .bind(TaxType::Inclusive)
    .bind(status)
    .bind(recording_month)
    .bind(payment_month)
    .bind(account_item_name)
    .bind(submitter)
    .bind(department_id)
    .execute(pool)
    .await?;
    Ok(id)
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

fn rows(data: &Value, key: &str) -> Vec<Value> {
    data.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn find_by<'a>(rows: &'a [Value], key: &str, expected: &str) -> &'a Value {
    rows.iter()
        .find(|row| str_field(row, key) == expected)
        .unwrap_or_else(|| panic!("no row with {key} = {expected}"))
}

fn str_field(row: &Value, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}
