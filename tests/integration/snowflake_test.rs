// tests/integration/snowflake_test.rs

//! The Snowflake connector against an in-process fake of the REST endpoints it
//! uses: login, query submission, result polling, chunk download and logout.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value as JsonValue, json};
use sf_exporter::config::SnowflakeConfig;
use sf_exporter::core::ExporterError;
use sf_exporter::core::warehouse::{
    SnowflakeCredentials, SnowflakeWarehouse, Value, Warehouse,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const TOKEN: &str = "session-token-1";

#[derive(Default)]
struct FakeState {
    base: String,
    reject_login: bool,
    /// Reply to login with a success envelope that has no `data` field.
    omit_login_data: bool,
    /// Replies to query submissions, keyed by SQL text.
    query_replies: HashMap<String, JsonValue>,
    /// Replies to result polls, keyed by query id.
    poll_replies: HashMap<String, JsonValue>,
    /// Raw chunk bodies, keyed by chunk id.
    chunks: HashMap<String, String>,
    login_params: HashMap<String, String>,
    login_body: Option<JsonValue>,
    auth_headers: Vec<String>,
    submitted: Vec<String>,
    polls: usize,
    chunk_keys: Vec<String>,
    logouts: Vec<String>,
}

type Shared = Arc<Mutex<FakeState>>;

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn login(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<JsonValue>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    state.login_params = params;
    state.login_body = Some(body);
    if state.reject_login {
        return Json(json!({
            "success": false,
            "code": "390100",
            "message": "Incorrect username or password was specified.",
            "data": null,
        }));
    }
    if state.omit_login_data {
        return Json(json!({ "success": true }));
    }
    Json(json!({ "success": true, "data": { "token": TOKEN } }))
}

async fn query_request(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    state.auth_headers.push(header(&headers, "authorization"));
    let sql = body["sqlText"].as_str().unwrap_or_default().to_string();
    state.submitted.push(sql.clone());
    let reply = state
        .query_replies
        .get(&sql)
        .cloned()
        .unwrap_or_else(|| json!({ "success": true, "data": { "rowtype": [], "rowset": [] } }));
    Json(reply)
}

async fn query_result(
    State(state): State<Shared>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    state.polls += 1;
    match state.poll_replies.get(&id).cloned() {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn chunk(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    state
        .chunk_keys
        .push(header(&headers, "x-amz-server-side-encryption-customer-key"));
    match state.chunks.get(&id).cloned() {
        Some(body) => body.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn logout(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    if params.get("delete").map(String::as_str) == Some("true") {
        state.logouts.push(header(&headers, "authorization"));
    }
    Json(json!({ "success": true }))
}

/// A fake Snowflake account served on an ephemeral port.
struct FakeSnowflake {
    addr: SocketAddr,
    state: Shared,
}

impl FakeSnowflake {
    async fn start() -> Self {
        let state: Shared = Arc::default();
        let app = Router::new()
            .route("/session/v1/login-request", post(login))
            .route("/queries/v1/query-request", post(query_request))
            .route("/queries/{id}/result", get(query_result))
            .route("/chunks/{id}", get(chunk))
            .route("/session", post(logout))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        state.lock().unwrap().base = format!("http://{addr}");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Self { addr, state }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn credentials(&self, role: Option<&str>) -> SnowflakeCredentials {
        let host = format!("http://{}", self.addr);
        let role = role.map(str::to_string);
        SnowflakeCredentials::from_lookup(|name| match name {
            "SNOWFLAKE_ACCOUNT" => Some("acme-eu1".into()),
            "SNOWFLAKE_USER" => Some("exporter".into()),
            "SNOWFLAKE_PASSWORD" => Some("hunter2".into()),
            "SNOWFLAKE_WAREHOUSE" => Some("REPORTING_WH".into()),
            "SNOWFLAKE_DATABASE" => Some("SAP".into()),
            "SNOWFLAKE_SCHEMA" => Some("L1".into()),
            "SNOWFLAKE_ROLE" => role.clone(),
            "SNOWFLAKE_HOST" => Some(host.clone()),
            _ => None,
        })
        .unwrap()
    }

    fn warehouse(&self, role: Option<&str>) -> SnowflakeWarehouse {
        let config = SnowflakeConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        SnowflakeWarehouse::new(self.credentials(role), config).unwrap()
    }
}

#[tokio::test]
async fn test_login_sends_credentials_and_context() {
    let fake = FakeSnowflake::start().await;
    let warehouse = fake.warehouse(Some("MONITORING"));

    let session = warehouse.connect().await.unwrap();
    session.close().await.unwrap();

    let state = fake.state();
    assert_eq!(state.login_params["warehouse"], "REPORTING_WH");
    assert_eq!(state.login_params["databaseName"], "SAP");
    assert_eq!(state.login_params["schemaName"], "L1");
    assert_eq!(state.login_params["roleName"], "MONITORING");
    let body = state.login_body.as_ref().unwrap();
    assert_eq!(body["data"]["ACCOUNT_NAME"], "acme-eu1");
    assert_eq!(body["data"]["LOGIN_NAME"], "exporter");
    assert_eq!(body["data"]["PASSWORD"], "hunter2");
}

#[tokio::test]
async fn test_login_without_role_omits_role_name() {
    let fake = FakeSnowflake::start().await;
    let warehouse = fake.warehouse(None);

    let session = warehouse.connect().await.unwrap();
    session.close().await.unwrap();

    assert!(!fake.state().login_params.contains_key("roleName"));
}

#[tokio::test]
async fn test_rejected_login_is_a_connection_error() {
    let fake = FakeSnowflake::start().await;
    fake.state().reject_login = true;
    let warehouse = fake.warehouse(None);

    let err = warehouse.connect().await.err().unwrap();

    match err {
        ExporterError::Connection(message) => {
            assert!(message.contains("Incorrect username or password"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_login_without_data_is_a_connection_error() {
    let fake = FakeSnowflake::start().await;
    fake.state().omit_login_data = true;
    let warehouse = fake.warehouse(None);

    let err = warehouse.connect().await.err().unwrap();

    assert_eq!(
        err,
        ExporterError::Connection("login response carried no token".into())
    );
}

#[tokio::test]
async fn test_query_rows_are_typed_by_column() {
    let fake = FakeSnowflake::start().await;
    let sql = "SELECT table_name, COUNT(*) FROM FACT_GE_RESULT GROUP BY table_name";
    fake.state().query_replies.insert(
        sql.to_string(),
        json!({
            "success": true,
            "data": {
                "queryId": "01b2-0001",
                "rowtype": [
                    { "name": "TABLE_NAME", "type": "text" },
                    { "name": "COUNT(*)", "type": "fixed" },
                    { "name": "OK", "type": "boolean" }
                ],
                "rowset": [
                    ["orders", "120", "true"],
                    ["users", null, "0"]
                ]
            }
        }),
    );
    let warehouse = fake.warehouse(None);

    let mut session = warehouse.connect().await.unwrap();
    session.execute(sql).await.unwrap();
    let rows = session.fetch_all().await.unwrap();
    session.close().await.unwrap();

    assert_eq!(
        rows,
        vec![
            vec![
                Value::Text("orders".into()),
                Value::Number(120.0),
                Value::Bool(true)
            ],
            vec![Value::Text("users".into()), Value::Null, Value::Bool(false)],
        ]
    );
    let state = fake.state();
    assert_eq!(state.submitted, vec![sql.to_string()]);
    assert_eq!(state.auth_headers, vec![format!("Snowflake Token=\"{TOKEN}\"")]);
}

#[tokio::test]
async fn test_running_statement_is_polled_until_done() {
    let fake = FakeSnowflake::start().await;
    let sql = "SELECT table_name, AVG(failure_percent) FROM FACT_GE_RESULT GROUP BY table_name";
    {
        let mut state = fake.state();
        state.query_replies.insert(
            sql.to_string(),
            json!({
                "success": true,
                "code": "333333",
                "message": "Query execution in progress",
                "data": { "queryId": "q-slow", "getResultUrl": "/queries/q-slow/result" }
            }),
        );
        state.poll_replies.insert(
            "q-slow".to_string(),
            json!({
                "success": true,
                "data": {
                    "queryId": "q-slow",
                    "rowtype": [{ "type": "text" }, { "type": "real" }],
                    "rowset": [["orders", "0.25"]]
                }
            }),
        );
    }
    let warehouse = fake.warehouse(None);

    let mut session = warehouse.connect().await.unwrap();
    session.execute(sql).await.unwrap();
    let rows = session.fetch_all().await.unwrap();

    assert_eq!(
        rows,
        vec![vec![Value::Text("orders".into()), Value::Number(0.25)]]
    );
    assert_eq!(fake.state().polls, 1);
}

#[tokio::test]
async fn test_large_results_are_assembled_from_chunks() {
    let fake = FakeSnowflake::start().await;
    let sql = "SELECT table_name, sum(failed_row_count) as fail_rcnt from fact_ge_result group by table_name";
    {
        let mut state = fake.state();
        let base = state.base.clone();
        state.query_replies.insert(
            sql.to_string(),
            json!({
                "success": true,
                "data": {
                    "rowtype": [{ "type": "text" }, { "type": "fixed" }],
                    "rowset": [["orders", "1"]],
                    "qrmk": "c2VjcmV0LWtleQ==",
                    "chunks": [
                        { "url": format!("{base}/chunks/0"), "rowCount": 2 },
                        { "url": format!("{base}/chunks/1"), "rowCount": 1 }
                    ]
                }
            }),
        );
        state
            .chunks
            .insert("0".into(), "[\"users\", \"2\"],\n[\"payments\", \"3\"]".into());
        state.chunks.insert("1".into(), "[\"refunds\", null]".into());
    }
    let warehouse = fake.warehouse(None);

    let mut session = warehouse.connect().await.unwrap();
    session.execute(sql).await.unwrap();
    let rows = session.fetch_all().await.unwrap();

    let tables: Vec<String> = rows.iter().map(|r| r[0].to_label()).collect();
    assert_eq!(tables, vec!["orders", "users", "payments", "refunds"]);
    assert_eq!(rows[2][1], Value::Number(3.0));
    assert_eq!(rows[3][1], Value::Null);
    assert_eq!(
        fake.state().chunk_keys,
        vec!["c2VjcmV0LWtleQ==".to_string(), "c2VjcmV0LWtleQ==".to_string()]
    );
}

#[tokio::test]
async fn test_failed_statement_is_an_error() {
    let fake = FakeSnowflake::start().await;
    let sql = "SELECT nope FROM missing_table";
    fake.state().query_replies.insert(
        sql.to_string(),
        json!({
            "success": false,
            "code": "002003",
            "message": "SQL compilation error: Object 'MISSING_TABLE' does not exist.",
            "data": null
        }),
    );
    let warehouse = fake.warehouse(None);

    let mut session = warehouse.connect().await.unwrap();
    let err = session.execute(sql).await.unwrap_err();

    match err {
        ExporterError::Warehouse(message) => {
            assert!(message.contains("does not exist"));
            assert!(message.contains("002003"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(session.fetch_all().await.is_err());
}

#[tokio::test]
async fn test_close_logs_the_session_out() {
    let fake = FakeSnowflake::start().await;
    let warehouse = fake.warehouse(None);

    let session = warehouse.connect().await.unwrap();
    assert!(fake.state().logouts.is_empty());
    session.close().await.unwrap();

    assert_eq!(
        fake.state().logouts,
        vec![format!("Snowflake Token=\"{TOKEN}\"")]
    );
}

#[tokio::test]
async fn test_unreachable_account_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let credentials = SnowflakeCredentials::from_lookup(|name| match name {
        "SNOWFLAKE_HOST" => Some(format!("http://{addr}")),
        _ => Some("x".into()),
    })
    .unwrap();
    let warehouse = SnowflakeWarehouse::new(credentials, SnowflakeConfig::default()).unwrap();

    let err = warehouse.connect().await.err().unwrap();

    assert!(matches!(err, ExporterError::Connection(_)));
}
