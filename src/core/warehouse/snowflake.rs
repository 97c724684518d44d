// src/core/warehouse/snowflake.rs

//! A minimal Snowflake session client speaking the REST protocol used by the
//! official connectors: password login, synchronous query with result polling
//! and chunk download, and logout.

use super::{Row, Session, Value, Warehouse};
use crate::config::SnowflakeConfig;
use crate::core::errors::ExporterError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

const CLIENT_APP_ID: &str = "sf-exporter";
const SNOWFLAKE_JSON: &str = "application/snowflake";

/// Response codes meaning the statement is still executing server-side.
const QUERY_IN_PROGRESS: &str = "333333";
const QUERY_IN_PROGRESS_ASYNC: &str = "333334";

pub const ENV_ACCOUNT: &str = "SNOWFLAKE_ACCOUNT";
pub const ENV_USER: &str = "SNOWFLAKE_USER";
pub const ENV_PASSWORD: &str = "SNOWFLAKE_PASSWORD";
pub const ENV_WAREHOUSE: &str = "SNOWFLAKE_WAREHOUSE";
pub const ENV_DATABASE: &str = "SNOWFLAKE_DATABASE";
pub const ENV_SCHEMA: &str = "SNOWFLAKE_SCHEMA";
pub const ENV_ROLE: &str = "SNOWFLAKE_ROLE";
pub const ENV_HOST: &str = "SNOWFLAKE_HOST";

/// Connection target and secrets, read once from the environment at startup.
#[derive(Clone)]
pub struct SnowflakeCredentials {
    pub account: String,
    pub user: String,
    pub password: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    pub role: Option<String>,
    /// Overrides `https://<account>.snowflakecomputing.com`.
    pub host: Option<String>,
}

impl fmt::Debug for SnowflakeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeCredentials")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .field("host", &self.host)
            .finish()
    }
}

impl SnowflakeCredentials {
    /// Reads the credentials from the process environment.
    pub fn from_env() -> Result<Self, ExporterError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds credentials from an arbitrary variable lookup. Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ExporterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());
        let required =
            |name: &'static str| optional(name).ok_or(ExporterError::MissingEnvVar(name));

        Ok(Self {
            account: required(ENV_ACCOUNT)?,
            user: required(ENV_USER)?,
            password: required(ENV_PASSWORD)?,
            warehouse: required(ENV_WAREHOUSE)?,
            database: required(ENV_DATABASE)?,
            schema: required(ENV_SCHEMA)?,
            role: optional(ENV_ROLE),
            host: optional(ENV_HOST),
        })
    }

    /// The account's API root.
    pub fn base_url(&self) -> Result<Url, ExporterError> {
        let raw = match &self.host {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.clone()
            }
            Some(host) => format!("https://{host}"),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        };
        Url::parse(&raw)
            .map_err(|e| ExporterError::Config(format!("invalid Snowflake host '{raw}': {e}")))
    }
}

/// Opens password-authenticated sessions against one Snowflake account.
pub struct SnowflakeWarehouse {
    client: reqwest::Client,
    credentials: Arc<SnowflakeCredentials>,
    base_url: Url,
    config: SnowflakeConfig,
}

impl SnowflakeWarehouse {
    pub fn new(
        credentials: SnowflakeCredentials,
        config: SnowflakeConfig,
    ) -> Result<Self, ExporterError> {
        let base_url = credentials.base_url()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            credentials: Arc::new(credentials),
            base_url,
            config,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ExporterError> {
        self.base_url
            .join(path)
            .map_err(|e| ExporterError::Config(format!("invalid endpoint '{path}': {e}")))
    }
}

#[async_trait]
impl Warehouse for SnowflakeWarehouse {
    async fn connect(&self) -> Result<Box<dyn Session>, ExporterError> {
        let creds = &self.credentials;
        let mut url = self.endpoint("/session/v1/login-request")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("warehouse", &creds.warehouse)
                .append_pair("databaseName", &creds.database)
                .append_pair("schemaName", &creds.schema);
            if let Some(role) = &creds.role {
                query.append_pair("roleName", role);
            }
            query.append_pair("request_id", &Uuid::new_v4().to_string());
        }

        let body = json!({
            "data": {
                "CLIENT_APP_ID": CLIENT_APP_ID,
                "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
                "ACCOUNT_NAME": creds.account,
                "LOGIN_NAME": creds.user,
                "PASSWORD": creds.password,
                "SESSION_PARAMETERS": { "QUERY_RESULT_FORMAT": "JSON" },
            }
        });

        let response = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .timeout(self.config.login_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExporterError::Connection(format!("login request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExporterError::Connection(format!(
                "login rejected with HTTP status {status}"
            )));
        }

        let parsed: ApiResponse<LoginData> = response
            .json()
            .await
            .map_err(|e| ExporterError::Connection(format!("unreadable login response: {e}")))?;
        if !parsed.success {
            return Err(ExporterError::Connection(format!(
                "login failed: {}",
                parsed.describe_failure()
            )));
        }
        let token = parsed
            .data
            .and_then(|d| d.token)
            .ok_or_else(|| ExporterError::Connection("login response carried no token".into()))?;

        info!(
            "Opened Snowflake session for {}@{} ({}.{})",
            creds.user, creds.account, creds.database, creds.schema
        );
        Ok(Box::new(SnowflakeSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token,
            sequence_id: 0,
            poll_interval: self.config.poll_interval,
            buffered: None,
        }))
    }
}

/// One logged-in Snowflake session.
struct SnowflakeSession {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    sequence_id: u64,
    poll_interval: Duration,
    buffered: Option<Vec<Row>>,
}

impl SnowflakeSession {
    fn auth_header(&self) -> String {
        format!("Snowflake Token=\"{}\"", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ExporterError> {
        self.base_url
            .join(path)
            .map_err(|e| ExporterError::Warehouse(format!("invalid endpoint '{path}': {e}")))
    }

    async fn submit(&mut self, sql: &str) -> Result<QueryData, ExporterError> {
        self.sequence_id += 1;
        let mut url = self.endpoint("/queries/v1/query-request")?;
        url.query_pairs_mut()
            .append_pair("requestId", &Uuid::new_v4().to_string());

        let submitted_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let body = json!({
            "sqlText": sql,
            "asyncExec": false,
            "sequenceId": self.sequence_id,
            "querySubmissionTime": submitted_at,
        });

        let response = self
            .client
            .post(url)
            .header(ACCEPT, SNOWFLAKE_JSON)
            .header(AUTHORIZATION, self.auth_header())
            .json(&body)
            .send()
            .await?;
        let mut parsed = read_query_response(response).await?;

        // Long statements come back "in progress"; follow the result URL until done.
        while parsed.is_in_progress() {
            let result_path = parsed
                .data
                .as_ref()
                .and_then(|d| d.get_result_url.clone())
                .ok_or_else(|| {
                    ExporterError::Warehouse("in-progress response without a result URL".into())
                })?;
            debug!("Statement still running, polling {}", result_path);
            tokio::time::sleep(self.poll_interval).await;
            let response = self
                .client
                .get(self.endpoint(&result_path)?)
                .header(ACCEPT, SNOWFLAKE_JSON)
                .header(AUTHORIZATION, self.auth_header())
                .send()
                .await?;
            parsed = read_query_response(response).await?;
        }

        if !parsed.success {
            return Err(ExporterError::Warehouse(parsed.describe_failure()));
        }
        parsed
            .data
            .ok_or_else(|| ExporterError::Warehouse("query response carried no data".into()))
    }

    async fn download_chunks(
        &self,
        data: &QueryData,
    ) -> Result<Vec<Vec<serde_json::Value>>, ExporterError> {
        let mut rows = Vec::new();
        if data.chunks.is_empty() {
            return Ok(rows);
        }
        let headers = chunk_headers(data)?;
        for (i, chunk) in data.chunks.iter().enumerate() {
            let response = self
                .client
                .get(&chunk.url)
                .headers(headers.clone())
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ExporterError::Warehouse(format!(
                    "result chunk {i} download failed with HTTP status {status}"
                )));
            }
            let text = response.text().await?;
            // Chunks are comma-separated row arrays without the enclosing brackets.
            let mut chunk_rows: Vec<Vec<serde_json::Value>> =
                serde_json::from_str(&format!("[{}]", text.trim()))?;
            if chunk.row_count != 0 && chunk.row_count != chunk_rows.len() {
                warn!(
                    "Result chunk {} announced {} rows but contained {}",
                    i,
                    chunk.row_count,
                    chunk_rows.len()
                );
            }
            rows.append(&mut chunk_rows);
        }
        Ok(rows)
    }
}

#[async_trait]
impl Session for SnowflakeSession {
    async fn execute(&mut self, sql: &str) -> Result<(), ExporterError> {
        self.buffered = None;
        let mut data = self.submit(sql).await?;
        let mut raw_rows = std::mem::take(&mut data.rowset);
        raw_rows.extend(self.download_chunks(&data).await?);

        let rows = raw_rows
            .iter()
            .map(|raw| convert_row(&data.rowtype, raw))
            .collect::<Vec<_>>();
        debug!(
            "Statement {} returned {} rows",
            data.query_id.as_deref().unwrap_or("<unknown>"),
            rows.len()
        );
        self.buffered = Some(rows);
        Ok(())
    }

    async fn fetch_all(&mut self) -> Result<Vec<Row>, ExporterError> {
        self.buffered
            .take()
            .ok_or_else(|| ExporterError::Warehouse("fetch_all called before execute".into()))
    }

    async fn close(self: Box<Self>) -> Result<(), ExporterError> {
        let mut url = self.endpoint("/session")?;
        url.query_pairs_mut().append_pair("delete", "true");
        let response = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, self.auth_header())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExporterError::Connection(format!(
                "logout failed with HTTP status {status}"
            )));
        }
        debug!("Snowflake session closed.");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: Option<T>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    success: bool,
}

impl<T> ApiResponse<T> {
    fn describe_failure(&self) -> String {
        format!(
            "{} (code {})",
            self.message.as_deref().unwrap_or("no message"),
            self.code.as_deref().unwrap_or("none")
        )
    }
}

impl ApiResponse<QueryData> {
    fn is_in_progress(&self) -> bool {
        matches!(
            self.code.as_deref(),
            Some(QUERY_IN_PROGRESS) | Some(QUERY_IN_PROGRESS_ASYNC)
        )
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkRef {
    url: String,
    #[serde(default)]
    row_count: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<ColumnType>,
    #[serde(default)]
    rowset: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    chunks: Vec<ChunkRef>,
    #[serde(default)]
    chunk_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    qrmk: Option<String>,
    #[serde(default)]
    get_result_url: Option<String>,
    #[serde(default)]
    query_id: Option<String>,
}

async fn read_query_response(
    response: reqwest::Response,
) -> Result<ApiResponse<QueryData>, ExporterError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ExporterError::Warehouse(format!(
            "query request failed with HTTP status {status}"
        )));
    }
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

fn chunk_headers(data: &QueryData) -> Result<HeaderMap, ExporterError> {
    let mut headers = HeaderMap::new();
    let pairs: Vec<(String, String)> = match (&data.chunk_headers, &data.qrmk) {
        (Some(explicit), _) => explicit.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        (None, Some(qrmk)) => vec![
            (
                "x-amz-server-side-encryption-customer-algorithm".to_string(),
                "AES256".to_string(),
            ),
            (
                "x-amz-server-side-encryption-customer-key".to_string(),
                qrmk.clone(),
            ),
        ],
        (None, None) => Vec::new(),
    };
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ExporterError::Warehouse(format!("invalid chunk header name: {e}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| ExporterError::Warehouse(format!("invalid chunk header value: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn convert_row(rowtype: &[ColumnType], raw: &[serde_json::Value]) -> Row {
    raw.iter()
        .enumerate()
        .map(|(i, cell)| {
            let kind = rowtype.get(i).map(|c| c.kind.as_str()).unwrap_or("text");
            convert_cell(kind, cell)
        })
        .collect()
}

/// Maps a JSON-format cell to a [`Value`] using the column's Snowflake type.
pub(crate) fn convert_cell(kind: &str, cell: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match cell {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
        Json::String(s) => match kind.to_ascii_lowercase().as_str() {
            "fixed" | "real" => s
                .parse::<f64>()
                .map(Value::Number)
                .unwrap_or_else(|_| Value::Text(s.clone())),
            "boolean" => Value::Bool(s == "1" || s.eq_ignore_ascii_case("true")),
            _ => Value::Text(s.clone()),
        },
        other => Value::Text(other.to_string()),
    }
}
