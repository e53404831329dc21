//! Snowflake SQL REST API client.

use super::{Result, Row, RowCursor, Warehouse, WarehouseError};
use crate::config::SnowflakeConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

const STATEMENTS_PATH: &str = "api/v2/statements";
const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";
const TOKEN_TYPE: &str = "PROGRAMMATIC_ACCESS_TOKEN";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Client for the Snowflake SQL API.
///
/// The API is stateless: every statement carries its database context, and
/// closing the client only logs.
#[derive(Debug, Clone)]
pub struct SnowflakeClient {
    http: reqwest::Client,
    base_url: Url,
    context: StatementContext,
}

/// Database context sent with each statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct StatementContext {
    database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatementRequest<'a> {
    statement: &'a str,
    #[serde(flatten)]
    context: &'a StatementContext,
}

/// Body of a statement or partition response.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct StatementResponse {
    code: Option<String>,
    message: Option<String>,
    statement_handle: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
    data: Option<Vec<Row>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct ResultSetMetaData {
    num_rows: usize,
    partition_info: Vec<PartitionInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct PartitionInfo {
    row_count: usize,
}

impl SnowflakeClient {
    /// Build a client for the account named by `config.host`.
    pub fn connect(config: &SnowflakeConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(WarehouseError::Connection("host is empty".to_string()));
        }
        if config.creds.trim().is_empty() {
            return Err(WarehouseError::Connection("creds are empty".to_string()));
        }

        let base_url = base_url(&config.host)?;

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.creds.trim()))
            .map_err(|_| WarehouseError::Connection("creds are not a valid header value".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(TOKEN_TYPE_HEADER, HeaderValue::from_static(TOKEN_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("video-entities/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        debug!(host = %base_url, db = %config.db, "snowflake client ready");

        Ok(Self {
            http,
            base_url,
            context: StatementContext::from_config(config),
        })
    }

    fn statements_url(&self) -> Result<Url> {
        self.base_url
            .join(STATEMENTS_PATH)
            .map_err(|e| WarehouseError::Connection(e.to_string()))
    }

    fn statement_url(&self, handle: &str, partition: Option<usize>) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("{}/{}", STATEMENTS_PATH, handle))
            .map_err(|e| WarehouseError::Connection(e.to_string()))?;
        if let Some(partition) = partition {
            url.query_pairs_mut()
                .append_pair("partition", &partition.to_string());
        }
        Ok(url)
    }

    async fn submit(&self, sql: &str) -> Result<StatementResponse> {
        let request = StatementRequest {
            statement: sql,
            context: &self.context,
        };
        let response = self
            .http
            .post(self.statements_url()?)
            .json(&request)
            .send()
            .await?;
        let (mut status, mut body) = read_response(response).await?;

        // 202 means the statement is still running
        while status == StatusCode::ACCEPTED {
            let handle = body.statement_handle.clone().ok_or_else(|| {
                WarehouseError::Decode("running statement has no handle".to_string())
            })?;
            trace!(handle = %handle, "statement still running");
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self
                .http
                .get(self.statement_url(&handle, None)?)
                .send()
                .await?;
            (status, body) = read_response(response).await?;
        }

        Ok(body)
    }

    async fn fetch_partition(&self, handle: &str, partition: usize) -> Result<Vec<Row>> {
        let response = self
            .http
            .get(self.statement_url(handle, Some(partition))?)
            .send()
            .await?;
        let (_, body) = read_response(response).await?;
        Ok(body.data.unwrap_or_default())
    }
}

impl StatementContext {
    fn from_config(config: &SnowflakeConfig) -> Self {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        Self {
            database: config.db.clone(),
            schema: non_empty(&config.schema),
            warehouse: non_empty(&config.warehouse),
            role: non_empty(&config.role),
        }
    }
}

/// Account URL for `host`. A bare host name is served over https.
pub(crate) fn base_url(host: &str) -> Result<Url> {
    let host = host.trim().trim_end_matches('/');
    let raw = if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}/", host)
    } else {
        format!("https://{}/", host)
    };
    Url::parse(&raw).map_err(|e| WarehouseError::Connection(format!("invalid host '{}': {}", host, e)))
}

/// Split a response into its status and body, turning API errors into
/// [`WarehouseError::Query`].
async fn read_response(response: reqwest::Response) -> Result<(StatusCode, StatementResponse)> {
    let status = response.status();
    let text = response.text().await?;
    let body = parse_response(status, &text)?;
    Ok((status, body))
}

pub(crate) fn parse_response(status: StatusCode, text: &str) -> Result<StatementResponse> {
    let body: Option<StatementResponse> = serde_json::from_str(text).ok();

    if status.is_success() {
        return body.ok_or_else(|| {
            WarehouseError::Decode(format!("unexpected response body: {}", truncate(text)))
        });
    }

    let (code, message) = match body {
        Some(body) => (
            body.code.unwrap_or_else(|| status.as_u16().to_string()),
            body.message.unwrap_or_else(|| truncate(text)),
        ),
        None => (status.as_u16().to_string(), truncate(text)),
    };
    Err(WarehouseError::Query { code, message })
}

fn truncate(text: &str) -> String {
    text.chars().take(500).collect()
}

#[async_trait]
impl Warehouse for SnowflakeClient {
    async fn query(&self, sql: &str) -> Result<Box<dyn RowCursor>> {
        let body = self.submit(sql).await?;
        let cursor = SnowflakeCursor::from_response(self.clone(), body)?;
        debug!(rows = cursor.row_count(), partitions = cursor.partitions, "statement complete");
        Ok(Box::new(cursor))
    }

    async fn close(&self) -> Result<()> {
        debug!(db = %self.context.database, "snowflake connection closed");
        Ok(())
    }
}

/// Cursor that downloads result partitions as rows are consumed.
#[derive(Debug)]
pub struct SnowflakeCursor {
    client: SnowflakeClient,
    handle: String,
    row_count: usize,
    partitions: usize,
    next_partition: usize,
    buffer: VecDeque<Row>,
    closed: bool,
}

impl SnowflakeCursor {
    pub(crate) fn from_response(client: SnowflakeClient, body: StatementResponse) -> Result<Self> {
        let meta = body
            .result_set_meta_data
            .ok_or_else(|| WarehouseError::Decode("response has no result set metadata".to_string()))?;
        let handle = body.statement_handle.unwrap_or_default();
        let partitions = meta.partition_info.len().max(1);
        let expected: usize = meta.partition_info.iter().map(|p| p.row_count).sum();
        trace!(rows = meta.num_rows, expected, "result set metadata");

        Ok(Self {
            client,
            handle,
            row_count: meta.num_rows,
            partitions,
            // partition 0 arrives with the statement response
            next_partition: 1,
            buffer: body.data.unwrap_or_default().into(),
            closed: false,
        })
    }
}

#[async_trait]
impl RowCursor for SnowflakeCursor {
    fn row_count(&self) -> usize {
        self.row_count
    }

    async fn fetch_many(&mut self, n: usize) -> Result<Vec<Row>> {
        if self.closed {
            return Err(WarehouseError::Closed);
        }

        while self.buffer.len() < n && self.next_partition < self.partitions {
            let rows = self
                .client
                .fetch_partition(&self.handle, self.next_partition)
                .await?;
            trace!(partition = self.next_partition, rows = rows.len(), "fetched partition");
            self.buffer.extend(rows);
            self.next_partition += 1;
        }

        let take = n.min(self.buffer.len());
        Ok(self.buffer.drain(..take).collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        self.closed = true;
        Ok(())
    }
}
