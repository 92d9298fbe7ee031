// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! BigQuery REST backend.
//!
//! `jobs.query` runs the statement and returns the first page; later pages are
//! requested through `getQueryResults` only when the stream reaches them.

use crate::{QueryBackend, RowSource, RowStream, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::auth::TokenSource;
use core_types::{Row, Schema, Value};
use futures::stream;
use log::debug;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;

pub const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

const DEFAULT_PAGE_SIZE: u32 = 10_000;
const POLL_TIMEOUT_MS: u32 = 10_000;

/// Shared, immutable BigQuery connection settings.
#[derive(Clone)]
pub struct BigQueryClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    project: String,
    base_url: String,
    page_size: u32,
}

impl BigQueryClient {
    pub fn new(http: Client, tokens: Arc<dyn TokenSource>, project: impl Into<String>) -> Self {
        Self::with_base_url(http, tokens, project, BIGQUERY_BASE_URL)
    }

    pub fn with_base_url(
        http: Client,
        tokens: Arc<dyn TokenSource>,
        project: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                http,
                tokens,
                project: project.into(),
                base_url: base_url.into(),
                page_size: DEFAULT_PAGE_SIZE,
            }),
        }
    }

    async fn start_query(&self, query: &str) -> Result<QueryResponse, SourceError> {
        let inner = &self.inner;
        let url = format!("{}/projects/{}/queries", inner.base_url, inner.project);
        let body = json!({
            "query": query,
            "useLegacySql": false,
            "maxResults": inner.page_size,
            "timeoutMs": POLL_TIMEOUT_MS,
            "formatOptions": { "useInt64Timestamp": true },
        });
        let token = inner.tokens.access_token().await?;
        let response = inner
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    async fn fetch_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, SourceError> {
        let inner = &self.inner;
        let url = format!(
            "{}/projects/{}/queries/{}",
            inner.base_url, job.project_id, job.job_id
        );
        let mut params: Vec<(&str, String)> = vec![
            ("maxResults", inner.page_size.to_string()),
            ("timeoutMs", POLL_TIMEOUT_MS.to_string()),
            ("formatOptions.useInt64Timestamp", "true".to_string()),
        ];
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let token = inner.tokens.access_token().await?;
        let response = inner
            .http
            .get(url)
            .bearer_auth(token)
            .query(&params)
            .send()
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl QueryBackend for BigQueryClient {
    async fn read(&self, query: &str) -> Result<Box<dyn RowSource>, SourceError> {
        let mut response = self.start_query(query).await?;
        while !response.job_complete {
            let job = response
                .job_reference
                .as_ref()
                .ok_or_else(|| SourceError::Malformed("incomplete job without reference".into()))?;
            debug!("waiting for BigQuery job {}", job.job_id);
            response = self.fetch_results(job, None).await?;
        }
        let fields = response
            .schema
            .map(|schema| schema.fields)
            .ok_or_else(|| SourceError::Malformed("completed job without schema".into()))?;
        let next_page = match response.page_token {
            Some(token) => Some((
                response.job_reference.ok_or_else(|| {
                    SourceError::Malformed("paged result without job reference".into())
                })?,
                token,
            )),
            None => None,
        };
        Ok(Box::new(BigQueryCursor {
            client: self.clone(),
            schema: Schema::new(fields.iter().map(|field| field.name.clone())),
            fields: Arc::new(fields),
            first_page: response.rows,
            next_page,
        }))
    }
}

/// Live cursor over a completed query job.
pub struct BigQueryCursor {
    client: BigQueryClient,
    schema: Schema,
    fields: Arc<Vec<FieldSchema>>,
    first_page: Vec<TableRow>,
    next_page: Option<(JobReference, String)>,
}

struct PageState {
    client: BigQueryClient,
    fields: Arc<Vec<FieldSchema>>,
    buffered: VecDeque<TableRow>,
    next_page: Option<(JobReference, String)>,
    failed: bool,
}

impl RowSource for BigQueryCursor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn into_rows(self: Box<Self>) -> RowStream {
        let state = PageState {
            client: self.client,
            fields: self.fields,
            buffered: self.first_page.into(),
            next_page: self.next_page,
            failed: false,
        };
        Box::pin(stream::unfold(state, |mut state| async move {
            loop {
                if state.failed {
                    return None;
                }
                if let Some(raw) = state.buffered.pop_front() {
                    let row = decode_row(&state.fields, raw);
                    state.failed = row.is_err();
                    return Some((row, state));
                }
                let (job, token) = state.next_page.take()?;
                match state.client.fetch_results(&job, Some(&token)).await {
                    Ok(page) => {
                        state.buffered = page.rows.into();
                        state.next_page = page.page_token.map(|token| (job, token));
                    }
                    Err(err) => {
                        state.failed = true;
                        return Some((Err(err), state));
                    }
                }
            }
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

impl FieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: serde_json::Value,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|parsed| parsed.error.message)
        .unwrap_or(body);
    Err(SourceError::Api {
        status: status.as_u16(),
        message,
    })
}

fn decode_row(fields: &[FieldSchema], row: TableRow) -> Result<Row, SourceError> {
    if row.f.len() != fields.len() {
        return Err(SourceError::Malformed(format!(
            "row has {} cells for {} columns",
            row.f.len(),
            fields.len()
        )));
    }
    fields
        .iter()
        .zip(row.f.iter())
        .map(|(field, cell)| decode_value(field, &cell.v))
        .collect::<Result<Vec<_>, _>>()
        .map(Row::new)
}

fn decode_value(field: &FieldSchema, raw: &serde_json::Value) -> Result<Value, SourceError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    if field.is_repeated() {
        let items = raw.as_array().ok_or_else(|| cell_error(field, raw))?;
        return items
            .iter()
            .map(|item| decode_single(field, item.get("v").unwrap_or(&serde_json::Value::Null)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List);
    }
    decode_single(field, raw)
}

fn decode_single(field: &FieldSchema, raw: &serde_json::Value) -> Result<Value, SourceError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    match field.field_type.as_str() {
        "RECORD" | "STRUCT" => {
            let cells = raw
                .get("f")
                .and_then(|f| f.as_array())
                .ok_or_else(|| cell_error(field, raw))?;
            field
                .fields
                .iter()
                .zip(cells)
                .map(|(sub, cell)| decode_value(sub, cell.get("v").unwrap_or(&serde_json::Value::Null)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        field_type => {
            let text = raw.as_str().ok_or_else(|| cell_error(field, raw))?;
            decode_scalar(field, field_type, text)
        }
    }
}

fn decode_scalar(field: &FieldSchema, field_type: &str, text: &str) -> Result<Value, SourceError> {
    let invalid = || SourceError::Cell {
        column: field.name.clone(),
        field_type: field.field_type.clone(),
        raw: text.to_string(),
    };
    match field_type {
        "INTEGER" | "INT64" => text.parse().map(Value::Int).map_err(|_| invalid()),
        "FLOAT" | "FLOAT64" => text.parse().map(Value::Float).map_err(|_| invalid()),
        "BOOLEAN" | "BOOL" => match text {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        "TIMESTAMP" => text
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_micros)
            .map(Value::Timestamp)
            .ok_or_else(invalid),
        _ => Ok(Value::Text(text.to_string())),
    }
}

fn cell_error(field: &FieldSchema, raw: &serde_json::Value) -> SourceError {
    SourceError::Cell {
        column: field.name.clone(),
        field_type: field.field_type.clone(),
        raw: raw.to_string(),
    }
}
