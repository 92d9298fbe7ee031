// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Query result access behind a backend-neutral contract.
//!
//! A [`QueryBackend`] executes a query and hands back a [`RowSource`]: the
//! result schema plus a lazy, single-pass [`RowStream`]. The end of the stream
//! is the normal "exhausted" condition; any `Err` item is a hard failure that
//! consumers must propagate.

mod bigquery;
mod memory;

pub use bigquery::{BigQueryClient, BigQueryCursor, BIGQUERY_BASE_URL};
pub use memory::{InMemoryBackend, InMemoryRows};

use async_trait::async_trait;
use core_types::auth::AuthError;
use core_types::{Row, Schema};
use futures::stream::BoxStream;
use thiserror::Error;

pub type RowStream = BoxStream<'static, Result<Row, SourceError>>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("query backend returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("column {column}: cannot decode {raw:?} as {field_type}")]
    Cell {
        column: String,
        field_type: String,
        raw: String,
    },
    #[error("query backend failure: {0}")]
    Backend(String),
}

/// Executed query result: a schema plus the rows that follow it.
pub trait RowSource: Send {
    fn schema(&self) -> &Schema;

    /// Consumes the source. The stream can be driven once.
    fn into_rows(self: Box<Self>) -> RowStream;
}

/// Executes query text against an analytical engine.
#[async_trait]
pub trait QueryBackend: Send + Sync + 'static {
    async fn read(&self, query: &str) -> Result<Box<dyn RowSource>, SourceError>;
}
