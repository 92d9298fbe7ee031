// Copyright (c) James Kassemi, SC, US. All rights reserved.

use crate::{QueryBackend, RowSource, RowStream, SourceError};
use async_trait::async_trait;
use core_types::{Row, Schema};
use futures::stream::{self, StreamExt};
use std::sync::Mutex;

/// Fixed rows served from memory, with an optional failure injected mid-stream.
#[derive(Debug, Clone)]
pub struct InMemoryRows {
    schema: Schema,
    rows: Vec<Row>,
    fail_after: Option<(usize, String)>,
}

impl InMemoryRows {
    pub fn new(schema: Schema, rows: Vec<Row>) -> Self {
        Self {
            schema,
            rows,
            fail_after: None,
        }
    }

    /// Yields `count` rows, then an error instead of exhaustion.
    pub fn failing_after(mut self, count: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((count, message.into()));
        self
    }
}

impl RowSource for InMemoryRows {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn into_rows(self: Box<Self>) -> RowStream {
        let Self {
            rows, fail_after, ..
        } = *self;
        match fail_after {
            None => stream::iter(rows.into_iter().map(Ok)).boxed(),
            Some((count, message)) => stream::iter(rows.into_iter().take(count).map(Ok))
                .chain(stream::once(async move {
                    Err(SourceError::Backend(message))
                }))
                .boxed(),
        }
    }
}

/// Backend double returning the same rows for every query and recording the
/// query text it was given.
#[derive(Debug)]
pub struct InMemoryBackend {
    rows: InMemoryRows,
    query_error: Option<String>,
    queries: Mutex<Vec<String>>,
}

impl InMemoryBackend {
    pub fn new(rows: InMemoryRows) -> Self {
        Self {
            rows,
            query_error: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Every `read` fails before producing a source.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            rows: InMemoryRows::new(Schema::default(), Vec::new()),
            query_error: Some(message.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueryBackend for InMemoryBackend {
    async fn read(&self, query: &str) -> Result<Box<dyn RowSource>, SourceError> {
        if let Ok(mut guard) = self.queries.lock() {
            guard.push(query.to_string());
        }
        match &self.query_error {
            Some(message) => Err(SourceError::Backend(message.clone())),
            None => Ok(Box::new(self.rows.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn rows() -> InMemoryRows {
        InMemoryRows::new(
            Schema::new(["id"]),
            vec![Row::from_iter(["a"]), Row::from_iter(["b"]), Row::from_iter(["c"])],
        )
    }

    #[tokio::test]
    async fn streams_rows_then_exhausts() {
        let collected: Vec<Row> = Box::new(rows()).into_rows().try_collect().await.unwrap();
        assert_eq!(collected.len(), 3);
    }

    #[tokio::test]
    async fn injected_failure_follows_the_first_rows() {
        let mut stream = Box::new(rows().failing_after(1, "cursor broke")).into_rows();
        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, SourceError::Backend(ref msg) if msg == "cursor broke"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn backend_records_queries_and_reports_failures() {
        let backend = InMemoryBackend::new(rows());
        let source = backend.read("SELECT 1").await.unwrap();
        assert_eq!(source.schema().fields(), ["id"]);
        assert_eq!(backend.queries(), vec!["SELECT 1".to_string()]);

        let failing = InMemoryBackend::failing("quota exceeded");
        assert!(failing.read("SELECT 2").await.is_err());
        assert_eq!(failing.queries(), vec!["SELECT 2".to_string()]);
    }
}
