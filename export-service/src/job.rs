// Copyright (c) James Kassemi, SC, US. All rights reserved.

use crate::template::{QueryTemplate, TemplateError};
use chrono::{DateTime, Local, TimeZone};
use core_types::config::WindowSettings;
use csv_render::{file_name, render, RenderError, RenderOptions};
use delivery::{DeliveryOutcome, DeliveryPipeline, StoreError, TransferError};
use log::{info, warn};
use query_window::QueryWindow;
use row_source::{QueryBackend, SourceError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("query template: {0}")]
    Template(#[from] TemplateError),
    #[error("query failed: {0}")]
    Query(#[from] SourceError),
    #[error("rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error("delivery of {file} failed ({send_error}); file kept in fallback storage")]
    DeliveryDegraded {
        file: String,
        send_error: TransferError,
    },
    #[error("delivery of {file} failed ({send_error}) and fallback failed ({fallback_error})")]
    DeliveryFailed {
        file: String,
        send_error: TransferError,
        fallback_error: StoreError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub file_name: String,
    pub rows: usize,
    pub bytes: usize,
    pub attempts: usize,
    pub window: String,
}

/// Everything one export needs; shared read-only across requests.
pub struct ExportJob {
    template: QueryTemplate,
    backend: Arc<dyn QueryBackend>,
    render: RenderOptions,
    file_prefix: String,
    window: WindowSettings,
    delivery: DeliveryPipeline,
}

impl ExportJob {
    pub fn new(
        template: QueryTemplate,
        backend: Arc<dyn QueryBackend>,
        render: RenderOptions,
        file_prefix: impl Into<String>,
        window: WindowSettings,
        delivery: DeliveryPipeline,
    ) -> Self {
        Self {
            template,
            backend,
            render,
            file_prefix: file_prefix.into(),
            window,
            delivery,
        }
    }

    pub async fn run(&self) -> Result<ExportReport, ExportError> {
        self.run_at(Local::now()).await
    }

    /// Runs with an explicit clock; the window and the file name both derive from `now`.
    pub async fn run_at<Tz>(&self, now: DateTime<Tz>) -> Result<ExportReport, ExportError>
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display + Send + Sync,
    {
        let template = self.template.load().await?;
        let window = QueryWindow::ending_at(
            now.clone(),
            self.window.latency_minutes,
            self.window.window_minutes,
        );
        let query = window.apply(&template);
        info!("running export for window {window}");

        let source = self.backend.read(&query).await?;
        let name = file_name(&self.file_prefix, &now);
        let file = render(&self.render, name, source).await?;
        info!("rendered {} ({} rows, {} bytes)", file.name(), file.rows(), file.len());

        match self.delivery.deliver(&file).await {
            DeliveryOutcome::Delivered { attempts } => Ok(ExportReport {
                file_name: file.name().to_string(),
                rows: file.rows(),
                bytes: file.len(),
                attempts,
                window: window.to_string(),
            }),
            DeliveryOutcome::FallbackStored { send_error } => {
                warn!("partial recovery: {} is in fallback storage", file.name());
                Err(ExportError::DeliveryDegraded {
                    file: file.name().to_string(),
                    send_error,
                })
            }
            DeliveryOutcome::FallbackFailed {
                send_error,
                fallback_error,
            } => Err(ExportError::DeliveryFailed {
                file: file.name().to_string(),
                send_error,
                fallback_error,
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::FixedOffset;
    use core_types::{Row, Schema, Value};
    use delivery::{FallbackStore, TransferSink};
    use row_source::{InMemoryBackend, InMemoryRows};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub(crate) struct CountingSink {
        pub(crate) fail: bool,
        pub(crate) calls: AtomicUsize,
        pub(crate) last: Mutex<Option<(String, Bytes)>>,
    }

    impl CountingSink {
        pub(crate) fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TransferSink for CountingSink {
        async fn send(&self, name: &str, content: Bytes) -> Result<(), TransferError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some((name.to_string(), content));
            if self.fail {
                Err(TransferError::Other("530 login incorrect".into()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    pub(crate) struct VecStore {
        pub(crate) stored: Mutex<Vec<(String, Bytes)>>,
    }

    #[async_trait]
    impl FallbackStore for VecStore {
        async fn store(&self, name: &str, content: Bytes) -> Result<(), StoreError> {
            self.stored.lock().unwrap().push((name.to_string(), content));
            Ok(())
        }
    }

    pub(crate) fn backend() -> Arc<InMemoryBackend> {
        let rows = (0..3)
            .map(|i| Row::new(vec![Value::Int(i), Value::Text(format!("name{i}")), Value::Int(i)]))
            .collect();
        Arc::new(InMemoryBackend::new(InMemoryRows::new(
            Schema::new(["id", "Name", "Value"]),
            rows,
        )))
    }

    pub(crate) fn job(
        backend: Arc<dyn QueryBackend>,
        sink: Arc<dyn TransferSink>,
        store: Arc<dyn FallbackStore>,
    ) -> ExportJob {
        ExportJob::new(
            QueryTemplate::Inline(
                "SELECT * FROM t WHERE ts >= 'START_TIMESTAMP' AND ts < 'END_TIMESTAMP'".into(),
            ),
            backend,
            RenderOptions {
                with_header: true,
                separator: b",".to_vec(),
            },
            "export_",
            WindowSettings {
                window_minutes: 15,
                latency_minutes: 10,
            },
            DeliveryPipeline::new(sink, store),
        )
    }

    fn clock() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 9, 17, 5, 42)
            .unwrap()
    }

    #[tokio::test]
    async fn delivers_windowed_export() {
        let backend = backend();
        let sink = Arc::new(CountingSink::new(false));
        let store = Arc::new(VecStore::default());
        let report = job(backend.clone(), sink.clone(), store.clone())
            .run_at(clock())
            .await
            .unwrap();

        assert_eq!(
            backend.queries(),
            vec![
                "SELECT * FROM t WHERE ts >= '2024-03-09 16:40:00' AND ts < '2024-03-09 16:55:00'"
                    .to_string()
            ]
        );
        assert_eq!(report.file_name, "export_20240309170542.csv");
        assert_eq!(report.rows, 3);
        assert_eq!(report.attempts, 1);
        let (name, content) = sink.last.lock().unwrap().clone().unwrap();
        assert_eq!(name, "export_20240309170542.csv");
        assert_eq!(&content[..], b"id,Name,Value\n0,name0,0\n1,name1,1\n2,name2,2\n");
        assert!(store.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fallback_success_is_still_an_error() {
        let sink = Arc::new(CountingSink::new(true));
        let store = Arc::new(VecStore::default());
        let err = job(backend(), sink.clone(), store.clone())
            .run_at(clock())
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::DeliveryDegraded { .. }));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_failures_skip_delivery() {
        let sink = Arc::new(CountingSink::new(false));
        let err = job(
            Arc::new(InMemoryBackend::failing("table not found")),
            sink.clone(),
            Arc::new(VecStore::default()),
        )
        .run_at(clock())
        .await
        .unwrap_err();
        assert!(matches!(err, ExportError::Query(_)));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }
}
