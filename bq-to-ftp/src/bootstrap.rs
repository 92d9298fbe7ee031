// Copyright (c) James Kassemi, SC, US. All rights reserved.

use crate::AppError;
use core_types::auth::TokenSource;
use core_types::config::ExportConfig;
use csv_render::RenderOptions;
use delivery::{BucketFallbackStore, DeliveryPipeline, FallbackStore, FtpTransferSink, TransferSink};
use export_service::{ExportJob, ExportServer, QueryTemplate};
use log::{info, warn};
use row_source::{BigQueryClient, QueryBackend};
use std::sync::Arc;
use storage::{ObjectStore, S3ObjectStore};

/// Builds the backing clients concurrently and wires them into a server.
pub(crate) async fn build_server(
    config: &ExportConfig,
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
) -> Result<ExportServer, AppError> {
    for warning in &config.warnings {
        warn!("{warning}");
    }

    let backend = async {
        let client = BigQueryClient::new(http.clone(), tokens.clone(), config.gcp_project.clone());
        info!("query backend ready for project {}", config.gcp_project);
        Ok::<Arc<dyn QueryBackend>, AppError>(Arc::new(client))
    };
    let sink = async {
        let sink = FtpTransferSink::new(&config.ftp);
        info!("ftp sink targets {}", sink.address());
        Ok::<Arc<dyn TransferSink>, AppError>(Arc::new(sink))
    };
    let storage = async {
        let store: Option<Arc<dyn ObjectStore>> = config
            .storage
            .as_ref()
            .map(|settings| Arc::new(S3ObjectStore::new(settings)) as Arc<dyn ObjectStore>);
        let template = QueryTemplate::prepare(&config.query, store.clone()).await?;
        info!("query template: {}", template.describe());
        let fallback = match (&config.fallback_bucket, store) {
            (Some(bucket), Some(store)) => BucketFallbackStore::new(store, bucket)?,
            _ => {
                warn!("no fallback bucket configured; undelivered files will only be logged");
                BucketFallbackStore::disabled()
            }
        };
        Ok::<_, AppError>((template, Arc::new(fallback) as Arc<dyn FallbackStore>))
    };

    let (backend, sink, (template, fallback)) = tokio::try_join!(backend, sink, storage)?;

    let job = ExportJob::new(
        template,
        backend,
        RenderOptions {
            with_header: config.with_header,
            separator: config.separator.clone(),
        },
        config.file_prefix.clone(),
        config.window,
        DeliveryPipeline::new(sink, fallback),
    );
    Ok(ExportServer::new(Arc::new(job)))
}
