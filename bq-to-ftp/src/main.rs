// Copyright (c) James Kassemi, SC, US. All rights reserved.

mod bootstrap;
mod logging;

use std::{env, error::Error, net::SocketAddr, process, sync::Arc};

use core_types::auth::{MetadataTokenSource, TokenSource};
use core_types::config::{ConfigError, ExportConfig};
use core_types::secrets::SecretManagerResolver;
use export_service::TemplateError;
use log::{info, SetLoggerError};
use storage::StorageError;
use thiserror::Error;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("bq-to-ftp failed: {err}");
        process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let level = parse_level(env::args().skip(1))?;
    logging::init(&level)?;

    let http = reqwest::Client::builder().build()?;
    let tokens: Arc<dyn TokenSource> = Arc::new(MetadataTokenSource::new(http.clone()));
    let config = {
        let resolver = SecretManagerResolver::new(http.clone(), tokens.clone());
        ExportConfig::load(&resolver).await?
    };

    let server = Arc::new(bootstrap::build_server(&config, http, tokens).await?);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("bq-to-ftp listening on {addr}");
    server.serve(listener).await.map_err(AppError::Serve)
}

/// Accepts `--level <filter>` or `--level=<filter>`.
fn parse_level(mut args: impl Iterator<Item = String>) -> Result<String, AppError> {
    let mut level = logging::DEFAULT_LEVEL.to_string();
    while let Some(arg) = args.next() {
        if arg == "--level" {
            level = args.next().ok_or(AppError::Usage)?;
        } else if let Some(value) = arg.strip_prefix("--level=") {
            level = value.to_string();
        } else {
            return Err(AppError::Usage);
        }
    }
    Ok(level)
}

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("usage: bq-to-ftp [--level <filter>]")]
    Usage,
    #[error("failed to install logger: {0}")]
    Logger(#[from] SetLoggerError),
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("listener: {0}")]
    Io(#[from] std::io::Error),
    #[error("server stopped: {0}")]
    Serve(Box<dyn Error + Send + Sync>),
}
