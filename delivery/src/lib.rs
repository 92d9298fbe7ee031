// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Outbound delivery of rendered exports.
//!
//! The [`DeliveryPipeline`] sends a file through a [`TransferSink`] under a
//! fixed retry budget and, once the budget is spent, writes it to a
//! [`FallbackStore`] so the data is not lost.

mod bucket;
mod ftp;
mod pipeline;

pub use bucket::BucketFallbackStore;
pub use ftp::{normalize_remote_dir, with_default_port, FtpTransferSink, DEFAULT_FTP_PORT};
pub use pipeline::{DeliveryOutcome, DeliveryPipeline};

use async_trait::async_trait;
use bytes::Bytes;
use storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("ftp error: {0}")]
    Ftp(#[from] suppaftp::FtpError),
    #[error("transfer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no fallback bucket configured")]
    NotConfigured,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Primary destination for a rendered file.
#[async_trait]
pub trait TransferSink: Send + Sync + 'static {
    async fn send(&self, name: &str, content: Bytes) -> Result<(), TransferError>;
}

/// Secondary durable destination used after the transfer sink gives up.
#[async_trait]
pub trait FallbackStore: Send + Sync + 'static {
    async fn store(&self, name: &str, content: Bytes) -> Result<(), StoreError>;
}
