// Copyright (c) James Kassemi, SC, US. All rights reserved.

use crate::{FallbackStore, StoreError, TransferError, TransferSink};
use core_types::retry::RetryPolicy;
use csv_render::RenderedFile;
use log::{error, info, warn};
use std::sync::Arc;

/// Terminal state of one delivery.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered {
        attempts: usize,
    },
    /// The transfer sink gave up; the file was saved to the fallback store.
    FallbackStored {
        send_error: TransferError,
    },
    /// Both destinations failed. The content only survives in the logs.
    FallbackFailed {
        send_error: TransferError,
        fallback_error: StoreError,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

pub struct DeliveryPipeline {
    sink: Arc<dyn TransferSink>,
    fallback: Arc<dyn FallbackStore>,
    policy: RetryPolicy,
}

impl DeliveryPipeline {
    pub fn new(sink: Arc<dyn TransferSink>, fallback: Arc<dyn FallbackStore>) -> Self {
        Self::with_policy(sink, fallback, RetryPolicy::delivery())
    }

    pub fn with_policy(
        sink: Arc<dyn TransferSink>,
        fallback: Arc<dyn FallbackStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            sink,
            fallback,
            policy,
        }
    }

    /// Sends `file`, falling back only once every attempt has failed.
    pub async fn deliver(&self, file: &RenderedFile) -> DeliveryOutcome {
        let name = file.name();
        let max_attempts = self.policy.max_attempts;
        let sink = &self.sink;
        let sent = self
            .policy
            .retry_async(|attempt| {
                let content = file.content().clone();
                async move {
                    match sink.send(name, content).await {
                        Ok(()) => Ok(attempt + 1),
                        Err(err) => {
                            warn!(
                                "sending {name} failed (attempt {}/{max_attempts}): {err}",
                                attempt + 1
                            );
                            Err(err)
                        }
                    }
                }
            })
            .await;

        let send_error = match sent {
            Ok(attempts) => {
                info!("delivered {name} ({} bytes, {attempts} attempt(s))", file.len());
                return DeliveryOutcome::Delivered { attempts };
            }
            Err(err) => err,
        };

        match self.fallback.store(name, file.content().clone()).await {
            Ok(()) => {
                warn!("{name} saved to fallback storage after delivery failed: {send_error}");
                DeliveryOutcome::FallbackStored { send_error }
            }
            Err(fallback_error) => {
                error!(
                    "{name} lost: delivery failed ({send_error}) and fallback failed ({fallback_error}); content follows\n{}",
                    String::from_utf8_lossy(file.content())
                );
                DeliveryOutcome::FallbackFailed {
                    send_error,
                    fallback_error,
                }
            }
        }
    }
}
