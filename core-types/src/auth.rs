// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Access tokens for Google REST APIs.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token endpoint returned {status}")]
    Status { status: u16 },
}

/// Supplies bearer tokens for outbound API calls.
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// Fetches the runtime service account token from the metadata server.
///
/// A token is requested per call; nothing is cached between requests.
#[derive(Clone)]
pub struct MetadataTokenSource {
    client: Client,
    url: String,
}

impl MetadataTokenSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            url: METADATA_TOKEN_URL.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn access_token(&self) -> Result<String, AuthError> {
        let response = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status {
                status: status.as_u16(),
            });
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}
