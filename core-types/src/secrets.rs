// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Secret indirection for configuration values.
//!
//! A configuration value may be a literal or a reference of the form
//! `sm://PROJECT/NAME[#VERSION]`, resolved through Secret Manager when the
//! configuration is built. Resolution happens once, at startup.

use crate::auth::{AuthError, TokenSource};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

pub const SECRET_MANAGER_PREFIX: &str = "sm://";
pub const BERGLAS_PREFIX: &str = "berglas://";
pub const SECRET_MANAGER_BASE_URL: &str = "https://secretmanager.googleapis.com/v1";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("{key}: unsupported secret reference scheme {scheme}; reference the secret as sm://PROJECT/NAME[#VERSION] instead")]
    Unsupported { key: String, scheme: &'static str },
    #[error("{key}: malformed secret reference {value:?}")]
    Malformed { key: String, value: String },
    #[error("{key}: secret request error: {source}")]
    Request {
        key: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{key}: secret manager returned {status}")]
    Status { key: String, status: u16 },
    #[error("{key}: {source}")]
    Auth {
        key: String,
        #[source]
        source: AuthError,
    },
    #[error("{key}: secret payload is not valid base64 utf-8")]
    Payload { key: String },
}

/// Resolves one raw configuration value into its effective value.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, key: &str, raw: String) -> Result<String, SecretError>;
}

/// Returns every value untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainResolver;

#[async_trait]
impl SecretResolver for PlainResolver {
    async fn resolve(&self, _key: &str, raw: String) -> Result<String, SecretError> {
        Ok(raw)
    }
}

/// Parsed `sm://` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub project: String,
    pub name: String,
    pub version: String,
}

impl SecretRef {
    /// `Ok(None)` for literal values.
    pub fn parse(key: &str, raw: &str) -> Result<Option<Self>, SecretError> {
        if raw.starts_with(BERGLAS_PREFIX) {
            return Err(SecretError::Unsupported {
                key: key.to_string(),
                scheme: BERGLAS_PREFIX,
            });
        }
        let Some(reference) = raw.strip_prefix(SECRET_MANAGER_PREFIX) else {
            return Ok(None);
        };
        let malformed = || SecretError::Malformed {
            key: key.to_string(),
            value: raw.to_string(),
        };
        let (path, version) = match reference.split_once('#') {
            Some((path, version)) if !version.is_empty() => (path, version),
            Some(_) => return Err(malformed()),
            None => (reference, "latest"),
        };
        let (project, name) = path.split_once('/').ok_or_else(malformed)?;
        if project.is_empty() || name.is_empty() || name.contains('/') {
            return Err(malformed());
        }
        Ok(Some(Self {
            project: project.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        }))
    }

    fn access_url(&self, base_url: &str) -> String {
        format!(
            "{}/projects/{}/secrets/{}/versions/{}:access",
            base_url.trim_end_matches('/'),
            self.project,
            self.name,
            self.version
        )
    }
}

/// Resolves `sm://` references through the Secret Manager REST API.
#[derive(Clone)]
pub struct SecretManagerResolver {
    client: Client,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
}

impl SecretManagerResolver {
    pub fn new(client: Client, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            tokens,
            base_url: SECRET_MANAGER_BASE_URL.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct AccessResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    data: String,
}

#[async_trait]
impl SecretResolver for SecretManagerResolver {
    async fn resolve(&self, key: &str, raw: String) -> Result<String, SecretError> {
        let Some(reference) = SecretRef::parse(key, &raw)? else {
            return Ok(raw);
        };
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|source| SecretError::Auth {
                key: key.to_string(),
                source,
            })?;
        let request_err = |source| SecretError::Request {
            key: key.to_string(),
            source,
        };
        let response = self
            .client
            .get(reference.access_url(&self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SecretError::Status {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }
        let body: AccessResponse = response.json().await.map_err(request_err)?;
        decode_payload(key, &body.payload.data)
    }
}

fn decode_payload(key: &str, data: &str) -> Result<String, SecretError> {
    STANDARD
        .decode(data)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| SecretError::Payload {
            key: key.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_values_are_not_references() {
        assert_eq!(SecretRef::parse("FTP_LOGIN", "user").unwrap(), None);
        assert_eq!(SecretRef::parse("FTP_LOGIN", "").unwrap(), None);
    }

    #[test]
    fn parses_reference_with_default_version() {
        let parsed = SecretRef::parse("FTP_PASSWORD", "sm://my-project/ftp-password")
            .unwrap()
            .unwrap();
        assert_eq!(parsed.project, "my-project");
        assert_eq!(parsed.name, "ftp-password");
        assert_eq!(parsed.version, "latest");
        assert_eq!(
            parsed.access_url(SECRET_MANAGER_BASE_URL),
            "https://secretmanager.googleapis.com/v1/projects/my-project/secrets/ftp-password/versions/latest:access"
        );
    }

    #[test]
    fn parses_reference_with_pinned_version() {
        let parsed = SecretRef::parse("FTP_PASSWORD", "sm://p/s#7").unwrap().unwrap();
        assert_eq!(parsed.version, "7");
    }

    #[test]
    fn rejects_malformed_and_berglas_references() {
        assert!(matches!(
            SecretRef::parse("K", "sm://only-project"),
            Err(SecretError::Malformed { .. })
        ));
        assert!(matches!(
            SecretRef::parse("K", "sm://p/s#"),
            Err(SecretError::Malformed { .. })
        ));
        let err = SecretRef::parse("K", "berglas://bucket/secret").unwrap_err();
        assert!(matches!(err, SecretError::Unsupported { .. }));
        assert!(err.to_string().contains("sm://PROJECT/NAME"));
    }

    #[test]
    fn decodes_base64_payload() {
        assert_eq!(decode_payload("K", "aHVudGVyMg==").unwrap(), "hunter2");
        assert!(matches!(
            decode_payload("K", "not base64!"),
            Err(SecretError::Payload { .. })
        ));
    }

    #[tokio::test]
    async fn plain_resolver_passes_values_through() {
        let resolved = PlainResolver
            .resolve("QUERY", "sm://p/s".to_string())
            .await
            .unwrap();
        assert_eq!(resolved, "sm://p/s");
    }
}
