// Copyright (c) James Kassemi, SC, US. All rights reserved.

use crate::secrets::{SecretError, SecretResolver};
use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SEPARATOR: &str = ",";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
pub const DEFAULT_STORAGE_REGION: &str = "auto";
pub const BUCKET_URI_PREFIX: &str = "gs://";

/// Environment variable names.
pub mod keys {
    pub const QUERY: &str = "QUERY";
    pub const QUERY_FILE_PATH: &str = "QUERY_FILE_PATH";
    pub const HEADER: &str = "HEADER";
    pub const SEPARATOR: &str = "SEPARATOR";
    pub const FILE_PREFIX: &str = "FILE_PREFIX";
    pub const GCP_PROJECT: &str = "GCP_PROJECT";
    pub const MINUTE_DELTA: &str = "MINUTE_DELTA";
    pub const LATENCY: &str = "LATENCY";
    pub const FORCE_RELOAD: &str = "FORCE_RELOAD";
    pub const FTP_SERVER: &str = "FTP_SERVER";
    pub const FTP_LOGIN: &str = "FTP_LOGIN";
    pub const FTP_PASSWORD: &str = "FTP_PASSWORD";
    pub const FTP_PATH: &str = "FTP_PATH";
    pub const FALLBACK_BUCKET: &str = "FALLBACK_BUCKET";
    pub const STORAGE_ENDPOINT: &str = "STORAGE_ENDPOINT";
    pub const STORAGE_REGION: &str = "STORAGE_REGION";
    pub const STORAGE_ACCESS_KEY_ID: &str = "STORAGE_ACCESS_KEY_ID";
    pub const STORAGE_SECRET_ACCESS_KEY: &str = "STORAGE_SECRET_ACCESS_KEY";
    pub const PORT: &str = "PORT";
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config source error: {0}")]
    Source(#[from] config::ConfigError),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error("missing environment variable {key}")]
    Missing { key: &'static str },
    #[error("one of {} or {} must be set", keys::QUERY, keys::QUERY_FILE_PATH)]
    MissingQuery,
    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{} must point to a bucket object (gs://bucket/path), got {value:?}", keys::QUERY_FILE_PATH)]
    QueryFileNotInBucket { value: String },
}

/// Where the query template comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySetting {
    Inline(String),
    /// `gs://bucket/path` object; reloaded per request when `force_reload` is set.
    BucketFile { uri: String, force_reload: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSettings {
    pub window_minutes: u32,
    pub latency_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpSettings {
    pub server: String,
    pub login: String,
    pub password: String,
    pub path: String,
}

/// Credentials for the S3-compatible object storage endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Immutable service configuration, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    pub query: QuerySetting,
    pub with_header: bool,
    pub separator: Vec<u8>,
    pub file_prefix: String,
    pub gcp_project: String,
    pub window: WindowSettings,
    pub ftp: FtpSettings,
    pub fallback_bucket: Option<String>,
    /// Present whenever a bucket is involved (query file or fallback).
    pub storage: Option<StorageSettings>,
    pub port: u16,
    /// Non-fatal oddities found while loading, logged by the caller.
    pub warnings: Vec<String>,
}

/// Raw variables as read from the environment, before secret resolution.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawSettings {
    query: Option<String>,
    query_file_path: Option<String>,
    header: Option<String>,
    separator: Option<String>,
    file_prefix: Option<String>,
    gcp_project: Option<String>,
    minute_delta: Option<String>,
    latency: Option<String>,
    force_reload: Option<String>,
    ftp_server: Option<String>,
    ftp_login: Option<String>,
    ftp_password: Option<String>,
    ftp_path: Option<String>,
    fallback_bucket: Option<String>,
    storage_endpoint: Option<String>,
    storage_region: Option<String>,
    storage_access_key_id: Option<String>,
    storage_secret_access_key: Option<String>,
    port: Option<String>,
}

impl RawSettings {
    async fn resolve(self, resolver: &dyn SecretResolver) -> Result<Self, SecretError> {
        Ok(Self {
            query: resolve(resolver, keys::QUERY, self.query).await?,
            query_file_path: resolve(resolver, keys::QUERY_FILE_PATH, self.query_file_path).await?,
            header: resolve(resolver, keys::HEADER, self.header).await?,
            separator: resolve(resolver, keys::SEPARATOR, self.separator).await?,
            file_prefix: resolve(resolver, keys::FILE_PREFIX, self.file_prefix).await?,
            gcp_project: resolve(resolver, keys::GCP_PROJECT, self.gcp_project).await?,
            minute_delta: resolve(resolver, keys::MINUTE_DELTA, self.minute_delta).await?,
            latency: resolve(resolver, keys::LATENCY, self.latency).await?,
            force_reload: resolve(resolver, keys::FORCE_RELOAD, self.force_reload).await?,
            ftp_server: resolve(resolver, keys::FTP_SERVER, self.ftp_server).await?,
            ftp_login: resolve(resolver, keys::FTP_LOGIN, self.ftp_login).await?,
            ftp_password: resolve(resolver, keys::FTP_PASSWORD, self.ftp_password).await?,
            ftp_path: resolve(resolver, keys::FTP_PATH, self.ftp_path).await?,
            fallback_bucket: resolve(resolver, keys::FALLBACK_BUCKET, self.fallback_bucket).await?,
            storage_endpoint: resolve(resolver, keys::STORAGE_ENDPOINT, self.storage_endpoint)
                .await?,
            storage_region: resolve(resolver, keys::STORAGE_REGION, self.storage_region).await?,
            storage_access_key_id: resolve(
                resolver,
                keys::STORAGE_ACCESS_KEY_ID,
                self.storage_access_key_id,
            )
            .await?,
            storage_secret_access_key: resolve(
                resolver,
                keys::STORAGE_SECRET_ACCESS_KEY,
                self.storage_secret_access_key,
            )
            .await?,
            port: resolve(resolver, keys::PORT, self.port).await?,
        })
    }
}

/// Empty variables are treated as unset.
async fn resolve(
    resolver: &dyn SecretResolver,
    key: &str,
    value: Option<String>,
) -> Result<Option<String>, SecretError> {
    match value.filter(|v| !v.is_empty()) {
        Some(raw) => Ok(Some(resolver.resolve(key, raw).await?).filter(|v| !v.is_empty())),
        None => Ok(None),
    }
}

impl ExportConfig {
    /// Reads the process environment and resolves secret references.
    pub async fn load(resolver: &dyn SecretResolver) -> Result<Self, ConfigError> {
        Self::from_environment(Environment::default(), resolver).await
    }

    pub async fn from_environment(
        environment: Environment,
        resolver: &dyn SecretResolver,
    ) -> Result<Self, ConfigError> {
        let settings = Config::builder().add_source(environment).build()?;
        let raw: RawSettings = settings.try_deserialize()?;
        let raw = raw.resolve(resolver).await?;
        Self::validate(raw)
    }

    fn validate(raw: RawSettings) -> Result<Self, ConfigError> {
        let mut warnings = Vec::new();

        let gcp_project = raw.gcp_project.ok_or(ConfigError::Missing {
            key: keys::GCP_PROJECT,
        })?;
        let ftp_server = raw.ftp_server.ok_or(ConfigError::Missing {
            key: keys::FTP_SERVER,
        })?;
        let minute_delta = raw.minute_delta.ok_or(ConfigError::Missing {
            key: keys::MINUTE_DELTA,
        })?;
        let window = WindowSettings {
            window_minutes: parse_minutes(keys::MINUTE_DELTA, &minute_delta)?,
            latency_minutes: match raw.latency {
                Some(latency) => parse_minutes(keys::LATENCY, &latency)?,
                None => 0,
            },
        };

        let query = match (raw.query, raw.query_file_path) {
            (Some(inline), _) => QuerySetting::Inline(inline),
            (None, Some(uri)) => {
                if !uri.starts_with(BUCKET_URI_PREFIX) {
                    return Err(ConfigError::QueryFileNotInBucket { value: uri });
                }
                QuerySetting::BucketFile {
                    uri,
                    force_reload: raw.force_reload.as_deref().is_some_and(is_force_reload),
                }
            }
            (None, None) => return Err(ConfigError::MissingQuery),
        };

        let with_header = match raw.header.as_deref() {
            Some(value) => parse_bool(value).unwrap_or_else(|| {
                warnings.push(format!(
                    "cannot read {} value {value:?} as a boolean; header disabled",
                    keys::HEADER
                ));
                false
            }),
            None => false,
        };

        let needs_storage =
            raw.fallback_bucket.is_some() || matches!(query, QuerySetting::BucketFile { .. });
        let storage = if needs_storage {
            Some(StorageSettings {
                endpoint: raw
                    .storage_endpoint
                    .unwrap_or_else(|| DEFAULT_STORAGE_ENDPOINT.to_string()),
                region: raw
                    .storage_region
                    .unwrap_or_else(|| DEFAULT_STORAGE_REGION.to_string()),
                access_key_id: raw.storage_access_key_id.ok_or(ConfigError::Missing {
                    key: keys::STORAGE_ACCESS_KEY_ID,
                })?,
                secret_access_key: raw.storage_secret_access_key.ok_or(ConfigError::Missing {
                    key: keys::STORAGE_SECRET_ACCESS_KEY,
                })?,
            })
        } else {
            None
        };

        let port = match raw.port {
            Some(port) => port.parse().map_err(|err: std::num::ParseIntError| ConfigError::Invalid {
                key: keys::PORT,
                value: port.clone(),
                reason: err.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            query,
            with_header,
            separator: raw
                .separator
                .unwrap_or_else(|| DEFAULT_SEPARATOR.to_string())
                .into_bytes(),
            file_prefix: raw.file_prefix.unwrap_or_default(),
            gcp_project,
            window,
            ftp: FtpSettings {
                server: ftp_server,
                login: raw.ftp_login.unwrap_or_default(),
                password: raw.ftp_password.unwrap_or_default(),
                path: raw.ftp_path.unwrap_or_default(),
            },
            fallback_bucket: raw.fallback_bucket,
            storage,
            port,
            warnings,
        })
    }
}

fn parse_minutes(key: &'static str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|err| ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: err.to_string(),
        })
}

/// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// `true` in any case, or `1`.
pub fn is_force_reload(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::PlainResolver;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().source(Some(map))
    }

    const BASE: &[(&str, &str)] = &[
        ("GCP_PROJECT", "proj"),
        ("FTP_SERVER", "ftp.example.com"),
        ("MINUTE_DELTA", "15"),
        ("QUERY", "SELECT 1"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        let mut vars = BASE.to_vec();
        vars.extend_from_slice(extra);
        vars
    }

    #[tokio::test]
    async fn loads_minimal_inline_configuration_with_defaults() {
        let config = ExportConfig::from_environment(env(BASE), &PlainResolver)
            .await
            .unwrap();
        assert_eq!(config.query, QuerySetting::Inline("SELECT 1".to_string()));
        assert!(!config.with_header);
        assert_eq!(config.separator, b",");
        assert_eq!(config.file_prefix, "");
        assert_eq!(
            config.window,
            WindowSettings {
                window_minutes: 15,
                latency_minutes: 0
            }
        );
        assert_eq!(config.fallback_bucket, None);
        assert_eq!(config.storage, None);
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.warnings.is_empty());
    }

    #[tokio::test]
    async fn missing_required_variables_are_fatal() {
        let err = ExportConfig::from_environment(env(&[("FTP_SERVER", "h")]), &PlainResolver)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "GCP_PROJECT" }));

        let err = ExportConfig::from_environment(
            env(&[("GCP_PROJECT", "p"), ("FTP_SERVER", "h"), ("MINUTE_DELTA", "5")]),
            &PlainResolver,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingQuery));
    }

    #[tokio::test]
    async fn unparseable_minutes_are_fatal() {
        let err = ExportConfig::from_environment(env(&with(&[("LATENCY", "ten")])), &PlainResolver)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LATENCY", .. }));

        let vars: Vec<_> = BASE
            .iter()
            .map(|&(k, v)| if k == "MINUTE_DELTA" { (k, "-5") } else { (k, v) })
            .collect();
        let err = ExportConfig::from_environment(env(&vars), &PlainResolver)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MINUTE_DELTA", .. }));
    }

    #[tokio::test]
    async fn bad_header_value_downgrades_to_no_header_with_warning() {
        let config = ExportConfig::from_environment(env(&with(&[("HEADER", "yes")])), &PlainResolver)
            .await
            .unwrap();
        assert!(!config.with_header);
        assert_eq!(config.warnings.len(), 1);

        let config = ExportConfig::from_environment(env(&with(&[("HEADER", "TRUE")])), &PlainResolver)
            .await
            .unwrap();
        assert!(config.with_header);
    }

    #[tokio::test]
    async fn bucket_query_requires_gs_uri_and_storage_credentials() {
        let vars = [
            ("GCP_PROJECT", "p"),
            ("FTP_SERVER", "h"),
            ("MINUTE_DELTA", "5"),
            ("QUERY_FILE_PATH", "/local/query.sql"),
        ];
        let err = ExportConfig::from_environment(env(&vars), &PlainResolver)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::QueryFileNotInBucket { .. }));

        let vars = [
            ("GCP_PROJECT", "p"),
            ("FTP_SERVER", "h"),
            ("MINUTE_DELTA", "5"),
            ("QUERY_FILE_PATH", "gs://b/q.sql"),
        ];
        let err = ExportConfig::from_environment(env(&vars), &PlainResolver)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                key: "STORAGE_ACCESS_KEY_ID"
            }
        ));

        let vars = [
            ("GCP_PROJECT", "p"),
            ("FTP_SERVER", "h"),
            ("MINUTE_DELTA", "5"),
            ("QUERY_FILE_PATH", "gs://b/q.sql"),
            ("FORCE_RELOAD", "True"),
            ("STORAGE_ACCESS_KEY_ID", "id"),
            ("STORAGE_SECRET_ACCESS_KEY", "secret"),
            ("SEPARATOR", ";"),
        ];
        let config = ExportConfig::from_environment(env(&vars), &PlainResolver)
            .await
            .unwrap();
        assert_eq!(
            config.query,
            QuerySetting::BucketFile {
                uri: "gs://b/q.sql".to_string(),
                force_reload: true
            }
        );
        assert_eq!(config.separator, b";");
        let storage = config.storage.unwrap();
        assert_eq!(storage.endpoint, DEFAULT_STORAGE_ENDPOINT);
        assert_eq!(storage.region, DEFAULT_STORAGE_REGION);
    }

    struct PrefixResolver;

    #[async_trait]
    impl SecretResolver for PrefixResolver {
        async fn resolve(&self, key: &str, raw: String) -> Result<String, SecretError> {
            match raw.strip_prefix("secret:") {
                Some(rest) => Ok(format!("{key}={rest}")),
                None => Ok(raw),
            }
        }
    }

    #[tokio::test]
    async fn every_value_passes_through_the_resolver() {
        let config = ExportConfig::from_environment(
            env(&with(&[("FTP_PASSWORD", "secret:pw"), ("FILE_PREFIX", "export_")])),
            &PrefixResolver,
        )
        .await
        .unwrap();
        assert_eq!(config.ftp.password, "FTP_PASSWORD=pw");
        assert_eq!(config.file_prefix, "export_");
    }

    #[test]
    fn force_reload_and_bool_parsing() {
        assert!(is_force_reload("TRUE"));
        assert!(is_force_reload("tRuE"));
        assert!(is_force_reload("1"));
        assert!(!is_force_reload("yes"));
        assert!(!is_force_reload(""));
        assert_eq!(parse_bool("t"), Some(true));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("fAlse"), None);
    }
}
