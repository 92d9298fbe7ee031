// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Bucket object access (S3-compatible API).

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use core_types::config::{StorageSettings, BUCKET_URI_PREFIX};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid bucket uri {uri:?}")]
    InvalidUri { uri: String },
    #[error("object {object} not found")]
    NotFound { object: ObjectRef },
    #[error("sdk error on {object}: {message}")]
    Sdk { object: ObjectRef, message: String },
}

/// `gs://bucket/key` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Splits `gs://bucket/path/to/object` (prefix optional) at the first `/`.
    /// A bare bucket yields an empty key.
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        let trimmed = uri.strip_prefix(BUCKET_URI_PREFIX).unwrap_or(uri);
        let (bucket, key) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        if bucket.is_empty() {
            return Err(StorageError::InvalidUri {
                uri: uri.to_string(),
            });
        }
        Ok(Self::new(bucket, key))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BUCKET_URI_PREFIX}{}/{}", self.bucket, self.key)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get(&self, object: &ObjectRef) -> Result<Bytes, StorageError>;
    async fn put(&self, object: &ObjectRef, content: Bytes) -> Result<(), StorageError>;
}

/// Object store over the S3 API, pointed at the configured endpoint.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(settings: &StorageSettings) -> Self {
        Self {
            client: make_s3_client(settings),
        }
    }
}

fn make_s3_client(settings: &StorageSettings) -> Client {
    let credentials = Credentials::new(
        settings.access_key_id.clone(),
        settings.secret_access_key.clone(),
        None,
        None,
        "bq-to-ftp",
    );
    let s3_cfg = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .force_path_style(true)
        .endpoint_url(settings.endpoint.clone())
        .region(Region::new(settings.region.clone()))
        .credentials_provider(credentials)
        .build();
    Client::from_conf(s3_cfg)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, object: &ObjectRef) -> Result<Bytes, StorageError> {
        let sdk_err = |message: String| StorageError::Sdk {
            object: object.clone(),
            message,
        };
        let resp = self
            .client
            .get_object()
            .bucket(object.bucket.clone())
            .key(object.key.clone())
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_no_such_key())
                {
                    StorageError::NotFound {
                        object: object.clone(),
                    }
                } else {
                    sdk_err(err.to_string())
                }
            })?;
        let data = resp
            .body
            .collect()
            .await
            .map_err(|err| sdk_err(err.to_string()))?;
        Ok(data.into_bytes())
    }

    async fn put(&self, object: &ObjectRef, content: Bytes) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(object.bucket.clone())
            .key(object.key.clone())
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|err| StorageError::Sdk {
                object: object.clone(),
                message: err.to_string(),
            })?;
        Ok(())
    }
}

/// Process-local store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<ObjectRef, Bytes>>,
    fail_puts: bool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `put` is rejected.
    pub fn rejecting_writes() -> Self {
        Self {
            objects: Mutex::default(),
            fail_puts: true,
        }
    }

    pub fn with_object(self, object: ObjectRef, content: impl Into<Bytes>) -> Self {
        if let Ok(mut guard) = self.objects.lock() {
            guard.insert(object, content.into());
        }
        self
    }

    pub fn object(&self, object: &ObjectRef) -> Option<Bytes> {
        self.objects
            .lock()
            .ok()
            .and_then(|guard| guard.get(object).cloned())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, object: &ObjectRef) -> Result<Bytes, StorageError> {
        self.object(object).ok_or_else(|| StorageError::NotFound {
            object: object.clone(),
        })
    }

    async fn put(&self, object: &ObjectRef, content: Bytes) -> Result<(), StorageError> {
        if self.fail_puts {
            return Err(StorageError::Sdk {
                object: object.clone(),
                message: "write rejected".to_string(),
            });
        }
        if let Ok(mut guard) = self.objects.lock() {
            guard.insert(object.clone(), content);
        }
        Ok(())
    }
}
