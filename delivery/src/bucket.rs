// Copyright (c) James Kassemi, SC, US. All rights reserved.

use crate::{FallbackStore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use storage::{ObjectRef, ObjectStore, StorageError};
use std::sync::Arc;

/// Writes undelivered files to `gs://{bucket}/{name}`.
#[derive(Clone)]
pub struct BucketFallbackStore {
    target: Option<(Arc<dyn ObjectStore>, String)>,
}

impl BucketFallbackStore {
    /// `bucket` may be a bare name or a `gs://` URI; only the bucket part is used.
    pub fn new(store: Arc<dyn ObjectStore>, bucket: &str) -> Result<Self, StorageError> {
        let bucket = ObjectRef::parse(bucket)?.bucket;
        Ok(Self {
            target: Some((store, bucket)),
        })
    }

    /// No bucket configured; every store call fails with `NotConfigured`.
    pub fn disabled() -> Self {
        Self { target: None }
    }

    pub fn bucket(&self) -> Option<&str> {
        self.target.as_ref().map(|(_, bucket)| bucket.as_str())
    }
}

#[async_trait]
impl FallbackStore for BucketFallbackStore {
    async fn store(&self, name: &str, content: Bytes) -> Result<(), StoreError> {
        let (store, bucket) = self.target.as_ref().ok_or(StoreError::NotConfigured)?;
        store.put(&ObjectRef::new(bucket.as_str(), name), content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryObjectStore;

    #[tokio::test]
    async fn stores_under_bucket_root() {
        let memory = Arc::new(MemoryObjectStore::new());
        let fallback = BucketFallbackStore::new(memory.clone(), "gs://rescue/ignored").unwrap();
        assert_eq!(fallback.bucket(), Some("rescue"));

        fallback
            .store("out_20240309170500.csv", Bytes::from_static(b"a,b\n"))
            .await
            .unwrap();
        assert_eq!(
            memory.object(&ObjectRef::new("rescue", "out_20240309170500.csv")),
            Some(Bytes::from_static(b"a,b\n"))
        );
    }

    #[tokio::test]
    async fn disabled_store_reports_missing_bucket() {
        let err = BucketFallbackStore::disabled()
            .store("f.csv", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotConfigured));
    }

    #[tokio::test]
    async fn storage_failures_propagate() {
        let fallback =
            BucketFallbackStore::new(Arc::new(MemoryObjectStore::rejecting_writes()), "rescue")
                .unwrap();
        let err = fallback.store("f.csv", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }
}
