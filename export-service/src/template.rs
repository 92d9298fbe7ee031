// Copyright (c) James Kassemi, SC, US. All rights reserved.

use core_types::config::QuerySetting;
use log::{debug, info};
use std::borrow::Cow;
use std::sync::Arc;
use storage::{ObjectRef, ObjectStore, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("query file {source_ref} needs object storage but none is configured")]
    NoStore { source_ref: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("query file {source_ref} is not valid UTF-8")]
    Encoding { source_ref: String },
}

/// Query text holding the `START_TIMESTAMP`/`END_TIMESTAMP` tokens.
#[derive(Clone)]
pub enum QueryTemplate {
    Inline(String),
    /// Read once at startup.
    Cached { source: ObjectRef, text: String },
    /// Read again on every request.
    Reload {
        source: ObjectRef,
        store: Arc<dyn ObjectStore>,
    },
}

impl QueryTemplate {
    /// Resolves the configured source. A cached file is fetched here, so a
    /// missing object fails startup rather than the first request.
    pub async fn prepare(
        setting: &QuerySetting,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self, TemplateError> {
        let (uri, force_reload) = match setting {
            QuerySetting::Inline(text) => return Ok(QueryTemplate::Inline(text.clone())),
            QuerySetting::BucketFile { uri, force_reload } => (uri, *force_reload),
        };
        let source = ObjectRef::parse(uri)?;
        let store = store.ok_or_else(|| TemplateError::NoStore {
            source_ref: source.to_string(),
        })?;
        if force_reload {
            info!("query template {source} will be reloaded on every request");
            return Ok(QueryTemplate::Reload { source, store });
        }
        let text = fetch(store.as_ref(), &source).await?;
        info!("query template loaded from {source} ({} bytes)", text.len());
        Ok(QueryTemplate::Cached { source, text })
    }

    pub async fn load(&self) -> Result<Cow<'_, str>, TemplateError> {
        match self {
            QueryTemplate::Inline(text) | QueryTemplate::Cached { text, .. } => {
                Ok(Cow::Borrowed(text.as_str()))
            }
            QueryTemplate::Reload { source, store } => {
                debug!("reloading query template from {source}");
                fetch(store.as_ref(), source).await.map(Cow::Owned)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            QueryTemplate::Inline(_) => "inline".to_string(),
            QueryTemplate::Cached { source, .. } => format!("cached {source}"),
            QueryTemplate::Reload { source, .. } => format!("reloaded {source}"),
        }
    }
}

async fn fetch(store: &dyn ObjectStore, source: &ObjectRef) -> Result<String, TemplateError> {
    let bytes = store.get(source).await?;
    String::from_utf8(bytes.to_vec()).map_err(|_| TemplateError::Encoding {
        source_ref: source.to_string(),
    })
}
