//! Pluggable storage collaborators.
//!
//! Resource state and source artifacts live behind traits; the engine ships
//! an in-memory implementation of each for tests and local development.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::graph::Resource;

/// Byte stream of a source artifact.
pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;

/// Persisted resource state, scoped by project.
#[async_trait]
pub trait ResourceStorage: Send + Sync {
    async fn list(&self, project: &str) -> Result<Vec<Resource>>;
    async fn put(&self, project: &str, resource: &Resource) -> Result<()>;
    async fn delete(&self, project: &str, resource: &Resource) -> Result<()>;
}

/// Source artifact blobs, addressed by opaque key.
#[async_trait]
pub trait SourceStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<ReadStream>;
}

/// A lazily-opened handle to one source artifact: handlers that do not read
/// their sources never touch the blob store.
#[derive(Clone)]
pub struct SourceRef {
    key: String,
    storage: Arc<dyn SourceStorage>,
}

impl SourceRef {
    pub fn new(key: impl Into<String>, storage: Arc<dyn SourceStorage>) -> Self {
        Self {
            key: key.into(),
            storage,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Opens the artifact for reading.
    pub async fn open(&self) -> Result<ReadStream> {
        self.storage.get(&self.key).await
    }
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRef").field("key", &self.key).finish()
    }
}
