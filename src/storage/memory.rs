//! In-memory storage backends.
//!
//! `MemoryStorage` keeps resources per project and records every operation;
//! the operation log is how tests observe that an unchanged reconcile
//! performs zero writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::graph::Resource;

use super::{ReadStream, ResourceStorage, SourceStorage};

/// One recorded storage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    List { project: String },
    Put { project: String, name: String },
    Delete { project: String, name: String },
}

/// Resource storage held in process memory.
#[derive(Default)]
pub struct MemoryStorage {
    resources: Mutex<HashMap<String, HashMap<String, Resource>>>,
    ops: Mutex<Vec<Op>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a resource without recording an operation.
    pub fn seed(&self, project: &str, resource: Resource) {
        self.resources
            .lock()
            .unwrap()
            .entry(project.to_string())
            .or_default()
            .insert(resource.name.clone(), resource);
    }

    /// Every call made so far, in order.
    pub fn operations(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    /// Write calls (put/delete) made so far, in order.
    pub fn writes(&self) -> Vec<Op> {
        self.operations()
            .into_iter()
            .filter(|op| !matches!(op, Op::List { .. }))
            .collect()
    }

    pub fn clear_operations(&self) {
        self.ops.lock().unwrap().clear();
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl ResourceStorage for MemoryStorage {
    async fn list(&self, project: &str) -> Result<Vec<Resource>> {
        self.record(Op::List {
            project: project.to_string(),
        });
        let resources = self.resources.lock().unwrap();
        Ok(resources
            .get(project)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put(&self, project: &str, resource: &Resource) -> Result<()> {
        self.record(Op::Put {
            project: project.to_string(),
            name: resource.name.clone(),
        });
        self.resources
            .lock()
            .unwrap()
            .entry(project.to_string())
            .or_default()
            .insert(resource.name.clone(), resource.clone());
        Ok(())
    }

    async fn delete(&self, project: &str, resource: &Resource) -> Result<()> {
        self.record(Op::Delete {
            project: project.to_string(),
            name: resource.name.clone(),
        });
        self.resources
            .lock()
            .unwrap()
            .get_mut(project)
            .and_then(|m| m.remove(&resource.name));
        Ok(())
    }
}

/// Source blobs held in process memory.
#[derive(Default)]
pub struct MemorySourceStorage {
    blobs: Mutex<HashMap<String, Arc<Vec<u8>>>>,
}

impl MemorySourceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.blobs
            .lock()
            .unwrap()
            .insert(key.into(), Arc::new(bytes));
    }
}

#[async_trait]
impl SourceStorage for MemorySourceStorage {
    async fn get(&self, key: &str) -> Result<ReadStream> {
        let blob = self
            .blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("no source blob for key {:?}", key))?;
        Ok(Box::new(std::io::Cursor::new(blob.to_vec())))
    }
}
