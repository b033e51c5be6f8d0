//! The reconciler: drives persisted state to the declared graph.
//!
//! A run has three phases: inventory (load what exists), create/update
//! (dependency-ordered, bounded concurrency, retries), and delete (reverse
//! dependency order over whatever the desired graph no longer names). The
//! first failing task cancels its peers; persistence of an operation that
//! already succeeded runs under a detached timeout so user cancellation
//! never loses it.

pub mod backoff;
pub mod task_group;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::graph::{Graph, Resource};
use crate::provider::registry::{RegisteredType, Registry};
use crate::provider::{
    AuthProvider, CreateRequest, DeleteRequest, HandlerError, NoAuth, UpdateRequest,
};
use crate::schema::bridge;
use crate::schema::FieldSet;
use crate::storage::{ResourceStorage, SourceRef, SourceStorage};
use crate::value::hash;

use self::backoff::{default_backoff, BackoffFactory};
use self::task_group::{TaskError, TaskGroup};

const DEFAULT_CONCURRENCY: usize = 10;

/// Budget for persisting a completed operation after the run context is
/// already cancelled.
const PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Errors and summary ─────────────────────────────────────────────────────

/// Reconcile-internal failure kinds that are not handler or storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("reconcile cancelled")]
    Cancelled,
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

/// What one reconcile run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub noops: usize,
    pub elapsed: Duration,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Reconcile complete! Resources: {} created, {} updated, {} deleted, {} unchanged.",
            self.created, self.updated, self.deleted, self.noops
        )
    }
}

// ─── Reconciler ─────────────────────────────────────────────────────────────

/// Dependency-ordered concurrent reconciliation engine.
pub struct Reconciler {
    storage: Arc<dyn ResourceStorage>,
    sources: Arc<dyn SourceStorage>,
    registry: Arc<dyn Registry>,
    auth: Arc<dyn AuthProvider>,
    concurrency: usize,
    backoff: BackoffFactory,
}

impl Reconciler {
    pub fn new(
        storage: Arc<dyn ResourceStorage>,
        sources: Arc<dyn SourceStorage>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            storage,
            sources,
            registry,
            auth: Arc::new(NoAuth),
            concurrency: DEFAULT_CONCURRENCY,
            backoff: default_backoff(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffFactory) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = auth;
        self
    }

    /// Runs one reconcile of `graph` against the stored state of `project`.
    /// On success the graph's resource outputs are populated.
    pub async fn reconcile(
        &self,
        project: &str,
        graph: &mut Graph,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        graph.detect_cycles()?;
        let started = Instant::now();

        // Phase 1: inventory.
        let existing = self
            .storage
            .list(project)
            .await
            .with_context(|| format!("listing resources of project {:?}", project))?;
        debug!(
            project,
            desired = graph.resources.len(),
            existing = existing.len(),
            "starting reconcile"
        );

        let run = Arc::new(Run {
            project: project.to_string(),
            graph: graph.clone(),
            registry: self.registry.clone(),
            storage: self.storage.clone(),
            sources: self.sources.clone(),
            auth: self.auth.clone(),
            sem: Arc::new(Semaphore::new(self.concurrency)),
            group: TaskGroup::new(),
            existing: Mutex::new(existing),
            applied: DashMap::new(),
            counters: Counters::default(),
            cancel: cancel.child_token(),
            backoff: self.backoff.clone(),
            first_error: Mutex::new(None),
        });

        // Phase 2: create/update, scheduled from the leaves.
        let leaves: Vec<String> = run
            .graph
            .leaf_resources()
            .iter()
            .map(|r| r.name.clone())
            .collect();
        let _ = join_all(leaves.into_iter().map(|name| Arc::clone(&run).ensure(name))).await;
        run.group.wait().await;
        if let Some(e) = run.take_error() {
            return Err(e);
        }
        if run.cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled.into());
        }

        // Phase 3: delete what the graph no longer declares.
        Arc::clone(&run).delete_phase().await;
        if let Some(e) = run.take_error() {
            return Err(e);
        }
        if run.cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled.into());
        }

        for entry in run.applied.iter() {
            if let Some(resource) = graph.resources.get_mut(entry.key()) {
                resource.output = entry.value().output.clone();
            }
        }

        let summary = RunSummary {
            created: run.counters.created.load(Ordering::Relaxed),
            updated: run.counters.updated.load(Ordering::Relaxed),
            deleted: run.counters.deleted.load(Ordering::Relaxed),
            noops: run.counters.noops.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
        };
        info!(
            project,
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            noops = summary.noops,
            "reconcile complete"
        );
        Ok(summary)
    }
}

// ─── Run state ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    updated: AtomicUsize,
    deleted: AtomicUsize,
    noops: AtomicUsize,
}

struct Run {
    project: String,
    graph: Graph,
    registry: Arc<dyn Registry>,
    storage: Arc<dyn ResourceStorage>,
    sources: Arc<dyn SourceStorage>,
    auth: Arc<dyn AuthProvider>,
    sem: Arc<Semaphore>,
    group: TaskGroup<()>,
    /// Persisted resources not yet claimed by a task; whatever survives
    /// phase 2 is deleted in phase 3.
    existing: Mutex<Vec<Resource>>,
    /// Resources whose task completed, outputs populated. Children read
    /// their parents here after the task-group barrier.
    applied: DashMap<String, Resource>,
    counters: Counters,
    cancel: CancellationToken,
    backoff: BackoffFactory,
    first_error: Mutex<Option<anyhow::Error>>,
}

impl Run {
    // ─── Phase 2 ────────────────────────────────────────────────────────────

    /// Schedules the named resource exactly once; repeated and concurrent
    /// callers share the one result.
    fn ensure(self: Arc<Self>, name: String) -> BoxFuture<'static, Result<(), TaskError>> {
        async move {
            let key = name.clone();
            let run = Arc::clone(&self);
            self.group
                .run(&key, move || async move { run.process(&name).await })
                .await
        }
        .boxed()
    }

    async fn process(self: Arc<Self>, name: &str) -> Result<(), TaskError> {
        // Wait for parents before taking a permit: holding one while blocked
        // on a parent deadlocks at low concurrency.
        let deps = self
            .graph
            .resources
            .get(name)
            .map(|r| r.deps.clone())
            .unwrap_or_default();
        let parents = deps.into_iter().map(|dep| Arc::clone(&self).ensure(dep));
        for result in join_all(parents).await {
            result?;
        }

        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TaskError::new(ReconcileError::Cancelled.into())),
            permit = self.sem.acquire() => permit.expect("semaphore is never closed"),
        };

        match self.apply_resource(name).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Create, update, or no-op one resource. Runs with a permit held and
    /// all parents applied.
    async fn apply_resource(&self, name: &str) -> Result<()> {
        let resource = self
            .graph
            .resources
            .get(name)
            .ok_or_else(|| {
                ReconcileError::InternalInvariant(format!("no resource {:?} in graph", name))
            })?
            .clone();
        let registered = self.registered(&resource.resource_type, name)?;
        let inputs_fs = registered.desc.inputs();
        let outputs_fs = registered.desc.outputs();

        // Resolve dependency expressions against parent outputs and splice
        // the results into the input.
        let mut input = resource.input.clone();
        for dep in self.graph.dependencies_of(name) {
            let value = dep
                .expr
                .eval(|parent| self.applied.get(parent).map(|r| r.output.clone()))
                .with_context(|| format!("resolving dependency {} of {:?}", dep.field, name))?;
            let mut matched = 0usize;
            input = input.transform(&mut |path, _| {
                if *path == dep.field {
                    matched += 1;
                    Some(value.clone())
                } else {
                    None
                }
            });
            if matched == 0 {
                return Err(ReconcileError::InternalInvariant(format!(
                    "dependency field {} of {:?} matched nothing",
                    dep.field, name
                ))
                .into());
            }
        }

        let native_input = bridge::to_native(&input, &inputs_fs)
            .with_context(|| format!("building native input for {:?}", name))?;
        let source_refs: Vec<SourceRef> = resource
            .sources
            .iter()
            .map(|key| SourceRef::new(key, self.sources.clone()))
            .collect();

        // Claim the persisted counterpart so phase 3 does not delete it.
        let prior = {
            let mut existing = self.existing.lock().unwrap();
            existing
                .iter()
                .position(|r| {
                    r.resource_type == resource.resource_type && r.name == resource.name
                })
                .map(|i| existing.remove(i))
        };

        let (config_changed, source_changed) = match &prior {
            Some(prior) => (
                hash(&prior.input) != hash(&input),
                prior.sources != resource.sources,
            ),
            None => (true, true),
        };

        if let Some(prior) = &prior {
            if !config_changed && !source_changed {
                debug!(resource = name, "no changes");
                let mut live = resource;
                live.input = input;
                live.output = prior.output.clone();
                self.applied.insert(name.to_string(), live);
                self.counters.noops.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        let record = match &prior {
            None => {
                info!(resource = name, r#type = resource.resource_type.as_str(), "creating");
                self.retry(name, "create", || {
                    registered.handler.create(
                        self.cancel.clone(),
                        CreateRequest {
                            project: self.project.clone(),
                            name: name.to_string(),
                            input: native_input.clone(),
                            sources: source_refs.clone(),
                            auth: self.auth.clone(),
                        },
                    )
                })
                .await?
            }
            Some(prior) => {
                info!(
                    resource = name,
                    r#type = resource.resource_type.as_str(),
                    config_changed,
                    source_changed,
                    "updating"
                );
                let previous = previous_record(prior, &inputs_fs, &outputs_fs)?;
                self.retry(name, "update", || {
                    registered.handler.update(
                        self.cancel.clone(),
                        UpdateRequest {
                            project: self.project.clone(),
                            name: name.to_string(),
                            input: native_input.clone(),
                            previous: previous.clone(),
                            config_changed,
                            source_changed,
                            sources: source_refs.clone(),
                            auth: self.auth.clone(),
                        },
                    )
                })
                .await?
            }
        };

        let output = bridge::from_native(&record, &outputs_fs)
            .with_context(|| format!("extracting outputs of {:?}", name))?;
        let mut live = resource;
        live.input = input;
        live.output = output;

        // The handler already succeeded; persist even if the caller has
        // since cancelled.
        self.persist(Persist::Put, &live).await?;
        if prior.is_none() {
            self.counters.created.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.updated.fetch_add(1, Ordering::Relaxed);
        }
        self.applied.insert(name.to_string(), live);
        Ok(())
    }

    // ─── Phase 3 ────────────────────────────────────────────────────────────

    /// Deletes everything left unclaimed in the existing set, children
    /// strictly before the resources they depend on.
    async fn delete_phase(self: Arc<Self>) {
        let leftovers: Vec<Resource> = {
            let mut existing = self.existing.lock().unwrap();
            existing.drain(..).collect()
        };
        if leftovers.is_empty() {
            return;
        }
        debug!(count = leftovers.len(), "deleting removed resources");

        // A resource may be deleted only after every leftover that lists it
        // in deps is gone; each keeps a countdown of such dependents.
        let mut senders: HashMap<String, watch::Sender<usize>> = HashMap::new();
        let mut receivers: HashMap<String, watch::Receiver<usize>> = HashMap::new();
        for resource in &leftovers {
            let dependents = leftovers
                .iter()
                .filter(|other| other.deps.contains(&resource.name))
                .count();
            let (tx, rx) = watch::channel(dependents);
            senders.insert(resource.name.clone(), tx);
            receivers.insert(resource.name.clone(), rx);
        }
        let senders = Arc::new(senders);

        let tasks = leftovers.into_iter().map(|resource| {
            let run = Arc::clone(&self);
            let rx = receivers
                .get(&resource.name)
                .expect("receiver built above")
                .clone();
            let senders = Arc::clone(&senders);
            async move {
                if let Err(e) = run.delete_resource(resource, rx, senders).await {
                    run.fail(e);
                }
            }
        });
        join_all(tasks).await;
    }

    async fn delete_resource(
        &self,
        resource: Resource,
        mut barrier: watch::Receiver<usize>,
        senders: Arc<HashMap<String, watch::Sender<usize>>>,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ReconcileError::Cancelled.into()),
            result = barrier.wait_for(|&dependents| dependents == 0) => {
                result.map_err(|_| anyhow!("delete barrier closed unexpectedly"))?;
            }
        }
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ReconcileError::Cancelled.into()),
            permit = self.sem.acquire() => permit.expect("semaphore is never closed"),
        };

        let name = resource.name.clone();
        let registered = self.registered(&resource.resource_type, &name)?;
        let previous = previous_record(
            &resource,
            &registered.desc.inputs(),
            &registered.desc.outputs(),
        )?;

        info!(resource = name.as_str(), r#type = resource.resource_type.as_str(), "deleting");
        self.retry(&name, "delete", || {
            registered.handler.delete(
                self.cancel.clone(),
                DeleteRequest {
                    project: self.project.clone(),
                    name: name.clone(),
                    previous: previous.clone(),
                    auth: self.auth.clone(),
                },
            )
        })
        .await?;

        self.persist(Persist::Delete, &resource).await?;
        self.counters.deleted.fetch_add(1, Ordering::Relaxed);
        for parent in &resource.deps {
            if let Some(tx) = senders.get(parent) {
                tx.send_modify(|dependents| *dependents = dependents.saturating_sub(1));
            }
        }
        Ok(())
    }

    // ─── Shared plumbing ────────────────────────────────────────────────────

    fn registered(&self, type_name: &str, resource: &str) -> Result<Arc<RegisteredType>> {
        self.registry.type_of(type_name).ok_or_else(|| {
            anyhow!(
                "resource {:?} has type {:?}, which is not registered",
                resource,
                type_name
            )
        })
    }

    /// Drives a handler call through the backoff policy. Permanent errors
    /// and cancellation end the loop; everything else retries.
    async fn retry<T, F, Fut>(&self, name: &str, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, HandlerError>>,
    {
        let mut backoff = (self.backoff)();
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled.into());
            }
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.permanent => {
                    return Err(e
                        .error
                        .context(format!("{} of {:?} failed permanently", op, name)));
                }
                Err(e) => {
                    let Some(delay) = backoff.next_delay() else {
                        return Err(e.error.context(format!(
                            "{} of {:?} failed after {} attempts",
                            op, name, attempt
                        )));
                    };
                    warn!(
                        resource = name,
                        operation = op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e.error,
                        "retrying after failure"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(ReconcileError::Cancelled.into()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Persists under a detached timeout: the spawned task keeps running
    /// even if this future is dropped, and cancellation of the run context
    /// does not reach it.
    async fn persist(&self, op: Persist, resource: &Resource) -> Result<()> {
        let storage = self.storage.clone();
        let project = self.project.clone();
        let resource = resource.clone();
        let name = resource.name.clone();
        let handle = tokio::spawn(async move {
            let write = async {
                match op {
                    Persist::Put => storage.put(&project, &resource).await,
                    Persist::Delete => storage.delete(&project, &resource).await,
                }
            };
            tokio::time::timeout(PERSIST_TIMEOUT, write)
                .await
                .map_err(|_| anyhow!("timed out after {:?}", PERSIST_TIMEOUT))?
        });
        handle
            .await
            .map_err(|e| anyhow!("persistence task failed: {}", e))?
            .with_context(|| format!("persisting resource {:?}", name))
    }

    /// Records the first real failure and cancels the run; later failures
    /// and cancellation fallout are not reported over it.
    fn fail(&self, error: anyhow::Error) -> TaskError {
        let cancelled = matches!(
            error.downcast_ref::<ReconcileError>(),
            Some(ReconcileError::Cancelled)
        );
        if !cancelled {
            let mut first = self.first_error.lock().unwrap();
            if first.is_none() {
                *first = Some(anyhow!("{:#}", error));
            }
            drop(first);
            self.cancel.cancel();
        }
        TaskError::new(error)
    }

    fn take_error(&self) -> Option<anyhow::Error> {
        self.first_error.lock().unwrap().take()
    }
}

#[derive(Clone, Copy)]
enum Persist {
    Put,
    Delete,
}

/// The previous definition handed to update and delete: one native record
/// merging the prior input and prior output fields.
fn previous_record(
    prior: &Resource,
    inputs: &FieldSet,
    outputs: &FieldSet,
) -> Result<serde_json::Value> {
    let mut record = bridge::to_native(&prior.input, inputs)
        .with_context(|| format!("building previous input record for {:?}", prior.name))?;
    let output_record = bridge::to_native(&prior.output, outputs)
        .with_context(|| format!("building previous output record for {:?}", prior.name))?;
    if let (Some(record), Some(outputs)) = (record.as_object_mut(), output_record.as_object()) {
        for (k, v) in outputs {
            record.insert(k.clone(), v.clone());
        }
    }
    Ok(record)
}
