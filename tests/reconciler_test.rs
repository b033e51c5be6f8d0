use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use converge::config::{decode, hcl};
use converge::graph::{Graph, Resource};
use converge::provider::registry::StaticRegistry;
use converge::provider::{
    CreateRequest, DeleteRequest, HandlerError, ResourceHandler, UpdateRequest,
};
use converge::reconciler::backoff::fixed_backoff;
use converge::reconciler::task_group::{TaskError, TaskGroup};
use converge::reconciler::{Reconciler, ReconcileError};
use converge::schema::validate::RuleValidator;
use converge::schema::{FieldDef, TypeDescriptor};
use converge::storage::memory::{MemorySourceStorage, MemoryStorage, Op};
use converge::value::{Type, Value};

// ─── Fixtures ───────────────────────────────────────────────────────────────

/// Echoes its input string into the output field and logs every call.
struct EchoHandler {
    log: Arc<Mutex<Vec<String>>>,
    fail_first: AtomicUsize,
    permanent: bool,
}

impl EchoHandler {
    fn new(log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            log,
            fail_first: AtomicUsize::new(0),
            permanent: false,
        }
    }

    fn failing(log: Arc<Mutex<Vec<String>>>, times: usize) -> Self {
        Self {
            log,
            fail_first: AtomicUsize::new(times),
            permanent: false,
        }
    }

    fn permanent_failure(log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            log,
            fail_first: AtomicUsize::new(usize::MAX),
            permanent: true,
        }
    }

    fn note(&self, op: &str, name: &str) {
        self.log.lock().unwrap().push(format!("{} {}", op, name));
    }

    fn maybe_fail(&self) -> Result<(), HandlerError> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(());
        }
        if self.permanent {
            return Err(HandlerError::permanent(anyhow::anyhow!("broken for good")));
        }
        self.fail_first.fetch_sub(1, Ordering::SeqCst);
        Err(HandlerError::transient(anyhow::anyhow!("flaky")))
    }

    fn echo(input: &serde_json::Value) -> serde_json::Value {
        let s = input.get("input").and_then(|v| v.as_str()).unwrap_or("");
        serde_json::json!({ "input": input.get("input"), "output": s })
    }
}

#[async_trait]
impl ResourceHandler for EchoHandler {
    async fn create(
        &self,
        _ctx: CancellationToken,
        req: CreateRequest,
    ) -> Result<serde_json::Value, HandlerError> {
        self.note("create", &req.name);
        self.maybe_fail()?;
        Ok(Self::echo(&req.input))
    }

    async fn update(
        &self,
        _ctx: CancellationToken,
        req: UpdateRequest,
    ) -> Result<serde_json::Value, HandlerError> {
        self.note("update", &req.name);
        self.maybe_fail()?;
        Ok(Self::echo(&req.input))
    }

    async fn delete(
        &self,
        _ctx: CancellationToken,
        req: DeleteRequest,
    ) -> Result<(), HandlerError> {
        self.note("delete", &req.name);
        self.maybe_fail()
    }
}

struct Fixture {
    storage: Arc<MemoryStorage>,
    sources: Arc<MemorySourceStorage>,
    registry: Arc<StaticRegistry>,
    log: Arc<Mutex<Vec<String>>>,
}

fn fixture_with(handler: impl FnOnce(Arc<Mutex<Vec<String>>>) -> EchoHandler) -> Fixture {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = StaticRegistry::new();
    registry.register(
        TypeDescriptor::new(
            "a",
            vec![
                FieldDef::input("input", Type::String),
                FieldDef::output("output", Type::String),
            ],
        ),
        Arc::new(handler(log.clone())),
    );
    Fixture {
        storage: Arc::new(MemoryStorage::new()),
        sources: Arc::new(MemorySourceStorage::new()),
        registry: Arc::new(registry),
        log,
    }
}

fn fixture() -> Fixture {
    fixture_with(EchoHandler::new)
}

impl Fixture {
    fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.storage.clone(),
            self.sources.clone(),
            self.registry.clone(),
        )
        .with_backoff(fixed_backoff(Duration::ZERO, 3))
    }

    fn graph(&self, config: &str) -> Graph {
        let (body, diags) = hcl::parse(config, "main.cv").unwrap();
        assert!(!diags.has_errors(), "{}", diags);
        let result = decode(&body, self.registry.as_ref(), &RuleValidator);
        assert!(!result.diagnostics.has_errors(), "{}", result.diagnostics);
        result.graph.unwrap()
    }

    fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

/// A persisted resource of type `a`, as a prior run would have stored it.
fn stored(name: &str, input: &str, deps: &[&str]) -> Resource {
    Resource {
        name: name.to_string(),
        resource_type: "a".to_string(),
        input: Value::object(vec![("input", Value::string(input))]),
        output: Value::object(vec![("output", Value::string(input))]),
        sources: Vec::new(),
        deps: deps.iter().map(|d| d.to_string()).collect(),
    }
}

// ─── Create and no-op ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_then_nop() {
    let fx = fixture();
    let config = r#"
        resource "foo" {
          type  = "a"
          input = "hello"
        }
    "#;

    let mut graph = fx.graph(config);
    let summary = fx
        .reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(
        fx.storage.writes(),
        vec![Op::Put {
            project: "proj".to_string(),
            name: "foo".to_string(),
        }]
    );
    assert_eq!(
        graph.resources["foo"].output,
        Value::object(vec![("output", Value::string("hello"))])
    );

    // Re-running against unchanged storage performs no writes at all.
    fx.storage.clear_operations();
    let mut graph = fx.graph(config);
    let summary = fx
        .reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.created, 0);
    assert_eq!(summary.noops, 1);
    assert!(fx.storage.writes().is_empty());
    assert_eq!(
        fx.storage.operations(),
        vec![Op::List {
            project: "proj".to_string(),
        }]
    );
    // The prior output was copied onto the live resource.
    assert_eq!(
        graph.resources["foo"].output,
        Value::object(vec![("output", Value::string("hello"))])
    );
}

#[tokio::test]
async fn test_dependent_resources_apply_in_order() {
    let fx = fixture();
    let mut graph = fx.graph(r#"
        resource "child" {
          type  = "a"
          input = "${parent.output} world"
        }

        resource "parent" {
          type  = "a"
          input = "hello"
        }
    "#);

    let summary = fx
        .reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.created, 2);
    assert_eq!(fx.calls(), vec!["create parent", "create child"]);
    assert_eq!(
        fx.storage.writes(),
        vec![
            Op::Put {
                project: "proj".to_string(),
                name: "parent".to_string(),
            },
            Op::Put {
                project: "proj".to_string(),
                name: "child".to_string(),
            },
        ]
    );
    assert_eq!(
        graph.resources["child"].output,
        Value::object(vec![("output", Value::string("hello world"))])
    );
}

// ─── Update cascade ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_update_parent_cascades_to_child() {
    let fx = fixture();
    let before = r#"
        resource "parent" {
          type  = "a"
          input = "hello"
        }

        resource "child" {
          type  = "a"
          input = "${parent.output} world"
        }
    "#;
    let after = r#"
        resource "parent" {
          type  = "a"
          input = "hi"
        }

        resource "child" {
          type  = "a"
          input = "${parent.output} world"
        }
    "#;

    let mut graph = fx.graph(before);
    fx.reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap();
    fx.storage.clear_operations();

    let mut graph = fx.graph(after);
    let summary = fx
        .reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.updated, 2);
    assert_eq!(
        fx.storage.writes(),
        vec![
            Op::Put {
                project: "proj".to_string(),
                name: "parent".to_string(),
            },
            Op::Put {
                project: "proj".to_string(),
                name: "child".to_string(),
            },
        ]
    );
    assert_eq!(
        graph.resources["child"].output,
        Value::object(vec![("output", Value::string("hi world"))])
    );
}

// ─── Delete order ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_delete_in_reverse_dependency_order() {
    let fx = fixture();
    fx.storage.seed("proj", stored("foo", "1", &[]));
    fx.storage.seed("proj", stored("bar", "2", &["foo"]));
    fx.storage.seed("proj", stored("baz", "3", &["foo", "bar"]));
    fx.storage.seed("proj", stored("qux", "4", &["baz"]));

    let mut graph = Graph::new();
    let summary = fx
        .reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.deleted, 4);
    assert_eq!(
        fx.calls(),
        vec!["delete qux", "delete baz", "delete bar", "delete foo"]
    );
    let deletes: Vec<String> = fx
        .storage
        .writes()
        .into_iter()
        .map(|op| match op {
            Op::Delete { name, .. } => name,
            other => panic!("unexpected write {:?}", other),
        })
        .collect();
    assert_eq!(deletes, vec!["qux", "baz", "bar", "foo"]);
}

#[tokio::test]
async fn test_removed_resource_is_deleted_while_kept_ones_stay() {
    let fx = fixture();
    fx.storage.seed("proj", stored("keep", "hello", &[]));
    fx.storage.seed("proj", stored("drop", "bye", &[]));

    let mut graph = fx.graph(r#"
        resource "keep" {
          type  = "a"
          input = "hello"
        }
    "#);
    let summary = fx
        .reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.noops, 1);
    assert_eq!(summary.deleted, 1);
    assert_eq!(fx.calls(), vec!["delete drop"]);
}

// ─── Retries ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let fx = fixture_with(|log| EchoHandler::failing(log, 2));
    let mut graph = fx.graph(r#"
        resource "foo" {
          type  = "a"
          input = "x"
        }
    "#);
    let summary = fx
        .reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(fx.calls().len(), 3);
}

#[tokio::test]
async fn test_permanent_failure_does_not_retry() {
    let fx = fixture_with(EchoHandler::permanent_failure);
    let mut graph = fx.graph(r#"
        resource "foo" {
          type  = "a"
          input = "x"
        }
    "#);
    let err = fx
        .reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("permanently"), "{}", err);
    // Exactly one attempt, and nothing was persisted.
    assert_eq!(fx.calls().len(), 1);
    assert!(fx.storage.writes().is_empty());
}

#[tokio::test]
async fn test_exhausted_retries_abort_the_run() {
    let fx = fixture_with(|log| EchoHandler::failing(log, 100));
    let mut graph = fx.graph(r#"
        resource "foo" {
          type  = "a"
          input = "x"
        }
    "#);
    let err = fx
        .reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap_err();
    // The fixed test policy allows three retries: four attempts total.
    assert_eq!(fx.calls().len(), 4);
    assert!(err.to_string().contains("failed after"), "{}", err);
}

#[tokio::test]
async fn test_failed_parent_skips_child() {
    let fx = fixture_with(EchoHandler::permanent_failure);
    let mut graph = fx.graph(r#"
        resource "parent" {
          type  = "a"
          input = "x"
        }

        resource "child" {
          type  = "a"
          input = "${parent.output}!"
        }
    "#);
    let err = fx
        .reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("parent"), "{}", err);
    // The child never reached its handler.
    assert_eq!(fx.calls(), vec!["create parent"]);
}

// ─── Cancellation and cycles ────────────────────────────────────────────────

#[tokio::test]
async fn test_pre_cancelled_context_runs_nothing() {
    let fx = fixture();
    let mut graph = fx.graph(r#"
        resource "foo" {
          type  = "a"
          input = "x"
        }
    "#);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = fx
        .reconciler()
        .reconcile("proj", &mut graph, cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ReconcileError>(),
        Some(ReconcileError::Cancelled)
    ));
    assert!(fx.calls().is_empty());
    assert!(fx.storage.writes().is_empty());
}

#[tokio::test]
async fn test_cyclic_graph_is_refused_up_front() {
    let fx = fixture();
    let mut graph = fx.graph(r#"
        resource "ping" {
          type  = "a"
          input = "${pong.output}"
        }

        resource "pong" {
          type  = "a"
          input = "${ping.output}"
        }
    "#);
    let err = fx
        .reconciler()
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("circular"), "{}", err);
    assert!(fx.calls().is_empty());
}

#[tokio::test]
async fn test_low_concurrency_does_not_deadlock_on_chains() {
    let fx = fixture();
    let mut graph = fx.graph(r#"
        resource "a1" {
          type  = "a"
          input = "root"
        }

        resource "a2" {
          type  = "a"
          input = "${a1.output}+"
        }

        resource "a3" {
          type  = "a"
          input = "${a2.output}+"
        }
    "#);
    let reconciler = Reconciler::new(
        fx.storage.clone(),
        fx.sources.clone(),
        fx.registry.clone(),
    )
    .with_concurrency(1)
    .with_backoff(fixed_backoff(Duration::ZERO, 0));
    let summary = reconciler
        .reconcile("proj", &mut graph, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.created, 3);
    assert_eq!(fx.calls(), vec!["create a1", "create a2", "create a3"]);
    assert_eq!(
        graph.resources["a3"].output,
        Value::object(vec![("output", Value::string("root++"))])
    );
}

// ─── Task group ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_task_group_runs_once_per_key() {
    let group = Arc::new(TaskGroup::<usize>::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let group = group.clone();
            let runs = runs.clone();
            tokio::spawn(async move {
                group
                    .run("shared", || {
                        let runs = runs.clone();
                        async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            Ok(7)
                        }
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 7);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_task_group_shares_errors_and_keeps_keys_independent() {
    let group = TaskGroup::<usize>::new();

    let failed: Result<usize, TaskError> = group
        .run("bad", || async { Err(TaskError::new(anyhow::anyhow!("boom"))) })
        .await;
    assert!(failed.is_err());

    // The failure is memoized for its key.
    let again = group.run("bad", || async { Ok(1) }).await;
    assert!(again.is_err());

    // Other keys are unaffected.
    let ok = group.run("good", || async { Ok(2) }).await.unwrap();
    assert_eq!(ok, 2);

    group.wait().await;
}
