use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use converge::expr::{Expression, Part};
use converge::graph::{codec, Dependency, Graph, GraphError, Resource};
use converge::provider::registry::{Registry, StaticRegistry};
use converge::provider::{
    CreateRequest, DeleteRequest, HandlerError, ResourceHandler, UpdateRequest,
};
use converge::schema::{FieldDef, TypeDescriptor};
use converge::value::{Path, Type, Value};

// ─── Fixtures ───────────────────────────────────────────────────────────────

/// A handler for graph-level tests; the reconciler never runs here.
struct Inert;

#[async_trait]
impl ResourceHandler for Inert {
    async fn create(
        &self,
        _ctx: CancellationToken,
        _req: CreateRequest,
    ) -> Result<serde_json::Value, HandlerError> {
        Err(HandlerError::permanent(anyhow::anyhow!("inert handler")))
    }

    async fn update(
        &self,
        _ctx: CancellationToken,
        _req: UpdateRequest,
    ) -> Result<serde_json::Value, HandlerError> {
        Err(HandlerError::permanent(anyhow::anyhow!("inert handler")))
    }

    async fn delete(
        &self,
        _ctx: CancellationToken,
        _req: DeleteRequest,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::permanent(anyhow::anyhow!("inert handler")))
    }
}

fn registry() -> StaticRegistry {
    let mut registry = StaticRegistry::new();
    registry.register(
        TypeDescriptor::new(
            "a",
            vec![
                FieldDef::input("input", Type::String),
                FieldDef::output("output", Type::String),
            ],
        ),
        Arc::new(Inert),
    );
    registry
}

fn resource(name: &str, input: &str) -> Resource {
    Resource {
        name: name.to_string(),
        resource_type: "a".to_string(),
        input: Value::object(vec![("input", Value::string(input))]),
        output: Value::unknown(Type::object(vec![("output", Type::String)])),
        sources: Vec::new(),
        deps: Vec::new(),
    }
}

fn dependency(field: &str, parts: Vec<Part>) -> Dependency {
    Dependency {
        field: Path::from_str(field).unwrap(),
        expr: Expression::new(parts),
    }
}

fn ref_part(path: &str) -> Part {
    Part::Ref(Path::from_str(path).unwrap())
}

// ─── Mutation ───────────────────────────────────────────────────────────────

#[test]
fn test_add_resource_rejects_empty_name_and_type() {
    let mut g = Graph::new();
    let mut r = resource("", "x");
    assert!(matches!(
        g.add_resource(r.clone()),
        Err(GraphError::InvalidArgument(_))
    ));
    r.name = "ok".to_string();
    r.resource_type = String::new();
    assert!(matches!(
        g.add_resource(r),
        Err(GraphError::InvalidArgument(_))
    ));
}

#[test]
fn test_add_resource_replaces_on_collision() {
    let mut g = Graph::new();
    g.add_resource(resource("foo", "first")).unwrap();
    g.add_resource(resource("foo", "second")).unwrap();
    assert_eq!(g.resources.len(), 1);
    assert_eq!(
        g.resources["foo"].input,
        Value::object(vec![("input", Value::string("second"))])
    );
}

#[test]
fn test_add_dependency_checks_target_and_references() {
    let mut g = Graph::new();
    g.add_resource(resource("foo", "x")).unwrap();
    g.add_resource(resource("bar", "y")).unwrap();

    assert!(matches!(
        g.add_dependency("ghost", dependency("input", vec![ref_part("foo.output")])),
        Err(GraphError::UnknownResource(_))
    ));
    assert!(matches!(
        g.add_dependency("bar", dependency("input", vec![ref_part("ghost.output")])),
        Err(GraphError::BadReference { .. })
    ));
    assert!(g
        .add_dependency("bar", dependency("input", vec![ref_part("foo.output")]))
        .is_ok());
    assert_eq!(g.resources["bar"].deps, vec!["foo"]);
}

#[test]
fn test_deps_are_unique_in_first_appearance_order() {
    let mut g = Graph::new();
    g.add_resource(resource("a", "1")).unwrap();
    g.add_resource(resource("b", "2")).unwrap();
    g.add_resource(resource("c", "3")).unwrap();
    g.add_dependency(
        "c",
        dependency(
            "input",
            vec![ref_part("b.output"), ref_part("a.output"), ref_part("b.output")],
        ),
    )
    .unwrap();
    g.add_dependency("c", dependency("input", vec![ref_part("a.output")]))
        .unwrap();
    assert_eq!(g.resources["c"].deps, vec!["b", "a"]);
}

// ─── Leaves ─────────────────────────────────────────────────────────────────

#[test]
fn test_leaf_identity() {
    let mut g = Graph::new();
    for name in ["foo", "bar", "baz"] {
        g.add_resource(resource(name, name)).unwrap();
    }
    g.add_dependency("baz", dependency("input", vec![ref_part("foo.output")]))
        .unwrap();

    let leaves: Vec<&str> = g.leaf_resources().iter().map(|r| r.name.as_str()).collect();
    // A name is a leaf exactly when no dependency references it.
    for (name, referenced) in [("foo", true), ("bar", false), ("baz", false)] {
        assert_eq!(!leaves.contains(&name), referenced, "leaf status of {}", name);
    }
}

#[test]
fn test_empty_graph_has_no_leaves() {
    assert!(Graph::new().leaf_resources().is_empty());
}

// ─── Cycles ─────────────────────────────────────────────────────────────────

#[test]
fn test_detect_cycles() {
    let mut g = Graph::new();
    g.add_resource(resource("a", "1")).unwrap();
    g.add_resource(resource("b", "2")).unwrap();
    g.add_dependency("b", dependency("input", vec![ref_part("a.output")]))
        .unwrap();
    assert!(g.detect_cycles().is_ok());

    // Mutual output references decode legally but refuse to reconcile.
    g.add_dependency("a", dependency("input", vec![ref_part("b.output")]))
        .unwrap();
    assert!(matches!(g.detect_cycles(), Err(GraphError::Cycle(_))));
}

// ─── Wire form ──────────────────────────────────────────────────────────────

fn sample_graph() -> Graph {
    let mut g = Graph::new();
    g.add_resource(resource("foo", "hello")).unwrap();
    g.add_resource(resource("bar", "world")).unwrap();
    let mut baz = resource("baz", "ignored");
    baz.input = Value::object(vec![("input", Value::unknown(Type::String))]);
    baz.sources = vec!["sources/baz.tgz".to_string()];
    g.add_resource(baz).unwrap();
    g.add_dependency(
        "baz",
        dependency(
            "input",
            vec![
                Part::Lit(Value::string("Oh, hello world ")),
                ref_part("foo.output"),
                Part::Lit(Value::string("!")),
            ],
        ),
    )
    .unwrap();
    g
}

#[test]
fn test_wire_form_shape() {
    let wire = codec::encode(&sample_graph());
    let res = wire["res"].as_array().unwrap();
    // Lexicographic name order.
    let names: Vec<&str> = res.iter().map(|r| r["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["bar", "baz", "foo"]);

    let baz = &res[1];
    assert_eq!(baz["type"], "a");
    assert_eq!(baz["srcs"], serde_json::json!(["sources/baz.tgz"]));
    assert_eq!(baz["deps"], serde_json::json!(["foo"]));
    // The unknown input attribute projects to null.
    assert_eq!(baz["input"], serde_json::json!({ "input": null }));
    assert_eq!(
        baz["edges"],
        serde_json::json!([{
            "field": ["input"],
            "expr": [
                { "lit": "Oh, hello world " },
                { "ref": ["foo", "output"] },
                { "lit": "!" },
            ],
        }])
    );
}

#[test]
fn test_wire_round_trip() {
    let g = sample_graph();
    let reg = registry();
    let decoded = codec::decode(&codec::encode(&g), &reg).unwrap();

    assert_eq!(decoded.dependencies, g.dependencies);
    assert_eq!(
        decoded.resources.keys().collect::<Vec<_>>(),
        g.resources.keys().collect::<Vec<_>>()
    );
    for (name, original) in &g.resources {
        let loaded = &decoded.resources[name];
        assert_eq!(loaded.resource_type, original.resource_type);
        assert_eq!(loaded.sources, original.sources);
        assert_eq!(loaded.deps, original.deps);
        assert_eq!(loaded.output, original.output);
    }
    // The unknown input slot projected to null on the wire.
    assert_eq!(
        decoded.resources["baz"].input,
        Value::object(vec![("input", Value::null(Type::String))])
    );
    assert_eq!(decoded.resources["foo"].input, g.resources["foo"].input);
}

#[test]
fn test_decode_rejects_unregistered_type() {
    let mut g = Graph::new();
    let mut r = resource("foo", "x");
    r.resource_type = "mystery".to_string();
    g.add_resource(r).unwrap();
    assert!(codec::decode(&codec::encode(&g), &registry()).is_err());
}

#[test]
fn test_registry_names_are_sorted() {
    let reg = registry();
    assert_eq!(reg.names(), vec!["a"]);
    assert!(reg.type_of("a").is_some());
    assert!(reg.type_of("b").is_none());
}
