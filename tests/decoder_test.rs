use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use converge::config::{decode, hcl, DecodeResult};
use converge::expr::Part;
use converge::provider::registry::StaticRegistry;
use converge::provider::{
    CreateRequest, DeleteRequest, HandlerError, ResourceHandler, UpdateRequest,
};
use converge::schema::validate::RuleValidator;
use converge::schema::{FieldDef, TypeDescriptor};
use converge::value::{Path, Type, Value};

// ─── Fixtures ───────────────────────────────────────────────────────────────

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
    registry.register(
        TypeDescriptor::new(
            "compute",
            vec![
                FieldDef::input("instanceType", Type::String)
                    .required()
                    .validate("oneof=t3.micro t3.small"),
                FieldDef::input("memorySize", Type::Number).validate("gte=64,div=64"),
                FieldDef::input("ports", Type::list(Type::Number)),
                FieldDef::input(
                    "network",
                    Type::object(vec![("cidr", Type::String), ("public", Type::Bool)]),
                ),
                FieldDef::input(
                    "disks",
                    Type::list(Type::object(vec![("size", Type::Number)])),
                ),
                FieldDef::output("id", Type::String),
            ],
        ),
        Arc::new(Inert),
    );
    registry
}

fn run(config: &str) -> DecodeResult {
    let (body, mut diags) = hcl::parse(config, "main.cv").unwrap();
    let registry = registry();
    let mut result = decode(&body, &registry, &RuleValidator);
    diags.extend(result.diagnostics.clone());
    result.diagnostics = diags;
    result
}

fn diag_text(result: &DecodeResult) -> String {
    result.diagnostics.to_string()
}

// ─── Basic decoding ─────────────────────────────────────────────────────────

#[test]
fn test_static_input() {
    let result = run(r#"
        resource "foo" {
          type  = "a"
          input = "hello"
        }
    "#);
    assert!(!result.diagnostics.has_errors(), "{}", diag_text(&result));
    let graph = result.graph.unwrap();
    assert_eq!(graph.resources.len(), 1);
    let foo = &graph.resources["foo"];
    assert_eq!(foo.resource_type, "a");
    assert_eq!(foo.input, Value::object(vec![("input", Value::string("hello"))]));
    assert!(foo.deps.is_empty());
    assert!(graph.dependencies.is_empty());
}

#[test]
fn test_project_block_is_captured() {
    let result = run(r#"
        project "acceptance" {}

        resource "foo" {
          type  = "a"
          input = "x"
        }
    "#);
    assert!(!result.diagnostics.has_errors(), "{}", diag_text(&result));
    assert_eq!(result.project.unwrap().name, "acceptance");
}

#[test]
fn test_source_triple_is_recorded() {
    let result = run(r#"
        resource "foo" {
          type   = "a"
          input  = "x"
          source = "1234:0a1b2c3d:sources/foo.tgz"
        }
    "#);
    assert!(!result.diagnostics.has_errors(), "{}", diag_text(&result));
    let graph = result.graph.unwrap();
    assert_eq!(graph.resources["foo"].sources, vec!["sources/foo.tgz"]);
}

#[test]
fn test_malformed_source_is_an_error() {
    let result = run(r#"
        resource "foo" {
          type   = "a"
          input  = "x"
          source = "not-a-triple"
        }
    "#);
    assert!(result.diagnostics.has_errors());
    assert!(result.graph.is_none());
}

// ─── Static resolution ──────────────────────────────────────────────────────

#[test]
fn test_concat_expression() {
    let result = run(r#"
        resource "foo" {
          type  = "a"
          input = "hello"
        }

        resource "bar" {
          type  = "a"
          input = "world"
        }

        resource "baz" {
          type  = "a"
          input = "Oh, ${foo.input} ${bar.input} ${foo.output}!"
        }
    "#);
    assert!(!result.diagnostics.has_errors(), "{}", diag_text(&result));
    let graph = result.graph.unwrap();

    // The statically-resolvable parts collapsed; the output reference
    // remains and leaves an unknown in its field.
    let baz = &graph.resources["baz"];
    assert_eq!(
        baz.input,
        Value::object(vec![("input", Value::unknown(Type::String))])
    );
    assert_eq!(baz.deps, vec!["foo", "bar"]);

    let deps = graph.dependencies_of("baz");
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].field, Path::from_str("input").unwrap());
    assert_eq!(
        deps[0].expr.parts,
        vec![
            Part::Lit(Value::string("Oh, hello world ")),
            Part::Ref(Path::from_str("foo.output").unwrap()),
            Part::Lit(Value::string("!")),
        ]
    );

    // foo and bar resolved to plain constants with no dependencies.
    assert!(graph.dependencies_of("foo").is_empty());
    assert!(graph.dependencies_of("bar").is_empty());
}

#[test]
fn test_fully_static_reference_resolves_to_constant() {
    let result = run(r#"
        resource "foo" {
          type  = "a"
          input = "hello"
        }

        resource "bar" {
          type  = "a"
          input = "${foo.input} again"
        }
    "#);
    assert!(!result.diagnostics.has_errors(), "{}", diag_text(&result));
    let graph = result.graph.unwrap();
    assert_eq!(
        graph.resources["bar"].input,
        Value::object(vec![("input", Value::string("hello again"))])
    );
    assert!(graph.dependencies_of("bar").is_empty());
}

#[test]
fn test_chained_static_resolution_reaches_fixed_point() {
    // c copies b, which copies a; two passes are needed.
    let result = run(r#"
        resource "c" {
          type  = "a"
          input = "${b.input}"
        }

        resource "b" {
          type  = "a"
          input = "${a.input}"
        }

        resource "a" {
          type  = "a"
          input = "root"
        }
    "#);
    assert!(!result.diagnostics.has_errors(), "{}", diag_text(&result));
    let graph = result.graph.unwrap();
    assert_eq!(
        graph.resources["c"].input,
        Value::object(vec![("input", Value::string("root"))])
    );
}

#[test]
fn test_mutual_output_references_become_dependencies() {
    // Legal at decode time; the reconciler is what refuses the cycle.
    let result = run(r#"
        resource "ping" {
          type  = "a"
          input = "${pong.output}"
        }

        resource "pong" {
          type  = "a"
          input = "${ping.output}"
        }
    "#);
    assert!(!result.diagnostics.has_errors(), "{}", diag_text(&result));
    let graph = result.graph.unwrap();
    assert_eq!(graph.dependencies_of("ping").len(), 1);
    assert_eq!(graph.dependencies_of("pong").len(), 1);
    assert!(graph.detect_cycles().is_err());
}

// ─── Reference errors ───────────────────────────────────────────────────────

#[test]
fn test_unknown_reference_suggests_spelling() {
    let result = run(r#"
        resource "foo" {
          type  = "a"
          input = "hello"
        }

        resource "baz" {
          type  = "a"
          input = "${zoo.output}"
        }
    "#);
    assert!(result.diagnostics.has_errors());
    assert!(result.graph.is_none());
    let text = diag_text(&result);
    assert!(text.contains("unknown resource \"zoo\""), "{}", text);
    assert!(text.contains("Did you mean \"foo\"?"), "{}", text);
}

#[test]
fn test_no_such_field_suggests_spelling() {
    let result = run(r#"
        resource "foo" {
          type  = "a"
          input = "hello"
        }

        resource "baz" {
          type  = "a"
          input = "${foo.outpt}"
        }
    "#);
    assert!(result.diagnostics.has_errors());
    let text = diag_text(&result);
    assert!(text.contains("no field \"outpt\""), "{}", text);
    assert!(text.contains("Did you mean \"output\"?"), "{}", text);
}

#[test]
fn test_invalid_output_reference_path() {
    // output is a string; descending into it cannot typecheck.
    let result = run(r#"
        resource "foo" {
          type  = "a"
          input = "hello"
        }

        resource "baz" {
          type  = "a"
          input = "${foo.output.deeper}"
        }
    "#);
    assert!(result.diagnostics.has_errors());
    assert!(diag_text(&result).contains("invalid reference"));
}

#[test]
fn test_unknown_type_suggests_spelling() {
    let result = run(r#"
        resource "foo" {
          type  = "computa"
          input = "x"
        }
    "#);
    assert!(result.diagnostics.has_errors());
    let text = diag_text(&result);
    assert!(text.contains("unknown resource type \"computa\""), "{}", text);
    assert!(text.contains("Did you mean \"compute\"?"), "{}", text);
}

// ─── Schema-driven decoding ─────────────────────────────────────────────────

#[test]
fn test_blocks_and_collections_decode() {
    let result = run(r#"
        resource "web" {
          type          = "compute"
          instance_type = "t3.micro"
          memory_size   = 128
          ports         = [80, 443]

          network {
            cidr   = "10.0.0.0/16"
            public = true
          }

          disks {
            size = 10
          }

          disks {
            size = 20
          }
        }
    "#);
    assert!(!result.diagnostics.has_errors(), "{}", diag_text(&result));
    let graph = result.graph.unwrap();
    let input = &graph.resources["web"].input;

    let attrs = input.as_object().unwrap();
    assert_eq!(attrs["instance_type"], Value::string("t3.micro"));
    assert_eq!(attrs["memory_size"], Value::int(128));
    // Tuple constants convert silently to the declared list type.
    assert_eq!(
        attrs["ports"],
        Value::list(Type::Number, vec![Value::int(80), Value::int(443)]).unwrap()
    );
    assert_eq!(
        attrs["network"],
        Value::object(vec![
            ("cidr", Value::string("10.0.0.0/16")),
            ("public", Value::bool(true)),
        ])
    );
    assert_eq!(
        attrs["disks"],
        Value::list(
            Type::object(vec![("size", Type::Number)]),
            vec![
                Value::object(vec![("size", Value::int(10))]),
                Value::object(vec![("size", Value::int(20))]),
            ],
        )
        .unwrap()
    );
}

#[test]
fn test_missing_required_attribute() {
    let result = run(r#"
        resource "web" {
          type = "compute"
        }
    "#);
    assert!(result.diagnostics.has_errors());
    assert!(diag_text(&result).contains("missing required attribute \"instance_type\""));
}

#[test]
fn test_duplicate_single_block_notes_previous() {
    let result = run(r#"
        resource "web" {
          type          = "compute"
          instance_type = "t3.micro"

          network {
            cidr = "10.0.0.0/16"
          }

          network {
            cidr = "10.1.0.0/16"
          }
        }
    "#);
    assert!(result.diagnostics.has_errors());
    let text = diag_text(&result);
    assert!(text.contains("duplicate block \"network\""), "{}", text);
    assert!(text.contains("previous block"), "{}", text);
}

#[test]
fn test_unsupported_attribute_suggests_spelling() {
    let result = run(r#"
        resource "web" {
          type          = "compute"
          instance_type = "t3.micro"
          memory_siz    = 128
        }
    "#);
    assert!(result.diagnostics.has_errors());
    let text = diag_text(&result);
    assert!(text.contains("unsupported attribute \"memory_siz\""), "{}", text);
    assert!(text.contains("Did you mean \"memory_size\"?"), "{}", text);
}

#[test]
fn test_lossy_conversion_warns() {
    let result = run(r#"
        resource "web" {
          type          = "compute"
          instance_type = "t3.micro"
          memory_size   = "128"
        }
    "#);
    assert!(!result.diagnostics.has_errors(), "{}", diag_text(&result));
    assert_eq!(result.diagnostics.warnings().count(), 1);
    assert!(diag_text(&result).contains("lossy conversion"));
    let graph = result.graph.unwrap();
    assert_eq!(
        graph.resources["web"].input.as_object().unwrap()["memory_size"],
        Value::int(128)
    );
}

#[test]
fn test_impossible_conversion_is_an_error() {
    let result = run(r#"
        resource "web" {
          type          = "compute"
          instance_type = "t3.micro"
          memory_size   = true
        }
    "#);
    assert!(result.diagnostics.has_errors());
    assert!(diag_text(&result).contains("cannot convert"));
}

// ─── Validation at decode time ──────────────────────────────────────────────

#[test]
fn test_validation_applies_to_constants() {
    let result = run(r#"
        resource "web" {
          type          = "compute"
          instance_type = "t3.large"
        }
    "#);
    assert!(result.diagnostics.has_errors());
    assert!(diag_text(&result).contains("oneof"));
}

#[test]
fn test_validation_applies_to_resolved_expressions() {
    let result = run(r#"
        resource "web" {
          type          = "compute"
          instance_type = "${other.input}"
        }

        resource "other" {
          type  = "a"
          input = "t3.gigantic"
        }
    "#);
    assert!(result.diagnostics.has_errors());
    assert!(diag_text(&result).contains("oneof"));
}

#[test]
fn test_references_in_collections_are_rejected() {
    let result = run(r#"
        resource "web" {
          type          = "compute"
          instance_type = "t3.micro"
          ports         = [80, "${other.input}"]
        }

        resource "other" {
          type  = "a"
          input = "8080"
        }
    "#);
    assert!(result.diagnostics.has_errors());
    assert!(diag_text(&result)
        .contains("references are only supported in scalar attribute values"));
}

#[test]
fn test_resource_without_name_or_type() {
    let result = run(r#"
        resource "" {
          type = "a"
        }
    "#);
    assert!(result.diagnostics.has_errors());
    assert!(diag_text(&result).contains("resource block has no name"));

    let result = run(r#"
        resource "foo" {
          input = "x"
        }
    "#);
    assert!(result.diagnostics.has_errors());
    assert!(diag_text(&result).contains("has no type"));
}

#[test]
fn test_unknown_top_level_block_warns() {
    let result = run(r#"
        widget "w" {}

        resource "foo" {
          type  = "a"
          input = "x"
        }
    "#);
    assert!(!result.diagnostics.has_errors(), "{}", diag_text(&result));
    assert_eq!(result.diagnostics.warnings().count(), 1);
    assert!(result.graph.is_some());
}
