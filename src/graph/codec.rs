//! Canonical JSON wire form of a graph.
//!
//! ```json
//! { "res": [
//!     { "name": "...", "type": "...",
//!       "srcs": ["..."],
//!       "input": { ... },
//!       "output": { ... },
//!       "deps": ["..."],
//!       "edges": [ { "field": [...], "expr": [ {"lit": ...} | {"ref": [...]} ] } ]
//!     } ] }
//! ```
//!
//! Resources are emitted in lexicographic name order. Paths are tuples whose
//! string elements are attribute names and whose numbers are indices; a
//! string map key therefore reloads as an attribute step, which applies
//! identically (see [`Path::apply`]). Unknown sub-values in outputs are
//! written as nulls and revived as unknowns on load from the registry's type
//! hints.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;

use crate::expr::{Expression, Part};
use crate::provider::registry::Registry;
use crate::value::json::{self, NullAs};
use crate::value::{Index, Path, Step, Value};

use super::{Dependency, Graph, Resource};

// ─── Encoding ───────────────────────────────────────────────────────────────

pub fn encode(graph: &Graph) -> serde_json::Value {
    let res: Vec<serde_json::Value> = graph
        .resources
        .values()
        .map(|r| encode_resource(r, graph.dependencies_of(&r.name)))
        .collect();
    json!({ "res": res })
}

fn encode_resource(resource: &Resource, deps: &[Dependency]) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert("name".into(), json!(resource.name));
    obj.insert("type".into(), json!(resource.resource_type));
    if !resource.sources.is_empty() {
        obj.insert("srcs".into(), json!(resource.sources));
    }
    if !resource.input.is_null() {
        obj.insert("input".into(), json::encode(&resource.input));
    }
    if !resource.output.is_null() {
        obj.insert("output".into(), json::encode(&resource.output));
    }
    if !resource.deps.is_empty() {
        obj.insert("deps".into(), json!(resource.deps));
    }
    if !deps.is_empty() {
        let edges: Vec<serde_json::Value> = deps
            .iter()
            .map(|d| {
                json!({
                    "field": encode_path(&d.field),
                    "expr": encode_expr(&d.expr),
                })
            })
            .collect();
        obj.insert("edges".into(), serde_json::Value::Array(edges));
    }
    serde_json::Value::Object(obj)
}

fn encode_path(path: &Path) -> serde_json::Value {
    serde_json::Value::Array(
        path.steps()
            .iter()
            .map(|step| match step {
                Step::Attr(name) => json!(name),
                Step::Index(Index::String(key)) => json!(key),
                Step::Index(Index::Number(n)) => json!(n),
            })
            .collect(),
    )
}

fn encode_expr(expr: &Expression) -> serde_json::Value {
    serde_json::Value::Array(
        expr.parts
            .iter()
            .map(|part| match part {
                Part::Lit(v) => json!({ "lit": json::encode(v) }),
                Part::Ref(p) => json!({ "ref": encode_path(p) }),
            })
            .collect(),
    )
}

// ─── Decoding ───────────────────────────────────────────────────────────────

pub fn decode(wire: &serde_json::Value, registry: &dyn Registry) -> Result<Graph> {
    let res = wire
        .get("res")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow!("graph wire form has no \"res\" array"))?;

    let mut graph = Graph::new();
    let mut edges: Vec<(String, Vec<Dependency>)> = Vec::new();
    for entry in res {
        let (resource, deps) = decode_resource(entry, registry)?;
        let name = resource.name.clone();
        graph
            .add_resource(resource)
            .with_context(|| format!("loading resource {:?}", name))?;
        if !deps.is_empty() {
            edges.push((name, deps));
        }
    }
    // Dependencies attach after every resource exists, since an edge may
    // reference a resource serialized later.
    for (name, deps) in edges {
        for dep in deps {
            graph
                .add_dependency(&name, dep)
                .with_context(|| format!("loading dependencies of {:?}", name))?;
        }
    }
    Ok(graph)
}

fn decode_resource(
    entry: &serde_json::Value,
    registry: &dyn Registry,
) -> Result<(Resource, Vec<Dependency>)> {
    let name = entry
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("resource entry has no name"))?
        .to_string();
    let type_name = entry
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("resource {:?} has no type", name))?
        .to_string();

    let registered = registry
        .type_of(&type_name)
        .ok_or_else(|| anyhow!("resource {:?} has unregistered type {:?}", name, type_name))?;
    let input_type = registered.desc.inputs().cty_type();
    let output_type = registered.desc.outputs().cty_type();

    let input = match entry.get("input") {
        Some(raw) => json::decode(raw, &input_type, NullAs::Null)
            .with_context(|| format!("decoding input of {:?}", name))?,
        None => Value::null(input_type),
    };
    let output = match entry.get("output") {
        // Unknown outputs were projected to null on the wire.
        Some(raw) => json::decode(raw, &output_type, NullAs::Unknown)
            .with_context(|| format!("decoding output of {:?}", name))?,
        None => Value::unknown(output_type),
    };

    let sources = match entry.get("srcs") {
        Some(raw) => serde_json::from_value(raw.clone())
            .with_context(|| format!("decoding srcs of {:?}", name))?,
        None => Vec::new(),
    };

    let edges = match entry.get("edges") {
        Some(raw) => decode_edges(raw).with_context(|| format!("decoding edges of {:?}", name))?,
        None => Vec::new(),
    };

    // add_dependency re-derives parent names, skipping ones already listed,
    // so seeding from the wire keeps the recorded order.
    let deps = match entry.get("deps") {
        Some(raw) => serde_json::from_value(raw.clone())
            .with_context(|| format!("decoding deps of {:?}", name))?,
        None => Vec::new(),
    };

    Ok((
        Resource {
            name,
            resource_type: type_name,
            input,
            output,
            sources,
            deps,
        },
        edges,
    ))
}

fn decode_edges(raw: &serde_json::Value) -> Result<Vec<Dependency>> {
    let entries = raw.as_array().ok_or_else(|| anyhow!("edges is not an array"))?;
    let mut deps = Vec::with_capacity(entries.len());
    for entry in entries {
        let field = decode_path(
            entry
                .get("field")
                .ok_or_else(|| anyhow!("edge has no field"))?,
        )?;
        let parts = entry
            .get("expr")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("edge has no expr array"))?;
        let mut expr = Expression::default();
        for part in parts {
            if let Some(lit) = part.get("lit") {
                expr.parts.push(Part::Lit(json::infer(lit)));
            } else if let Some(reference) = part.get("ref") {
                expr.parts.push(Part::Ref(decode_path(reference)?));
            } else {
                bail!("expression part is neither lit nor ref: {}", part);
            }
        }
        deps.push(Dependency { field, expr });
    }
    Ok(deps)
}

fn decode_path(raw: &serde_json::Value) -> Result<Path> {
    let elems = raw.as_array().ok_or_else(|| anyhow!("path is not a tuple"))?;
    let mut steps = Vec::with_capacity(elems.len());
    for elem in elems {
        match elem {
            serde_json::Value::String(s) => steps.push(Step::Attr(s.clone())),
            serde_json::Value::Number(n) => {
                let idx = n
                    .as_u64()
                    .ok_or_else(|| anyhow!("path index {} is not a natural number", n))?;
                steps.push(Step::Index(Index::Number(idx as usize)));
            }
            other => bail!("path element {} is neither string nor number", other),
        }
    }
    Ok(Path::new(steps))
}
