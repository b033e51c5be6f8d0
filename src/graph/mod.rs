//! The resource graph: typed resources plus cross-resource expression
//! dependencies.
//!
//! The graph is built by the config decoder, read by the reconciler (which
//! writes only each resource's `output`), and discarded afterwards.

pub mod codec;

use std::collections::BTreeMap;

use petgraph::graph::DiGraph;
use thiserror::Error;

use crate::expr::Expression;
use crate::value::{Path, Step, Value};

// ─── Model ──────────────────────────────────────────────────────────────────

/// A named, typed unit of managed state.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub resource_type: String,
    /// Declared input object; fully concrete except for dependency sites,
    /// which hold unknowns until the reconciler resolves them.
    pub input: Value,
    /// Output object produced by the handler; unknown until applied.
    pub output: Value,
    /// Opaque artifact keys this resource's handler may fetch.
    pub sources: Vec<String>,
    /// Names of parent resources, unique, ordered by first appearance.
    pub deps: Vec<String>,
}

/// Binds a field inside a resource's input to an expression over parent
/// resources.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub field: Path,
    pub expr: Expression,
}

/// Resources keyed by name, with their attached dependencies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub resources: BTreeMap<String, Resource>,
    pub dependencies: BTreeMap<String, Vec<Dependency>>,
}

/// Error mutating or checking a graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown resource {0:?}")]
    UnknownResource(String),
    #[error("bad reference {path}: {reason}")]
    BadReference { path: Path, reason: String },
    #[error("circular dependency involving {0:?}")]
    Cycle(String),
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Inserts a resource. An existing resource of the same name is
    /// replaced; that is a caller bug and is logged as such.
    pub fn add_resource(&mut self, resource: Resource) -> Result<(), GraphError> {
        if resource.name.is_empty() {
            return Err(GraphError::InvalidArgument("resource name is empty".into()));
        }
        if resource.resource_type.is_empty() {
            return Err(GraphError::InvalidArgument(format!(
                "resource {:?} has no type",
                resource.name
            )));
        }
        if let Some(previous) = self.resources.insert(resource.name.clone(), resource) {
            tracing::warn!(
                name = previous.name.as_str(),
                "replacing resource already in graph (caller bug)"
            );
        }
        Ok(())
    }

    /// Attaches a dependency to the named resource. Every reference must
    /// start with an attribute step naming a resource already in the graph.
    pub fn add_dependency(&mut self, name: &str, dep: Dependency) -> Result<(), GraphError> {
        if !self.resources.contains_key(name) {
            return Err(GraphError::UnknownResource(name.to_string()));
        }
        let mut parents: Vec<String> = Vec::new();
        for path in dep.expr.references() {
            let parent = match path.first() {
                Some(Step::Attr(parent)) => parent.clone(),
                _ => {
                    return Err(GraphError::BadReference {
                        path: path.clone(),
                        reason: "first step must name a resource".to_string(),
                    })
                }
            };
            if !self.resources.contains_key(&parent) {
                return Err(GraphError::BadReference {
                    path: path.clone(),
                    reason: format!("resource {:?} is not in the graph", parent),
                });
            }
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }
        self.dependencies
            .entry(name.to_string())
            .or_default()
            .push(dep);
        let resource = self.resources.get_mut(name).expect("checked above");
        for parent in parents {
            if !resource.deps.contains(&parent) {
                resource.deps.push(parent);
            }
        }
        Ok(())
    }

    pub fn dependencies_of(&self, name: &str) -> &[Dependency] {
        self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resources no other resource references.
    pub fn leaf_resources(&self) -> Vec<&Resource> {
        let referenced: std::collections::BTreeSet<&str> = self
            .resources
            .values()
            .flat_map(|r| r.deps.iter().map(String::as_str))
            .collect();
        self.resources
            .values()
            .filter(|r| !referenced.contains(r.name.as_str()))
            .collect()
    }

    /// Fails when the dependency edges contain a cycle. Cyclic graphs decode
    /// legally (mutual output references) but would deadlock the reconciler,
    /// so it refuses them up front.
    pub fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut dag: DiGraph<&str, ()> = DiGraph::new();
        let mut indices = BTreeMap::new();
        for name in self.resources.keys() {
            indices.insert(name.as_str(), dag.add_node(name.as_str()));
        }
        for (name, resource) in &self.resources {
            for parent in &resource.deps {
                if let (Some(&from), Some(&to)) =
                    (indices.get(parent.as_str()), indices.get(name.as_str()))
                {
                    dag.add_edge(from, to, ());
                }
            }
        }
        petgraph::algo::toposort(&dag, None)
            .map(|_| ())
            .map_err(|cycle| GraphError::Cycle(dag[cycle.node_id()].to_string()))
    }
}
