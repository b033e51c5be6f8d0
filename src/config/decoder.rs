//! Lowers a parsed configuration tree into a resource graph.
//!
//! Decoding walks `project` and `resource` blocks, checks attributes against
//! each type's schema, wraps reference-bearing expressions in capsules,
//! statically resolves whatever can be resolved without running anything,
//! and turns the leftovers into graph dependencies.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::expr::{Expression, Part};
use crate::graph::{Dependency, Graph, Resource};
use crate::provider::registry::{RegisteredType, Registry};
use crate::schema::validate::Validator;
use crate::schema::FieldSet;
use crate::suggest::did_you_mean;
use crate::value::convert::{convert, Safety};
use crate::value::{Capsule, Path, Step, Type, Value};

use super::diag::Diagnostics;
use super::syntax::{Attribute, Block, Body, Expr, SrcRange, TplPart};

// ─── Public surface ─────────────────────────────────────────────────────────

/// Project metadata from the `project "name" {}` block.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectMeta {
    pub name: String,
    pub range: SrcRange,
}

/// Outcome of a decode: the graph is present only when no error diagnostic
/// was emitted.
#[derive(Debug)]
pub struct DecodeResult {
    pub graph: Option<Graph>,
    pub project: Option<ProjectMeta>,
    pub diagnostics: Diagnostics,
}

/// Decodes a configuration body against the registered resource types.
pub fn decode(
    body: &Body,
    registry: &dyn Registry,
    validator: &dyn Validator,
) -> DecodeResult {
    let mut decoder = Decoder {
        registry,
        validator,
        diags: Diagnostics::new(),
        project: None,
    };
    let mut drafts = decoder.collect(body);
    decoder.resolve(&mut drafts);
    let graph = decoder.finish(drafts);
    DecodeResult {
        graph,
        project: decoder.project,
        diagnostics: decoder.diags,
    }
}

/// An artifact reference decoded from a resource's `source` attribute,
/// written as `"len:md5:key"`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceSpec {
    pub len: u64,
    pub md5: String,
    pub key: String,
}

impl SourceSpec {
    pub fn parse(s: &str) -> Result<SourceSpec, String> {
        let mut parts = s.splitn(3, ':');
        let (len, md5, key) = match (parts.next(), parts.next(), parts.next()) {
            (Some(len), Some(md5), Some(key)) if !md5.is_empty() && !key.is_empty() => {
                (len, md5, key)
            }
            _ => return Err(format!("source {:?} is not a len:md5:key triple", s)),
        };
        let len: u64 = len
            .parse()
            .map_err(|_| format!("source length {:?} is not a number", len))?;
        Ok(SourceSpec {
            len,
            md5: md5.to_string(),
            key: key.to_string(),
        })
    }
}

// ─── Decoder ────────────────────────────────────────────────────────────────

struct ResourceDraft {
    name: String,
    type_name: String,
    registered: Arc<RegisteredType>,
    input: Value,
    sources: Vec<String>,
    /// Parents named by the input's expressions as written, before static
    /// resolution substitutes any of them away. A parent stays in `deps`
    /// even when its reference resolves statically.
    parents: Vec<String>,
    range: SrcRange,
}

struct Decoder<'a> {
    registry: &'a dyn Registry,
    validator: &'a dyn Validator,
    diags: Diagnostics,
    project: Option<ProjectMeta>,
}

impl<'a> Decoder<'a> {
    // ─── Phase 1: walk blocks, decode bodies ────────────────────────────────

    fn collect(&mut self, body: &Body) -> Vec<ResourceDraft> {
        let mut drafts: Vec<ResourceDraft> = Vec::new();
        for attr in &body.attributes {
            self.diags.warning(
                format!("ignoring top-level attribute {:?}", attr.name),
                Some(attr.range.clone()),
            );
        }
        for block in &body.blocks {
            match block.kind.as_str() {
                "project" => self.decode_project(block),
                "resource" => {
                    if let Some(draft) = self.decode_resource(block) {
                        if drafts.iter().any(|d| d.name == draft.name) {
                            self.diags.error(
                                format!("duplicate resource {:?}", draft.name),
                                Some(block.range.clone()),
                            );
                        }
                        drafts.push(draft);
                    }
                }
                other => {
                    self.diags.warning(
                        format!("ignoring unknown block type {:?}", other),
                        Some(block.range.clone()),
                    );
                }
            }
        }
        drafts
    }

    fn decode_project(&mut self, block: &Block) {
        let name = block.labels.first().cloned().unwrap_or_default();
        if name.is_empty() {
            self.diags
                .error("project block has no name", Some(block.range.clone()));
            return;
        }
        if let Some(previous) = &self.project {
            self.diags.error_with(
                format!("duplicate project block {:?}", name),
                format!("already declared as {:?} at {}", previous.name, previous.range),
                Some(block.range.clone()),
            );
            return;
        }
        self.project = Some(ProjectMeta {
            name,
            range: block.range.clone(),
        });
    }

    fn decode_resource(&mut self, block: &Block) -> Option<ResourceDraft> {
        let name = block.labels.first().cloned().unwrap_or_default();
        if name.is_empty() {
            self.diags
                .error("resource block has no name", Some(block.range.clone()));
            return None;
        }

        let type_name = match block.body.attribute("type") {
            Some(attr) => match &attr.expr {
                Expr::String(parts) => match parts.as_slice() {
                    [TplPart::Lit(s)] if !s.is_empty() => s.clone(),
                    _ => {
                        self.diags.error(
                            format!("resource {:?} type must be a constant string", name),
                            Some(attr.range.clone()),
                        );
                        return None;
                    }
                },
                _ => {
                    self.diags.error(
                        format!("resource {:?} type must be a constant string", name),
                        Some(attr.range.clone()),
                    );
                    return None;
                }
            },
            None => {
                self.diags.error(
                    format!("resource {:?} has no type", name),
                    Some(block.range.clone()),
                );
                return None;
            }
        };

        let registered = match self.registry.type_of(&type_name) {
            Some(t) => t,
            None => {
                let names = self.registry.names();
                let detail =
                    did_you_mean(names.iter().map(String::as_str), &type_name);
                match detail {
                    Some(detail) => self.diags.error_with(
                        format!("unknown resource type {:?}", type_name),
                        detail,
                        Some(block.range.clone()),
                    ),
                    None => self.diags.error(
                        format!("unknown resource type {:?}", type_name),
                        Some(block.range.clone()),
                    ),
                }
                return None;
            }
        };

        let mut sources = Vec::new();
        if let Some(attr) = block.body.attribute("source") {
            match &attr.expr {
                Expr::String(parts) => match parts.as_slice() {
                    [TplPart::Lit(s)] => match SourceSpec::parse(s) {
                        Ok(spec) => {
                            debug!(resource = name.as_str(), key = spec.key.as_str(), len = spec.len, "decoded source");
                            sources.push(spec.key);
                        }
                        Err(e) => self.diags.error(e, Some(attr.range.clone())),
                    },
                    _ => self.diags.error(
                        "source must be a constant string",
                        Some(attr.range.clone()),
                    ),
                },
                _ => self.diags.error(
                    "source must be a constant string",
                    Some(attr.range.clone()),
                ),
            }
        }

        let inputs = registered.desc.inputs();
        let input = self.decode_input(&block.body, &inputs, &block.range);

        let mut parents: Vec<String> = Vec::new();
        input.walk(&mut |_, v| {
            if let Some(capsule) = v.as_capsule() {
                for path in capsule.expr.references() {
                    if let Some(parent) = path.leading_attr() {
                        if !parents.iter().any(|p| p == parent) {
                            parents.push(parent.to_string());
                        }
                    }
                }
            }
        });

        Some(ResourceDraft {
            name,
            type_name,
            registered,
            input,
            sources,
            parents,
            range: block.range.clone(),
        })
    }

    /// Decodes a resource body against its input field set. Attributes carry
    /// scalar and collection fields; nested blocks carry object and
    /// list-of-object fields.
    fn decode_input(&mut self, body: &Body, fields: &FieldSet, range: &SrcRange) -> Value {
        let mut attrs: Vec<(String, Value)> = Vec::with_capacity(fields.len());
        for field in fields.iter() {
            let attr_name = field.attr_name();
            let capture = Path::root().attr(attr_name.clone());
            let value = match block_shape(&field.ty) {
                Shape::Single(shape) => self.decode_single_block(
                    body,
                    &attr_name,
                    shape,
                    field.required,
                    &field.ty,
                    &capture,
                    range,
                ),
                Shape::Repeated(shape) => self.decode_repeated_blocks(
                    body,
                    &attr_name,
                    shape,
                    field.required,
                    &field.ty,
                    &capture,
                ),
                Shape::Attribute => match body.attribute(&attr_name) {
                    Some(attr) => {
                        self.decode_attr(attr, &field.ty, capture, field.validate.as_deref())
                    }
                    None => {
                        if field.required {
                            self.diags.error(
                                format!("missing required attribute {:?}", attr_name),
                                Some(range.clone()),
                            );
                        }
                        Value::null(field.ty.clone())
                    }
                },
            };
            attrs.push((attr_name, value));
        }

        // Anything the schema does not name is an error, with a spelling
        // suggestion against the expected attribute names.
        let known: Vec<String> = fields.iter().map(|f| f.attr_name()).collect();
        for attr in &body.attributes {
            if attr.name == "type" || attr.name == "source" {
                continue;
            }
            if fields.by_attr(&attr.name).is_none() {
                self.unknown_entry("attribute", &attr.name, &known, &attr.range);
            }
        }
        for block in &body.blocks {
            if fields.by_attr(&block.kind).is_none() {
                self.unknown_entry("block", &block.kind, &known, &block.range);
            }
        }

        Value::object(attrs)
    }

    fn unknown_entry(&mut self, what: &str, name: &str, known: &[String], range: &SrcRange) {
        let detail = did_you_mean(known.iter().map(String::as_str), name);
        match detail {
            Some(detail) => self.diags.error_with(
                format!("unsupported {} {:?}", what, name),
                detail,
                Some(range.clone()),
            ),
            None => self
                .diags
                .error(format!("unsupported {} {:?}", what, name), Some(range.clone())),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_single_block(
        &mut self,
        body: &Body,
        name: &str,
        shape: &BTreeMap<String, Type>,
        required: bool,
        ty: &Type,
        capture: &Path,
        range: &SrcRange,
    ) -> Value {
        let blocks = body.blocks_of(name);
        match blocks.len() {
            0 => {
                if required {
                    self.diags.error(
                        format!("missing required block {:?}", name),
                        Some(range.clone()),
                    );
                }
                Value::null(ty.clone())
            }
            1 => self.decode_shape(&blocks[0].body, shape, capture, &blocks[0].range),
            _ => {
                let previous = &blocks[blocks.len() - 2].range;
                self.diags.error_with(
                    format!("duplicate block {:?}", name),
                    format!("previous block at {}", previous),
                    Some(blocks[blocks.len() - 1].range.clone()),
                );
                self.decode_shape(&blocks[0].body, shape, capture, &blocks[0].range)
            }
        }
    }

    fn decode_repeated_blocks(
        &mut self,
        body: &Body,
        name: &str,
        shape: &BTreeMap<String, Type>,
        required: bool,
        ty: &Type,
        capture: &Path,
    ) -> Value {
        let blocks = body.blocks_of(name);
        if blocks.is_empty() {
            if required {
                self.diags
                    .error(format!("missing required block {:?}", name), None);
            }
            return Value::null(ty.clone());
        }
        let items: Vec<Value> = blocks
            .iter()
            .enumerate()
            .map(|(i, b)| {
                self.decode_shape(&b.body, shape, &capture.clone().index_num(i), &b.range)
            })
            .collect();
        match Value::list(Type::Object(shape.clone()), items) {
            Ok(list) => list,
            Err(e) => {
                self.diags.error(format!("malformed block list: {}", e), None);
                Value::null(ty.clone())
            }
        }
    }

    /// Decodes a nested block body against an object shape. Nested levels
    /// have no per-field schema beyond their types.
    fn decode_shape(
        &mut self,
        body: &Body,
        shape: &BTreeMap<String, Type>,
        capture: &Path,
        range: &SrcRange,
    ) -> Value {
        let mut attrs: Vec<(String, Value)> = Vec::with_capacity(shape.len());
        for (attr_name, ty) in shape {
            let sub_capture = capture.clone().attr(attr_name.clone());
            let value = match block_shape(ty) {
                Shape::Single(sub) => self.decode_single_block(
                    body, attr_name, sub, false, ty, &sub_capture, range,
                ),
                Shape::Repeated(sub) => {
                    self.decode_repeated_blocks(body, attr_name, sub, false, ty, &sub_capture)
                }
                Shape::Attribute => match body.attribute(attr_name) {
                    Some(attr) => self.decode_attr(attr, ty, sub_capture, None),
                    None => Value::null(ty.clone()),
                },
            };
            attrs.push((attr_name.clone(), value));
        }
        let known: Vec<String> = shape.keys().cloned().collect();
        for attr in &body.attributes {
            if !shape.contains_key(&attr.name) {
                self.unknown_entry("attribute", &attr.name, &known, &attr.range);
            }
        }
        for block in &body.blocks {
            if !shape.contains_key(&block.kind) {
                self.unknown_entry("block", &block.kind, &known, &block.range);
            }
        }
        Value::object(attrs)
    }

    /// Decodes one attribute: reference-bearing expressions become capsules,
    /// constants are evaluated, converted to the field type, and validated.
    fn decode_attr(
        &mut self,
        attr: &Attribute,
        ty: &Type,
        capture: Path,
        rule: Option<&str>,
    ) -> Value {
        if attr.expr.has_references() {
            match build_expression(&attr.expr) {
                Ok(expr) => {
                    return Value::capsule(
                        Capsule {
                            expr,
                            field: capture,
                            range: attr.range.clone(),
                        },
                        ty.clone(),
                    )
                }
                Err(reason) => {
                    self.diags.error(reason, Some(attr.range.clone()));
                    return Value::unknown(ty.clone());
                }
            }
        }

        let value = match const_value(&attr.expr) {
            Ok(v) => v,
            Err(reason) => {
                self.diags.error(reason, Some(attr.range.clone()));
                return Value::null(ty.clone());
            }
        };
        let converted = self.convert_to(value, ty, &attr.range);
        if let Some(rule) = rule {
            if let Err(e) = self.validator.validate(&converted, rule) {
                self.diags.error(e.to_string(), Some(attr.range.clone()));
            }
        }
        converted
    }

    /// Converts a constant to its field type: lossless silently, lossy with
    /// a warning, impossible with an error.
    fn convert_to(&mut self, value: Value, ty: &Type, range: &SrcRange) -> Value {
        if value.ty() == ty {
            return value;
        }
        match convert(&value, ty) {
            Ok((converted, Safety::Safe)) => converted,
            Ok((converted, Safety::Lossy)) => {
                self.diags.warning(
                    format!("lossy conversion from {} to {}", value.ty(), ty),
                    Some(range.clone()),
                );
                converted
            }
            Err(e) => {
                self.diags.error(e.to_string(), Some(range.clone()));
                Value::null(ty.clone())
            }
        }
    }

    // ─── Phase 2: static resolution ─────────────────────────────────────────

    /// Iterates reference substitution to a fixed point. Each pass either
    /// resolves at least one reference or the loop stops; capsules that
    /// remain become real dependencies.
    fn resolve(&mut self, drafts: &mut [ResourceDraft]) {
        let types: HashMap<String, Arc<RegisteredType>> = drafts
            .iter()
            .map(|d| (d.name.clone(), d.registered.clone()))
            .collect();
        loop {
            let snapshot: BTreeMap<String, Value> = drafts
                .iter()
                .map(|d| (d.name.clone(), d.input.clone()))
                .collect();
            let mut progress = false;
            for i in 0..drafts.len() {
                let owner = drafts[i].name.clone();
                let input = drafts[i].input.clone();
                drafts[i].input = input.transform(&mut |_, v| {
                    let capsule = v.as_capsule()?;
                    self.step_capsule(&owner, capsule, v.ty(), &snapshot, &types, &mut progress)
                });
            }
            if !progress {
                break;
            }
        }
    }

    /// Advances one capsule by one pass. Returns the replacement value when
    /// anything changed, `None` to keep waiting.
    fn step_capsule(
        &mut self,
        owner: &str,
        capsule: &Capsule,
        declared: &Type,
        snapshot: &BTreeMap<String, Value>,
        types: &HashMap<String, Arc<RegisteredType>>,
        progress: &mut bool,
    ) -> Option<Value> {
        let mut parts = capsule.expr.parts.clone();
        let mut changed = false;
        let mut poisoned = false;

        for part in &mut parts {
            let path = match part {
                Part::Ref(path) => path.clone(),
                Part::Lit(_) => continue,
            };
            let parent = match path.leading_attr() {
                Some(p) => p.to_string(),
                None => {
                    self.diags.error(
                        format!("reference {} does not begin with a resource name", path),
                        Some(capsule.range.clone()),
                    );
                    poisoned = true;
                    continue;
                }
            };
            let registered = match types.get(&parent) {
                Some(t) => t.clone(),
                None => {
                    let detail =
                        did_you_mean(snapshot.keys().map(String::as_str), &parent);
                    let summary = format!("reference to unknown resource {:?}", parent);
                    match detail {
                        Some(detail) => {
                            self.diags
                                .error_with(summary, detail, Some(capsule.range.clone()))
                        }
                        None => self.diags.error(summary, Some(capsule.range.clone())),
                    }
                    poisoned = true;
                    continue;
                }
            };
            let field = match path.steps().get(1) {
                Some(Step::Attr(field)) => field.clone(),
                _ => {
                    self.diags.error(
                        format!("reference {} does not name a field of {:?}", path, parent),
                        Some(capsule.range.clone()),
                    );
                    poisoned = true;
                    continue;
                }
            };

            let outputs = registered.desc.outputs();
            let inputs = registered.desc.inputs();
            if let Some(out_field) = outputs.by_attr(&field) {
                // Outputs exist only at reconcile time; just typecheck the
                // remainder of the path now.
                let rest = path.rest().rest();
                if let Err(e) = rest.apply_type(&out_field.ty) {
                    self.diags.error_with(
                        format!("invalid reference {}", path),
                        e.to_string(),
                        Some(capsule.range.clone()),
                    );
                    poisoned = true;
                }
                continue;
            }
            if inputs.by_attr(&field).is_some() {
                let parent_input = snapshot.get(&parent).expect("parent is registered");
                let attr_value = match Path::root().attr(field.clone()).apply(parent_input) {
                    Ok(v) => v,
                    Err(e) => {
                        self.diags.error_with(
                            format!("invalid reference {}", path),
                            e.to_string(),
                            Some(capsule.range.clone()),
                        );
                        poisoned = true;
                        continue;
                    }
                };
                if attr_value.contains_capsule() {
                    // The parent is itself still resolving; next pass.
                    continue;
                }
                match path.rest().rest().apply(&attr_value) {
                    Ok(sub) => {
                        *part = Part::Lit(sub);
                        changed = true;
                    }
                    Err(e) => {
                        self.diags.error_with(
                            format!("invalid reference {}", path),
                            e.to_string(),
                            Some(capsule.range.clone()),
                        );
                        poisoned = true;
                    }
                }
                continue;
            }

            let mut candidates: Vec<String> =
                inputs.iter().map(|f| f.attr_name()).collect();
            candidates.extend(outputs.iter().map(|f| f.attr_name()));
            let summary = format!("resource {:?} has no field {:?}", parent, field);
            match did_you_mean(candidates.iter().map(String::as_str), &field) {
                Some(detail) => {
                    self.diags
                        .error_with(summary, detail, Some(capsule.range.clone()))
                }
                None => self.diags.error(summary, Some(capsule.range.clone())),
            }
            poisoned = true;
        }

        if poisoned {
            *progress = true;
            return Some(Value::unknown(declared.clone()));
        }

        let expr = Expression::new(parts).merge_literals();
        if expr.has_references() {
            if changed {
                *progress = true;
                return Some(Value::capsule(
                    Capsule {
                        expr,
                        field: capsule.field.clone(),
                        range: capsule.range.clone(),
                    },
                    declared.clone(),
                ));
            }
            return None;
        }

        // Fully literal: evaluate, convert, validate, and land the value.
        *progress = true;
        let value = match expr.eval(|_| None) {
            Ok(v) => v,
            Err(e) => {
                self.diags
                    .error(e.to_string(), Some(capsule.range.clone()));
                return Some(Value::unknown(declared.clone()));
            }
        };
        let converted = self.convert_to(value, declared, &capsule.range);
        if let Some(rule) = field_rule(types.get(owner), &capsule.field) {
            if let Err(e) = self.validator.validate(&converted, &rule) {
                self.diags
                    .error(e.to_string(), Some(capsule.range.clone()));
            }
        }
        Some(converted)
    }

    // ─── Phase 3: strip capsules, build the graph ───────────────────────────

    fn finish(&mut self, drafts: Vec<ResourceDraft>) -> Option<Graph> {
        let mut graph = Graph::new();
        let mut edges: Vec<(String, Vec<Capsule>)> = Vec::new();

        for draft in drafts {
            let mut pending: Vec<Capsule> = Vec::new();
            let input = draft.input.transform(&mut |_, v| {
                let capsule = v.as_capsule()?;
                pending.push(capsule.clone());
                Some(Value::unknown(v.ty().clone()))
            });
            debug!(
                resource = draft.name.as_str(),
                r#type = draft.type_name.as_str(),
                dependencies = pending.len(),
                "decoded resource"
            );
            let resource = Resource {
                name: draft.name.clone(),
                resource_type: draft.type_name,
                input,
                output: Value::unknown(draft.registered.desc.outputs().cty_type()),
                sources: draft.sources,
                deps: draft.parents,
            };
            if let Err(e) = graph.add_resource(resource) {
                self.diags.error(e.to_string(), Some(draft.range.clone()));
                continue;
            }
            if !pending.is_empty() {
                edges.push((draft.name, pending));
            }
        }

        for (name, capsules) in edges {
            for capsule in capsules {
                let range = capsule.range.clone();
                let dep = Dependency {
                    field: capsule.field,
                    expr: capsule.expr,
                };
                if let Err(e) = graph.add_dependency(&name, dep) {
                    self.diags.error(e.to_string(), Some(range));
                }
            }
        }

        if self.diags.has_errors() {
            None
        } else {
            Some(graph)
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

enum Shape<'t> {
    /// Object-typed field, written as one nested block.
    Single(&'t BTreeMap<String, Type>),
    /// List-of-object field, written as repeated nested blocks.
    Repeated(&'t BTreeMap<String, Type>),
    /// Everything else, written as an attribute.
    Attribute,
}

fn block_shape(ty: &Type) -> Shape<'_> {
    match ty {
        Type::Object(shape) => Shape::Single(shape),
        Type::List(elem) => match elem.as_ref() {
            Type::Object(shape) => Shape::Repeated(shape),
            _ => Shape::Attribute,
        },
        _ => Shape::Attribute,
    }
}

/// The validation rule of the top-level field a capture path lands in.
fn field_rule(registered: Option<&Arc<RegisteredType>>, capture: &Path) -> Option<String> {
    let registered = registered?;
    let attr = capture.leading_attr()?;
    registered
        .desc
        .inputs()
        .by_attr(attr)
        .and_then(|f| f.validate.clone())
}

/// Builds the expression for a reference-bearing scalar. References buried
/// inside tuple or object constructors have no flat-expression form.
fn build_expression(expr: &Expr) -> Result<Expression, String> {
    match expr {
        Expr::Ref(path) => Ok(Expression::reference(path.clone())),
        Expr::String(parts) => Ok(Expression::new(
            parts
                .iter()
                .map(|p| match p {
                    TplPart::Lit(s) => Part::Lit(Value::string(s.clone())),
                    TplPart::Ref(path) => Part::Ref(path.clone()),
                })
                .collect(),
        )),
        Expr::Tuple(_) | Expr::Object(_) => {
            Err("references are only supported in scalar attribute values".to_string())
        }
        _ => Err("expression has no references".to_string()),
    }
}

/// Evaluates a reference-free expression to a value. Collections infer
/// tuple/object types; conversion to the declared field type happens after.
fn const_value(expr: &Expr) -> Result<Value, String> {
    match expr {
        Expr::Null => Ok(Value::null_any()),
        Expr::Bool(b) => Ok(Value::bool(*b)),
        Expr::Number(n) => Ok(Value::number(n.clone())),
        Expr::String(parts) => {
            let mut s = String::new();
            for part in parts {
                match part {
                    TplPart::Lit(text) => s.push_str(text),
                    TplPart::Ref(path) => {
                        return Err(format!("unexpected reference {} in constant", path))
                    }
                }
            }
            Ok(Value::string(s))
        }
        Expr::Tuple(items) => Ok(Value::tuple(
            items.iter().map(const_value).collect::<Result<_, _>>()?,
        )),
        Expr::Object(entries) => Ok(Value::object(
            entries
                .iter()
                .map(|(k, v)| const_value(v).map(|v| (k.clone(), v)))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Expr::Ref(path) => Err(format!("unexpected reference {} in constant", path)),
    }
}
