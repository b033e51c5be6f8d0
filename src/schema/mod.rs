//! Schema descriptors for resource types.
//!
//! The engine never inspects handler-side record shapes at runtime; a
//! [`TypeDescriptor`] is built explicitly at registration time and carries
//! everything the decoder and bridge need: field names, value types, roles,
//! and validation rules.

pub mod bridge;
pub mod validate;

use crate::value::Type;

// ─── Fields ─────────────────────────────────────────────────────────────────

/// Whether a field is declared by the user or produced by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Input,
    Output,
}

/// A single field of a resource type's native record.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Position in the declaring [`FieldSet`], stable across filtering.
    pub index: usize,
    /// Name of the field in the native record, typically camelCase.
    pub native_name: String,
    /// Explicit external attribute name, overriding snake_case derivation.
    pub alias: Option<String>,
    pub ty: Type,
    pub role: Role,
    pub required: bool,
    /// Validation rule expression, e.g. `gte=1,lte=10` or `arn`.
    pub validate: Option<String>,
}

impl FieldDef {
    pub fn input(native_name: impl Into<String>, ty: Type) -> FieldDef {
        FieldDef {
            index: 0,
            native_name: native_name.into(),
            alias: None,
            ty,
            role: Role::Input,
            required: false,
            validate: None,
        }
    }

    pub fn output(native_name: impl Into<String>, ty: Type) -> FieldDef {
        FieldDef {
            role: Role::Output,
            ..FieldDef::input(native_name, ty)
        }
    }

    pub fn required(mut self) -> FieldDef {
        self.required = true;
        self
    }

    pub fn alias(mut self, name: impl Into<String>) -> FieldDef {
        self.alias = Some(name.into());
        self
    }

    pub fn validate(mut self, rule: impl Into<String>) -> FieldDef {
        self.validate = Some(rule.into());
        self
    }

    /// External attribute name under the default namer.
    pub fn attr_name(&self) -> String {
        default_namer(self)
    }
}

/// The default attribute namer: explicit alias if present, otherwise
/// snake_case derived from the camelCase native name. The bridge accepts
/// any `Fn(&FieldDef) -> String` in its place.
pub fn default_namer(field: &FieldDef) -> String {
    match &field.alias {
        Some(alias) => alias.clone(),
        None => snake_case(&field.native_name),
    }
}

/// Derives snake_case from a camelCase identifier. A run of consecutive
/// uppercase letters is one token, except that the run's last letter starts
/// the next token when a lowercase letter follows it (`HTTPServer` →
/// `http_server`, `instanceARN` → `instance_arn`).
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && !chars[i - 1].is_uppercase();
            let next_lower = chars
                .get(i + 1)
                .map(|n| n.is_lowercase())
                .unwrap_or(false);
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if !out.is_empty() && (prev_lower || (prev_upper && next_lower)) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

// ─── FieldSet ───────────────────────────────────────────────────────────────

/// An ordered collection of fields describing one resource type's record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldSet {
    fields: Vec<FieldDef>,
}

impl FieldSet {
    pub fn new(fields: Vec<FieldDef>) -> FieldSet {
        let fields = fields
            .into_iter()
            .enumerate()
            .map(|(i, mut f)| {
                f.index = i;
                f
            })
            .collect();
        FieldSet { fields }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The input-role subset, indices preserved.
    pub fn inputs(&self) -> FieldSet {
        FieldSet {
            fields: self
                .fields
                .iter()
                .filter(|f| f.role == Role::Input)
                .cloned()
                .collect(),
        }
    }

    /// The output-role subset, indices preserved.
    pub fn outputs(&self) -> FieldSet {
        FieldSet {
            fields: self
                .fields
                .iter()
                .filter(|f| f.role == Role::Output)
                .cloned()
                .collect(),
        }
    }

    /// Finds a field by its external attribute name under the default namer.
    pub fn by_attr(&self, attr: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.attr_name() == attr)
    }

    /// Flattens the set into the corresponding object type, keyed by
    /// external attribute names.
    pub fn cty_type(&self) -> Type {
        Type::Object(
            self.fields
                .iter()
                .map(|f| (f.attr_name(), f.ty.clone()))
                .collect(),
        )
    }
}

// ─── TypeDescriptor ─────────────────────────────────────────────────────────

/// Everything the engine knows about one resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub name: String,
    pub fields: FieldSet,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> TypeDescriptor {
        TypeDescriptor {
            name: name.into(),
            fields: FieldSet::new(fields),
        }
    }

    pub fn inputs(&self) -> FieldSet {
        self.fields.inputs()
    }

    pub fn outputs(&self) -> FieldSet {
        self.fields.outputs()
    }
}
