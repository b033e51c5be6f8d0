pub mod convert;
pub mod hash;
pub mod json;
pub mod path;

use std::collections::BTreeMap;
use std::fmt;

use bigdecimal::BigDecimal;
use thiserror::Error;

use crate::config::syntax::SrcRange;
use crate::expr::Expression;

pub use self::convert::{convert, Safety};
pub use self::hash::hash;
pub use self::path::{Index, Path, Step};

// ─── Type ───────────────────────────────────────────────────────────────────

/// The type of a [`Value`].
///
/// Collection element types are homogeneous; object and tuple types record
/// their full shape. `DynamicPseudo` is reserved and never materializes as a
/// concrete value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Bool,
    Number,
    String,
    List(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>),
    Object(BTreeMap<String, Type>),
    Tuple(Vec<Type>),
    Null,
    DynamicPseudo,
}

impl Type {
    /// Element type of a list, set, or map.
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::List(t) | Type::Set(t) | Type::Map(t) => Some(t),
            _ => None,
        }
    }

    /// Attribute type of an object member.
    pub fn attribute_type(&self, name: &str) -> Option<&Type> {
        match self {
            Type::Object(attrs) => attrs.get(name),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Type::Object(_))
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Type::List(_) | Type::Set(_) | Type::Map(_))
    }

    /// Shorthand for an object type from attribute pairs.
    pub fn object<I, S>(attrs: I) -> Type
    where
        I: IntoIterator<Item = (S, Type)>,
        S: Into<String>,
    {
        Type::Object(attrs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list(elem: Type) -> Type {
        Type::List(Box::new(elem))
    }

    pub fn set(elem: Type) -> Type {
        Type::Set(Box::new(elem))
    }

    pub fn map(elem: Type) -> Type {
        Type::Map(Box::new(elem))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Number => write!(f, "number"),
            Type::String => write!(f, "string"),
            Type::List(t) => write!(f, "list({})", t),
            Type::Set(t) => write!(f, "set({})", t),
            Type::Map(t) => write!(f, "map({})", t),
            Type::Object(attrs) => {
                write!(f, "object({{")?;
                for (i, (k, v)) in attrs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                write!(f, "}})")
            }
            Type::Tuple(elems) => {
                write!(f, "tuple([")?;
                for (i, t) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, "])")
            }
            Type::Null => write!(f, "null"),
            Type::DynamicPseudo => write!(f, "dynamic"),
        }
    }
}

// ─── Value ──────────────────────────────────────────────────────────────────

/// An unresolved expression smuggled through a value tree during decoding.
///
/// Capsules exist only inside the decoder's working graph; static resolution
/// strips every one of them before the graph is handed to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct Capsule {
    /// The unresolved expression.
    pub expr: Expression,
    /// Path of the field the expression is destined for.
    pub field: Path,
    /// Where the expression was written.
    pub range: SrcRange,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Kind {
    Bool(bool),
    Number(BigDecimal),
    String(String),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(BTreeMap<String, Value>),
    Tuple(Vec<Value>),
    Null,
    Unknown,
    Capsule(Box<Capsule>),
}

/// A value together with its [`Type`].
///
/// A value is either a concrete instance of its type, a typed null, or a
/// typed unknown. Unknowns propagate: any composite containing an unknown is
/// reported as not wholly known.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub(crate) ty: Type,
    pub(crate) kind: Kind,
}

/// Error constructing or projecting a value.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("bad path {path}: {reason}")]
pub struct PathError {
    /// Prefix of the path up to and including the failing step.
    pub path: Path,
    pub reason: String,
}

impl PathError {
    pub fn new(path: Path, reason: impl Into<String>) -> Self {
        Self {
            path,
            reason: reason.into(),
        }
    }
}

impl Value {
    // ─── Constructors ───────────────────────────────────────────────────────

    pub fn bool(b: bool) -> Value {
        Value {
            ty: Type::Bool,
            kind: Kind::Bool(b),
        }
    }

    pub fn number(n: impl Into<BigDecimal>) -> Value {
        Value {
            ty: Type::Number,
            kind: Kind::Number(n.into()),
        }
    }

    pub fn int(n: i64) -> Value {
        Value::number(BigDecimal::from(n))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value {
            ty: Type::String,
            kind: Kind::String(s.into()),
        }
    }

    /// A list of `elem`-typed values. Fails on a heterogeneous element.
    pub fn list(elem: Type, items: Vec<Value>) -> Result<Value, PathError> {
        for (i, item) in items.iter().enumerate() {
            if item.ty != elem {
                return Err(PathError::new(
                    Path::root().index_num(i),
                    format!("list element is {}, want {}", item.ty, elem),
                ));
            }
        }
        Ok(Value {
            ty: Type::List(Box::new(elem)),
            kind: Kind::List(items),
        })
    }

    /// A set of `elem`-typed values; duplicates (by structural equality) are
    /// dropped, first appearance wins.
    pub fn set(elem: Type, items: Vec<Value>) -> Result<Value, PathError> {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            if item.ty != elem {
                return Err(PathError::new(
                    Path::root().index_num(i),
                    format!("set element is {}, want {}", item.ty, elem),
                ));
            }
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        Ok(Value {
            ty: Type::Set(Box::new(elem)),
            kind: Kind::Set(unique),
        })
    }

    pub fn map(elem: Type, entries: BTreeMap<String, Value>) -> Result<Value, PathError> {
        for (k, v) in &entries {
            if v.ty != elem {
                return Err(PathError::new(
                    Path::root().index_str(k.clone()),
                    format!("map element is {}, want {}", v.ty, elem),
                ));
            }
        }
        Ok(Value {
            ty: Type::Map(Box::new(elem)),
            kind: Kind::Map(entries),
        })
    }

    /// An object value; the object type is derived from the attribute values.
    pub fn object<I, S>(attrs: I) -> Value
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let attrs: BTreeMap<String, Value> =
            attrs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let ty = Type::Object(attrs.iter().map(|(k, v)| (k.clone(), v.ty.clone())).collect());
        Value {
            ty,
            kind: Kind::Object(attrs),
        }
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        let ty = Type::Tuple(items.iter().map(|v| v.ty.clone()).collect());
        Value {
            ty,
            kind: Kind::Tuple(items),
        }
    }

    /// The untyped null (a null of type `Null`).
    pub fn null_any() -> Value {
        Value::null(Type::Null)
    }

    /// A null of the given type.
    pub fn null(ty: Type) -> Value {
        Value {
            ty,
            kind: Kind::Null,
        }
    }

    /// A typed placeholder for a value not yet determined.
    pub fn unknown(ty: Type) -> Value {
        Value {
            ty,
            kind: Kind::Unknown,
        }
    }

    pub(crate) fn capsule(capsule: Capsule, ty: Type) -> Value {
        Value {
            ty,
            kind: Kind::Capsule(Box::new(capsule)),
        }
    }

    // ─── Inspection ─────────────────────────────────────────────────────────

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, Kind::Null)
    }

    /// False for unknowns and capsules; composites are known even when their
    /// elements are not (see [`Value::is_wholly_known`]).
    pub fn is_known(&self) -> bool {
        !matches!(self.kind, Kind::Unknown | Kind::Capsule(_))
    }

    /// Recursive knownness: true only when no unknown hides anywhere inside.
    pub fn is_wholly_known(&self) -> bool {
        match &self.kind {
            Kind::Unknown | Kind::Capsule(_) => false,
            Kind::List(items) | Kind::Set(items) | Kind::Tuple(items) => {
                items.iter().all(Value::is_wholly_known)
            }
            Kind::Map(entries) | Kind::Object(entries) => {
                entries.values().all(Value::is_wholly_known)
            }
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.kind {
            Kind::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            Kind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&BigDecimal> {
        match &self.kind {
            Kind::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.kind {
            Kind::Object(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub(crate) fn as_capsule(&self) -> Option<&Capsule> {
        match &self.kind {
            Kind::Capsule(c) => Some(c),
            _ => None,
        }
    }

    /// Elements of a list, set, or tuple.
    pub fn elements(&self) -> Option<&[Value]> {
        match &self.kind {
            Kind::List(items) | Kind::Set(items) | Kind::Tuple(items) => Some(items),
            _ => None,
        }
    }

    // ─── Equality ───────────────────────────────────────────────────────────

    /// Structural equality: types and contents must match exactly. Nulls of
    /// the same type are equal; unknowns of the same type are equal.
    pub fn raw_equals(&self, other: &Value) -> bool {
        self == other
    }

    /// Unknown-aware equality, lifted into the value domain: comparing
    /// anything not wholly known yields an unknown bool.
    pub fn equals(&self, other: &Value) -> Value {
        if !self.is_wholly_known() || !other.is_wholly_known() {
            return Value::unknown(Type::Bool);
        }
        Value::bool(self.raw_equals(other))
    }

    // ─── Traversal ──────────────────────────────────────────────────────────

    /// Depth-first visit of every sub-value, parents before children.
    pub fn walk<F>(&self, f: &mut F)
    where
        F: FnMut(&Path, &Value),
    {
        self.walk_at(&Path::root(), f)
    }

    fn walk_at<F>(&self, at: &Path, f: &mut F)
    where
        F: FnMut(&Path, &Value),
    {
        f(at, self);
        match &self.kind {
            Kind::List(items) | Kind::Set(items) | Kind::Tuple(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.walk_at(&at.clone().index_num(i), f);
                }
            }
            Kind::Map(entries) | Kind::Object(entries) => {
                for (k, v) in entries {
                    let step = if matches!(self.kind, Kind::Object(_)) {
                        at.clone().attr(k.clone())
                    } else {
                        at.clone().index_str(k.clone())
                    };
                    v.walk_at(&step, f);
                }
            }
            _ => {}
        }
    }

    /// Depth-first rewrite. `f` sees `(path, sub-value)`; returning `Some`
    /// replaces the sub-tree without descending further, `None` keeps it and
    /// recurses. The value's type follows the replacements.
    pub fn transform<F>(&self, f: &mut F) -> Value
    where
        F: FnMut(&Path, &Value) -> Option<Value>,
    {
        self.transform_at(&Path::root(), f)
    }

    fn transform_at<F>(&self, at: &Path, f: &mut F) -> Value
    where
        F: FnMut(&Path, &Value) -> Option<Value>,
    {
        if let Some(replacement) = f(at, self) {
            return replacement;
        }
        match &self.kind {
            Kind::List(items) => {
                let items: Vec<Value> = items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| v.transform_at(&at.clone().index_num(i), f))
                    .collect();
                let elem = items
                    .first()
                    .map(|v| v.ty.clone())
                    .or_else(|| self.ty.element_type().cloned())
                    .unwrap_or(Type::DynamicPseudo);
                Value {
                    ty: Type::List(Box::new(elem)),
                    kind: Kind::List(items),
                }
            }
            Kind::Set(items) => {
                let items: Vec<Value> = items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| v.transform_at(&at.clone().index_num(i), f))
                    .collect();
                let elem = items
                    .first()
                    .map(|v| v.ty.clone())
                    .or_else(|| self.ty.element_type().cloned())
                    .unwrap_or(Type::DynamicPseudo);
                Value {
                    ty: Type::Set(Box::new(elem)),
                    kind: Kind::Set(items),
                }
            }
            Kind::Tuple(items) => Value::tuple(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| v.transform_at(&at.clone().index_num(i), f))
                    .collect(),
            ),
            Kind::Map(entries) => {
                let entries: BTreeMap<String, Value> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.transform_at(&at.clone().index_str(k.clone()), f)))
                    .collect();
                let elem = entries
                    .values()
                    .next()
                    .map(|v| v.ty.clone())
                    .or_else(|| self.ty.element_type().cloned())
                    .unwrap_or(Type::DynamicPseudo);
                Value {
                    ty: Type::Map(Box::new(elem)),
                    kind: Kind::Map(entries),
                }
            }
            Kind::Object(entries) => Value::object(
                entries
                    .iter()
                    .map(|(k, v)| {
                        (k.clone(), v.transform_at(&at.clone().attr(k.clone()), f))
                    })
                    .collect::<Vec<_>>(),
            ),
            _ => self.clone(),
        }
    }

    /// True when a capsule hides anywhere in the tree.
    pub(crate) fn contains_capsule(&self) -> bool {
        let mut found = false;
        self.walk(&mut |_, v| {
            if matches!(v.kind, Kind::Capsule(_)) {
                found = true;
            }
        });
        found
    }
}

/// Displays values through their canonical JSON form; unknowns render as
/// `(unknown)` since the wire projection to null would be misleading in logs.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Unknown => write!(f, "(unknown)"),
            Kind::Capsule(_) => write!(f, "(expression)"),
            _ => write!(f, "{}", json::encode(self)),
        }
    }
}
