use std::collections::BTreeMap;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use thiserror::Error;

use super::{Kind, Path, Type, Value};

/// Whether a conversion preserved the value exactly or may lose information
/// (or fail) on some inputs. The decoder surfaces lossy conversions as
/// warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Safety {
    Safe,
    Lossy,
}

impl Safety {
    fn and(self, other: Safety) -> Safety {
        if self == Safety::Lossy || other == Safety::Lossy {
            Safety::Lossy
        } else {
            Safety::Safe
        }
    }
}

/// A requested conversion is not possible for the given value/type pair.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ConversionError {
    pub from: Type,
    pub to: Type,
    pub path: Path,
    pub detail: Option<String>,
}

impl std::fmt::Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot convert {} to {}", self.from, self.to)?;
        if !self.path.is_empty() {
            write!(f, " at {}", self.path)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

impl ConversionError {
    fn new(from: &Type, to: &Type) -> Self {
        Self {
            from: from.clone(),
            to: to.clone(),
            path: Path::root(),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn at(mut self, path: Path) -> Self {
        self.path = path;
        self
    }
}

/// Converts `value` to `target`, reporting whether the conversion was safe.
///
/// Identity is always safe. Nulls and unknowns retype freely. Promotions
/// (number→string, bool→string, tuple→list, object→map, set→list) are safe;
/// string→number, string→bool, and list→set (deduplication) are lossy.
/// Illegal combinations fail fast with the path of the failure site.
pub fn convert(value: &Value, target: &Type) -> Result<(Value, Safety), ConversionError> {
    convert_at(value, target, &Path::root())
}

fn convert_at(
    value: &Value,
    target: &Type,
    at: &Path,
) -> Result<(Value, Safety), ConversionError> {
    if value.ty() == target {
        return Ok((value.clone(), Safety::Safe));
    }
    if *target == Type::DynamicPseudo {
        return Err(ConversionError::new(value.ty(), target)
            .with_detail("the dynamic pseudo-type cannot be materialized")
            .at(at.clone()));
    }
    match &value.kind {
        Kind::Null => return Ok((Value::null(target.clone()), Safety::Safe)),
        Kind::Unknown => return Ok((Value::unknown(target.clone()), Safety::Safe)),
        _ => {}
    }

    let err = || ConversionError::new(value.ty(), target).at(at.clone());

    match (&value.kind, target) {
        (Kind::Number(n), Type::String) => {
            Ok((Value::string(render_number(n)), Safety::Safe))
        }
        (Kind::Bool(b), Type::String) => Ok((
            Value::string(if *b { "true" } else { "false" }),
            Safety::Safe,
        )),
        (Kind::String(s), Type::Number) => match BigDecimal::from_str(s.trim()) {
            Ok(n) => Ok((Value::number(n), Safety::Lossy)),
            Err(_) => Err(err().with_detail(format!("{:?} is not a number", s))),
        },
        (Kind::String(s), Type::Bool) => match s.as_str() {
            "true" => Ok((Value::bool(true), Safety::Lossy)),
            "false" => Ok((Value::bool(false), Safety::Lossy)),
            _ => Err(err().with_detail(format!("{:?} is not a bool", s))),
        },
        (Kind::Tuple(items), Type::List(elem)) => {
            let mut out = Vec::with_capacity(items.len());
            let mut safety = Safety::Safe;
            for (i, item) in items.iter().enumerate() {
                let (v, s) = convert_at(item, elem, &at.clone().index_num(i))?;
                safety = safety.and(s);
                out.push(v);
            }
            Ok((
                Value {
                    ty: Type::List(elem.clone()),
                    kind: Kind::List(out),
                },
                safety,
            ))
        }
        (Kind::Tuple(items), Type::Set(elem)) => {
            let mut out = Vec::with_capacity(items.len());
            let mut safety = Safety::Safe;
            for (i, item) in items.iter().enumerate() {
                let (v, s) = convert_at(item, elem, &at.clone().index_num(i))?;
                safety = safety.and(s);
                if !out.contains(&v) {
                    out.push(v);
                }
            }
            Ok((
                Value {
                    ty: Type::Set(elem.clone()),
                    kind: Kind::Set(out),
                },
                // Deduplication can drop elements.
                safety.and(Safety::Lossy),
            ))
        }
        (Kind::List(items), Type::Set(elem)) => {
            let mut out = Vec::with_capacity(items.len());
            let mut safety = Safety::Safe;
            for (i, item) in items.iter().enumerate() {
                let (v, s) = convert_at(item, elem, &at.clone().index_num(i))?;
                safety = safety.and(s);
                if !out.contains(&v) {
                    out.push(v);
                }
            }
            Ok((
                Value {
                    ty: Type::Set(elem.clone()),
                    kind: Kind::Set(out),
                },
                safety.and(Safety::Lossy),
            ))
        }
        (Kind::Set(items), Type::List(elem)) => {
            let mut out = Vec::with_capacity(items.len());
            let mut safety = Safety::Safe;
            for (i, item) in items.iter().enumerate() {
                let (v, s) = convert_at(item, elem, &at.clone().index_num(i))?;
                safety = safety.and(s);
                out.push(v);
            }
            Ok((
                Value {
                    ty: Type::List(elem.clone()),
                    kind: Kind::List(out),
                },
                safety,
            ))
        }
        (Kind::List(items), Type::List(elem)) => {
            let mut out = Vec::with_capacity(items.len());
            let mut safety = Safety::Safe;
            for (i, item) in items.iter().enumerate() {
                let (v, s) = convert_at(item, elem, &at.clone().index_num(i))?;
                safety = safety.and(s);
                out.push(v);
            }
            Ok((
                Value {
                    ty: Type::List(elem.clone()),
                    kind: Kind::List(out),
                },
                safety,
            ))
        }
        (Kind::Object(attrs), Type::Map(elem)) => {
            let mut out = BTreeMap::new();
            let mut safety = Safety::Safe;
            for (k, v) in attrs {
                let (v, s) = convert_at(v, elem, &at.clone().index_str(k.clone()))?;
                safety = safety.and(s);
                out.insert(k.clone(), v);
            }
            Ok((
                Value {
                    ty: Type::Map(elem.clone()),
                    kind: Kind::Map(out),
                },
                safety,
            ))
        }
        (Kind::Object(attrs), Type::Object(shape)) => {
            let mut out = BTreeMap::new();
            let mut safety = Safety::Safe;
            for (k, want) in shape {
                match attrs.get(k) {
                    Some(v) => {
                        let (v, s) = convert_at(v, want, &at.clone().attr(k.clone()))?;
                        safety = safety.and(s);
                        out.insert(k.clone(), v);
                    }
                    None => {
                        return Err(err().with_detail(format!("missing attribute {:?}", k)))
                    }
                }
            }
            Ok((
                Value {
                    ty: target.clone(),
                    kind: Kind::Object(out),
                },
                safety,
            ))
        }
        _ => Err(err()),
    }
}

/// Canonical text form of a number: trailing zeros trimmed, no exponent for
/// the ranges this engine deals in.
pub fn render_number(n: &BigDecimal) -> String {
    n.normalized().to_string()
}
