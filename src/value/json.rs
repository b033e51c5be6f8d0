use std::collections::BTreeMap;
use std::str::FromStr;

use bigdecimal::BigDecimal;

use super::convert::{render_number, ConversionError};
use super::{Kind, Path, Type, Value};

// ─── Encoding ───────────────────────────────────────────────────────────────

/// Canonical JSON form of a value. Nulls and unknowns both render as JSON
/// null (the type hint revives unknowns on decode); numbers keep their full
/// precision.
pub fn encode(value: &Value) -> serde_json::Value {
    match &value.kind {
        Kind::Bool(b) => serde_json::Value::Bool(*b),
        Kind::Number(n) => number_to_json(n),
        Kind::String(s) => serde_json::Value::String(s.clone()),
        Kind::List(items) | Kind::Set(items) | Kind::Tuple(items) => {
            serde_json::Value::Array(items.iter().map(encode).collect())
        }
        Kind::Map(entries) | Kind::Object(entries) => serde_json::Value::Object(
            entries.iter().map(|(k, v)| (k.clone(), encode(v))).collect(),
        ),
        Kind::Null | Kind::Unknown | Kind::Capsule(_) => serde_json::Value::Null,
    }
}

fn number_to_json(n: &BigDecimal) -> serde_json::Value {
    let text = render_number(n);
    match serde_json::from_str::<serde_json::Number>(&text) {
        Ok(num) => serde_json::Value::Number(num),
        // Unreachable for any decimal this engine produces; fall back to the
        // textual form rather than lose the value.
        Err(_) => serde_json::Value::String(text),
    }
}

// ─── Decoding against a type hint ───────────────────────────────────────────

/// How JSON nulls decode: as typed nulls (inputs) or as unknowns (outputs,
/// where the wire form projected unknowns to null).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullAs {
    Null,
    Unknown,
}

/// Decodes a canonical JSON value against its declared type.
pub fn decode(
    json: &serde_json::Value,
    ty: &Type,
    null_as: NullAs,
) -> Result<Value, ConversionError> {
    decode_at(json, ty, null_as, &Path::root())
}

fn decode_at(
    json: &serde_json::Value,
    ty: &Type,
    null_as: NullAs,
    at: &Path,
) -> Result<Value, ConversionError> {
    let err = |detail: String| ConversionError {
        from: Type::DynamicPseudo,
        to: ty.clone(),
        path: at.clone(),
        detail: Some(detail),
    };

    if json.is_null() {
        return Ok(match null_as {
            NullAs::Null => Value::null(ty.clone()),
            NullAs::Unknown => Value::unknown(ty.clone()),
        });
    }

    match ty {
        Type::Bool => json
            .as_bool()
            .map(Value::bool)
            .ok_or_else(|| err(format!("{} is not a bool", json))),
        Type::Number => match json {
            serde_json::Value::Number(n) => BigDecimal::from_str(&n.to_string())
                .map(Value::number)
                .map_err(|e| err(format!("unreadable number: {}", e))),
            other => Err(err(format!("{} is not a number", other))),
        },
        Type::String => json
            .as_str()
            .map(Value::string)
            .ok_or_else(|| err(format!("{} is not a string", json))),
        Type::List(elem) => {
            let arr = json
                .as_array()
                .ok_or_else(|| err(format!("{} is not an array", json)))?;
            let mut items = Vec::with_capacity(arr.len());
            for (i, item) in arr.iter().enumerate() {
                items.push(decode_at(item, elem, null_as, &at.clone().index_num(i))?);
            }
            Ok(Value {
                ty: ty.clone(),
                kind: Kind::List(items),
            })
        }
        Type::Set(elem) => {
            let arr = json
                .as_array()
                .ok_or_else(|| err(format!("{} is not an array", json)))?;
            let mut items: Vec<Value> = Vec::with_capacity(arr.len());
            for (i, item) in arr.iter().enumerate() {
                let v = decode_at(item, elem, null_as, &at.clone().index_num(i))?;
                if !items.contains(&v) {
                    items.push(v);
                }
            }
            Ok(Value {
                ty: ty.clone(),
                kind: Kind::Set(items),
            })
        }
        Type::Map(elem) => {
            let obj = json
                .as_object()
                .ok_or_else(|| err(format!("{} is not an object", json)))?;
            let mut entries = BTreeMap::new();
            for (k, v) in obj {
                entries.insert(
                    k.clone(),
                    decode_at(v, elem, null_as, &at.clone().index_str(k.clone()))?,
                );
            }
            Ok(Value {
                ty: ty.clone(),
                kind: Kind::Map(entries),
            })
        }
        Type::Object(shape) => {
            let obj = json
                .as_object()
                .ok_or_else(|| err(format!("{} is not an object", json)))?;
            let mut entries = BTreeMap::new();
            for (k, attr_ty) in shape {
                let v = obj.get(k).unwrap_or(&serde_json::Value::Null);
                entries.insert(
                    k.clone(),
                    decode_at(v, attr_ty, null_as, &at.clone().attr(k.clone()))?,
                );
            }
            Ok(Value {
                ty: ty.clone(),
                kind: Kind::Object(entries),
            })
        }
        Type::Tuple(elems) => {
            let arr = json
                .as_array()
                .ok_or_else(|| err(format!("{} is not an array", json)))?;
            if arr.len() != elems.len() {
                return Err(err(format!(
                    "tuple length {} does not match {}",
                    arr.len(),
                    elems.len()
                )));
            }
            let mut items = Vec::with_capacity(arr.len());
            for (i, (item, elem_ty)) in arr.iter().zip(elems).enumerate() {
                items.push(decode_at(item, elem_ty, null_as, &at.clone().index_num(i))?);
            }
            Ok(Value::tuple(items))
        }
        Type::Null => Ok(Value::null_any()),
        Type::DynamicPseudo => Err(err("the dynamic pseudo-type holds no values".to_string())),
    }
}

// ─── Decoding without a hint ────────────────────────────────────────────────

/// Decodes arbitrary JSON into a value by structural inference: arrays become
/// tuples, objects become objects. Used for expression literals on the wire,
/// which carry no separate type record.
pub fn infer(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::null_any(),
        serde_json::Value::Bool(b) => Value::bool(*b),
        serde_json::Value::Number(n) => BigDecimal::from_str(&n.to_string())
            .map(Value::number)
            .unwrap_or_else(|_| Value::string(n.to_string())),
        serde_json::Value::String(s) => Value::string(s.clone()),
        serde_json::Value::Array(items) => Value::tuple(items.iter().map(infer).collect()),
        serde_json::Value::Object(entries) => {
            Value::object(entries.iter().map(|(k, v)| (k.clone(), infer(v))).collect::<Vec<_>>())
        }
    }
}
