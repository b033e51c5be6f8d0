//! Conversion between the value algebra and native records.
//!
//! Handlers speak JSON records keyed by native field names; the graph speaks
//! [`Value`] objects keyed by external attribute names. The bridge maps
//! between the two through a [`FieldSet`], with attribute-name resolution
//! delegated to a pluggable namer.

use crate::value::json::{self, NullAs};
use crate::value::{Path, PathError, Value};

use super::{default_namer, FieldDef, FieldSet, Role};

/// Builds the native record for a value, keyed by native field names.
///
/// The value must be an object shaped like `fields.cty_type()`; unknown
/// sub-values cross over as JSON null. A null or unknown object yields an
/// all-null record.
pub fn to_native(value: &Value, fields: &FieldSet) -> Result<serde_json::Value, PathError> {
    to_native_with(value, fields, &default_namer)
}

/// [`to_native`] with a caller-supplied attribute namer.
pub fn to_native_with<F>(
    value: &Value,
    fields: &FieldSet,
    namer: &F,
) -> Result<serde_json::Value, PathError>
where
    F: Fn(&FieldDef) -> String + ?Sized,
{
    let mut record = serde_json::Map::with_capacity(fields.len());
    if !value.is_known() || value.is_null() {
        for field in fields.iter() {
            record.insert(field.native_name.clone(), serde_json::Value::Null);
        }
        return Ok(serde_json::Value::Object(record));
    }
    let attrs = value.as_object().ok_or_else(|| {
        PathError::new(
            Path::root(),
            format!("native record needs an object, got {}", value.ty()),
        )
    })?;
    for field in fields.iter() {
        let attr = namer(field);
        let encoded = match attrs.get(&attr) {
            Some(v) => json::encode(v),
            None => serde_json::Value::Null,
        };
        record.insert(field.native_name.clone(), encoded);
    }
    Ok(serde_json::Value::Object(record))
}

/// Rebuilds a value object from a native record, keyed by external attribute
/// names. Nulls in output-role fields are revived as unknowns — the native
/// form cannot express "not yet determined" any other way.
pub fn from_native(record: &serde_json::Value, fields: &FieldSet) -> Result<Value, PathError> {
    from_native_with(record, fields, &default_namer)
}

/// [`from_native`] with a caller-supplied attribute namer.
pub fn from_native_with<F>(
    record: &serde_json::Value,
    fields: &FieldSet,
    namer: &F,
) -> Result<Value, PathError>
where
    F: Fn(&FieldDef) -> String + ?Sized,
{
    let obj = record.as_object().ok_or_else(|| {
        PathError::new(Path::root(), "native record is not a JSON object".to_string())
    })?;
    let mut attrs: Vec<(String, Value)> = Vec::with_capacity(fields.len());
    for field in fields.iter() {
        let attr = namer(field);
        let raw = obj.get(&field.native_name).unwrap_or(&serde_json::Value::Null);
        let null_as = match field.role {
            Role::Output => NullAs::Unknown,
            Role::Input => NullAs::Null,
        };
        let decoded = json::decode(raw, &field.ty, null_as).map_err(|e| {
            PathError::new(
                Path::root().attr(attr.clone()),
                format!("field {:?}: {}", field.native_name, e),
            )
        })?;
        attrs.push((attr, decoded));
    }
    Ok(Value::object(attrs))
}
