//! Conversion between typed entities and stored rows.
//!
//! Rows are JSON objects (`serde_json::Value::Object`). Every expression the
//! query layer evaluates runs against this representation, so the shape of a
//! row is exactly what the entity's `Serialize` impl produces.

use crate::entity::Entity;
use crate::error::{Error, Result};
use serde_json::Value;

/// Serialize an entity into a row.
///
/// # Errors
///
/// - `Error::SerializationError`: the entity's `Serialize` impl failed, or it
///   did not produce a JSON object
pub fn to_row<T: Entity>(entity: &T) -> Result<Value> {
    let row = serde_json::to_value(entity)
        .map_err(|e| Error::SerializationError(format!("{}: {}", T::table_name(), e)))?;

    if !row.is_object() {
        return Err(Error::SerializationError(format!(
            "{}: entity must serialize into an object, got {}",
            T::table_name(),
            kind_of(&row)
        )));
    }

    Ok(row)
}

/// Deserialize a stored row into an entity.
///
/// # Errors
///
/// - `Error::DeserializationError`: the row does not match the entity shape
pub fn from_row<T: Entity>(row: Value) -> Result<T> {
    serde_json::from_value(row)
        .map_err(|e| Error::DeserializationError(format!("{}: {}", T::table_name(), e)))
}

/// Human-readable JSON type name, used in error messages.
pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
