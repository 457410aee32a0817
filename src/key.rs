//! Key derivation for count-cache slots and stored rows.

use crate::entity::Entity;
use crate::error::{Error, Result};
use serde_json::Value;

/// Builder for count-cache keys.
///
/// A key is the filter text followed by the filter arguments. "No filter" and
/// the empty filter share a slot: both count the whole table.
pub struct CountKey;

impl CountKey {
    /// Separator between the filter text and its arguments.
    const ARGS_SEPARATOR: char = '\u{1f}';

    /// Derive the cache key for a filter and its positional arguments.
    pub fn derive(filter: Option<&str>, args: &[Value]) -> String {
        let filter = filter.unwrap_or("");
        if args.is_empty() {
            return filter.to_string();
        }

        let rendered: Vec<String> = args.iter().map(Self::render_arg).collect();
        format!("{}{}{}", filter, Self::ARGS_SEPARATOR, rendered.join(","))
    }

    /// Render one argument.
    ///
    /// Scalars use their JSON text (strings stay quoted, so an embedded comma
    /// cannot merge two arguments). Nested values fall back to a structural
    /// rendering that never fails the count request.
    fn render_arg(arg: &Value) -> String {
        match arg {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => arg.to_string(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(arg).unwrap_or_else(|e| {
                    debug!("Count key argument fell back to debug rendering: {}", e);
                    format!("{:?}", arg)
                })
            }
        }
    }
}

/// Builder for row keys used by the store.
pub struct RowKey;

impl RowKey {
    /// Build the store key from an entity key.
    ///
    /// Scalar keys keep their plain text (`42`, `emp_1`); composite (tuple)
    /// keys render as JSON arrays.
    pub fn of<T: Entity>(key: &T::Key) -> Result<String> {
        let value = serde_json::to_value(key)
            .map_err(|e| Error::SerializationError(format!("primary key: {}", e)))?;

        Ok(match value {
            Value::String(s) => s,
            Value::Null => {
                return Err(Error::ValidationError(format!(
                    "primary key of '{}' is null",
                    T::table_name()
                )))
            }
            other => other.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Clone, Serialize, Deserialize)]
    struct Line {
        order_id: i64,
        line_no: i32,
    }

    impl Entity for Line {
        type Key = (i64, i32);

        fn key(&self) -> Self::Key {
            (self.order_id, self.line_no)
        }

        fn table_name() -> &'static str {
            "lines"
        }
    }

    #[test]
    fn test_no_filter_and_empty_filter_share_a_slot() {
        assert_eq!(CountKey::derive(None, &[]), CountKey::derive(Some(""), &[]));
    }

    #[test]
    fn test_same_inputs_same_key() {
        let a = CountKey::derive(Some("Title.Contains(@0)"), &[json!("o")]);
        let b = CountKey::derive(Some("Title.Contains(@0)"), &[json!("o")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_args_different_key() {
        let a = CountKey::derive(Some("Title.Contains(@0)"), &[json!("o")]);
        let b = CountKey::derive(Some("Title.Contains(@0)"), &[json!("a")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_embedded_comma_does_not_collide() {
        let one = CountKey::derive(Some("f"), &[json!("a,b")]);
        let two = CountKey::derive(Some("f"), &[json!("a"), json!("b")]);
        assert_ne!(one, two);
    }

    #[test]
    fn test_string_and_number_args_differ() {
        let s = CountKey::derive(Some("Id == @0"), &[json!("1")]);
        let n = CountKey::derive(Some("Id == @0"), &[json!(1)]);
        assert_ne!(s, n);
    }

    #[test]
    fn test_nested_args_are_rendered_structurally() {
        let key = CountKey::derive(Some("@0.Contains(Id)"), &[json!([1, 2, {"x": 3}])]);
        assert!(key.ends_with(r#"[1,2,{"x":3}]"#));
    }

    #[test]
    fn test_row_key_scalar_and_composite() {
        assert_eq!(RowKey::of::<Line>(&(5, 2)).expect("row key"), "[5,2]");
    }
}
