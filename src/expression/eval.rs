//! Evaluation of expressions against a row.

use super::ast::{BinaryOperator, Expr, UnaryOperator};
use crate::error::{Error, Result};
use crate::serialization::kind_of;
use chrono::{DateTime, FixedOffset};
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Evaluate `expr` against `row`, binding `@n` to `args[n]`.
pub fn evaluate(expr: &Expr, row: &Value, args: &[Value]) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Placeholder(index) => args.get(*index).cloned().ok_or_else(|| {
            Error::QueryError(format!(
                "No argument supplied for @{} ({} given)",
                index,
                args.len()
            ))
        }),
        Expr::Member { target: None, name } => field(row, name)
            .cloned()
            .ok_or_else(|| Error::QueryError(format!("No property or field '{}' exists", name))),
        Expr::Member {
            target: Some(target),
            name,
        } => {
            let target = evaluate(target, row, args)?;
            member_of(&target, name)
        }
        Expr::Method { target, name, args: call_args } => {
            let target = evaluate(target, row, args)?;
            let values = call_args
                .iter()
                .map(|a| evaluate(a, row, args))
                .collect::<Result<Vec<_>>>()?;
            call_method(&target, name, &values)
        }
        Expr::UnaryOp { op, expr } => {
            let value = evaluate(expr, row, args)?;
            match (op, value) {
                (_, Value::Null) => Ok(Value::Null),
                (UnaryOperator::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOperator::Minus, Value::Number(n)) => negate(&n),
                (op, other) => Err(Error::EvaluationError(format!(
                    "Operator {:?} cannot be applied to {}",
                    op,
                    kind_of(&other)
                ))),
            }
        }
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => {
                if !truthy(&evaluate(left, row, args)?)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&evaluate(right, row, args)?)?))
            }
            BinaryOperator::Or => {
                if truthy(&evaluate(left, row, args)?)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&evaluate(right, row, args)?)?))
            }
            _ => {
                let l = evaluate(left, row, args)?;
                let r = evaluate(right, row, args)?;
                binary(*op, &l, &r)
            }
        },
    }
}

/// Interpret a filter result: `null` is "no match", anything non-boolean is an error.
pub fn truthy(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(Error::EvaluationError(format!(
            "Expected a boolean, found {}",
            kind_of(other)
        ))),
    }
}

/// Total order used by sorting: `null` first, then by type, then by value.
///
/// Among strings, RFC 3339 timestamps sort ahead of all other text and are
/// ordered by instant; other text is ordered ordinally.
pub fn compare_for_sort(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => match (timestamp(x), timestamp(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => x.cmp(y),
        },
        _ => compare(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b))),
    }
}

/// Look up a field on an object, exact name first, then case-insensitively.
fn field<'a>(row: &'a Value, name: &str) -> Option<&'a Value> {
    let object = row.as_object()?;
    object.get(name).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn member_of(target: &Value, name: &str) -> Result<Value> {
    match target {
        Value::Null => Ok(Value::Null),
        Value::Object(_) => field(target, name)
            .cloned()
            .ok_or_else(|| Error::QueryError(format!("No property or field '{}' exists", name))),
        Value::String(s) if name == "Length" => Ok(Value::Number(s.chars().count().into())),
        Value::Array(items) if name == "Count" || name == "Length" => {
            Ok(Value::Number(items.len().into()))
        }
        other => Err(Error::QueryError(format!(
            "No property '{}' on {}",
            name,
            kind_of(other)
        ))),
    }
}

fn call_method(target: &Value, name: &str, args: &[Value]) -> Result<Value> {
    match (target, name) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::String(s), "Contains") => Ok(Value::Bool(s.contains(string_arg(name, args)?))),
        (Value::String(s), "StartsWith") => {
            Ok(Value::Bool(s.starts_with(string_arg(name, args)?)))
        }
        (Value::String(s), "EndsWith") => Ok(Value::Bool(s.ends_with(string_arg(name, args)?))),
        (Value::String(s), "ToLower") => {
            no_args(name, args)?;
            Ok(Value::String(s.to_lowercase()))
        }
        (Value::String(s), "ToUpper") => {
            no_args(name, args)?;
            Ok(Value::String(s.to_uppercase()))
        }
        (Value::String(s), "Trim") => {
            no_args(name, args)?;
            Ok(Value::String(s.trim().to_string()))
        }
        (_, "Equals") => {
            let other = single_arg(name, args)?;
            Ok(Value::Bool(loose_eq(target, other)))
        }
        (Value::Array(items), "Contains") => {
            let needle = single_arg(name, args)?;
            Ok(Value::Bool(items.iter().any(|item| loose_eq(item, needle))))
        }
        (Value::Array(items), "Count") => {
            no_args(name, args)?;
            Ok(Value::Number(items.len().into()))
        }
        (Value::Array(items), "Any") => {
            no_args(name, args)?;
            Ok(Value::Bool(!items.is_empty()))
        }
        (other, _) => Err(Error::QueryError(format!(
            "No method '{}' on {}",
            name,
            kind_of(other)
        ))),
    }
}

fn single_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value> {
    match args {
        [arg] => Ok(arg),
        _ => Err(Error::QueryError(format!(
            "{} expects 1 argument, got {}",
            name,
            args.len()
        ))),
    }
}

fn string_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a str> {
    match single_arg(name, args)? {
        Value::String(s) => Ok(s),
        other => Err(Error::EvaluationError(format!(
            "{} expects a string argument, got {}",
            name,
            kind_of(other)
        ))),
    }
}

fn no_args(name: &str, args: &[Value]) -> Result<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(Error::QueryError(format!("{} takes no arguments", name)))
    }
}

fn binary(op: BinaryOperator, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinaryOperator::Equal => Ok(Value::Bool(loose_eq(l, r))),
        BinaryOperator::NotEqual => Ok(Value::Bool(!loose_eq(l, r))),
        BinaryOperator::Less
        | BinaryOperator::LessEqual
        | BinaryOperator::Greater
        | BinaryOperator::GreaterEqual => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Bool(false));
            }
            let ordering = compare(l, r).ok_or_else(|| {
                Error::EvaluationError(format!(
                    "Cannot compare {} with {}",
                    kind_of(l),
                    kind_of(r)
                ))
            })?;
            Ok(Value::Bool(match op {
                BinaryOperator::Less => ordering == Ordering::Less,
                BinaryOperator::LessEqual => ordering != Ordering::Greater,
                BinaryOperator::Greater => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOperator::Plus => match (l, r) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, display(b)))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", display(a), b))),
            _ => arithmetic(op, l, r),
        },
        _ => arithmetic(op, l, r),
    }
}

fn arithmetic(op: BinaryOperator, l: &Value, r: &Value) -> Result<Value> {
    let (a, b) = match (l, r) {
        (Value::Null, _) | (_, Value::Null) => return Ok(Value::Null),
        (Value::Number(a), Value::Number(b)) => (a, b),
        _ => {
            return Err(Error::EvaluationError(format!(
                "Operator {:?} cannot be applied to {} and {}",
                op,
                kind_of(l),
                kind_of(r)
            )))
        }
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            BinaryOperator::Plus => x.checked_add(y),
            BinaryOperator::Minus => x.checked_sub(y),
            BinaryOperator::Multiply => x.checked_mul(y),
            BinaryOperator::Divide | BinaryOperator::Modulo if y == 0 => {
                return Err(Error::EvaluationError("Division by zero".to_string()))
            }
            BinaryOperator::Divide => x.checked_div(y),
            BinaryOperator::Modulo => x.checked_rem(y),
            _ => None,
        };
        if let Some(n) = exact {
            return Ok(Value::Number(n.into()));
        }
    }

    let (x, y) = (as_f64(a), as_f64(b));
    let result = match op {
        BinaryOperator::Plus => x + y,
        BinaryOperator::Minus => x - y,
        BinaryOperator::Multiply => x * y,
        BinaryOperator::Divide => x / y,
        BinaryOperator::Modulo => x % y,
        other => {
            return Err(Error::EvaluationError(format!(
                "{:?} is not an arithmetic operator",
                other
            )))
        }
    };

    Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| Error::EvaluationError(format!("Arithmetic produced {}", result)))
}

fn negate(n: &Number) -> Result<Value> {
    if let Some(i) = n.as_i64().and_then(i64::checked_neg) {
        return Ok(Value::Number(i.into()));
    }
    Number::from_f64(-as_f64(n))
        .map(Value::Number)
        .ok_or_else(|| Error::EvaluationError("Cannot negate value".to_string()))
}

/// Equality with numeric normalization (`1 == 1.0`). Two RFC 3339
/// timestamps are equal when they denote the same instant.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Ordering::Equal,
        (Value::String(x), Value::String(y)) => compare_strings(x, y) == Ordering::Equal,
        _ => a == b,
    }
}

/// Partial order between two values of compatible type.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(x), Value::Number(y)) => Some(compare_numbers(x, y)),
        (Value::String(x), Value::String(y)) => Some(compare_strings(x, y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Ordinal comparison, except two RFC 3339 timestamps compare as instants.
///
/// Not transitive across a mix of timestamps and other text, so sorting
/// goes through [`compare_for_sort`] instead.
fn compare_strings(a: &str, b: &str) -> Ordering {
    match (timestamp(a), timestamp(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text).ok()
}

/// Exact numeric order: integers never round through `f64`.
fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    match (integer(x), integer(y)) {
        (Some(i), Some(j)) => i.cmp(&j),
        (Some(i), None) => compare_integer_float(i, as_f64(y)),
        (None, Some(j)) => compare_integer_float(j, as_f64(x)).reverse(),
        // JSON numbers are never NaN
        (None, None) => as_f64(x).partial_cmp(&as_f64(y)).unwrap_or(Ordering::Equal),
    }
}

fn integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

fn compare_integer_float(i: i128, f: f64) -> Ordering {
    // every JSON integer lies in [-2^63, 2^64)
    if f >= 18_446_744_073_709_551_616.0 {
        return Ordering::Less;
    }
    if f < -9_223_372_036_854_775_808.0 {
        return Ordering::Greater;
    }
    let floor = f.floor();
    match i.cmp(&(floor as i128)) {
        Ordering::Equal if f > floor => Ordering::Less,
        ordering => ordering,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(0.0)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
