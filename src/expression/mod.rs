//! Dynamic filter, sort and projection expressions.
//!
//! Callers describe queries with short strings in the style of dynamic LINQ:
//!
//! ```text
//! where:   Title.Contains(@0) and ReleaseDate >= "1980-01-01"
//! orderBy: ReleaseDate desc, Title
//! select:  new (Title, Price * 2 as DoublePrice)
//! ```
//!
//! Strings are compiled once into an AST ([`Filter`], [`SortOrder`],
//! [`Projection`]) and then evaluated against rows (JSON objects). A string
//! that does not parse yields `Error::QueryError`; a well-formed expression
//! that fails on a row (type mismatch, division by zero) yields
//! `Error::EvaluationError`.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

use crate::error::Result;
use crate::key::CountKey;
use ast::{Expr, ProjectionShape, SortDirection, SortKey};
use parser::Parser;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Compiled `where` predicate together with its positional arguments.
#[derive(Debug, Clone)]
pub struct Filter {
    text: String,
    args: Vec<Value>,
    expr: Expr,
}

impl Filter {
    /// Compile a predicate.
    ///
    /// # Errors
    ///
    /// Returns `Error::QueryError` if the text is not a valid expression.
    pub fn parse(text: &str, args: Vec<Value>) -> Result<Self> {
        let expr = Parser::new(text)?.parse_predicate()?;
        Ok(Filter {
            text: text.to_string(),
            args,
            expr,
        })
    }

    /// Evaluate the predicate against one row.
    pub fn matches(&self, row: &Value) -> Result<bool> {
        eval::truthy(&eval::evaluate(&self.expr, row, &self.args)?)
    }

    /// Key of the count-cache slot for this filter.
    pub fn cache_key(&self) -> String {
        CountKey::derive(Some(&self.text), &self.args)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

/// Compiled `orderBy` clause.
#[derive(Debug, Clone)]
pub struct SortOrder {
    keys: Vec<SortKey>,
}

impl SortOrder {
    pub fn parse(text: &str) -> Result<Self> {
        let keys = Parser::new(text)?.parse_ordering()?;
        Ok(SortOrder { keys })
    }

    /// Stable sort of `rows` by this ordering.
    ///
    /// Sort keys are evaluated once per row before sorting, so an
    /// evaluation error surfaces before any reordering happens.
    pub fn sort(&self, rows: Vec<Value>) -> Result<Vec<Value>> {
        let mut keyed = rows
            .into_iter()
            .map(|row| {
                let keys = self
                    .keys
                    .iter()
                    .map(|k| eval::evaluate(&k.expr, &row, &[]))
                    .collect::<Result<Vec<_>>>()?;
                Ok((keys, row))
            })
            .collect::<Result<Vec<_>>>()?;

        keyed.sort_by(|(a, _), (b, _)| self.compare_keys(a, b));
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((key, x), y) in self.keys.iter().zip(a).zip(b) {
            let ordering = eval::compare_for_sort(x, y);
            let ordering = match key.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Compiled `select` projection.
#[derive(Debug, Clone)]
pub struct Projection {
    shape: ProjectionShape,
}

impl Projection {
    pub fn parse(text: &str) -> Result<Self> {
        let shape = Parser::new(text)?.parse_projection()?;
        Ok(Projection { shape })
    }

    /// Project one row into a loosely typed record.
    pub fn apply(&self, row: &Value) -> Result<Value> {
        match &self.shape {
            ProjectionShape::Single(expr) => eval::evaluate(expr, row, &[]),
            ProjectionShape::Object(fields) => {
                let mut object = Map::with_capacity(fields.len());
                for (name, expr) in fields {
                    object.insert(name.clone(), eval::evaluate(expr, row, &[])?);
                }
                Ok(Value::Object(object))
            }
        }
    }
}
