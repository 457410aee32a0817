//! Expression syntax tree.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value (`42`, `"text"`, `true`, `null`).
    Literal(Value),
    /// Positional argument `@n`.
    Placeholder(usize),
    /// Member access. `target: None` reads a field of the current row.
    Member {
        target: Option<Box<Expr>>,
        name: String,
    },
    /// Method call on a value (`Title.Contains(@0)`).
    Method {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Height of the tree; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Expr::Literal(_) | Expr::Placeholder(_) | Expr::Member { target: None, .. } => 1,
            Expr::Member {
                target: Some(target),
                ..
            } => 1 + target.depth(),
            Expr::Method { target, args, .. } => {
                1 + args.iter().map(Expr::depth).fold(target.depth(), usize::max)
            }
            Expr::UnaryOp { expr, .. } => 1 + expr.depth(),
            Expr::BinaryOp { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One `expr [asc|desc]` term of an ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub direction: SortDirection,
}

/// Parsed projection.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionShape {
    /// `Title` projects each row to a bare value.
    Single(Expr),
    /// `new (Title, ReleaseDate as Released)` projects to an object.
    Object(Vec<(String, Expr)>),
}
