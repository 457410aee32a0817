use super::ast::{
    BinaryOperator, Expr, ProjectionShape, SortDirection, SortKey, UnaryOperator,
};
use super::lexer::{Lexer, Token};
use crate::error::{Error, Result};
use serde_json::{Number, Value};

/// Deepest expression tree the parser accepts.
pub const MAX_DEPTH: usize = 128;

/// Recursive-descent parser for filter, ordering and projection expressions.
///
/// Nesting is bounded by [`MAX_DEPTH`] both while descending (parentheses,
/// unary operators, call arguments) and in the tree that comes out (operator
/// and member chains), so evaluation recursion stays bounded too.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    pub fn new(input: &str) -> Result<Self> {
        let tokens = Lexer::new(input).tokenize()?;
        Ok(Self {
            tokens,
            position: 0,
            depth: 0,
        })
    }

    /// Parse a boolean predicate such as `Title.Contains(@0) and Rating > 3`.
    pub fn parse_predicate(mut self) -> Result<Expr> {
        let expr = self.parse_expr()?;
        self.expect_eof()?;
        Ok(expr)
    }

    /// Parse an ordering such as `ReleaseDate desc, Title`.
    pub fn parse_ordering(mut self) -> Result<Vec<SortKey>> {
        let mut keys = vec![];

        loop {
            let expr = self.parse_expr()?;
            let direction = if self.match_token(&Token::Desc) {
                SortDirection::Descending
            } else {
                self.match_token(&Token::Asc);
                SortDirection::Ascending
            };
            keys.push(SortKey { expr, direction });

            if !self.match_token(&Token::Comma) {
                break;
            }
        }

        self.expect_eof()?;
        Ok(keys)
    }

    /// Parse a projection: a single expression or `new (expr [as Name], ...)`.
    pub fn parse_projection(mut self) -> Result<ProjectionShape> {
        if !self.match_token(&Token::New) {
            let expr = self.parse_expr()?;
            self.expect_eof()?;
            return Ok(ProjectionShape::Single(expr));
        }

        self.expect_token(&Token::LeftParen)?;
        let mut fields: Vec<(String, Expr)> = vec![];

        loop {
            let expr = self.parse_expr()?;
            let name = if self.match_token(&Token::As) {
                self.parse_identifier()?
            } else {
                match &expr {
                    Expr::Member { name, .. } => name.clone(),
                    _ => {
                        return Err(Error::QueryError(
                            "Projection of a computed value requires 'as Name'".to_string(),
                        ))
                    }
                }
            };

            if fields.iter().any(|(existing, _)| existing == &name) {
                return Err(Error::QueryError(format!(
                    "Duplicate projection member '{}'",
                    name
                )));
            }
            fields.push((name, expr));

            if !self.match_token(&Token::Comma) {
                break;
            }
        }

        self.expect_token(&Token::RightParen)?;
        self.expect_eof()?;
        Ok(ProjectionShape::Object(fields))
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.nested(Self::parse_or_expr)
    }

    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Result<Expr>) -> Result<Expr> {
        if self.depth >= MAX_DEPTH {
            return Err(too_deep());
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn bounded(expr: Expr) -> Result<Expr> {
        if expr.depth() > MAX_DEPTH {
            return Err(too_deep());
        }
        Ok(expr)
    }

    fn parse_or_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_and_expr()?;

        while self.match_token(&Token::Or) {
            let right = self.parse_and_expr()?;
            left = Self::bounded(Expr::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::Or,
                right: Box::new(right),
            })?;
        }

        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison_expr()?;

        while self.match_token(&Token::And) {
            let right = self.parse_comparison_expr()?;
            left = Self::bounded(Expr::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::And,
                right: Box::new(right),
            })?;
        }

        Ok(left)
    }

    fn parse_comparison_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive_expr()?;

        if let Some(op) = self.match_comparison_op() {
            let right = self.parse_additive_expr()?;
            left = Self::bounded(Expr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            })?;
        }

        Ok(left)
    }

    fn parse_additive_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative_expr()?;

        while let Some(op) = self.match_additive_op() {
            let right = self.parse_multiplicative_expr()?;
            left = Self::bounded(Expr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            })?;
        }

        Ok(left)
    }

    fn parse_multiplicative_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary_expr()?;

        while let Some(op) = self.match_multiplicative_op() {
            let right = self.parse_unary_expr()?;
            left = Self::bounded(Expr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            })?;
        }

        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr> {
        if self.match_token(&Token::Not) {
            let expr = self.nested(Self::parse_unary_expr)?;
            return Self::bounded(Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr: Box::new(expr),
            });
        }

        if self.match_token(&Token::Minus) {
            let expr = self.nested(Self::parse_unary_expr)?;
            return Self::bounded(Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(expr),
            });
        }

        self.parse_postfix_expr()
    }

    fn parse_postfix_expr(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary_expr()?;

        while self.match_token(&Token::Dot) {
            let name = self.parse_identifier()?;

            if self.match_token(&Token::LeftParen) {
                let args = if self.match_token(&Token::RightParen) {
                    vec![]
                } else {
                    let args = self.parse_expr_list()?;
                    self.expect_token(&Token::RightParen)?;
                    args
                };
                expr = Self::bounded(Expr::Method {
                    target: Box::new(expr),
                    name,
                    args,
                })?;
            } else {
                expr = Self::bounded(Expr::Member {
                    target: Some(Box::new(expr)),
                    name,
                })?;
            }
        }

        Ok(expr)
    }

    fn parse_primary_expr(&mut self) -> Result<Expr> {
        match self.current_token().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Literal(parse_number(&n)?))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            Token::Placeholder(index) => {
                self.advance();
                Ok(Expr::Placeholder(index))
            }
            Token::Identifier(name) => {
                self.advance();
                if self.current_token() == &Token::LeftParen {
                    return Err(Error::QueryError(format!(
                        "Unknown function '{}'",
                        name
                    )));
                }
                Ok(Expr::Member { target: None, name })
            }
            Token::LeftParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect_token(&Token::RightParen)?;
                Ok(expr)
            }
            other => Err(Error::QueryError(format!("Unexpected token: {:?}", other))),
        }
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>> {
        let mut exprs = vec![];

        loop {
            exprs.push(self.parse_expr()?);

            if !self.match_token(&Token::Comma) {
                break;
            }
        }

        Ok(exprs)
    }

    fn parse_identifier(&mut self) -> Result<String> {
        match self.current_token().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(Error::QueryError(format!(
                "Expected identifier, found {:?}",
                other
            ))),
        }
    }

    fn match_comparison_op(&mut self) -> Option<BinaryOperator> {
        let op = match self.current_token() {
            Token::Equal => BinaryOperator::Equal,
            Token::NotEqual => BinaryOperator::NotEqual,
            Token::Less => BinaryOperator::Less,
            Token::LessEqual => BinaryOperator::LessEqual,
            Token::Greater => BinaryOperator::Greater,
            Token::GreaterEqual => BinaryOperator::GreaterEqual,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn match_additive_op(&mut self) -> Option<BinaryOperator> {
        let op = match self.current_token() {
            Token::Plus => BinaryOperator::Plus,
            Token::Minus => BinaryOperator::Minus,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn match_multiplicative_op(&mut self) -> Option<BinaryOperator> {
        let op = match self.current_token() {
            Token::Star => BinaryOperator::Multiply,
            Token::Slash => BinaryOperator::Divide,
            Token::Percent => BinaryOperator::Modulo,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn current_token(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.current_token() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, token: &Token) -> Result<()> {
        if self.match_token(token) {
            Ok(())
        } else {
            Err(Error::QueryError(format!(
                "Expected {:?}, found {:?}",
                token,
                self.current_token()
            )))
        }
    }

    fn expect_eof(&self) -> Result<()> {
        match self.current_token() {
            Token::Eof => Ok(()),
            other => Err(Error::QueryError(format!(
                "Unexpected token after expression: {:?}",
                other
            ))),
        }
    }
}

fn too_deep() -> Error {
    Error::QueryError(format!("Expression nested deeper than {} levels", MAX_DEPTH))
}

fn parse_number(text: &str) -> Result<Value> {
    if !text.contains('.') {
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Number(n.into()));
        }
    }

    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| Error::QueryError(format!("Invalid number literal '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn member(name: &str) -> Expr {
        Expr::Member {
            target: None,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_parse_method_call() {
        let expr = Parser::new("Title.Contains(@0)")
            .and_then(Parser::parse_predicate)
            .expect("parse");

        assert_eq!(
            expr,
            Expr::Method {
                target: Box::new(member("Title")),
                name: "Contains".to_string(),
                args: vec![Expr::Placeholder(0)],
            }
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = Parser::new("a == 1 or b == 2 and c == 3")
            .and_then(Parser::parse_predicate)
            .expect("parse");

        match expr {
            Expr::BinaryOp {
                op: BinaryOperator::Or,
                right,
                ..
            } => assert!(matches!(
                *right,
                Expr::BinaryOp {
                    op: BinaryOperator::And,
                    ..
                }
            )),
            other => panic!("expected OR at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_nested_member_and_literals() {
        let expr = Parser::new("Director.Name != null && Price >= 9.5")
            .and_then(Parser::parse_predicate)
            .expect("parse");

        match expr {
            Expr::BinaryOp { left, right, .. } => {
                assert!(matches!(*left, Expr::BinaryOp { op: BinaryOperator::NotEqual, .. }));
                match *right {
                    Expr::BinaryOp { right, .. } => {
                        assert_eq!(*right, Expr::Literal(json!(9.5)))
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_ordering() {
        let keys = Parser::new("ReleaseDate desc, Title")
            .and_then(Parser::parse_ordering)
            .expect("parse");

        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].direction, SortDirection::Descending);
        assert_eq!(keys[1].direction, SortDirection::Ascending);
        assert_eq!(keys[1].expr, member("Title"));
    }

    #[test]
    fn test_parse_projection_object() {
        let shape = Parser::new("new (Title, Price * 2 as Double)")
            .and_then(Parser::parse_projection)
            .expect("parse");

        match shape {
            ProjectionShape::Object(fields) => {
                let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["Title", "Double"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_projection_requires_alias_for_computed_values() {
        let err = Parser::new("new (Price * 2)")
            .and_then(Parser::parse_projection)
            .unwrap_err();
        assert!(matches!(err, Error::QueryError(_)));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = Parser::new("Title == \"x\" Title")
            .and_then(Parser::parse_predicate)
            .unwrap_err();
        assert!(matches!(err, Error::QueryError(_)));
    }

    #[test]
    fn test_unbalanced_parentheses_rejected() {
        assert!(Parser::new("(a == 1")
            .and_then(Parser::parse_predicate)
            .is_err());
    }

    #[test]
    fn test_deep_parentheses_rejected() {
        let text = format!("{}N > 1{}", "(".repeat(50_000), ")".repeat(50_000));
        let err = Parser::new(&text)
            .and_then(Parser::parse_predicate)
            .unwrap_err();
        assert!(matches!(err, Error::QueryError(_)));
    }

    #[test]
    fn test_long_operator_and_member_chains_rejected() {
        for text in [
            format!("N{} > 1", " + 1".repeat(50_000)),
            format!("{}true", "not ".repeat(50_000)),
            format!("{}N", "-".repeat(50_000)),
            format!("N{}", ".Length".repeat(50_000)),
            format!("N == 1{}", " or N == 1".repeat(50_000)),
        ] {
            let err = Parser::new(&text)
                .and_then(Parser::parse_predicate)
                .unwrap_err();
            assert!(matches!(err, Error::QueryError(_)));
        }
    }

    #[test]
    fn test_moderate_nesting_accepted() {
        let text = format!("{}N > 1{}", "(".repeat(40), ")".repeat(40));
        let expr = Parser::new(&text)
            .and_then(Parser::parse_predicate)
            .expect("parse");
        assert_eq!(expr.depth(), 2);
    }

    #[test]
    fn test_unknown_function_rejected() {
        assert!(Parser::new("iif(a, 1, 2)")
            .and_then(Parser::parse_predicate)
            .is_err());
    }
}
