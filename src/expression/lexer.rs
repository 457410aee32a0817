use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    And,
    Or,
    Not,
    True,
    False,
    Null,
    New,
    As,
    Asc,
    Desc,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // Delimiters
    LeftParen,
    RightParen,
    Comma,
    Dot,

    // Literals
    Number(String),
    String(String),
    Identifier(String),
    Placeholder(usize),

    // Special
    Eof,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while self.position < self.input.len() {
            self.skip_whitespace();

            if self.position >= self.input.len() {
                break;
            }

            tokens.push(self.next_token()?);
        }

        tokens.push(Token::Eof);
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token> {
        let ch = self.current_char();

        let token = match ch {
            '+' => {
                self.advance();
                Token::Plus
            }
            '-' => {
                self.advance();
                Token::Minus
            }
            '*' => {
                self.advance();
                Token::Star
            }
            '/' => {
                self.advance();
                Token::Slash
            }
            '%' => {
                self.advance();
                Token::Percent
            }
            '=' => {
                self.advance();
                if self.current_char() == '=' {
                    self.advance();
                }
                Token::Equal
            }
            '<' => {
                self.advance();
                if self.current_char() == '=' {
                    self.advance();
                    Token::LessEqual
                } else if self.current_char() == '>' {
                    self.advance();
                    Token::NotEqual
                } else {
                    Token::Less
                }
            }
            '>' => {
                self.advance();
                if self.current_char() == '=' {
                    self.advance();
                    Token::GreaterEqual
                } else {
                    Token::Greater
                }
            }
            '!' => {
                self.advance();
                if self.current_char() == '=' {
                    self.advance();
                    Token::NotEqual
                } else {
                    Token::Not
                }
            }
            '&' => {
                self.advance();
                self.expect_char('&')?;
                Token::And
            }
            '|' => {
                self.advance();
                self.expect_char('|')?;
                Token::Or
            }
            '(' => {
                self.advance();
                Token::LeftParen
            }
            ')' => {
                self.advance();
                Token::RightParen
            }
            ',' => {
                self.advance();
                Token::Comma
            }
            '.' => {
                self.advance();
                Token::Dot
            }
            '@' => self.read_placeholder()?,
            '\'' | '"' => self.read_string()?,
            _ if ch.is_ascii_digit() => self.read_number(),
            _ if ch.is_alphabetic() || ch == '_' => self.read_identifier(),
            _ => {
                return Err(Error::QueryError(format!(
                    "Unexpected character '{}' at position {}",
                    ch, self.position
                )));
            }
        };

        Ok(token)
    }

    fn read_placeholder(&mut self) -> Result<Token> {
        let start = self.position;
        self.advance(); // Skip '@'

        let mut digits = String::new();
        while self.position < self.input.len() && self.current_char().is_ascii_digit() {
            digits.push(self.current_char());
            self.advance();
        }

        digits
            .parse::<usize>()
            .map(Token::Placeholder)
            .map_err(|_| {
                Error::QueryError(format!("Expected argument index after '@' at position {}", start))
            })
    }

    fn read_string(&mut self) -> Result<Token> {
        let quote = self.current_char();
        self.advance();

        let mut value = String::new();
        while self.position < self.input.len() && self.current_char() != quote {
            if self.current_char() == '\\' {
                self.advance();
                if self.position >= self.input.len() {
                    break;
                }
                value.push(match self.current_char() {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            } else {
                value.push(self.current_char());
            }
            self.advance();
        }

        if self.position >= self.input.len() {
            return Err(Error::QueryError("Unterminated string literal".to_string()));
        }

        self.advance(); // Skip closing quote
        Ok(Token::String(value))
    }

    fn read_number(&mut self) -> Token {
        let mut number = String::new();
        let mut seen_dot = false;

        while self.position < self.input.len() {
            let ch = self.current_char();
            if ch.is_ascii_digit() {
                number.push(ch);
            } else if ch == '.' && !seen_dot && self.peek_char().is_ascii_digit() {
                // a dot not followed by a digit ends the number
                seen_dot = true;
                number.push(ch);
            } else {
                break;
            }
            self.advance();
        }

        Token::Number(number)
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();

        while self.position < self.input.len()
            && (self.current_char().is_alphanumeric() || self.current_char() == '_')
        {
            ident.push(self.current_char());
            self.advance();
        }

        match ident.to_ascii_lowercase().as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "new" => Token::New,
            "as" => Token::As,
            "asc" | "ascending" => Token::Asc,
            "desc" | "descending" => Token::Desc,
            _ => Token::Identifier(ident),
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<()> {
        if self.current_char() == expected {
            self.advance();
            Ok(())
        } else {
            Err(Error::QueryError(format!(
                "Expected '{}' at position {}",
                expected, self.position
            )))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.position < self.input.len() && self.current_char().is_whitespace() {
            self.advance();
        }
    }

    fn current_char(&self) -> char {
        self.input.get(self.position).copied().unwrap_or('\0')
    }

    fn peek_char(&self) -> char {
        self.input.get(self.position + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) {
        self.position += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new(input).tokenize().expect("tokenize")
    }

    #[test]
    fn test_method_call_with_placeholder() {
        assert_eq!(
            lex("Title.Contains(@0)"),
            vec![
                Token::Identifier("Title".to_string()),
                Token::Dot,
                Token::Identifier("Contains".to_string()),
                Token::LeftParen,
                Token::Placeholder(0),
                Token::RightParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_operator_aliases() {
        assert_eq!(lex("a == b")[1], Token::Equal);
        assert_eq!(lex("a = b")[1], Token::Equal);
        assert_eq!(lex("a <> b")[1], Token::NotEqual);
        assert_eq!(lex("a != b")[1], Token::NotEqual);
        assert_eq!(lex("a && b")[1], Token::And);
        assert_eq!(lex("a AND b")[1], Token::And);
        assert_eq!(lex("a || b")[1], Token::Or);
        assert_eq!(lex("!a")[0], Token::Not);
    }

    #[test]
    fn test_sort_keywords() {
        assert_eq!(lex("ReleaseDate desc")[1], Token::Desc);
        assert_eq!(lex("ReleaseDate Descending")[1], Token::Desc);
        assert_eq!(lex("ReleaseDate ASC")[1], Token::Asc);
    }

    #[test]
    fn test_numbers_and_strings() {
        assert_eq!(lex("12.5")[0], Token::Number("12.5".to_string()));
        assert_eq!(lex("'it\\'s'")[0], Token::String("it's".to_string()));
        assert_eq!(lex("\"a\\\"b\"")[0], Token::String("a\"b".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("Title == \"abc").tokenize().unwrap_err();
        assert!(matches!(err, Error::QueryError(_)));
    }

    #[test]
    fn test_bad_placeholder() {
        assert!(Lexer::new("@x").tokenize().is_err());
    }

    #[test]
    fn test_single_ampersand_rejected() {
        assert!(Lexer::new("a & b").tokenize().is_err());
    }
}
