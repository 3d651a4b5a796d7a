//! Placeholder parsing - `#{...}` segments into a small AST
//!
//! A field value such as `#{myS3OutputDir}/#{format(@scheduledStartTime, 'YYYY')}`
//! parses into literal and placeholder segments. Inside a placeholder the
//! grammar is:
//!
//! ```text
//! expr    := call | param | runtime | string | integer | nested
//! call    := IDENT '(' [ expr (',' expr)* ] ')'
//! param   := IDENT
//! runtime := '@' IDENT
//! string  := '\'' ... '\'' | '"' ... '"'
//! integer := ['-'] DIGITS
//! nested  := '#{' expr '}'
//! ```

use crate::core::error::ExpressionError;

/// A node of a placeholder expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Quoted string literal
    Text(String),
    /// Integer literal
    Integer(i64),
    /// Reference to a pipeline parameter
    Parameter(String),
    /// Runtime variable such as `@scheduledStartTime`
    Runtime(String),
    /// Built-in function call with positional arguments
    Call { name: String, args: Vec<Expr> },
}

/// One piece of a field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(Expr),
}

/// A parsed field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpolation {
    pub segments: Vec<Segment>,
}

impl Interpolation {
    /// Parse a field value into literal and placeholder segments
    pub fn parse(input: &str) -> Result<Self, ExpressionError> {
        let mut parser = Parser::new(input);
        let mut segments = Vec::new();
        let mut literal = String::new();

        while let Some(c) = parser.peek() {
            if c == '#' && parser.peek_at(1) == Some('{') {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                let expr = parser.placeholder()?;
                segments.push(Segment::Placeholder(expr));
            } else {
                literal.push(c);
                parser.bump();
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Whether the value contains any placeholder
    pub fn has_placeholders(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder(_)))
    }
}

/// Quick check used to skip parsing plain literals
pub fn contains_placeholder(input: &str) -> bool {
    input.contains("#{")
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn next_is_digit(&self) -> bool {
        self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    /// Parse `#{ expr }` starting at the `#`
    fn placeholder(&mut self) -> Result<Expr, ExpressionError> {
        let start = self.pos;
        self.pos += 2;
        let expr = self.expr()?;
        self.skip_whitespace();
        match self.bump() {
            Some('}') => Ok(expr),
            Some(')') => Err(ExpressionError::malformed(
                self.pos - 1,
                "unbalanced parentheses",
            )),
            Some(c) => Err(ExpressionError::malformed(
                self.pos - 1,
                format!("unexpected '{}' in placeholder", c),
            )),
            None => Err(ExpressionError::malformed(start, "unclosed placeholder")),
        }
    }

    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_whitespace();
        let offset = self.pos;
        match self.peek() {
            Some('\'') | Some('"') => self.string(),
            Some('@') => {
                self.bump();
                let name = self.ident();
                if name.is_empty() {
                    return Err(ExpressionError::malformed(
                        offset,
                        "expected runtime variable name",
                    ));
                }
                Ok(Expr::Runtime(name))
            }
            Some('#') if self.peek_at(1) == Some('{') => self.placeholder(),
            Some(c) if c.is_ascii_digit() || (c == '-' && self.next_is_digit()) => self.integer(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let name = self.ident();
                self.skip_whitespace();
                if self.peek() == Some('(') {
                    self.bump();
                    let args = self.arguments(offset)?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Parameter(name))
                }
            }
            Some('}') => Err(ExpressionError::malformed(offset, "empty placeholder")),
            Some(c) => Err(ExpressionError::malformed(
                offset,
                format!("unexpected '{}'", c),
            )),
            None => Err(ExpressionError::malformed(offset, "unclosed placeholder")),
        }
    }

    /// Arguments after the opening parenthesis, up to and including `)`
    fn arguments(&mut self, call_offset: usize) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(args);
        }

        loop {
            args.push(self.expr()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(')') => return Ok(args),
                Some('}') | None => {
                    return Err(ExpressionError::malformed(
                        call_offset,
                        "unbalanced parentheses",
                    ))
                }
                Some(c) => {
                    return Err(ExpressionError::malformed(
                        self.pos - 1,
                        format!("unexpected '{}' in argument list", c),
                    ))
                }
            }
        }
    }

    fn ident(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        name
    }

    fn integer(&mut self) -> Result<Expr, ExpressionError> {
        let offset = self.pos;
        let mut text = String::new();
        if self.peek() == Some('-') {
            text.push('-');
            self.bump();
        }
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            text.push(c);
            self.bump();
        }
        text.parse()
            .map(Expr::Integer)
            .map_err(|_| {
                ExpressionError::malformed(offset, format!("integer '{}' out of range", text))
            })
    }

    fn string(&mut self) -> Result<Expr, ExpressionError> {
        let offset = self.pos;
        let quote = self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some(c) if Some(c) == quote => return Ok(Expr::Text(text)),
                Some(c) => text.push(c),
                None => return Err(ExpressionError::malformed(offset, "unterminated string")),
            }
        }
    }
}
