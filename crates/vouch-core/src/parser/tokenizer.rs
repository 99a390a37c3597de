//! Invariant tokenizer: converts invariant text into a token stream
//!
//! Handles: identifiers, keywords (`and`, `or`, `not`, `in`, `true`,
//! `false`, `null`), string literals in single or double quotes,
//! integer/float literals, comparison/arithmetic/logical operators and
//! punctuation.
//!
//! Guarantees:
//! - Deterministic: same input always produces same token stream
//! - Complete error reporting: line:column for every error

/// Token types for invariant syntax
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    And,
    Or,
    Not,
    In,
    Null,

    // Literals
    StringLiteral(String),
    IntegerLiteral(i64),
    FloatLiteral(f64),
    BooleanLiteral(bool),

    // Operators
    EqEq,   // ==
    NotEq,  // !=
    Lt,     // <
    Le,     // <=
    Gt,     // >
    Ge,     // >=
    Plus,   // +
    Minus,  // -
    Star,   // *
    Slash,  // /

    // Symbols
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    Comma,    // ,
    Dot,      // .

    // Other
    Identifier(String),
    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Token::And => write!(f, "'and'"),
            Token::Or => write!(f, "'or'"),
            Token::Not => write!(f, "'not'"),
            Token::In => write!(f, "'in'"),
            Token::Null => write!(f, "'null'"),
            Token::StringLiteral(s) => write!(f, "string \"{}\"", s),
            Token::IntegerLiteral(n) => write!(f, "integer {}", n),
            Token::FloatLiteral(n) => write!(f, "float {}", n),
            Token::BooleanLiteral(b) => write!(f, "'{}'", b),
            Token::EqEq => write!(f, "'=='"),
            Token::NotEq => write!(f, "'!='"),
            Token::Lt => write!(f, "'<'"),
            Token::Le => write!(f, "'<='"),
            Token::Gt => write!(f, "'>'"),
            Token::Ge => write!(f, "'>='"),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::Comma => write!(f, "','"),
            Token::Dot => write!(f, "'.'"),
            Token::Identifier(name) => write!(f, "identifier '{}'", name),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// Position in source text for error reporting
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Token with source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenizer for invariant source text
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Tokenizer {
    /// Create a new tokenizer for the given input text
    pub fn new(text: &str) -> Self {
        Tokenizer {
            input: text.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the entire input into a stream of spanned tokens
    pub fn tokenize(&mut self) -> crate::Result<Vec<SpannedToken>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            if self.is_at_end() {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    span: self.current_span(),
                });
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    // ── Character helpers ──────────────────────────────────

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.position).copied();
        if let Some(c) = ch {
            self.position += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        ch
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
            offset: self.position,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    // ── Main dispatch ──────────────────────────────────────

    fn next_token(&mut self) -> crate::Result<SpannedToken> {
        let span = self.current_span();
        let Some(ch) = self.peek() else {
            return Ok(SpannedToken { token: Token::Eof, span });
        };

        let token = match ch {
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),
            ',' => self.single(Token::Comma),
            '.' => self.single(Token::Dot),
            '+' => self.single(Token::Plus),
            '-' => self.single(Token::Minus),
            '*' => self.single(Token::Star),
            '/' => self.single(Token::Slash),
            '=' => self.pair('=', Token::EqEq, &span)?,
            '!' => {
                if self.peek_ahead(1) == Some('=') {
                    self.advance();
                    self.advance();
                    Token::NotEq
                } else {
                    self.single(Token::Not)
                }
            }
            '<' => self.with_optional_eq(Token::Lt, Token::Le),
            '>' => self.with_optional_eq(Token::Gt, Token::Ge),
            '&' => self.pair('&', Token::And, &span)?,
            '|' => self.pair('|', Token::Or, &span)?,
            '"' | '\'' => return self.read_string(span, ch),
            c if c.is_ascii_digit() => return self.read_number(span),
            c if c.is_ascii_alphabetic() || c == '_' => {
                return self.read_identifier_or_keyword(span)
            }
            _ => {
                return Err(crate::Error::ParseError(format!(
                    "Unexpected character '{}' at {}",
                    ch, span
                )))
            }
        };

        Ok(SpannedToken { token, span })
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn with_optional_eq(&mut self, bare: Token, with_eq: Token) -> Token {
        self.advance();
        if self.peek() == Some('=') {
            self.advance();
            with_eq
        } else {
            bare
        }
    }

    /// Two-character operators that are only valid doubled (`==`, `&&`, `||`)
    fn pair(&mut self, second: char, token: Token, span: &Span) -> crate::Result<Token> {
        let first = self.advance();
        if self.peek() == Some(second) {
            self.advance();
            Ok(token)
        } else {
            Err(crate::Error::ParseError(format!(
                "Expected '{}{}' at {}",
                first.unwrap_or(second),
                second,
                span
            )))
        }
    }

    // ── String literals ────────────────────────────────────

    /// Unknown escapes are kept verbatim so regex classes like `\d` survive.
    fn read_string(&mut self, span: Span, quote: char) -> crate::Result<SpannedToken> {
        self.advance(); // consume opening quote
        let mut value = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(crate::Error::ParseError(format!(
                        "Unterminated string starting at {}",
                        span
                    )));
                }
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('\'') => value.push('\''),
                    Some(c) => {
                        value.push('\\');
                        value.push(c);
                    }
                    None => {
                        return Err(crate::Error::ParseError(format!(
                            "Unterminated escape sequence at {}",
                            self.current_span()
                        )));
                    }
                },
                Some(c) => value.push(c),
            }
        }

        Ok(SpannedToken {
            token: Token::StringLiteral(value),
            span,
        })
    }

    // ── Numbers ────────────────────────────────────────────

    fn read_number(&mut self, span: Span) -> crate::Result<SpannedToken> {
        let start = self.position;
        let mut has_dot = false;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.'
                && !has_dot
                && self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit())
            {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        if has_dot {
            let val: f64 = text.parse().map_err(|_| {
                crate::Error::ParseError(format!("Invalid float '{}' at {}", text, span))
            })?;
            Ok(SpannedToken {
                token: Token::FloatLiteral(val),
                span,
            })
        } else {
            let val: i64 = text.parse().map_err(|_| {
                crate::Error::ParseError(format!("Invalid integer '{}' at {}", text, span))
            })?;
            Ok(SpannedToken {
                token: Token::IntegerLiteral(val),
                span,
            })
        }
    }

    // ── Identifiers & Keywords ─────────────────────────────

    fn read_identifier_or_keyword(&mut self, span: Span) -> crate::Result<SpannedToken> {
        let start = self.position;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        let token = match text.as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::In,
            "null" => Token::Null,
            "true" => Token::BooleanLiteral(true),
            "false" => Token::BooleanLiteral(false),
            _ => Token::Identifier(text),
        };

        Ok(SpannedToken { token, span })
    }
}
