//! Invariant parser: tokenizer, AST types, and recursive descent parser
//!
//! Converts invariant text into an [`ast::Expr`]. The grammar is deliberately
//! small: literals, the `output` binding, field/index access, whitelisted
//! function calls, comparisons, `in`, arithmetic and boolean connectives.
//!
//! ```text
//! or      := and (("or" | "||") and)*
//! and     := not (("and" | "&&") not)*
//! not     := ("not" | "!") not | cmp
//! cmp     := sum (("==" | "!=" | "<" | "<=" | ">" | ">=" | "in") sum)?
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/") unary)*
//! unary   := "-" unary | postfix
//! postfix := primary ("." ident ["(" args ")"] | "[" or "]")*
//! primary := literal | ident ["(" args ")"] | "[" args "]" | "(" or ")"
//! ```

pub mod ast;
pub mod tokenizer;

use ast::{BinaryOp, Expr, Literal, UnaryOp};
use tokenizer::{Span, SpannedToken, Token, Tokenizer};

use crate::{Error, Result};

/// Maximum nesting depth accepted by the parser
pub const MAX_DEPTH: usize = 64;

/// Parse invariant text into an expression tree
///
/// Every nesting construct counts toward [`MAX_DEPTH`]: parentheses,
/// unary operators, and each link of an operator, field or index chain.
/// The resulting tree is therefore never deeper than the limit allows.
///
/// # Errors
/// Returns `ParseError` with line:column for syntax violations, and for
/// expressions nested deeper than [`MAX_DEPTH`].
pub fn parse_invariant(input: &str) -> Result<Expr> {
    let tokens = Tokenizer::new(input).tokenize()?;
    let mut parser = Parser {
        tokens,
        position: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    let trailing = parser.peek();
    if trailing.token != Token::Eof {
        return Err(Error::ParseError(format!(
            "Unexpected {} at {}",
            trailing.token, trailing.span
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    position: usize,
    depth: usize,
}

impl Parser {
    // ── Token helpers ──────────────────────────────────────

    fn peek(&self) -> &SpannedToken {
        // The tokenizer always terminates the stream with Eof.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.position.min(last)]
    }

    fn advance(&mut self) -> SpannedToken {
        let token = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        &self.peek().token == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<Span> {
        let next = self.advance();
        if &next.token == token {
            Ok(next.span)
        } else {
            Err(Error::ParseError(format!(
                "Expected {} but found {} at {}",
                token, next.token, next.span
            )))
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Error::ParseError(format!(
                "Expression nested deeper than {} levels at {}",
                MAX_DEPTH,
                self.peek().span
            )));
        }
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth -= levels;
    }

    /// Each operator in a left-associative chain adds one tree level
    fn deepen(&mut self, levels: &mut usize) -> Result<()> {
        self.enter()?;
        *levels += 1;
        Ok(())
    }

    // ── Grammar ────────────────────────────────────────────

    fn parse_or(&mut self) -> Result<Expr> {
        self.enter()?;
        let mut levels = 1;
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            self.deepen(&mut levels)?;
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        self.leave(levels);
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut levels = 0;
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            self.deepen(&mut levels)?;
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        self.leave(levels);
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.check(&Token::Not) {
            let span = self.advance().span;
            self.enter()?;
            let operand = self.parse_not()?;
            self.leave(1);
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand), span));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_sum()?;
        let op = match self.peek().token {
            Token::EqEq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::NotEq,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::In => BinaryOp::In,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_sum()?;
        Ok(binary(op, left, right))
    }

    fn parse_sum(&mut self) -> Result<Expr> {
        let mut levels = 0;
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek().token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.deepen(&mut levels)?;
            let right = self.parse_product()?;
            left = binary(op, left, right);
        }
        self.leave(levels);
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let mut levels = 0;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().token {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            self.deepen(&mut levels)?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        self.leave(levels);
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.check(&Token::Minus) {
            let span = self.advance().span;
            self.enter()?;
            let operand = self.parse_unary()?;
            self.leave(1);
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand), span));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut levels = 0;
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                self.deepen(&mut levels)?;
                let next = self.advance();
                let name = match next.token {
                    Token::Identifier(name) => name,
                    other => {
                        return Err(Error::ParseError(format!(
                            "Expected field name after '.' but found {} at {}",
                            other, next.span
                        )))
                    }
                };
                if self.eat(&Token::LParen) {
                    let span = expr.span().clone();
                    let mut args = vec![expr];
                    args.extend(self.parse_args(&Token::RParen)?);
                    expr = Expr::Call(name, args, span);
                } else {
                    let span = expr.span().clone();
                    expr = Expr::Field(Box::new(expr), name, span);
                }
            } else if self.eat(&Token::LBracket) {
                self.deepen(&mut levels)?;
                let index = self.parse_or()?;
                self.expect(&Token::RBracket)?;
                let span = expr.span().clone();
                expr = Expr::Index(Box::new(expr), Box::new(index), span);
            } else {
                break;
            }
        }
        self.leave(levels);
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let next = self.advance();
        let span = next.span;
        match next.token {
            Token::IntegerLiteral(n) => Ok(Expr::Literal(Literal::Integer(n), span)),
            Token::FloatLiteral(n) => Ok(Expr::Literal(Literal::Float(n), span)),
            Token::StringLiteral(s) => Ok(Expr::Literal(Literal::String(s), span)),
            Token::BooleanLiteral(b) => Ok(Expr::Literal(Literal::Boolean(b), span)),
            Token::Null => Ok(Expr::Literal(Literal::Null, span)),
            Token::Identifier(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.parse_args(&Token::RParen)?;
                    Ok(Expr::Call(name, args, span))
                } else {
                    Ok(Expr::Ident(name, span))
                }
            }
            Token::LBracket => {
                let items = self.parse_args(&Token::RBracket)?;
                Ok(Expr::Array(items, span))
            }
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(Error::ParseError(format!(
                "Unexpected {} at {}",
                other, span
            ))),
        }
    }

    /// Comma-separated expressions up to and including `close`
    fn parse_args(&mut self, close: &Token) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span().clone();
    Expr::Binary(op, Box::new(left), Box::new(right), span)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Structural shape without spans, for readable assertions
    fn shape(expr: &Expr) -> String {
        match expr {
            Expr::Literal(Literal::String(s), _) => format!("{:?}", s),
            Expr::Literal(Literal::Integer(n), _) => n.to_string(),
            Expr::Literal(Literal::Float(n), _) => n.to_string(),
            Expr::Literal(Literal::Boolean(b), _) => b.to_string(),
            Expr::Literal(Literal::Null, _) => "null".into(),
            Expr::Ident(name, _) => name.clone(),
            Expr::Array(items, _) => format!(
                "[{}]",
                items.iter().map(shape).collect::<Vec<_>>().join(", ")
            ),
            Expr::Field(target, name, _) => format!("{}.{}", shape(target), name),
            Expr::Index(target, index, _) => format!("{}[{}]", shape(target), shape(index)),
            Expr::Call(name, args, _) => format!(
                "{}({})",
                name,
                args.iter().map(shape).collect::<Vec<_>>().join(", ")
            ),
            Expr::Unary(UnaryOp::Not, operand, _) => format!("(not {})", shape(operand)),
            Expr::Unary(UnaryOp::Neg, operand, _) => format!("(-{})", shape(operand)),
            Expr::Binary(op, l, r, _) => format!("({} {} {})", shape(l), op, shape(r)),
        }
    }

    fn parse_shape(input: &str) -> String {
        shape(&parse_invariant(input).unwrap())
    }

    #[test]
    fn test_parse_comparison() {
        assert_eq!(parse_shape("len(output) <= 80"), "(len(output) <= 80)");
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        assert_eq!(parse_shape("a or b and c"), "(a or (b and c))");
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(parse_shape("1 + 2 * 3 > 6"), "((1 + (2 * 3)) > 6)");
    }

    #[test]
    fn test_method_call_lowered_to_function() {
        assert_eq!(
            parse_shape("output.slug.ends_with('-')"),
            "ends_with(output.slug, \"-\")"
        );
    }

    #[test]
    fn test_index_and_field_chain() {
        assert_eq!(
            parse_shape("output.items[0].name == 'x'"),
            "(output.items[0].name == \"x\")"
        );
    }

    #[test]
    fn test_not_and_in() {
        assert_eq!(
            parse_shape("not output.status in ['draft', 'final']"),
            "(not (output.status in [\"draft\", \"final\"]))"
        );
    }

    #[test]
    fn test_parenthesized_grouping() {
        assert_eq!(parse_shape("(a or b) and c"), "((a or b) and c)");
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(parse_shape("output > -1"), "(output > (-1))");
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = parse_invariant("output == 1 2").unwrap_err().to_string();
        assert!(err.contains("Unexpected integer 2 at 1:13"), "{}", err);
    }

    #[test]
    fn test_missing_close_paren() {
        let err = parse_invariant("len(output").unwrap_err().to_string();
        assert!(err.contains("Expected ','"), "{}", err);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(parse_invariant("   ").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}output{}", "(".repeat(100), ")".repeat(100));
        let err = parse_invariant(&deep).unwrap_err().to_string();
        assert!(err.contains("nested deeper"), "{}", err);
    }

    #[test]
    fn test_long_operator_chain_rejected() {
        let chain = vec!["1"; 10_000].join(" + ");
        let err = parse_invariant(&format!("{} == 0", chain)).unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));
        assert!(err.to_string().contains("nested deeper"), "{}", err);
    }

    #[test]
    fn test_long_boolean_and_access_chains_rejected() {
        let ands = vec!["true"; 5_000].join(" and ");
        assert!(parse_invariant(&ands).is_err());
        let ors = vec!["true"; 5_000].join(" || ");
        assert!(parse_invariant(&ors).is_err());
        let fields = format!("output{}", ".a".repeat(5_000));
        assert!(parse_invariant(&fields).is_err());
        let indexes = format!("output{}", "[0]".repeat(5_000));
        assert!(parse_invariant(&indexes).is_err());
    }

    #[test]
    fn test_moderate_chain_accepted() {
        let chain = vec!["1"; 20].join(" + ");
        assert_eq!(parse_shape(&format!("{} == 20", chain)).matches('+').count(), 19);
    }

    #[test]
    fn test_parse_determinism_100_iterations() {
        let input = "matches(output, '^[a-z0-9-]+$') && output.length <= 80";
        let first = parse_invariant(input).unwrap();
        for i in 0..100 {
            let result = parse_invariant(input).unwrap();
            assert_eq!(first, result, "Determinism failure at iteration {}", i);
        }
    }
}
