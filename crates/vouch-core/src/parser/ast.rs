//! Invariant AST types
//!
//! Every node carries the [`Span`] of its first token so evaluation
//! errors can point back into the invariant text.

use super::tokenizer::Span;

/// Literal constant in an invariant expression
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// Prefix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Infix operators, loosest binding first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let symbol = match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        f.write_str(symbol)
    }
}

/// A parsed invariant expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal, Span),
    /// Bare name; only the candidate binding resolves
    Ident(String, Span),
    /// `[a, b, c]`
    Array(Vec<Expr>, Span),
    /// `target.name`
    Field(Box<Expr>, String, Span),
    /// `target[index]`
    Index(Box<Expr>, Box<Expr>, Span),
    /// `name(args)`; method syntax `x.name(a)` is lowered to `name(x, a)`
    Call(String, Vec<Expr>, Span),
    Unary(UnaryOp, Box<Expr>, Span),
    Binary(BinaryOp, Box<Expr>, Box<Expr>, Span),
}

impl Expr {
    /// Source position of the expression's first token
    pub fn span(&self) -> &Span {
        match self {
            Expr::Literal(_, span)
            | Expr::Ident(_, span)
            | Expr::Array(_, span)
            | Expr::Field(_, _, span)
            | Expr::Index(_, _, span)
            | Expr::Call(_, _, span)
            | Expr::Unary(_, _, span)
            | Expr::Binary(_, _, _, span) => span,
        }
    }
}
