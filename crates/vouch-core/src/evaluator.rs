//! Invariant evaluator: checks boolean invariants against a candidate
//!
//! Invariants are parsed with the restricted grammar in [`crate::parser`]
//! and evaluated over a read-only [`Value`] tree. The candidate is the only
//! name in scope (bound as [`CANDIDATE_BINDING`]); functions come from a
//! fixed whitelist. Nothing here can reach the filesystem, environment,
//! clock or any shared state.
//!
//! # Isolation
//!
//! Each invariant is evaluated on its own. An invariant that errors (type
//! mismatch, missing field, bad regex) is recorded as a violation carrying
//! the error message and the remaining invariants are still evaluated.

use std::collections::{BTreeMap, HashMap};

use regex::{Regex, RegexBuilder};

use crate::parser::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::parser::parse_invariant;
use crate::{Error, Result, Violation};

/// The name the candidate is bound to inside invariant expressions
pub const CANDIDATE_BINDING: &str = "output";

/// Upper bound on the compiled size of regexes passed to `matches`
const REGEX_SIZE_LIMIT: usize = 1 << 20;

// ── Values ────────────────────────────────────────────────

/// A typed runtime value seen by invariant expressions
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null / missing
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value (i64)
    Integer(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Ordered map (BTreeMap for deterministic iteration)
    Object(BTreeMap<String, Value>),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Value {
    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
        }
    }

    /// Convert from serde_json::Value (deterministic, uses BTreeMap)
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(arr) => Value::Array(arr.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to serde_json::Value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::json!(*i),
            Value::Float(f) => serde_json::json!(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(arr) => serde_json::Value::Array(arr.iter().map(|v| v.to_json()).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Equality with Integer/Float unification (`1 == 1.0`)
    fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loosely_equals(vb))
            }
            _ => self == other,
        }
    }
}

// ── Reports ───────────────────────────────────────────────

/// Outcome of evaluating a list of invariants against one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantReport {
    /// `true` iff `violations` is empty
    pub valid: bool,
    /// Failed or erroring invariants, in declaration order
    pub violations: Vec<Violation>,
}

impl InvariantReport {
    fn from_violations(violations: Vec<Violation>) -> Self {
        InvariantReport {
            valid: violations.is_empty(),
            violations,
        }
    }
}

// ── Compiled invariants ───────────────────────────────────

/// An invariant parsed once and evaluated against many candidates
#[derive(Debug, Clone)]
pub struct CompiledInvariant {
    pub text: String,
    expr: Expr,
    /// `matches` patterns given as string literals, built at parse time
    patterns: HashMap<String, Regex>,
}

impl CompiledInvariant {
    /// Parse invariant text.
    ///
    /// # Errors
    /// Returns `ParseError` for malformed expressions.
    pub fn parse(text: &str) -> Result<Self> {
        let expr = parse_invariant(text)?;
        let mut patterns = HashMap::new();
        collect_patterns(&expr, &mut patterns);
        Ok(CompiledInvariant {
            text: text.to_string(),
            expr,
            patterns,
        })
    }

    /// Evaluate against a candidate; `Ok(false)` is a failed invariant,
    /// `Err` an evaluation error.
    pub fn holds(&self, candidate: &Value) -> Result<bool> {
        match Scope::new(candidate, &self.patterns).eval(&self.expr)? {
            Value::Boolean(b) => Ok(b),
            other => Err(Error::EvaluationError(format!(
                "invariant produced {}, expected Boolean",
                other.type_name()
            ))),
        }
    }
}

/// Evaluates a fixed set of invariants against candidates
#[derive(Debug, Clone, Default)]
pub struct InvariantEvaluator {
    invariants: Vec<CompiledInvariant>,
}

impl InvariantEvaluator {
    /// Parse every invariant up front.
    ///
    /// # Errors
    /// Returns the first `ParseError`, prefixed with the invariant's position.
    pub fn compile(invariants: &[String]) -> Result<Self> {
        let compiled = invariants
            .iter()
            .enumerate()
            .map(|(i, text)| {
                CompiledInvariant::parse(text).map_err(|e| match e {
                    Error::ParseError(msg) => {
                        Error::ParseError(format!("invariant #{} '{}': {}", i + 1, text, msg))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(InvariantEvaluator {
            invariants: compiled,
        })
    }

    /// Number of compiled invariants
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    /// Evaluate every compiled invariant against a candidate
    pub fn check(&self, candidate: &serde_json::Value) -> InvariantReport {
        let value = Value::from_json(candidate);
        let violations = self
            .invariants
            .iter()
            .filter_map(|inv| violation_for(&inv.text, inv.holds(&value)))
            .collect();
        InvariantReport::from_violations(violations)
    }

    /// One-shot evaluation of invariant text.
    ///
    /// Unlike [`InvariantEvaluator::compile`], a syntax error here is
    /// recorded as a violation of that invariant and does not stop the rest.
    pub fn evaluate(candidate: &serde_json::Value, invariants: &[String]) -> InvariantReport {
        let value = Value::from_json(candidate);
        let violations = invariants
            .iter()
            .filter_map(|text| {
                let outcome = CompiledInvariant::parse(text).and_then(|inv| inv.holds(&value));
                violation_for(text, outcome)
            })
            .collect();
        InvariantReport::from_violations(violations)
    }
}

/// Invalid literal patterns are skipped so the error surfaces per candidate
fn collect_patterns(expr: &Expr, patterns: &mut HashMap<String, Regex>) {
    match expr {
        Expr::Call(name, args, _) => {
            if let (
                "matches",
                [_, Expr::Literal(Literal::String(pattern), _)],
            ) = (name.as_str(), args.as_slice())
            {
                if !patterns.contains_key(pattern) {
                    if let Ok(regex) = build_regex(pattern) {
                        patterns.insert(pattern.clone(), regex);
                    }
                }
            }
            for arg in args {
                collect_patterns(arg, patterns);
            }
        }
        Expr::Array(items, _) => items.iter().for_each(|e| collect_patterns(e, patterns)),
        Expr::Field(target, _, _) | Expr::Unary(_, target, _) => collect_patterns(target, patterns),
        Expr::Index(left, right, _) | Expr::Binary(_, left, right, _) => {
            collect_patterns(left, patterns);
            collect_patterns(right, patterns);
        }
        Expr::Literal(..) | Expr::Ident(..) => {}
    }
}

fn build_regex(pattern: &str) -> std::result::Result<Regex, String> {
    RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| format!("invalid regex '{}': {}", pattern, e))
}

fn violation_for(text: &str, outcome: Result<bool>) -> Option<Violation> {
    match outcome {
        Ok(true) => None,
        Ok(false) => Some(Violation::invariant_failed(text)),
        Err(err) => {
            tracing::debug!(invariant = text, error = %err, "invariant evaluation error");
            Some(Violation::invariant_error(text, &err.to_string()))
        }
    }
}

// ── Expression evaluation ─────────────────────────────────

/// Read-only evaluation scope: the candidate and nothing else
struct Scope<'a> {
    output: &'a Value,
    patterns: &'a HashMap<String, Regex>,
}

impl<'a> Scope<'a> {
    fn new(output: &'a Value, patterns: &'a HashMap<String, Regex>) -> Self {
        Scope { output, patterns }
    }

    fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(lit, _) => Ok(match lit {
                Literal::Null => Value::Null,
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::Integer(n) => Value::Integer(*n),
                Literal::Float(n) => Value::Float(*n),
                Literal::String(s) => Value::String(s.clone()),
            }),
            Expr::Ident(name, span) => {
                if name == CANDIDATE_BINDING {
                    Ok(self.output.clone())
                } else {
                    Err(eval_error(
                        format!(
                            "unknown name '{}' (only '{}' is in scope)",
                            name, CANDIDATE_BINDING
                        ),
                        span,
                    ))
                }
            }
            Expr::Array(items, _) => Ok(Value::Array(
                items.iter().map(|e| self.eval(e)).collect::<Result<_>>()?,
            )),
            Expr::Field(target, name, span) => {
                let target = self.eval(target)?;
                field(&target, name).map_err(|msg| eval_error(msg, span))
            }
            Expr::Index(target, index, span) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                subscript(&target, &index).map_err(|msg| eval_error(msg, span))
            }
            Expr::Call(name, args, span) => {
                let args = args.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>>>()?;
                if let ("matches", [Value::String(s), Value::String(pattern)]) =
                    (name.as_str(), args.as_slice())
                {
                    if let Some(regex) = self.patterns.get(pattern) {
                        return Ok(Value::Boolean(regex.is_match(s)));
                    }
                }
                call(name, &args).map_err(|msg| eval_error(msg, span))
            }
            Expr::Unary(op, operand, span) => {
                let value = self.eval(operand)?;
                match (op, value) {
                    (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
                    (UnaryOp::Neg, Value::Integer(i)) => i
                        .checked_neg()
                        .map(Value::Integer)
                        .ok_or_else(|| eval_error("integer overflow".into(), span)),
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Not, other) => Err(eval_error(
                        format!("'not' expects Boolean, found {}", other.type_name()),
                        span,
                    )),
                    (UnaryOp::Neg, other) => Err(eval_error(
                        format!("'-' expects a number, found {}", other.type_name()),
                        span,
                    )),
                }
            }
            Expr::Binary(BinaryOp::And, left, right, span) => {
                if self.eval_bool(left, "and", span)? {
                    Ok(Value::Boolean(self.eval_bool(right, "and", span)?))
                } else {
                    Ok(Value::Boolean(false))
                }
            }
            Expr::Binary(BinaryOp::Or, left, right, span) => {
                if self.eval_bool(left, "or", span)? {
                    Ok(Value::Boolean(true))
                } else {
                    Ok(Value::Boolean(self.eval_bool(right, "or", span)?))
                }
            }
            Expr::Binary(op, left, right, span) => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary(*op, &l, &r).map_err(|msg| eval_error(msg, span))
            }
        }
    }

    fn eval_bool(&self, expr: &Expr, op: &str, span: &crate::parser::tokenizer::Span) -> Result<bool> {
        match self.eval(expr)? {
            Value::Boolean(b) => Ok(b),
            other => Err(eval_error(
                format!("'{}' expects Boolean operands, found {}", op, other.type_name()),
                span,
            )),
        }
    }
}

fn eval_error(message: String, span: &crate::parser::tokenizer::Span) -> Error {
    Error::EvaluationError(format!("{} at {}", message, span))
}

type EvalResult = std::result::Result<Value, String>;

fn field(target: &Value, name: &str) -> EvalResult {
    match (target, name) {
        (Value::Object(map), _) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        (Value::String(_) | Value::Array(_), "length") => call("len", std::slice::from_ref(target)),
        (other, _) => Err(format!(
            "cannot read field '{}' of {}",
            name,
            other.type_name()
        )),
    }
}

fn subscript(target: &Value, index: &Value) -> EvalResult {
    match (target, index) {
        (Value::Array(items), Value::Integer(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null)),
        (Value::String(s), Value::Integer(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        (Value::Object(map), Value::String(key)) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        (t, i) => Err(format!(
            "cannot index {} with {}",
            t.type_name(),
            i.type_name()
        )),
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> EvalResult {
    match op {
        BinaryOp::Eq => Ok(Value::Boolean(l.loosely_equals(r))),
        BinaryOp::NotEq => Ok(Value::Boolean(!l.loosely_equals(r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (l, r) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => match (l.as_f64(), r.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => {
                        return Err(format!(
                            "cannot compare {} {} {}",
                            l.type_name(),
                            op,
                            r.type_name()
                        ))
                    }
                },
            };
            let ordering = ordering.ok_or_else(|| "comparison with NaN".to_string())?;
            Ok(Value::Boolean(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::In => match (l, r) {
            (needle, Value::Array(items)) => {
                Ok(Value::Boolean(items.iter().any(|item| item.loosely_equals(needle))))
            }
            (Value::String(needle), Value::String(haystack)) => {
                Ok(Value::Boolean(haystack.contains(needle.as_str())))
            }
            (Value::String(key), Value::Object(map)) => Ok(Value::Boolean(map.contains_key(key))),
            _ => Err(format!(
                "'in' not supported for {} in {}",
                l.type_name(),
                r.type_name()
            )),
        },
        BinaryOp::Add => match (l, r) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b).cloned().collect()))
            }
            _ => arithmetic(op, l, r),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(op, l, r),
        BinaryOp::And | BinaryOp::Or => Err(format!("'{}' evaluated out of order", op)),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> EvalResult {
    if let (Value::Integer(a), Value::Integer(b)) = (l, r) {
        let result = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            _ => {
                if *b == 0 {
                    return Err("division by zero".into());
                }
                if a % b != 0 {
                    return Ok(Value::Float(*a as f64 / *b as f64));
                }
                a.checked_div(*b)
            }
        };
        return result
            .map(Value::Integer)
            .ok_or_else(|| "integer overflow".to_string());
    }
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => match op {
            BinaryOp::Add => Ok(Value::Float(a + b)),
            BinaryOp::Sub => Ok(Value::Float(a - b)),
            BinaryOp::Mul => Ok(Value::Float(a * b)),
            _ if b == 0.0 => Err("division by zero".into()),
            _ => Ok(Value::Float(a / b)),
        },
        _ => Err(format!(
            "cannot apply '{}' to {} and {}",
            op,
            l.type_name(),
            r.type_name()
        )),
    }
}

// ── Function whitelist ────────────────────────────────────

fn call(name: &str, args: &[Value]) -> EvalResult {
    match (name, args) {
        ("len", [value]) => match value {
            Value::String(s) => Ok(Value::Integer(s.chars().count() as i64)),
            Value::Array(items) => Ok(Value::Integer(items.len() as i64)),
            Value::Object(map) => Ok(Value::Integer(map.len() as i64)),
            other => Err(format!("len() not supported for {}", other.type_name())),
        },
        ("lower", [Value::String(s)]) => Ok(Value::String(s.to_lowercase())),
        ("upper", [Value::String(s)]) => Ok(Value::String(s.to_uppercase())),
        ("trim", [Value::String(s)]) => Ok(Value::String(s.trim().to_string())),
        ("matches", [Value::String(s), Value::String(pattern)]) => {
            let regex = build_regex(pattern)?;
            Ok(Value::Boolean(regex.is_match(s)))
        }
        ("starts_with", [Value::String(s), Value::String(prefix)]) => {
            Ok(Value::Boolean(s.starts_with(prefix.as_str())))
        }
        ("ends_with", [Value::String(s), Value::String(suffix)]) => {
            Ok(Value::Boolean(s.ends_with(suffix.as_str())))
        }
        ("contains", [haystack, needle]) => binary(BinaryOp::In, needle, haystack),
        ("type_of", [value]) => Ok(Value::String(value.type_name().to_lowercase())),
        ("is_string", [value]) => Ok(Value::Boolean(matches!(value, Value::String(_)))),
        ("is_number", [value]) => Ok(Value::Boolean(matches!(
            value,
            Value::Integer(_) | Value::Float(_)
        ))),
        ("is_array", [value]) => Ok(Value::Boolean(matches!(value, Value::Array(_)))),
        ("is_object", [value]) => Ok(Value::Boolean(matches!(value, Value::Object(_)))),
        ("keys", [Value::Object(map)]) => Ok(Value::Array(
            map.keys().map(|k| Value::String(k.clone())).collect(),
        )),
        (
            "len" | "lower" | "upper" | "trim" | "matches" | "starts_with" | "ends_with"
            | "contains" | "type_of" | "is_string" | "is_number" | "is_array" | "is_object"
            | "keys",
            _,
        ) => Err(format!(
            "{}() does not accept ({})",
            name,
            args.iter().map(Value::type_name).collect::<Vec<_>>().join(", ")
        )),
        _ => Err(format!("unknown function '{}'", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ViolationKind;
    use serde_json::json;

    fn holds(invariant: &str, candidate: serde_json::Value) -> Result<bool> {
        CompiledInvariant::parse(invariant)?.holds(&Value::from_json(&candidate))
    }

    // ── Value conversion ──────────────────────────────────

    #[test]
    fn test_value_from_json_primitives() {
        assert_eq!(Value::from_json(&json!(null)), Value::Null);
        assert_eq!(Value::from_json(&json!(true)), Value::Boolean(true));
        assert_eq!(Value::from_json(&json!(42)), Value::Integer(42));
        assert_eq!(Value::from_json(&json!(2.5)), Value::Float(2.5));
        assert_eq!(Value::from_json(&json!("hi")), Value::String("hi".into()));
    }

    #[test]
    fn test_value_roundtrip_json() {
        let original = json!({"slug": "abc", "tags": ["a", "b"], "n": 3, "ok": true});
        assert_eq!(Value::from_json(&original).to_json(), original);
    }

    // ── Operators ─────────────────────────────────────────

    #[test]
    fn test_string_length_and_regex() {
        assert!(holds("len(output) <= 80 and matches(output, '^[a-z0-9-]+$')", json!("abc-1")).unwrap());
        assert!(!holds("matches(output, '^[a-z0-9-]+$')", json!("ABC")).unwrap());
        assert!(holds("output.length == 3", json!("abc")).unwrap());
    }

    #[test]
    fn test_field_and_index_access() {
        let candidate = json!({"items": [{"name": "x"}, {"name": "y"}], "meta": {"k": 1}});
        assert!(holds("output.items[1].name == 'y'", candidate.clone()).unwrap());
        assert!(holds("output['meta'].k == 1", candidate.clone()).unwrap());
        assert!(holds("output.missing == null", candidate.clone()).unwrap());
        assert!(holds("output.items[9] == null", candidate).unwrap());
    }

    #[test]
    fn test_numeric_unification() {
        assert!(holds("output == 1.0", json!(1)).unwrap());
        assert!(holds("output / 2 == 1.5", json!(3)).unwrap());
        assert!(holds("output * 2 - 1 > 4", json!(3)).unwrap());
    }

    #[test]
    fn test_in_operator_and_contains() {
        assert!(holds("output.status in ['draft', 'final']", json!({"status": "final"})).unwrap());
        assert!(holds("'b' in output", json!("abc")).unwrap());
        assert!(holds("'k' in output", json!({"k": 0})).unwrap());
        assert!(holds("output.contains(2)", json!([1, 2, 3])).unwrap());
    }

    #[test]
    fn test_method_syntax() {
        assert!(holds("not output.ends_with('-')", json!("abc")).unwrap());
        assert!(holds("output.lower() == 'abc'", json!("ABC")).unwrap());
        assert!(holds("output.trim().starts_with('a')", json!("  abc")).unwrap());
    }

    #[test]
    fn test_short_circuit_skips_erroring_branch() {
        assert!(holds("is_string(output) or output.x.y == 1", json!("s")).unwrap());
        assert!(!holds("is_object(output) and output.x.y == 1", json!("s")).unwrap());
    }

    #[test]
    fn test_type_helpers() {
        assert!(holds("type_of(output) == 'array'", json!([])).unwrap());
        assert!(holds("is_number(output)", json!(1.5)).unwrap());
        assert!(holds("keys(output) == ['a', 'b']", json!({"b": 1, "a": 2})).unwrap());
    }

    // ── Errors ────────────────────────────────────────────

    #[test]
    fn test_unknown_name_is_error() {
        let err = holds("env == 'x'", json!("x")).unwrap_err().to_string();
        assert!(err.contains("unknown name 'env'"), "{}", err);
    }

    #[test]
    fn test_unknown_function_is_error() {
        let err = holds("read_file('/etc/passwd') == ''", json!("x")).unwrap_err().to_string();
        assert!(err.contains("unknown function 'read_file'"), "{}", err);
    }

    #[test]
    fn test_type_mismatch_is_error() {
        assert!(holds("output > 3", json!("abc")).is_err());
        assert!(holds("len(output)", json!(5)).is_err());
        assert!(holds("output.name", json!(null)).is_err());
    }

    #[test]
    fn test_non_boolean_result_is_error() {
        let err = holds("len(output)", json!("abc")).unwrap_err().to_string();
        assert!(err.contains("expected Boolean"), "{}", err);
    }

    #[test]
    fn test_invalid_regex_is_error() {
        assert!(holds("matches(output, '(')", json!("x")).is_err());
    }

    #[test]
    fn test_literal_patterns_built_once() {
        let inv = CompiledInvariant::parse(
            "matches(output.a, '^[a-z]+$') and output.b.matches('^[0-9]+$') and matches(output.c, '^[a-z]+$')",
        )
        .unwrap();
        assert_eq!(inv.patterns.len(), 2);
        assert!(inv.holds(&Value::from_json(&json!({"a": "x", "b": "1", "c": "y"}))).unwrap());
        assert!(!inv.holds(&Value::from_json(&json!({"a": "X", "b": "1", "c": "y"}))).unwrap());
    }

    #[test]
    fn test_computed_pattern_still_evaluated() {
        let inv = CompiledInvariant::parse("matches(output.s, output.p)").unwrap();
        assert!(inv.patterns.is_empty());
        assert!(inv.holds(&Value::from_json(&json!({"s": "abc", "p": "^a"}))).unwrap());
        let err = inv.holds(&Value::from_json(&json!({"s": "abc", "p": "("}))).unwrap_err();
        assert!(err.to_string().contains("invalid regex"), "{}", err);
    }

    #[test]
    fn test_invalid_literal_pattern_errors_per_candidate() {
        let inv = CompiledInvariant::parse("matches(output, '(')").unwrap();
        assert!(inv.patterns.is_empty());
        assert!(inv.holds(&Value::from_json(&json!("x"))).is_err());
    }

    #[test]
    fn test_long_chain_is_an_invariant_error_not_a_crash() {
        let chain = format!("{} == 0", vec!["1"; 10_000].join(" + "));
        let report = InvariantEvaluator::evaluate(&json!("x"), &[chain, "output == 'x'".to_string()]);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::InvariantError);
        assert!(report.violations[0].message.contains("nested deeper"));
    }

    #[test]
    fn test_division_by_zero_is_error() {
        assert!(holds("output / 0 == 1", json!(1)).is_err());
    }

    // ── Batches ───────────────────────────────────────────

    #[test]
    fn test_erroring_invariant_does_not_stop_the_rest() {
        let invariants = vec![
            "output.deep.field > 1".to_string(),
            "len(output.slug) <= 3".to_string(),
            "output.slug == 'abc'".to_string(),
        ];
        let report = InvariantEvaluator::evaluate(&json!({"slug": "abcd"}), &invariants);
        assert!(!report.valid);
        assert_eq!(report.violations.len(), 3);
        assert_eq!(report.violations[0].kind, ViolationKind::InvariantError);
        assert_eq!(report.violations[1].kind, ViolationKind::InvariantFailed);
        assert_eq!(report.violations[1].path, "len(output.slug) <= 3");
        assert_eq!(report.violations[2].kind, ViolationKind::InvariantFailed);
    }

    #[test]
    fn test_syntax_error_isolated_in_one_shot_evaluation() {
        let invariants = vec!["output ==".to_string(), "output == 1".to_string()];
        let report = InvariantEvaluator::evaluate(&json!(1), &invariants);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::InvariantError);
        assert!(report.violations[0].message.contains("Parse error"));
    }

    #[test]
    fn test_compile_rejects_syntax_errors() {
        let err = InvariantEvaluator::compile(&["len(output) <".to_string()]).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("invariant #1"));
    }

    #[test]
    fn test_compiled_check_valid() {
        let evaluator =
            InvariantEvaluator::compile(&["output.n >= 0".to_string(), "output.n < 10".to_string()])
                .unwrap();
        assert_eq!(evaluator.len(), 2);
        assert!(evaluator.check(&json!({"n": 3})).valid);
        assert!(!evaluator.check(&json!({"n": 12})).valid);
    }

    #[test]
    fn test_empty_invariant_list_is_valid() {
        let report = InvariantEvaluator::evaluate(&json!("anything"), &[]);
        assert!(report.valid);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_evaluation_does_not_mutate_candidate() {
        let candidate = json!({"slug": "abc"});
        let before = candidate.clone();
        let _ = InvariantEvaluator::evaluate(&candidate, &["output.slug + 'x' == 'abcx'".to_string()]);
        assert_eq!(candidate, before);
    }
}
