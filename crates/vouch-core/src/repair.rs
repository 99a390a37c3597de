//! Repairer: deterministic, idempotent fixes for failing candidates
//!
//! Repairs are looked up in a [`RepairRegistry`] by violation kind, or by
//! the exact text of an invariant. Each repair is a [`Repair`] trait object
//! that rewrites the sub-value a violation points at, using parameters
//! (pattern, limits) read from the schema node that declared the failing
//! keyword.
//!
//! # Guarantees
//!
//! - **Pure**: the same `(candidate, violations, schema)` always yields the
//!   same value
//! - **Idempotent**: repairing an already repaired value with the same
//!   violations changes nothing
//! - **Total**: repair never fails; when nothing applies the candidate is
//!   returned unchanged

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Number, Value};

use crate::schema::CompiledSchema;
use crate::{Violation, ViolationKind, ViolationSource};

/// What a repair gets to look at
#[derive(Debug, Clone, Copy)]
pub struct RepairTarget<'a> {
    /// The sub-value the violation points at
    pub value: &'a Value,
    /// Schema object that declared the failing keyword, if resolvable
    pub schema: Option<&'a Value>,
    pub violation: &'a Violation,
}

/// A single catalogued transformation
pub trait Repair: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Return the rewritten value, or `None` if the repair does not apply.
    fn apply(&self, target: &RepairTarget<'_>) -> Option<Value>;
}

/// Ordered repairs keyed by violation kind and by invariant text
#[derive(Default)]
pub struct RepairRegistry {
    by_kind: HashMap<ViolationKind, Vec<Box<dyn Repair>>>,
    by_invariant: HashMap<String, Vec<Box<dyn Repair>>>,
}

impl std::fmt::Debug for RepairRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.by_kind.keys().map(ViolationKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("RepairRegistry")
            .field("kinds", &kinds)
            .field("invariants", &self.by_invariant.len())
            .finish()
    }
}

impl RepairRegistry {
    /// A registry with no repairs; every repair is a no-op
    pub fn empty() -> Self {
        Self::default()
    }

    /// The default catalog
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ViolationKind::Pattern, SanitizeToPattern);
        registry.register(ViolationKind::TooLong, TruncateToMaxLength);
        registry.register(ViolationKind::TooManyItems, TruncateToMaxItems);
        registry.register(ViolationKind::OutOfRange, ClampToRange);
        registry.register(ViolationKind::AdditionalProperties, DropUndeclaredProperties);
        registry
    }

    /// Append a repair for a violation kind; repairs run in registration order
    pub fn register(&mut self, kind: ViolationKind, repair: impl Repair + 'static) -> &mut Self {
        self.by_kind.entry(kind).or_default().push(Box::new(repair));
        self
    }

    /// Append a repair for one specific invariant, matched by its exact text.
    ///
    /// The repair sees the whole candidate.
    pub fn register_for_invariant(
        &mut self,
        invariant: impl Into<String>,
        repair: impl Repair + 'static,
    ) -> &mut Self {
        self.by_invariant
            .entry(invariant.into())
            .or_default()
            .push(Box::new(repair));
        self
    }

    fn repairs_for(&self, violation: &Violation) -> impl Iterator<Item = &Box<dyn Repair>> {
        let by_invariant = match violation.source {
            ViolationSource::Invariant => self.by_invariant.get(&violation.path),
            ViolationSource::Schema => None,
        };
        by_invariant
            .into_iter()
            .chain(self.by_kind.get(&violation.kind))
            .flatten()
    }
}

/// Applies registry repairs for a list of violations
#[derive(Debug)]
pub struct Repairer {
    registry: RepairRegistry,
}

impl Default for Repairer {
    fn default() -> Self {
        Repairer::new(RepairRegistry::with_defaults())
    }
}

impl Repairer {
    pub fn new(registry: RepairRegistry) -> Self {
        Repairer { registry }
    }

    pub fn registry(&self) -> &RepairRegistry {
        &self.registry
    }

    /// Repair a candidate.
    ///
    /// Violations are processed in order; for each, its repairs run in
    /// registration order against the current value at the violation's path.
    /// A violation whose path no longer exists is skipped.
    pub fn repair(&self, candidate: &Value, violations: &[Violation], schema: &CompiledSchema) -> Value {
        let mut repaired = candidate.clone();
        for violation in violations {
            let pointer = match violation.source {
                ViolationSource::Schema => violation.path.as_str(),
                ViolationSource::Invariant => "",
            };
            let schema_node = violation
                .schema_path
                .as_deref()
                .and_then(|path| schema.keyword_parent(path));
            for repair in self.registry.repairs_for(violation) {
                let Some(current) = repaired.pointer(pointer) else {
                    break;
                };
                let target = RepairTarget {
                    value: current,
                    schema: schema_node,
                    violation,
                };
                if let Some(next) = repair.apply(&target) {
                    if &next != current {
                        tracing::debug!(
                            repair = repair.name(),
                            path = pointer,
                            kind = %violation.kind,
                            "applied repair"
                        );
                        if let Some(slot) = repaired.pointer_mut(pointer) {
                            *slot = next;
                        }
                    }
                }
            }
        }
        repaired
    }
}

// ── Default catalog ───────────────────────────────────────

const SEPARATORS: [char; 2] = ['-', '_'];

fn is_separator(c: char) -> bool {
    SEPARATORS.contains(&c) || c.is_whitespace()
}

fn trim_separators(s: &str) -> &str {
    s.trim_matches(is_separator)
}

/// Rewrites a string toward the characters its `pattern` allows:
/// whitespace and underscores become `-` when only `-` is allowed, other
/// disallowed punctuation is stripped, separator runs collapse and edge
/// separators are trimmed. Letters and digits are left alone, so case
/// mismatches are not fixed.
#[derive(Debug, Clone, Copy)]
pub struct SanitizeToPattern;

impl Repair for SanitizeToPattern {
    fn name(&self) -> &str {
        "sanitize_to_pattern"
    }

    fn apply(&self, target: &RepairTarget<'_>) -> Option<Value> {
        let s = target.value.as_str()?;
        let pattern = target.schema?.get("pattern")?.as_str()?;
        let allowed = AllowedChars::from_pattern(pattern)?;
        Some(Value::String(sanitize(s, &allowed)))
    }
}

fn sanitize(s: &str, allowed: &AllowedChars) -> String {
    let dash_allowed = allowed.contains('-');
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let c = if (c.is_whitespace() || c == '_') && !allowed.contains(c) && dash_allowed {
            '-'
        } else {
            c
        };
        if !allowed.contains(c) && !c.is_alphanumeric() {
            continue;
        }
        if is_separator(c) && out.ends_with(c) {
            continue;
        }
        out.push(c);
    }
    trim_separators(&out).to_string()
}

/// Characters a regex pattern can match literally or via bracket classes
#[derive(Debug, Default)]
struct AllowedChars {
    singles: BTreeSet<char>,
    ranges: Vec<(char, char)>,
    digits: bool,
    words: bool,
    spaces: bool,
}

impl AllowedChars {
    /// Collect the characters from the positive bracket classes and the
    /// literal characters outside them. `None` if the pattern has no
    /// positive class (nothing can be said about what it allows).
    fn from_pattern(pattern: &str) -> Option<Self> {
        let mut allowed = AllowedChars::default();
        let mut saw_class = false;
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        allowed.add_escape(escaped);
                    }
                }
                '[' => {
                    let negated = chars.peek() == Some(&'^');
                    if negated {
                        chars.next();
                    }
                    let mut class = AllowedChars::default();
                    let mut prev: Option<char> = None;
                    let mut first = true;
                    while let Some(c) = chars.next() {
                        match c {
                            ']' if !first => break,
                            '\\' => {
                                if let Some(escaped) = chars.next() {
                                    class.add_escape(escaped);
                                    prev = Some(escaped);
                                }
                            }
                            '-' if prev.is_some()
                                && chars.peek().is_some_and(|next| *next != ']') =>
                            {
                                if let (Some(lo), Some(hi)) = (prev, chars.next()) {
                                    class.ranges.push((lo, hi));
                                }
                                prev = None;
                            }
                            c => {
                                class.singles.insert(c);
                                prev = Some(c);
                            }
                        }
                        first = false;
                    }
                    if !negated {
                        saw_class = true;
                        allowed.merge(class);
                    }
                }
                '^' | '$' | '(' | ')' | '|' | '*' | '+' | '?' | '.' => {}
                '{' => {
                    for c in chars.by_ref() {
                        if c == '}' {
                            break;
                        }
                    }
                }
                c => {
                    allowed.singles.insert(c);
                }
            }
        }
        saw_class.then_some(allowed)
    }

    fn add_escape(&mut self, escaped: char) {
        match escaped {
            'd' => self.digits = true,
            'w' => self.words = true,
            's' => self.spaces = true,
            'D' | 'W' | 'S' | 'b' | 'B' => {}
            c => {
                self.singles.insert(c);
            }
        }
    }

    fn merge(&mut self, other: AllowedChars) {
        self.singles.extend(other.singles);
        self.ranges.extend(other.ranges);
        self.digits |= other.digits;
        self.words |= other.words;
        self.spaces |= other.spaces;
    }

    fn contains(&self, c: char) -> bool {
        self.singles.contains(&c)
            || self.ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&c))
            || (self.digits && c.is_ascii_digit())
            || (self.words && (c.is_alphanumeric() || c == '_'))
            || (self.spaces && c.is_whitespace())
    }
}

/// Truncates a string to `maxLength` characters, then trims trailing
/// separators and whitespace
#[derive(Debug, Clone, Copy)]
pub struct TruncateToMaxLength;

impl Repair for TruncateToMaxLength {
    fn name(&self) -> &str {
        "truncate_to_max_length"
    }

    fn apply(&self, target: &RepairTarget<'_>) -> Option<Value> {
        let s = target.value.as_str()?;
        let max = usize::try_from(target.schema?.get("maxLength")?.as_u64()?).ok()?;
        if s.chars().count() <= max {
            return None;
        }
        let truncated: String = s.chars().take(max).collect();
        Some(Value::String(
            truncated.trim_end_matches(is_separator).to_string(),
        ))
    }
}

/// Drops trailing array items beyond `maxItems`
#[derive(Debug, Clone, Copy)]
pub struct TruncateToMaxItems;

impl Repair for TruncateToMaxItems {
    fn name(&self) -> &str {
        "truncate_to_max_items"
    }

    fn apply(&self, target: &RepairTarget<'_>) -> Option<Value> {
        let items = target.value.as_array()?;
        let max = usize::try_from(target.schema?.get("maxItems")?.as_u64()?).ok()?;
        if items.len() <= max {
            return None;
        }
        Some(Value::Array(items[..max].to_vec()))
    }
}

/// Clamps a number into the inclusive `minimum`/`maximum` bounds
#[derive(Debug, Clone, Copy)]
pub struct ClampToRange;

impl Repair for ClampToRange {
    fn name(&self) -> &str {
        "clamp_to_range"
    }

    fn apply(&self, target: &RepairTarget<'_>) -> Option<Value> {
        let number = target.value.as_number()?;
        let schema = target.schema?;
        let min = schema.get("minimum").and_then(Value::as_number);
        let max = schema.get("maximum").and_then(Value::as_number);
        if min.is_none() && max.is_none() {
            return None;
        }
        if let Some(n) = number.as_i64() {
            let lo = min.map(Number::as_i64);
            let hi = max.map(Number::as_i64);
            // Integer bounds keep integer candidates integral
            if !matches!(lo, Some(None)) && !matches!(hi, Some(None)) {
                let mut n = n;
                if let Some(Some(lo)) = lo {
                    n = n.max(lo);
                }
                if let Some(Some(hi)) = hi {
                    n = n.min(hi);
                }
                return Some(Value::from(n));
            }
        }
        let mut n = number.as_f64()?;
        if let Some(lo) = min.and_then(Number::as_f64) {
            n = n.max(lo);
        }
        if let Some(hi) = max.and_then(Number::as_f64) {
            n = n.min(hi);
        }
        Number::from_f64(n).map(Value::Number)
    }
}

/// Removes object keys not declared in `properties` when
/// `additionalProperties` is `false`
#[derive(Debug, Clone, Copy)]
pub struct DropUndeclaredProperties;

impl Repair for DropUndeclaredProperties {
    fn name(&self) -> &str {
        "drop_undeclared_properties"
    }

    fn apply(&self, target: &RepairTarget<'_>) -> Option<Value> {
        let object = target.value.as_object()?;
        let schema = target.schema?;
        if schema.get("additionalProperties") != Some(&Value::Bool(false))
            || schema.get("patternProperties").is_some()
        {
            return None;
        }
        let declared = schema.get("properties").and_then(Value::as_object);
        let kept: Map<String, Value> = object
            .iter()
            .filter(|(key, _)| declared.is_some_and(|d| d.contains_key(key.as_str())))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Some(Value::Object(kept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slug_schema() -> CompiledSchema {
        CompiledSchema::compile(&json!({
            "type": "string",
            "pattern": "^[a-z0-9]+(-[a-z0-9]+)*$",
            "maxLength": 20
        }))
        .unwrap()
    }

    fn repair_once(schema: &CompiledSchema, candidate: Value) -> Value {
        let violations: Vec<Violation> = schema
            .check(&candidate)
            .errors
            .iter()
            .map(|e| e.to_violation())
            .collect();
        Repairer::default().repair(&candidate, &violations, schema)
    }

    // ── Pattern ───────────────────────────────────────────

    #[test]
    fn test_trailing_separators_removed() {
        assert_eq!(repair_once(&slug_schema(), json!("abc---")), json!("abc"));
    }

    #[test]
    fn test_whitespace_and_underscores_become_dashes() {
        assert_eq!(
            repair_once(&slug_schema(), json!("  hello world_again ")),
            json!("hello-world-again")
        );
    }

    #[test]
    fn test_punctuation_stripped_and_runs_collapsed() {
        assert_eq!(repair_once(&slug_schema(), json!("a!!b--c")), json!("ab-c"));
    }

    #[test]
    fn test_case_is_never_changed() {
        let schema = slug_schema();
        let repaired = repair_once(&schema, json!("ABC!!!"));
        assert_eq!(repaired, json!("ABC"));
        assert!(!schema.check(&repaired).pass);
    }

    #[test]
    fn test_allowed_chars_from_pattern() {
        let allowed = AllowedChars::from_pattern("^[a-z0-9-]+$").unwrap();
        assert!(allowed.contains('-'));
        assert!(allowed.contains('q'));
        assert!(!allowed.contains('Q'));
        assert!(!allowed.contains(' '));

        let allowed = AllowedChars::from_pattern(r"^[\w.]+@[a-z]+\.com$").unwrap();
        assert!(allowed.contains('@'));
        assert!(allowed.contains('.'));
        assert!(allowed.contains('_'));

        let allowed = AllowedChars::from_pattern("^[^ ]+$");
        assert!(allowed.is_none());
        assert!(AllowedChars::from_pattern("^abc$").is_none());
    }

    #[test]
    fn test_pattern_without_classes_is_noop() {
        let schema = CompiledSchema::compile(&json!({"type": "string", "pattern": "^yes$"})).unwrap();
        assert_eq!(repair_once(&schema, json!("no!")), json!("no!"));
    }

    fn ref_slug_schema() -> CompiledSchema {
        CompiledSchema::compile(&json!({
            "type": "object",
            "properties": {"s": {"$ref": "#/$defs/slug"}},
            "$defs": {
                "slug": {"type": "string", "pattern": "^[a-z0-9]+(-[a-z0-9]+)*$", "maxLength": 8}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_pattern_repair_through_ref() {
        let schema = ref_slug_schema();
        let repaired = repair_once(&schema, json!({"s": "abc---"}));
        assert_eq!(repaired, json!({"s": "abc"}));
        assert!(schema.check(&repaired).pass);
    }

    #[test]
    fn test_ref_segment_in_violation_path_resolves_parameters() {
        let schema = ref_slug_schema();
        let violations = vec![
            Violation::schema(ViolationKind::Pattern, "/s", "/properties/s/$ref/pattern", "no match"),
            Violation::schema(ViolationKind::TooLong, "/s", "/properties/s/$ref/maxLength", "too long"),
        ];
        let repaired = Repairer::default().repair(&json!({"s": "hello world again"}), &violations, &schema);
        assert_eq!(repaired, json!({"s": "hello-wo"}));
    }

    // ── Length and items ──────────────────────────────────

    #[test]
    fn test_too_long_truncates_then_trims() {
        let schema = slug_schema();
        let repaired = repair_once(&schema, json!("abcdefghijklmnopqrs-uvwxyz"));
        assert_eq!(repaired, json!("abcdefghijklmnopqrs"));
        assert!(schema.check(&repaired).pass);
    }

    #[test]
    fn test_nested_items_truncated() {
        let schema = CompiledSchema::compile(&json!({
            "type": "object",
            "properties": {"tags": {"type": "array", "maxItems": 2}}
        }))
        .unwrap();
        let repaired = repair_once(&schema, json!({"tags": ["a", "b", "c"]}));
        assert_eq!(repaired, json!({"tags": ["a", "b"]}));
    }

    // ── Range ─────────────────────────────────────────────

    #[test]
    fn test_clamp_integer() {
        let schema = CompiledSchema::compile(&json!({"type": "integer", "minimum": 1, "maximum": 5})).unwrap();
        assert_eq!(repair_once(&schema, json!(9)), json!(5));
        assert_eq!(repair_once(&schema, json!(-3)), json!(1));
    }

    #[test]
    fn test_clamp_float() {
        let schema = CompiledSchema::compile(&json!({"type": "number", "maximum": 0.5})).unwrap();
        assert_eq!(repair_once(&schema, json!(0.75)), json!(0.5));
    }

    // ── Objects ───────────────────────────────────────────

    #[test]
    fn test_drop_undeclared_properties() {
        let schema = CompiledSchema::compile(&json!({
            "type": "object",
            "properties": {"title": {"type": "string"}},
            "additionalProperties": false
        }))
        .unwrap();
        let repaired = repair_once(&schema, json!({"title": "t", "junk": 1, "more": 2}));
        assert_eq!(repaired, json!({"title": "t"}));
        assert!(schema.check(&repaired).pass);
    }

    // ── Registry ──────────────────────────────────────────

    #[test]
    fn test_no_applicable_repair_returns_input() {
        let schema = CompiledSchema::compile(&json!({"type": "string"})).unwrap();
        assert_eq!(repair_once(&schema, json!(42)), json!(42));
    }

    #[test]
    fn test_empty_registry_is_noop() {
        let schema = slug_schema();
        let violations: Vec<_> = schema
            .check(&json!("abc---"))
            .errors
            .iter()
            .map(|e| e.to_violation())
            .collect();
        let repairer = Repairer::new(RepairRegistry::empty());
        assert_eq!(repairer.repair(&json!("abc---"), &violations, &schema), json!("abc---"));
    }

    struct Lowercase;

    impl Repair for Lowercase {
        fn name(&self) -> &str {
            "lowercase"
        }

        fn apply(&self, target: &RepairTarget<'_>) -> Option<Value> {
            Some(Value::String(target.value.as_str()?.to_lowercase()))
        }
    }

    #[test]
    fn test_invariant_keyed_repair() {
        let mut registry = RepairRegistry::empty();
        registry.register_for_invariant("output == lower(output)", Lowercase);
        let repairer = Repairer::new(registry);
        let schema = CompiledSchema::accept_all();

        let failed = vec![Violation::invariant_failed("output == lower(output)")];
        assert_eq!(repairer.repair(&json!("ABC"), &failed, &schema), json!("abc"));

        let other = vec![Violation::invariant_failed("len(output) < 2")];
        assert_eq!(repairer.repair(&json!("ABC"), &other, &schema), json!("ABC"));
    }

    #[test]
    fn test_repair_is_idempotent_on_samples() {
        let schema = slug_schema();
        for sample in ["abc---", "Hello World!!", "__a__b__", "x", "-- --", "a b c d e f g h i j k l"] {
            let candidate = json!(sample);
            let violations: Vec<_> = schema
                .check(&candidate)
                .errors
                .iter()
                .map(|e| e.to_violation())
                .collect();
            let repairer = Repairer::default();
            let once = repairer.repair(&candidate, &violations, &schema);
            let twice = repairer.repair(&once, &violations, &schema);
            assert_eq!(once, twice, "not idempotent for {:?}", sample);
        }
    }
}
