//! Contract verifier: configuration checks and candidate verification
//!
//! Two jobs live here:
//!
//! 1. **Lint** a contract before it is used: required fields, invariant
//!    syntax, duplicates, stale precomputed hashes, schema validity. All
//!    diagnostics are accumulated rather than stopping at the first error.
//! 2. **Verify** candidates against a [`CompiledContract`]: schema check
//!    first, then invariants, combined into one [`ValidationVerdict`].

use std::collections::BTreeSet;

use serde_json::Value;

use crate::evaluator::{CompiledInvariant, InvariantEvaluator, CANDIDATE_BINDING};
use crate::hasher::hash_spec;
use crate::schema::{CompiledSchema, SchemaLoader};
use crate::{Contract, Error, Result, ValidationVerdict};

// ── Lint Result Types ─────────────────────────────────────

/// Result of contract linting; accumulates all diagnostics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct VerificationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl VerificationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no errors were found (warnings are OK)
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    /// Returns only error-level diagnostics
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    /// Returns only warning-level diagnostics
    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect()
    }

    fn add_error(&mut self, kind: DiagnosticKind, message: String, location: Option<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            kind,
            message,
            location,
        });
    }

    fn add_warning(&mut self, kind: DiagnosticKind, message: String, location: Option<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            message,
            location,
        });
    }
}

/// A single lint diagnostic
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    /// Contract field the diagnostic refers to, e.g. `invariants[2]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if let Some(ref location) = self.location {
            write!(f, "{} [{}] at {}: {}", prefix, self.kind, location, self.message)
        } else {
            write!(f, "{} [{}]: {}", prefix, self.kind, self.message)
        }
    }
}

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Category of lint issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Contract,
    Invariant,
    Schema,
    Hash,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DiagnosticKind::Contract => write!(f, "contract"),
            DiagnosticKind::Invariant => write!(f, "invariant"),
            DiagnosticKind::Schema => write!(f, "schema"),
            DiagnosticKind::Hash => write!(f, "hash"),
        }
    }
}

// ── Lint ──────────────────────────────────────────────────

/// Lint a contract and, if given, its resolved output schema.
///
/// Reports everything found instead of stopping at the first problem.
pub fn lint(contract: &Contract, schema: Option<&Value>) -> VerificationResult {
    let mut result = VerificationResult::new();
    lint_required_fields(contract, &mut result);
    lint_invariants(contract, &mut result);
    lint_error_codes(contract, &mut result);
    lint_spec_hash(contract, &mut result);
    if let Some(schema) = schema {
        if let Err(err) = CompiledSchema::compile(schema) {
            result.add_error(
                DiagnosticKind::Schema,
                err.to_string(),
                Some("output_schema".into()),
            );
        }
    }
    result
}

fn lint_required_fields(contract: &Contract, result: &mut VerificationResult) {
    if contract.name.trim().is_empty() {
        result.add_error(
            DiagnosticKind::Contract,
            "contract name must not be empty".into(),
            Some("name".into()),
        );
    }
    if contract.version.trim().is_empty() {
        result.add_error(
            DiagnosticKind::Contract,
            "contract version must not be empty".into(),
            Some("version".into()),
        );
    }
    if contract.output_schema.is_none() && contract.invariants.is_empty() {
        result.add_warning(
            DiagnosticKind::Contract,
            "contract declares neither an output schema nor invariants; every candidate is accepted"
                .into(),
            None,
        );
    }
}

fn lint_invariants(contract: &Contract, result: &mut VerificationResult) {
    let mut seen = BTreeSet::new();
    for (i, text) in contract.invariants.iter().enumerate() {
        let location = Some(format!("invariants[{}]", i));
        if let Err(err) = CompiledInvariant::parse(text) {
            result.add_error(DiagnosticKind::Invariant, err.to_string(), location.clone());
        } else if !references_candidate(text) {
            result.add_warning(
                DiagnosticKind::Invariant,
                format!(
                    "invariant '{}' does not reference '{}'",
                    text, CANDIDATE_BINDING
                ),
                location.clone(),
            );
        }
        if !seen.insert(text.as_str()) {
            result.add_warning(
                DiagnosticKind::Invariant,
                format!("duplicate invariant: '{}'", text),
                location,
            );
        }
    }
}

fn references_candidate(text: &str) -> bool {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| word == CANDIDATE_BINDING)
}

fn lint_error_codes(contract: &Contract, result: &mut VerificationResult) {
    let mut seen = BTreeSet::new();
    for (i, code) in contract.error_codes.iter().enumerate() {
        if code.trim().is_empty() {
            result.add_error(
                DiagnosticKind::Contract,
                "error code must not be empty".into(),
                Some(format!("error_codes[{}]", i)),
            );
        } else if !seen.insert(code.as_str()) {
            result.add_warning(
                DiagnosticKind::Contract,
                format!("duplicate error code: '{}'", code),
                Some(format!("error_codes[{}]", i)),
            );
        }
    }
}

fn lint_spec_hash(contract: &Contract, result: &mut VerificationResult) {
    if let Some(stored) = &contract.spec_hash {
        let computed = hash_spec(contract);
        if stored != &computed {
            result.add_warning(
                DiagnosticKind::Hash,
                format!("stored spec_hash {} is stale (computed {})", stored, computed),
                Some("spec_hash".into()),
            );
        }
    }
}

// ── Candidate verification ────────────────────────────────

/// Check a candidate against a schema and a set of invariants.
///
/// Schema violations come first, in validator order, then invariant
/// violations in declaration order.
pub fn verify_candidate(
    schema: &CompiledSchema,
    invariants: &InvariantEvaluator,
    candidate: &Value,
) -> ValidationVerdict {
    let schema_report = schema.check(candidate);
    let invariant_report = invariants.check(candidate);
    let mut violations: Vec<_> = schema_report
        .errors
        .iter()
        .map(|e| e.to_violation())
        .collect();
    violations.extend(invariant_report.violations);
    ValidationVerdict {
        schema_pass: schema_report.pass,
        invariants_pass: invariant_report.valid,
        violations,
    }
}

/// A contract with its schema and invariants compiled, ready to verify
/// any number of candidates
#[derive(Debug, Clone)]
pub struct CompiledContract {
    pub contract: Contract,
    pub schema: CompiledSchema,
    pub invariants: InvariantEvaluator,
    pub spec_hash: String,
}

impl CompiledContract {
    /// Compile a contract, resolving its output schema through `loader`.
    ///
    /// # Errors
    /// Returns a configuration error for missing required fields, an
    /// unloadable or malformed schema, or an invariant that does not parse.
    pub fn compile(contract: &Contract, loader: &dyn SchemaLoader) -> Result<Self> {
        let schema = match &contract.output_schema {
            Some(locator) => CompiledSchema::compile(&loader.load(locator)?)?,
            None => CompiledSchema::accept_all(),
        };
        Self::with_schema(contract, schema)
    }

    /// Compile a contract against an already compiled schema.
    ///
    /// # Errors
    /// Same as [`CompiledContract::compile`], minus schema loading.
    pub fn with_schema(contract: &Contract, schema: CompiledSchema) -> Result<Self> {
        check_required_fields(contract)?;
        let invariants = InvariantEvaluator::compile(&contract.invariants)?;
        Ok(CompiledContract {
            contract: contract.clone(),
            schema,
            invariants,
            spec_hash: hash_spec(contract),
        })
    }

    pub fn verify(&self, candidate: &Value) -> ValidationVerdict {
        verify_candidate(&self.schema, &self.invariants, candidate)
    }
}

fn check_required_fields(contract: &Contract) -> Result<()> {
    if contract.name.trim().is_empty() {
        return Err(Error::ContractError("missing required field 'name'".into()));
    }
    if contract.version.trim().is_empty() {
        return Err(Error::ContractError("missing required field 'version'".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchemas;
    use crate::{ViolationKind, ViolationSource};
    use serde_json::json;

    fn contract() -> Contract {
        Contract {
            name: "slugify".into(),
            version: "1.0.0".into(),
            intent: "Produce a URL slug".into(),
            input_schema: None,
            output_schema: Some("slug".into()),
            invariants: vec![
                "len(output) >= 3".into(),
                "not output.starts_with('-')".into(),
            ],
            error_codes: vec!["EMPTY_INPUT".into()],
            spec_hash: None,
        }
    }

    fn loader() -> StaticSchemas {
        StaticSchemas::new().with(
            "slug",
            json!({"type": "string", "pattern": "^[a-z0-9]+(-[a-z0-9]+)*$", "maxLength": 80}),
        )
    }

    // ── Lint ──────────────────────────────────────────────

    #[test]
    fn test_clean_contract_lints_clean() {
        let result = lint(&contract(), None);
        assert!(result.is_valid(), "{:?}", result.errors());
        assert!(result.warnings().is_empty(), "{:?}", result.warnings());
    }

    #[test]
    fn test_lint_missing_name() {
        let mut c = contract();
        c.name = " ".into();
        let result = lint(&c, None);
        assert!(!result.is_valid());
        assert_eq!(result.errors()[0].location.as_deref(), Some("name"));
    }

    #[test]
    fn test_lint_invariant_syntax_error() {
        let mut c = contract();
        c.invariants.push("len(output) <".into());
        let result = lint(&c, None);
        assert!(!result.is_valid());
        let err = result.errors()[0];
        assert_eq!(err.kind, DiagnosticKind::Invariant);
        assert_eq!(err.location.as_deref(), Some("invariants[2]"));
    }

    #[test]
    fn test_lint_warnings() {
        let mut c = contract();
        c.invariants.push("len(output) >= 3".into());
        c.invariants.push("1 < 2".into());
        c.error_codes.push("EMPTY_INPUT".into());
        let result = lint(&c, None);
        assert!(result.is_valid());
        let messages: Vec<String> = result.warnings().iter().map(|d| d.to_string()).collect();
        assert!(messages.iter().any(|m| m.contains("duplicate invariant")));
        assert!(messages.iter().any(|m| m.contains("does not reference 'output'")));
        assert!(messages.iter().any(|m| m.contains("duplicate error code")));
    }

    #[test]
    fn test_lint_stale_hash() {
        let mut c = contract();
        c.spec_hash = Some("deadbeefdeadbeef".into());
        let result = lint(&c, None);
        assert!(result.is_valid());
        assert_eq!(result.warnings()[0].kind, DiagnosticKind::Hash);

        c.spec_hash = Some(hash_spec(&c));
        assert!(lint(&c, None).warnings().is_empty());
    }

    #[test]
    fn test_lint_malformed_schema() {
        let result = lint(&contract(), Some(&json!({"type": 12})));
        assert!(!result.is_valid());
        assert_eq!(result.errors()[0].kind, DiagnosticKind::Schema);
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic {
            severity: Severity::Warning,
            kind: DiagnosticKind::Hash,
            message: "stale".into(),
            location: Some("spec_hash".into()),
        };
        assert_eq!(d.to_string(), "warning [hash] at spec_hash: stale");
    }

    // ── Candidate verification ────────────────────────────

    #[test]
    fn test_compile_and_verify_pass() {
        let compiled = CompiledContract::compile(&contract(), &loader()).unwrap();
        assert_eq!(compiled.spec_hash, hash_spec(&contract()));
        let verdict = compiled.verify(&json!("hello-world"));
        assert!(verdict.passed());
        assert!(verdict.violations.is_empty());
    }

    #[test]
    fn test_violation_order_schema_then_invariants() {
        let compiled = CompiledContract::compile(&contract(), &loader()).unwrap();
        let verdict = compiled.verify(&json!("-a"));
        assert!(!verdict.schema_pass);
        assert!(!verdict.invariants_pass);
        assert_eq!(verdict.violations.len(), 3);
        assert_eq!(verdict.violations[0].source, ViolationSource::Schema);
        assert_eq!(verdict.violations[0].kind, ViolationKind::Pattern);
        assert_eq!(verdict.violations[1].path, "len(output) >= 3");
        assert_eq!(verdict.violations[2].path, "not output.starts_with('-')");
    }

    #[test]
    fn test_compile_without_schema_accepts_any_shape() {
        let mut c = contract();
        c.output_schema = None;
        c.invariants = vec!["is_object(output)".into()];
        let compiled = CompiledContract::compile(&c, &StaticSchemas::new()).unwrap();
        assert!(compiled.verify(&json!({"k": 1})).passed());
        let verdict = compiled.verify(&json!("s"));
        assert!(verdict.schema_pass);
        assert!(!verdict.invariants_pass);
    }

    #[test]
    fn test_compile_errors_are_configuration() {
        let mut c = contract();
        c.name = String::new();
        assert!(matches!(
            CompiledContract::compile(&c, &loader()),
            Err(Error::ContractError(_))
        ));

        let err = CompiledContract::compile(&contract(), &StaticSchemas::new()).unwrap_err();
        assert!(matches!(err, Error::SchemaLoadError { .. }));

        let bad = StaticSchemas::new().with("slug", json!({"type": "strng"}));
        let err = CompiledContract::compile(&contract(), &bad).unwrap_err();
        assert!(matches!(err, Error::SchemaError(_)));

        let mut c = contract();
        c.invariants.push("output ==".into());
        let err = CompiledContract::compile(&c, &loader()).unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));
    }

    #[test]
    fn test_verification_is_deterministic() {
        let compiled = CompiledContract::compile(&contract(), &loader()).unwrap();
        let first = compiled.verify(&json!("Bad Slug!"));
        for _ in 0..50 {
            assert_eq!(compiled.verify(&json!("Bad Slug!")), first);
        }
    }
}
