//! Python bindings for Vouch
//!
//! Thin wrapper around `vouch-core`. Contracts, schemas and candidates
//! cross the boundary as JSON strings.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use vouch_core::{CompiledContract, CompiledSchema, Contract, Repairer};

fn to_py_err(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn parse_json(label: &str, text: &str) -> PyResult<serde_json::Value> {
    serde_json::from_str(text).map_err(|e| PyValueError::new_err(format!("invalid {} JSON: {}", label, e)))
}

fn compile(contract: &str, schema: Option<&str>) -> PyResult<CompiledContract> {
    let contract = Contract::from_json(contract).map_err(to_py_err)?;
    let schema = match schema {
        Some(text) => CompiledSchema::compile(&parse_json("schema", text)?).map_err(to_py_err)?,
        None => CompiledSchema::accept_all(),
    };
    CompiledContract::with_schema(&contract, schema).map_err(to_py_err)
}

fn to_json(value: &serde_json::Value) -> PyResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| PyValueError::new_err(format!("Serialization error: {}", e)))
}

/// Compute the 16-character spec hash of a contract.
///
/// Raises:
///     ValueError: If the contract JSON is malformed
#[pyfunction]
fn hash_spec(contract: &str) -> PyResult<String> {
    let contract = Contract::from_json(contract).map_err(to_py_err)?;
    Ok(vouch_core::hash_spec(&contract))
}

/// Lint a contract and, optionally, its output schema.
///
/// Returns:
///     JSON string: {"valid": bool, "spec_hash": str, "diagnostics": [...]}
#[pyfunction]
#[pyo3(signature = (contract, schema=None))]
fn lint(contract: &str, schema: Option<&str>) -> PyResult<String> {
    let contract = Contract::from_json(contract).map_err(to_py_err)?;
    let schema = schema.map(|s| parse_json("schema", s)).transpose()?;
    let result = vouch_core::verifier::lint(&contract, schema.as_ref());

    let output = serde_json::json!({
        "valid": result.is_valid(),
        "spec_hash": vouch_core::hash_spec(&contract),
        "diagnostics": result.diagnostics,
    });
    to_json(&output)
}

/// Verify a candidate against a contract.
///
/// Args:
///     contract: contract JSON
///     candidate: candidate JSON
///     schema: output schema JSON; omitted means any value passes the schema check
///
/// Returns:
///     JSON string of the verdict: {"schema_pass", "invariants_pass", "violations"}
///
/// Raises:
///     ValueError: On a malformed contract, schema or invariant
#[pyfunction]
#[pyo3(signature = (contract, candidate, schema=None))]
fn verify(contract: &str, candidate: &str, schema: Option<&str>) -> PyResult<String> {
    let compiled = compile(contract, schema)?;
    let candidate = parse_json("candidate", candidate)?;
    let verdict = compiled.verify(&candidate);
    to_json(&serde_json::json!(verdict))
}

/// Apply the default repair catalog once and re-verify.
///
/// Returns:
///     JSON string: {"output", "changed", "valid", "verification"}
#[pyfunction]
#[pyo3(signature = (contract, candidate, schema=None))]
fn repair(contract: &str, candidate: &str, schema: Option<&str>) -> PyResult<String> {
    let compiled = compile(contract, schema)?;
    let candidate = parse_json("candidate", candidate)?;
    let before = compiled.verify(&candidate);
    let repaired = Repairer::default().repair(&candidate, &before.violations, &compiled.schema);
    let after = compiled.verify(&repaired);

    let output = serde_json::json!({
        "changed": repaired != candidate,
        "valid": after.passed(),
        "output": repaired,
        "verification": after,
    });
    to_json(&output)
}

/// Vouch Python module: contract verification and repair
#[pymodule]
fn vouch(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(hash_spec, m)?)?;
    m.add_function(wrap_pyfunction!(lint, m)?)?;
    m.add_function(wrap_pyfunction!(verify, m)?)?;
    m.add_function(wrap_pyfunction!(repair, m)?)?;
    m.add("__version__", vouch_core::VERSION)?;
    Ok(())
}
