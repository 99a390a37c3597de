//! C-FFI layer for Vouch, used by Go (cgo) and other FFI consumers.
//!
//! No logic here. All calls delegate to `vouch-core`.
//!
//! # Memory Contract
//!
//! All functions that return `*mut c_char` allocate via `CString`.
//! The caller MUST free the returned string by calling `vouch_free_string()`.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use vouch_core::{CompiledContract, CompiledSchema, Contract, Repairer};

/// Result from a Vouch FFI call.
/// If `error` is null, the call succeeded and `result` contains the output.
/// If `error` is non-null, the call failed and `error` contains the error message.
/// The caller MUST free both `result` and `error` with `vouch_free_string()`.
#[repr(C)]
pub struct VouchResult {
    pub result: *mut c_char,
    pub error: *mut c_char,
}

impl VouchResult {
    fn ok(value: String) -> Self {
        VouchResult {
            result: into_c_string(value),
            error: std::ptr::null_mut(),
        }
    }

    fn err(msg: String) -> Self {
        VouchResult {
            result: std::ptr::null_mut(),
            error: into_c_string(msg),
        }
    }

    fn from_json(value: &serde_json::Value) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(json) => VouchResult::ok(json),
            Err(e) => VouchResult::err(format!("Serialization error: {}", e)),
        }
    }
}

/// Interior NULs are dropped rather than failing the call
fn into_c_string(s: String) -> *mut c_char {
    let bytes: Vec<u8> = s.into_bytes().into_iter().filter(|b| *b != 0).collect();
    CString::new(bytes).unwrap_or_default().into_raw()
}

/// Helper: convert a C string pointer to a Rust &str.
/// Returns None if the pointer is null or not valid UTF-8.
unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// A null schema pointer means "no output schema"
unsafe fn compile(
    contract: *const c_char,
    schema: *const c_char,
) -> Result<CompiledContract, String> {
    let contract = cstr_to_str(contract).ok_or("null or invalid UTF-8 contract")?;
    let contract = Contract::from_json(contract).map_err(|e| e.to_string())?;
    let schema = if schema.is_null() {
        CompiledSchema::accept_all()
    } else {
        let text = cstr_to_str(schema).ok_or("invalid UTF-8 schema")?;
        let document: serde_json::Value =
            serde_json::from_str(text).map_err(|e| format!("invalid schema JSON: {}", e))?;
        CompiledSchema::compile(&document).map_err(|e| e.to_string())?
    };
    CompiledContract::with_schema(&contract, schema).map_err(|e| e.to_string())
}

unsafe fn candidate(ptr: *const c_char) -> Result<serde_json::Value, String> {
    let text = cstr_to_str(ptr).ok_or("null or invalid UTF-8 candidate")?;
    serde_json::from_str(text).map_err(|e| format!("invalid candidate JSON: {}", e))
}

/// Compute the 16-character spec hash of a contract JSON document.
///
/// # Safety
/// `contract` must be a valid null-terminated UTF-8 C string.
/// The caller must free the returned strings with `vouch_free_string()`.
#[no_mangle]
pub unsafe extern "C" fn vouch_hash_spec(contract: *const c_char) -> VouchResult {
    let text = match cstr_to_str(contract) {
        Some(s) => s,
        None => return VouchResult::err("null or invalid UTF-8 input".into()),
    };

    match Contract::from_json(text) {
        Ok(contract) => VouchResult::ok(vouch_core::hash_spec(&contract)),
        Err(e) => VouchResult::err(e.to_string()),
    }
}

/// Verify a candidate against a contract.
/// Returns JSON: { "schema_pass": bool, "invariants_pass": bool, "violations": [...] }
///
/// # Safety
/// `contract` and `candidate` must be valid null-terminated UTF-8 C strings.
/// `schema` must be such a string or null.
/// The caller must free the returned strings with `vouch_free_string()`.
#[no_mangle]
pub unsafe extern "C" fn vouch_verify(
    contract: *const c_char,
    schema: *const c_char,
    candidate_json: *const c_char,
) -> VouchResult {
    let compiled = match compile(contract, schema) {
        Ok(c) => c,
        Err(e) => return VouchResult::err(e),
    };
    let value = match candidate(candidate_json) {
        Ok(v) => v,
        Err(e) => return VouchResult::err(e),
    };

    let verdict = compiled.verify(&value);
    VouchResult::from_json(&serde_json::json!(verdict))
}

/// Apply the default repair catalog once and re-verify.
/// Returns JSON: { "output": ..., "changed": bool, "valid": bool, "verification": {...} }
///
/// # Safety
/// Same as [`vouch_verify`].
#[no_mangle]
pub unsafe extern "C" fn vouch_repair(
    contract: *const c_char,
    schema: *const c_char,
    candidate_json: *const c_char,
) -> VouchResult {
    let compiled = match compile(contract, schema) {
        Ok(c) => c,
        Err(e) => return VouchResult::err(e),
    };
    let value = match candidate(candidate_json) {
        Ok(v) => v,
        Err(e) => return VouchResult::err(e),
    };

    let before = compiled.verify(&value);
    let repaired = Repairer::default().repair(&value, &before.violations, &compiled.schema);
    let after = compiled.verify(&repaired);
    VouchResult::from_json(&serde_json::json!({
        "changed": repaired != value,
        "valid": after.passed(),
        "output": repaired,
        "verification": after,
    }))
}

/// Free a string previously returned by a Vouch FFI function.
///
/// # Safety
/// `ptr` must be a pointer previously returned by a Vouch FFI function,
/// or null (in which case this is a no-op).
#[no_mangle]
pub unsafe extern "C" fn vouch_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}
