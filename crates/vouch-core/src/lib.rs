//! Vouch Core - contract-bound decode, verify and repair
//!
//! Turns an unreliable generator into a value that satisfies a declared
//! contract (a JSON Schema plus boolean invariants), or fails
//! deterministically after a fixed budget of repair rounds.
//!
//! # Architecture
//!
//! ```text
//! Prompt → Generator → Candidate → SchemaValidator + InvariantEvaluator → Verdict
//!              ↑                                                     ↓
//!              └──────── regenerate ←──── Repairer ←──────── violations
//!                                            ↓
//!                                  DecodeResult (valid | exhausted)
//! ```
//!
//! # Guarantees
//!
//! - **Bounded**: `repairs_attempted <= max_repairs` on every path
//! - **Coherent**: `valid == true` only if the returned output re-validates
//! - **Deterministic**: verification, repair and spec hashing are pure
//! - **Sandboxed**: invariants see only the candidate, never the host

pub mod decoder;
pub mod error;
pub mod evaluator;
pub mod generator;
pub mod hasher;
pub mod parser;
pub mod repair;
pub mod schema;
pub mod verifier;

pub use decoder::{
    decode_many, DecodeOptions, DecodeRequest, DecodeResult, Decoder, Phase, RoundRecord,
};
pub use error::{Error, Result};
pub use evaluator::{InvariantEvaluator, InvariantReport};
pub use generator::{
    candidate_from_text, CommandGenerator, GenerationError, GenerationRequest, Generator,
    ReplayGenerator, ReplayStep,
};
pub use hasher::{full_spec_digest, hash_spec};
pub use repair::{Repair, RepairRegistry, Repairer};
pub use schema::{CompiledSchema, FsSchemaLoader, SchemaLoader, SchemaReport, StaticSchemas};
pub use verifier::{verify_candidate, CompiledContract};

/// Version of the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A declared contract for one generated artifact
///
/// Immutable for the duration of a decode loop.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Contract {
    /// Identity used for fingerprinting and logs
    pub name: String,
    pub version: String,
    /// Human-readable purpose; not part of the fingerprint
    #[serde(default)]
    pub intent: String,
    /// Opaque locator of the input schema (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<String>,
    /// Opaque locator of the output schema, resolved by a [`SchemaLoader`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<String>,
    /// Boolean expressions over `output`, checked in order
    #[serde(default)]
    pub invariants: Vec<String>,
    /// Declared failure codes; order is significant
    #[serde(default)]
    pub error_codes: Vec<String>,
    /// Precomputed fingerprint, if the author stored one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
}

impl Contract {
    /// Parse a contract document.
    ///
    /// # Errors
    /// Returns `ContractError` for malformed JSON or missing fields.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::ContractError(e.to_string()))
    }
}

/// Which checker produced a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSource {
    Schema,
    Invariant,
}

/// Failure category, used to select repairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TooLong,
    TooShort,
    Pattern,
    Type,
    Enum,
    Required,
    AdditionalProperties,
    OutOfRange,
    TooManyItems,
    Format,
    InvariantFailed,
    InvariantError,
    Other,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::TooLong => "too_long",
            ViolationKind::TooShort => "too_short",
            ViolationKind::Pattern => "pattern",
            ViolationKind::Type => "type",
            ViolationKind::Enum => "enum",
            ViolationKind::Required => "required",
            ViolationKind::AdditionalProperties => "additional_properties",
            ViolationKind::OutOfRange => "out_of_range",
            ViolationKind::TooManyItems => "too_many_items",
            ViolationKind::Format => "format",
            ViolationKind::InvariantFailed => "invariant_failed",
            ViolationKind::InvariantError => "invariant_error",
            ViolationKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reason a candidate failed verification
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Violation {
    pub source: ViolationSource,
    pub kind: ViolationKind,
    /// JSON pointer into the candidate (schema) or the invariant text
    pub path: String,
    pub message: String,
    /// JSON pointer into the schema node that failed (schema only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<String>,
}

impl Violation {
    pub fn schema(kind: ViolationKind, path: &str, schema_path: &str, message: &str) -> Self {
        Violation {
            source: ViolationSource::Schema,
            kind,
            path: path.to_string(),
            message: message.to_string(),
            schema_path: Some(schema_path.to_string()),
        }
    }

    pub fn invariant_failed(invariant: &str) -> Self {
        Violation {
            source: ViolationSource::Invariant,
            kind: ViolationKind::InvariantFailed,
            path: invariant.to_string(),
            message: format!("invariant does not hold: {}", invariant),
            schema_path: None,
        }
    }

    pub fn invariant_error(invariant: &str, error: &str) -> Self {
        Violation {
            source: ViolationSource::Invariant,
            kind: ViolationKind::InvariantError,
            path: invariant.to_string(),
            message: error.to_string(),
            schema_path: None,
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "[{}] {}: {}", self.kind, path, self.message)
    }
}

/// Result of checking one candidate against a contract
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ValidationVerdict {
    pub schema_pass: bool,
    pub invariants_pass: bool,
    /// Schema violations first, then invariant violations in declaration order
    pub violations: Vec<Violation>,
}

impl ValidationVerdict {
    /// Both checks hold
    pub fn passed(&self) -> bool {
        self.schema_pass && self.invariants_pass
    }
}
