//! Schema validation: JSON Schema compiled once, checked many times
//!
//! A [`CompiledSchema`] wraps a `jsonschema` validator (Draft 2020-12)
//! together with the raw schema document, so violations can later be
//! traced back to the schema node that produced them. Schemas are found
//! through a [`SchemaLoader`], which maps opaque locators to documents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jsonschema::{Draft, Validator};
use serde_json::Value;

use crate::{Error, Result, Violation, ViolationKind};

// ── Compiled schema ───────────────────────────────────────

/// A schema compiled into a reusable predicate
#[derive(Clone)]
pub struct CompiledSchema {
    validator: Option<Arc<Validator>>,
    document: Value,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("document", &self.document)
            .field("accept_all", &self.validator.is_none())
            .finish()
    }
}

/// One schema failure for a candidate
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaError {
    /// JSON pointer into the candidate
    pub path: String,
    /// JSON pointer into the schema
    pub schema_path: String,
    /// The failing keyword (`pattern`, `maxLength`, ...)
    pub keyword: String,
    pub message: String,
}

impl SchemaError {
    /// Failure category used for repair selection
    pub fn kind(&self) -> ViolationKind {
        keyword_kind(&self.keyword)
    }

    pub fn to_violation(&self) -> Violation {
        Violation::schema(self.kind(), &self.path, &self.schema_path, &self.message)
    }
}

/// Outcome of checking one candidate against a schema
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaReport {
    pub pass: bool,
    /// In the order the validator reported them
    pub errors: Vec<SchemaError>,
}

impl CompiledSchema {
    /// Compile a schema document.
    ///
    /// # Errors
    /// Returns `SchemaError` if the document is not a valid Draft 2020-12
    /// schema (unknown `type` names, unresolvable `$ref`, ...).
    pub fn compile(schema: &Value) -> Result<Self> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(schema)
            .map_err(|err| Error::SchemaError(err.to_string()))?;
        Ok(CompiledSchema {
            validator: Some(Arc::new(validator)),
            document: schema.clone(),
        })
    }

    /// A schema that accepts every candidate, for contracts without one
    pub fn accept_all() -> Self {
        CompiledSchema {
            validator: None,
            document: Value::Bool(true),
        }
    }

    /// The schema document this was compiled from
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Resolve a JSON pointer into the schema document
    pub fn node(&self, pointer: &str) -> Option<&Value> {
        self.document.pointer(pointer)
    }

    /// The schema object holding the keyword at the end of `schema_path`.
    ///
    /// Validator paths step through `$ref` as a segment
    /// (`/properties/s/$ref/pattern`); local references (`#/...`) are
    /// followed so the rest of the path resolves inside the target.
    pub fn keyword_parent(&self, schema_path: &str) -> Option<&Value> {
        let parent = schema_path.rfind('/').map_or("", |i| &schema_path[..i]);
        let mut node = &self.document;
        for raw in parent.split('/').skip(1) {
            let segment = raw.replace("~1", "/").replace("~0", "~");
            node = match (segment.as_str(), node) {
                ("$ref", Value::Object(map)) => self.local_ref(map.get("$ref")?.as_str()?)?,
                (_, Value::Object(map)) => map.get(&segment)?,
                (_, Value::Array(items)) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(node)
    }

    fn local_ref(&self, reference: &str) -> Option<&Value> {
        self.document.pointer(reference.strip_prefix('#')?)
    }

    /// Check a candidate
    pub fn check(&self, candidate: &Value) -> SchemaReport {
        let Some(validator) = &self.validator else {
            return SchemaReport {
                pass: true,
                errors: Vec::new(),
            };
        };
        let errors: Vec<SchemaError> = validator
            .iter_errors(candidate)
            .map(|err| {
                let schema_path = err.schema_path.to_string();
                SchemaError {
                    path: err.instance_path.to_string(),
                    keyword: last_segment(&schema_path).to_string(),
                    schema_path,
                    message: err.to_string(),
                }
            })
            .collect();
        SchemaReport {
            pass: errors.is_empty(),
            errors,
        }
    }

    pub fn is_valid(&self, candidate: &Value) -> bool {
        self.validator
            .as_ref()
            .map_or(true, |validator| validator.is_valid(candidate))
    }
}

fn last_segment(pointer: &str) -> &str {
    pointer.rsplit('/').next().unwrap_or(pointer)
}

fn keyword_kind(keyword: &str) -> ViolationKind {
    match keyword {
        "maxLength" => ViolationKind::TooLong,
        "minLength" | "minItems" | "minProperties" => ViolationKind::TooShort,
        "pattern" => ViolationKind::Pattern,
        "type" => ViolationKind::Type,
        "enum" | "const" => ViolationKind::Enum,
        "required" => ViolationKind::Required,
        "additionalProperties" => ViolationKind::AdditionalProperties,
        "minimum" | "maximum" | "exclusiveMinimum" | "exclusiveMaximum" | "multipleOf" => {
            ViolationKind::OutOfRange
        }
        "maxItems" => ViolationKind::TooManyItems,
        "format" => ViolationKind::Format,
        _ => ViolationKind::Other,
    }
}

// ── Loaders ───────────────────────────────────────────────

/// Resolves an opaque schema locator to a JSON document
pub trait SchemaLoader: Send + Sync {
    /// # Errors
    /// Returns `SchemaLoadError` if the locator cannot be resolved.
    fn load(&self, locator: &str) -> Result<Value>;
}

/// Loads schema files relative to a base directory
#[derive(Debug, Clone)]
pub struct FsSchemaLoader {
    base: PathBuf,
}

impl FsSchemaLoader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FsSchemaLoader { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl SchemaLoader for FsSchemaLoader {
    fn load(&self, locator: &str) -> Result<Value> {
        let path = self.base.join(locator);
        let load_error = |reason: String| Error::SchemaLoadError {
            locator: locator.to_string(),
            reason,
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| load_error(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text).map_err(|e| load_error(format!("invalid JSON: {}", e)))
    }
}

/// In-memory schema table
#[derive(Debug, Clone, Default)]
pub struct StaticSchemas {
    schemas: HashMap<String, Value>,
}

impl StaticSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, locator: impl Into<String>, schema: Value) -> Self {
        self.insert(locator, schema);
        self
    }

    pub fn insert(&mut self, locator: impl Into<String>, schema: Value) {
        self.schemas.insert(locator.into(), schema);
    }
}

impl SchemaLoader for StaticSchemas {
    fn load(&self, locator: &str) -> Result<Value> {
        self.schemas
            .get(locator)
            .cloned()
            .ok_or_else(|| Error::SchemaLoadError {
                locator: locator.to_string(),
                reason: "no schema registered under this locator".into(),
            })
    }
}
