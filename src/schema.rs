//! Schema validator: compiles each `schemas/<stem>.json` document once into
//! a `jsonschema::Validator` cached by name, generalizing an
//! `OnceLock`-cached single-schema pattern to a directory of named schemas
//! behind a `HashMap`.

use std::collections::HashMap;

use jsonschema::Validator;
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Compiled validators keyed by schema id (the filename stem under `schemas/`).
pub struct SchemaRegistry {
    validators: HashMap<String, Validator>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self { validators: HashMap::new() }
    }

    /// Compile and register every `(schema_id, schema_document)` pair.
    /// A malformed document is a `manifest_load` error identifying the schema id.
    pub fn from_documents(documents: Vec<(String, Value)>) -> Result<Self> {
        let mut registry = Self::new();
        for (schema_id, document) in documents {
            let validator = Validator::new(&document).map_err(|e| {
                EngineError::validation("schema_compile_failed", format!("schema '{}' failed to compile: {}", schema_id, e))
            })?;
            registry.validators.insert(schema_id, validator);
        }
        Ok(registry)
    }

    pub fn contains(&self, schema_id: &str) -> bool {
        self.validators.contains_key(schema_id)
    }

    /// Validate `value` against `schema_id`. A missing schema id is a
    /// validation error (the caller referenced a schema the manifest never
    /// declared); accumulated instance violations become one
    /// `schema_validation` error carrying every violated field path.
    pub fn validate(&self, schema_id: &str, value: &Value) -> Result<()> {
        let validator = self
            .validators
            .get(schema_id)
            .ok_or_else(|| EngineError::validation("unknown_schema", format!("schema id '{}' is not registered", schema_id)))?;

        let paths: Vec<String> = validator.iter_errors(value).map(|e| e.instance_path.to_string()).collect();
        if paths.is_empty() {
            return Ok(());
        }

        Err(EngineError::validation(
            "schema_validation",
            format!("schema '{}' violated at: {}", schema_id, paths.join(", ")),
        )
        .with_details(serde_json::json!({ "schema_id": schema_id, "paths": paths })))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
