//! Precompiled JSON-Schema validation for a session's `output/result.json`.

use jsonschema::{Draft, JSONSchema};

use crate::domain::errors::RuntimeError;

/// Wraps a compiled schema so `getOutputFiles` can validate `result.json`
/// without recompiling on every call. Construction fails fast on an invalid
/// schema, matching the "invalid JSON schema at config time" requirement.
pub struct OutputValidator {
    compiled: JSONSchema,
}

impl OutputValidator {
    pub fn compile(schema: &serde_json::Value) -> Result<Self, RuntimeError> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| RuntimeError::SchemaInvalid(e.to_string()))?;
        Ok(Self { compiled })
    }

    /// Parses `raw` as JSON and validates against the compiled schema.
    /// Returns the parsed value on success, or a `SchemaInvalid` error that
    /// the caller attaches to `rawData` per the output-collection contract.
    pub fn validate(&self, raw: &str) -> Result<serde_json::Value, RuntimeError> {
        let instance: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| RuntimeError::SchemaInvalid(format!("result.json is not valid JSON: {e}")))?;

        let result = match self.compiled.validate(&instance) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let messages: Vec<String> = errors.map(|e| format!("{}: {}", e.instance_path, e)).collect();
                Err(RuntimeError::SchemaInvalid(messages.join(", ")))
            }
        };
        result.map(|()| instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "number"}
            },
            "required": ["name", "age"]
        })
    }

    #[test]
    fn validates_conforming_output() {
        let validator = OutputValidator::compile(&schema()).unwrap();
        let result = validator.validate(r#"{"name": "Alice", "age": 30}"#);
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let validator = OutputValidator::compile(&schema()).unwrap();
        let result = validator.validate(r#"{"name": "Alice"}"#);
        assert!(matches!(result, Err(RuntimeError::SchemaInvalid(_))));
    }

    #[test]
    fn rejects_malformed_json_with_raw_data_preserved() {
        let validator = OutputValidator::compile(&schema()).unwrap();
        let raw = "not json at all";
        let result = validator.validate(raw);
        assert!(matches!(result, Err(RuntimeError::SchemaInvalid(_))));
    }

    #[test]
    fn rejects_invalid_schema_at_compile_time() {
        let bogus = json!({"type": "not-a-real-type"});
        assert!(OutputValidator::compile(&bogus).is_err());
    }
}
