//! JSON Schema for the batch state document
//!
//! Structural checks (required fields, types, enums) run against the raw
//! JSON before deserialization so a corrupted file is reported with the
//! exact JSON path that is wrong.

use jsonschema::Validator;
use serde_json::{json, Value as JsonValue};

fn state_schema() -> JsonValue {
    let timestamp = json!({ "type": "string", "minLength": 1 });

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "batch_state",
        "type": "object",
        "required": ["batch_id", "features", "current_index", "status", "created_at", "updated_at"],
        "properties": {
            "schema_version": { "type": "integer", "minimum": 1 },
            "batch_id": { "type": "string", "minLength": 1 },
            "source": {
                "type": "object",
                "properties": {
                    "source_type": { "enum": ["file", "external_tracker"] },
                    "path": { "type": ["string", "null"] },
                    "issue_numbers": {
                        "type": "array",
                        "items": { "type": "integer", "minimum": 1 }
                    }
                }
            },
            "features": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "anyOf": [
                        { "type": "string" },
                        {
                            "type": "object",
                            "required": ["title"],
                            "properties": {
                                "title": { "type": "string" },
                                "description": { "type": ["string", "null"] },
                                "issue_number": { "type": ["integer", "null"], "minimum": 1 }
                            }
                        }
                    ]
                }
            },
            "current_index": { "type": "integer", "minimum": 0 },
            "completed": {
                "type": "object",
                "propertyNames": { "pattern": "^[0-9]+$" },
                "additionalProperties": {
                    "type": "object",
                    "required": ["status", "timestamp"],
                    "properties": {
                        "status": { "const": "completed" },
                        "output": { "type": ["string", "null"] },
                        "timestamp": timestamp
                    }
                }
            },
            "failed": {
                "type": "object",
                "propertyNames": { "pattern": "^[0-9]+$" },
                "additionalProperties": {
                    "type": "object",
                    "required": ["status", "error", "timestamp"],
                    "properties": {
                        "status": { "const": "failed" },
                        "error": { "type": "string" },
                        "timestamp": timestamp
                    }
                }
            },
            "context_token_estimate": { "type": "integer", "minimum": 0 },
            "auto_clear_count": { "type": "integer", "minimum": 0 },
            "auto_clear_events": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["feature_index", "tokens_before_clear", "timestamp"],
                    "properties": {
                        "feature_index": { "type": "integer", "minimum": 0 },
                        "tokens_before_clear": { "type": "integer", "minimum": 0 },
                        "timestamp": timestamp
                    }
                }
            },
            "status": { "enum": ["in_progress", "completed", "failed", "aborted"] },
            "abort_reason": { "type": ["string", "null"] },
            "created_at": timestamp,
            "updated_at": timestamp
        }
    })
}

/// Compiled validator for state documents
pub struct StateSchema {
    validator: Validator,
}

impl StateSchema {
    pub fn compile() -> Result<Self, String> {
        let validator = Validator::new(&state_schema())
            .map_err(|e| format!("Failed to compile state schema: {}", e))?;
        Ok(Self { validator })
    }

    /// Every schema violation, each prefixed with its JSON path
    pub fn violations(&self, document: &JsonValue) -> Vec<String> {
        self.validator
            .iter_errors(document)
            .map(|error| {
                let path = error.instance_path.to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{}: {}", path, error)
                }
            })
            .collect()
    }
}
