//! Argument validation against a capability's parameter schema.

use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use toolrelay_core::error::ToolError;

/// Compile a parameter schema, returning the compiler's message on failure.
pub fn compile(schema: &Value) -> Result<JSONSchema, String> {
    JSONSchema::options().compile(schema).map_err(|e| e.to_string())
}

/// Compiled parameter schemas, keyed by capability name.
///
/// An entry is reused only while the capability's schema is unchanged.
#[derive(Default)]
pub struct SchemaCache {
    compiled: RwLock<HashMap<String, (Value, Arc<JSONSchema>)>>,
}

impl SchemaCache {
    pub fn get_or_compile(&self, name: &str, schema: &Value) -> Result<Arc<JSONSchema>, ToolError> {
        if let Ok(entries) = self.compiled.read()
            && let Some((source, compiled)) = entries.get(name)
            && source == schema
        {
            return Ok(Arc::clone(compiled));
        }

        let compiled = Arc::new(
            compile(schema)
                .map_err(|e| ToolError::InvalidArguments(format!("parameter schema does not compile: {e}")))?,
        );
        if let Ok(mut entries) = self.compiled.write() {
            entries.insert(name.to_string(), (schema.clone(), Arc::clone(&compiled)));
        }
        Ok(compiled)
    }
}

/// Validate `arguments` against a compiled schema.
///
/// All violations are joined into one `InvalidArguments` message so the model
/// can fix every problem in a single retry.
pub fn validate_arguments(compiled: &JSONSchema, arguments: &Value) -> Result<(), ToolError> {
    if let Err(errors) = compiled.validate(arguments) {
        let message = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ToolError::InvalidArguments(message));
    }

    Ok(())
}
