//! Shared plumbing for dispatching driving-model actions.
//!
//! Arguments arrive as a raw JSON string. They are validated against the
//! action's declared schema with `jsonschema` before being parsed into a
//! typed struct, and before any side effect. Every action produces an
//! [`ActionOutput`] that is rendered into the tool-result message.

use std::fmt;

use serde::de::DeserializeOwned;
use tracing::{debug, info, trace};

use crate::ToolDef;

/// Maximum size (in characters) of a tool result before truncation.
pub const DEFAULT_MAX_RESULT_CHARS: usize = 30_000;

/// Outcome of one action, as shown to the driving model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutput {
    pub ok: bool,
    pub text: String,
}

impl ActionOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            text: text.into(),
        }
    }

    pub fn err(text: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: text.into(),
        }
    }

    /// `"✓ ..."` for successes, `"Error: ..."` for failures.
    pub fn render(&self) -> String {
        if self.ok {
            format!("✓ {}", self.text)
        } else {
            format!("Error: {}", self.text)
        }
    }
}

impl<E: fmt::Display> From<Result<String, E>> for ActionOutput {
    fn from(result: Result<String, E>) -> Self {
        match result {
            Ok(text) => Self::ok(text),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

/// Validate raw arguments against a definition's parameter schema.
///
/// Returns the parsed JSON value on success, or a message listing every
/// violation (missing required fields, wrong types, bad enum values).
pub fn validate_arguments(def: &ToolDef, arguments: &str) -> Result<serde_json::Value, String> {
    let raw = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        format!(
            "invalid JSON arguments for '{}': {e}. \
             Please provide valid JSON matching the action's parameter schema.",
            def.function.name
        )
    })?;

    let validator = match jsonschema::validator_for(&def.function.parameters) {
        Ok(v) => v,
        Err(e) => {
            debug!("Schema for '{}' is not compilable: {e}", def.function.name);
            return Ok(value);
        }
    };

    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(format!(
            "argument validation failed for '{}':\n{}\nPlease fix the arguments and try again.",
            def.function.name,
            errors.join("\n")
        ))
    }
}

/// Deserialize validated arguments into a typed struct.
pub fn parse_args<T: DeserializeOwned>(name: &str, value: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| format!("invalid arguments for '{name}': {e}"))
}

/// Log an action call at INFO level with a truncated preview of arguments.
pub fn log_action_call(scope: &str, name: &str, arguments: &str) {
    let preview: String = arguments.chars().take(120).collect();
    info!(
        "[{scope}] {name}({preview}{})",
        if arguments.chars().count() > 120 {
            "..."
        } else {
            ""
        }
    );
    trace!("[{scope}] {name} arguments: {arguments}");
}

/// Truncate a string to at most `max` characters, appending a notice if
/// trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    let total = s.chars().count();
    if total > max {
        let head: String = s.chars().take(max).collect();
        format!("{head}...\n[truncated: {total} chars total]")
    } else {
        s
    }
}
