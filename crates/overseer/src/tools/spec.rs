//! Structured action descriptions with usage guidance.
//!
//! `ActionSpec` turns a purpose, usage guidance and a schemars-derived
//! parameter schema into the [`ToolDef`] sent to the driving model.

use crate::ToolDef;

/// A structured action specification.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    /// Action name (unique within a scope).
    pub name: String,
    /// One-sentence imperative purpose.
    pub purpose: String,
    /// When this action should be used.
    pub when_to_use: Option<String>,
    /// When this action should NOT be used. Prevents confusion between
    /// similar actions such as `wait_for_instance` and `read_instance_logs`.
    pub when_not_to_use: Option<String>,
    /// JSON Schema of the arguments.
    pub parameters: serde_json::Value,
    /// Usage examples as (call, expected behavior) pairs.
    pub examples: Vec<(String, String)>,
}

impl ActionSpec {
    /// Start a spec. Parameters default to an empty object schema.
    pub fn new(name: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            purpose: purpose.into(),
            when_to_use: None,
            when_not_to_use: None,
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            examples: Vec::new(),
        }
    }

    pub fn when_to_use(mut self, when: impl Into<String>) -> Self {
        self.when_to_use = Some(when.into());
        self
    }

    pub fn when_not_to_use(mut self, when_not: impl Into<String>) -> Self {
        self.when_not_to_use = Some(when_not.into());
        self
    }

    /// Derive the parameter schema from a type implementing
    /// `schemars::JsonSchema`, so the declared schema and the
    /// deserialization target can never diverge.
    pub fn parameters_for<T: schemars::JsonSchema>(mut self) -> Self {
        self.parameters = crate::json_schema_for::<T>();
        self
    }

    pub fn example(mut self, call: impl Into<String>, behavior: impl Into<String>) -> Self {
        self.examples.push((call.into(), behavior.into()));
        self
    }

    /// Render the description string shown to the model.
    pub fn to_description(&self) -> String {
        let mut desc = format!("{}.", self.purpose);
        if let Some(ref when) = self.when_to_use {
            desc.push_str(&format!("\nWhen to use: {when}"));
        }
        if let Some(ref when_not) = self.when_not_to_use {
            desc.push_str(&format!("\nWhen NOT to use: {when_not}"));
        }
        if !self.examples.is_empty() {
            desc.push_str("\nExamples:");
            for (call, behavior) in &self.examples {
                desc.push_str(&format!("\n  - {call} → {behavior}"));
            }
        }
        desc
    }

    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef::new(
            self.name.clone(),
            self.to_description(),
            self.parameters.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct NoteArgs {
        /// Text of the note.
        content: String,
    }

    #[test]
    fn description_includes_guidance_and_examples() {
        let spec = ActionSpec::new("write_note", "Write a note for future reference")
            .when_to_use("When you learn something worth keeping across compaction")
            .when_not_to_use("For transient reasoning")
            .example("write_note(content='creds found')", "Stores a timestamped note");
        let desc = spec.to_description();
        assert!(desc.starts_with("Write a note for future reference."));
        assert!(desc.contains("When NOT to use: For transient reasoning"));
        assert!(desc.contains("write_note(content='creds found') → Stores"));
    }

    #[test]
    fn minimal_spec_has_empty_object_schema() {
        let def = ActionSpec::new("list_instances", "List instances").to_tool_def();
        assert_eq!(def.function.name, "list_instances");
        assert_eq!(def.function.parameters["type"], "object");
        assert!(!def.function.description.contains("When to use"));
    }

    #[test]
    fn parameters_for_derives_required_fields() {
        let def = ActionSpec::new("write_note", "Write")
            .parameters_for::<NoteArgs>()
            .to_tool_def();
        let required = def.function.parameters["required"].as_array().unwrap();
        assert!(required.contains(&"content".into()));
    }
}
