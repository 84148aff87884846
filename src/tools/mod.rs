//! Tool capability contract.
//!
//! Tools are looked up by name from a [`registry::ToolRegistry`] owned by the
//! host process. A tool returns a [`ToolResult`] made of content parts; the
//! ReAct executor flattens those parts into display text before feeding them
//! back to the model.

pub mod registry;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use registry::{Tool, ToolRegistry};

/// Tool definition handed to the model so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// One part of a tool's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
    /// Structured or binary content. `kind` names what the payload is
    /// (e.g. "image", "table"); the display flattening substitutes a
    /// placeholder for it instead of dropping it.
    Data { kind: String, payload: Value },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        ToolContent::Text { text: text.into() }
    }

    pub fn data(kind: impl Into<String>, payload: Value) -> Self {
        ToolContent::Data {
            kind: kind.into(),
            payload,
        }
    }
}

/// Result of a successful tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub parts: Vec<ToolContent>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        ToolResult {
            parts: vec![ToolContent::text(text)],
        }
    }

    pub fn parts(parts: Vec<ToolContent>) -> Self {
        ToolResult { parts }
    }

    /// Flatten all parts into a single display string.
    ///
    /// Text parts are concatenated in order; each non-text part contributes a
    /// deterministic `<kind content>` placeholder at its position. No part is
    /// ever dropped, so the audit trail accounts for everything the tool said.
    pub fn display_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if !out.is_empty() {
                out.push('\n');
            }
            match part {
                ToolContent::Text { text } => out.push_str(text),
                ToolContent::Data { kind, .. } => {
                    out.push_str(&format!("<{} content>", kind));
                }
            }
        }
        out
    }
}

/// Errors a tool invocation can produce.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// No tool with that name is registered.
    NotFound(String),
    /// The tool rejected the parameters it was given.
    InvalidParams { tool: String, message: String },
    /// The tool ran and failed.
    Execution { tool: String, message: String },
}

impl ToolError {
    /// Name of the tool involved, for logging and observations.
    pub fn tool_name(&self) -> &str {
        match self {
            ToolError::NotFound(name) => name,
            ToolError::InvalidParams { tool, .. } => tool,
            ToolError::Execution { tool, .. } => tool,
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool '{}' not found", name),
            ToolError::InvalidParams { tool, message } => {
                write!(f, "tool '{}' rejected parameters: {}", tool, message)
            }
            ToolError::Execution { tool, message } => {
                write!(f, "tool '{}' failed: {}", tool, message)
            }
        }
    }
}

impl std::error::Error for ToolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_text_flattens_all_parts_in_order() {
        let result = ToolResult::parts(vec![
            ToolContent::text("first"),
            ToolContent::data("image", serde_json::json!({"url": "x"})),
            ToolContent::text("second"),
            ToolContent::data("table", serde_json::json!([])),
        ]);

        let text = result.display_text();
        assert_eq!(text, "first\n<image content>\nsecond\n<table content>");
    }

    #[test]
    fn test_display_text_empty_result() {
        let result = ToolResult::parts(vec![]);
        assert_eq!(result.display_text(), "");
    }

    #[test]
    fn test_display_text_single_text_part() {
        assert_eq!(ToolResult::text("only").display_text(), "only");
    }
}
