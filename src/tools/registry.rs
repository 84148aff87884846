use super::{ToolDefinition, ToolError, ToolResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool definition handed to the model
    fn definition(&self) -> ToolDefinition;

    /// Executes the tool with the given parameters
    async fn invoke(&self, params: Value) -> Result<ToolResult, ToolError>;

    /// Returns the tool's name
    fn name(&self) -> String {
        self.definition().name
    }
}

/// Registry that holds all available tools.
/// Uses interior mutability (RwLock) so tools can be registered at runtime
/// without requiring &mut self.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool (thread-safe, takes &self via interior mutability)
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.write().insert(name, tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    /// List definitions of all registered tools (for prompt assembly)
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .values()
            .map(|tool| tool.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Invoke a tool by name. A missing tool is an error value, not a panic;
    /// the ReAct loop turns it into an observation for the model.
    pub async fn invoke(&self, name: &str, params: Value) -> Result<ToolResult, ToolError> {
        let tool = match self.get(name) {
            Some(tool) => tool,
            None => return Err(ToolError::NotFound(name.to_string())),
        };
        tool.invoke(params).await
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Get count of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolContent;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("echo", "Echoes its input back")
        }

        async fn invoke(&self, params: Value) -> Result<ToolResult, ToolError> {
            let text = params
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidParams {
                    tool: "echo".to_string(),
                    message: "missing 'text'".to_string(),
                })?;
            Ok(ToolResult::text(text))
        }
    }

    struct MixedTool;

    #[async_trait]
    impl Tool for MixedTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("mixed", "Returns mixed content parts")
        }

        async fn invoke(&self, _params: Value) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::parts(vec![
                ToolContent::text("header"),
                ToolContent::data("chart", serde_json::json!({"points": 3})),
            ]))
        }
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        assert!(registry.has_tool("echo"));
        assert_eq!(registry.len(), 1);

        let result = registry
            .invoke("echo", serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(result.display_text(), "hello");
    }

    #[tokio::test]
    async fn test_missing_tool_is_error_value() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("nope", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_invalid_params_surface_as_tool_error() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let err = registry
            .invoke("echo", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn test_mixed_content_flattening_via_registry() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(MixedTool));

        let result = registry.invoke("mixed", serde_json::json!({})).await.unwrap();
        assert_eq!(result.display_text(), "header\n<chart content>");
    }

    #[test]
    fn test_definitions_sorted_by_name() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(MixedTool));
        registry.register(Arc::new(EchoTool));

        let names: Vec<String> = registry.definitions().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["echo", "mixed"]);
    }
}
