pub mod eval_js;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Why a tool call could not produce a result.
///
/// Evaluation failures are not tool errors: they are returned as data.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A tool the MCP server exposes through `tools/list` and `tools/call`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique identifier clients call the tool by (e.g. "eval-js").
    fn name(&self) -> &str;

    /// Short display name.
    fn title(&self) -> &str;

    /// Human-readable description shown to clients so they know
    /// when to invoke this tool.
    fn description(&self) -> &str;

    /// JSON Schema of the `arguments` object.
    fn input_schema(&self) -> Value;

    /// Runs the tool with the client-supplied arguments.
    async fn execute(&self, params: Value) -> Result<Value, ToolError>;
}

/// Entry returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub title: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            title: tool.title().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
        }
    }
}

pub use eval_js::EvalJsTool;
pub use registry::ToolRegistry;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time verification that `Tool` is object-safe.
    #[test]
    fn test_tool_is_object_safe() {
        fn _assert_object_safe(_: &dyn Tool) {}
    }

    #[test]
    fn test_tool_error_messages() {
        assert_eq!(
            ToolError::InvalidParams("missing code".into()).to_string(),
            "invalid params: missing code"
        );
        assert_eq!(
            ToolError::Internal("boom".into()).to_string(),
            "internal error: boom"
        );
    }
}
