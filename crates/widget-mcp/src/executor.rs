use async_trait::async_trait;
use tracing::{debug, error};
use widget_core::tools::{
    parse_tool_args, ToolCall, ToolError, ToolExecutor, ToolResult, ToolSchema,
};

use crate::error::McpError;
use crate::session::ToolSet;

#[async_trait]
impl ToolExecutor for ToolSet {
    async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let tool_name = &call.function.name;

        if self.is_closed() {
            return Err(ToolError::Closed);
        }

        let Some(tool) = self.get(tool_name) else {
            return Err(ToolError::NotFound(format!(
                "MCP tool '{}' not found",
                tool_name
            )));
        };

        debug!("Executing MCP tool: {} (server: {})", tool_name, tool.source_url);

        let args = parse_tool_args(&call.function.arguments)?;

        match self.invoke(tool_name, args).await {
            Ok(result) => Ok(ToolResult {
                success: !result.is_error,
                result: result.to_text(),
            }),
            Err(McpError::Disconnected) if self.is_closed() => Err(ToolError::Closed),
            Err(McpError::ToolNotFound(name)) => {
                Err(ToolError::NotFound(format!("Tool '{}' not found", name)))
            }
            Err(e) => {
                error!("MCP tool execution failed: {}", e);
                Err(ToolError::Execution(format!("MCP error: {}", e)))
            }
        }
    }

    fn list_tools(&self) -> Vec<ToolSchema> {
        self.schemas()
    }
}
