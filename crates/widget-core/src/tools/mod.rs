pub mod accumulator;
pub mod executor;
pub mod types;

pub use accumulator::{
    finalize_tool_calls, update_partial_tool_call, PartialToolCall, ToolCallAccumulator,
};
pub use executor::{parse_tool_args, ToolError, ToolExecutor};
pub use types::{FunctionCall, FunctionSchema, ToolCall, ToolResult, ToolSchema};
