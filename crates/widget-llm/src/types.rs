use widget_core::tools::ToolCall;

/// One piece of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum LLMChunk {
    Token(String),
    /// Partial tool calls; fold them with `ToolCallAccumulator`.
    ToolCalls(Vec<ToolCall>),
    Done,
}
