pub mod events;
pub mod message;
pub mod storage;
pub mod tools;

pub use events::ChatEvent;
pub use message::{Message, Role};
pub use storage::{
    Conversation, ConversationStore, JsonlConversationStore, StorageError, StoredMessage,
};
pub use tools::{
    finalize_tool_calls, parse_tool_args, FunctionCall, FunctionSchema, ToolCall,
    ToolCallAccumulator, ToolError, ToolExecutor, ToolResult, ToolSchema,
};
