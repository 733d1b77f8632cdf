use serde::{Deserialize, Serialize};

use crate::tools::ToolResult;

/// Events streamed to the widget while an answer is generated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Token {
        content: String,
    },

    ToolStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    ToolComplete {
        tool_call_id: String,
        result: ToolResult,
    },

    ToolError {
        tool_call_id: String,
        error: String,
    },

    Finish {
        text: String,
        steps: usize,
    },

    Error {
        message: String,
    },
}

impl ChatEvent {
    /// Whether the event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Finish { .. } | ChatEvent::Error { .. })
    }
}
