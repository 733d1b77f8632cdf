//! Multi-step generation: stream a completion, run the tools it asks for,
//! feed the results back, repeat.

mod runner;
mod stream;

use thiserror::Error;
use widget_core::Message;

use crate::provider::LLMError;

pub use runner::stream_text;

pub const DEFAULT_MAX_STEPS: usize = 20;

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_steps: usize,
    /// Overrides the provider's default model.
    pub model: Option<String>,
    pub max_output_tokens: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            model: None,
            max_output_tokens: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Text of the last step.
    pub text: String,
    pub steps: usize,
    /// The conversation including every assistant and tool message produced.
    pub messages: Vec<Message>,
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation cancelled")]
    Cancelled,

    #[error("LLM error: {0}")]
    LLM(#[from] LLMError),
}
