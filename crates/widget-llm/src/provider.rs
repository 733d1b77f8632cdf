use crate::types::LLMChunk;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;
use widget_core::{tools::ToolSchema, Message};

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, LLMError>;

pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMChunk>> + Send>>;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Stream a chat completion.
    ///
    /// * `tools` - `None` sends no tools field at all
    /// * `model` - overrides the provider's default model
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
        max_output_tokens: Option<u32>,
        model: Option<&str>,
    ) -> Result<LLMStream>;
}
