//! LLM generation backend for widget chats: streaming providers and the
//! multi-step tool-calling loop.

pub mod generation;
pub mod provider;
pub mod provider_factory;
pub mod providers;
pub mod types;

pub use generation::{stream_text, GenerationConfig, GenerationError, GenerationOutput};
pub use provider::{LLMError, LLMProvider, LLMStream};
pub use provider_factory::{create_provider, ProviderKind, ProviderSettings};
pub use providers::{AnthropicProvider, OpenAIProvider};
pub use types::LLMChunk;
