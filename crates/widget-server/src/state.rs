use std::sync::Arc;

use widget_core::ConversationStore;
use widget_llm::{
    create_provider, GenerationConfig, LLMError, LLMProvider, ProviderKind, ProviderSettings,
};
use widget_mcp::McpToolAggregator;

use crate::widgets::WidgetStore;

/// Hands out the LLM provider for a widget's `defaultProvider`.
pub trait ProviderSource: Send + Sync {
    fn provider(&self, kind: ProviderKind) -> Result<Arc<dyn LLMProvider>, LLMError>;
}

impl ProviderSource for ProviderSettings {
    fn provider(&self, kind: ProviderKind) -> Result<Arc<dyn LLMProvider>, LLMError> {
        create_provider(kind, self)
    }
}

pub struct AppState {
    pub widgets: WidgetStore,
    pub conversations: Arc<dyn ConversationStore>,
    pub aggregator: Arc<McpToolAggregator>,
    pub providers: Arc<dyn ProviderSource>,
    pub generation: GenerationConfig,
}
