//! Provider Factory
//!
//! Picks and builds the LLM provider a widget asks for.

use std::sync::Arc;

use crate::provider::{LLMError, LLMProvider};
use crate::providers::{AnthropicProvider, OpenAIProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
}

impl ProviderKind {
    /// `"anthropic"` selects Anthropic; any other name falls back to OpenAI.
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(|n| n.trim().to_ascii_lowercase()) {
            Some(n) if n == "anthropic" => ProviderKind::Anthropic,
            _ => ProviderKind::OpenAI,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

/// Credentials and endpoint overrides for every supported provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub anthropic_model: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn create_provider(
    kind: ProviderKind,
    settings: &ProviderSettings,
) -> Result<Arc<dyn LLMProvider>, LLMError> {
    match kind {
        ProviderKind::OpenAI => {
            let api_key = non_empty(&settings.openai_api_key)
                .ok_or_else(|| LLMError::Auth("OpenAI API key is required".to_string()))?;

            let mut provider = OpenAIProvider::new(api_key);
            if let Some(base_url) = non_empty(&settings.openai_base_url) {
                provider = provider.with_base_url(base_url);
            }
            if let Some(model) = non_empty(&settings.openai_model) {
                provider = provider.with_model(model);
            }

            Ok(Arc::new(provider))
        }
        ProviderKind::Anthropic => {
            let api_key = non_empty(&settings.anthropic_api_key)
                .ok_or_else(|| LLMError::Auth("Anthropic API key is required".to_string()))?;

            let mut provider = AnthropicProvider::new(api_key);
            if let Some(base_url) = non_empty(&settings.anthropic_base_url) {
                provider = provider.with_base_url(base_url);
            }
            if let Some(model) = non_empty(&settings.anthropic_model) {
                provider = provider.with_model(model);
            }

            Ok(Arc::new(provider))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_falls_back_to_openai() {
        assert_eq!(ProviderKind::from_name(Some("anthropic")), ProviderKind::Anthropic);
        assert_eq!(ProviderKind::from_name(Some(" Anthropic ")), ProviderKind::Anthropic);
        assert_eq!(ProviderKind::from_name(Some("openai")), ProviderKind::OpenAI);
        assert_eq!(ProviderKind::from_name(Some("gemini")), ProviderKind::OpenAI);
        assert_eq!(ProviderKind::from_name(None), ProviderKind::OpenAI);
    }

    #[test]
    fn missing_key_is_an_auth_error() {
        let settings = ProviderSettings {
            openai_api_key: Some("   ".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            create_provider(ProviderKind::OpenAI, &settings),
            Err(LLMError::Auth(_))
        ));
        assert!(matches!(
            create_provider(ProviderKind::Anthropic, &settings),
            Err(LLMError::Auth(_))
        ));
    }

    #[test]
    fn creates_configured_providers() {
        let settings = ProviderSettings {
            openai_api_key: Some("sk-test".to_string()),
            anthropic_api_key: Some("ak-test".to_string()),
            anthropic_model: Some("claude-3-haiku".to_string()),
            ..Default::default()
        };

        assert!(create_provider(ProviderKind::OpenAI, &settings).is_ok());
        assert!(create_provider(ProviderKind::Anthropic, &settings).is_ok());
    }
}
