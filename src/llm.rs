//! Selección de proveedores de IA a partir de la configuración.
//!
//! La elección es un enum cerrado con su configuración asociada; un nombre de
//! proveedor desconocido falla al cargar la configuración, nunca aquí.

use std::sync::Arc;

use tracing::debug;

use crate::config::{AppSettings, CompletionProviderConfig, EmbeddingProviderConfig};
use crate::error::ProviderError;
use crate::providers::anthropic::{AnthropicChat, VoyageEmbeddings};
use crate::providers::ollama::{OllamaChat, OllamaEmbeddings};
use crate::providers::openai::{OpenAiChat, OpenAiEmbeddings};
use crate::providers::view::{ViewChat, ViewEmbeddings};
use crate::providers::{CompletionClient, EmbeddingClient};

pub fn embedding_client(config: &EmbeddingProviderConfig) -> Result<Arc<dyn EmbeddingClient>, ProviderError> {
    let client: Arc<dyn EmbeddingClient> = match config {
        EmbeddingProviderConfig::OpenAi(s) => Arc::new(OpenAiEmbeddings::new(s)?),
        EmbeddingProviderConfig::Anthropic(s) => Arc::new(VoyageEmbeddings::new(s)?),
        EmbeddingProviderConfig::Ollama(s) => Arc::new(OllamaEmbeddings::new(s)?),
        EmbeddingProviderConfig::View(s) => Arc::new(ViewEmbeddings::new(s)?),
    };
    debug!("Cliente de embeddings: {} ({})", client.provider_name(), client.model());
    Ok(client)
}

pub fn completion_client(config: &CompletionProviderConfig) -> Result<Arc<dyn CompletionClient>, ProviderError> {
    let client: Arc<dyn CompletionClient> = match config {
        CompletionProviderConfig::OpenAi(s) => Arc::new(OpenAiChat::new(s)?),
        CompletionProviderConfig::Anthropic(s) => Arc::new(AnthropicChat::new(s)?),
        CompletionProviderConfig::Ollama(s) => Arc::new(OllamaChat::new(s)?),
        CompletionProviderConfig::View(s) => Arc::new(ViewChat::new(s)?),
    };
    debug!("Cliente de chat: {}", client.provider_name());
    Ok(client)
}

/// Gestor de LLMs y embeddings construido desde la configuración vigente.
#[derive(Clone)]
pub struct LlmManager {
    embedding_config: EmbeddingProviderConfig,
    completion_config: CompletionProviderConfig,
}

impl LlmManager {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            embedding_config: settings.embedding_config(),
            completion_config: settings.completion_config(),
        }
    }

    /// Los errores de configuración se detectan aquí, antes de tocar la red.
    pub fn embeddings(&self) -> Result<Arc<dyn EmbeddingClient>, ProviderError> {
        embedding_client(&self.embedding_config)
    }

    pub fn completions(&self) -> Result<Arc<dyn CompletionClient>, ProviderError> {
        completion_client(&self.completion_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompletionProviderType, EmbeddingProviderType};

    #[test]
    fn dispatch_follows_selected_variant() {
        let mut settings = AppSettings::default();
        settings.embedding_provider = EmbeddingProviderType::Ollama;
        settings.completion_provider = CompletionProviderType::Ollama;
        let manager = LlmManager::from_settings(&settings);

        let embeddings = manager.embeddings().unwrap();
        assert_eq!(embeddings.provider_name(), "Ollama");
        assert_eq!(embeddings.model(), "nomic-embed-text");
        assert_eq!(manager.completions().unwrap().provider_name(), "Ollama");
    }

    #[test]
    fn anthropic_embeddings_go_through_voyage() {
        let mut settings = AppSettings::default();
        settings.embedding_provider = EmbeddingProviderType::Anthropic;
        settings.anthropic.voyage_api_key = "pa-key".to_string();
        let client = LlmManager::from_settings(&settings).embeddings().unwrap();
        assert_eq!(client.provider_name(), "Voyage");
    }

    #[test]
    fn missing_configuration_fails_before_network() {
        let settings = AppSettings::default();
        let manager = LlmManager::from_settings(&settings);
        assert!(matches!(manager.embeddings(), Err(ProviderError::Config { .. })));
        assert!(matches!(manager.completions(), Err(ProviderError::Config { .. })));
    }
}
