//! Sesión de chat con recuperación RAG.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{AppSettings, RagSettings};
use crate::graph_store::GraphStore;
use crate::llm::LlmManager;
use crate::models::{ChatMessage, Role};
use crate::providers::{CompletionClient, EmbeddingClient, TokenCallback};
use crate::rag::{build_rag_enhanced_messages, optimize_query, RagService};

/// Fuente citada en una respuesta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub index: usize,
    pub source: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

pub struct ChatSession {
    rag: RagService,
    embeddings: Option<Arc<dyn EmbeddingClient>>,
    completions: Arc<dyn CompletionClient>,
    rag_settings: RagSettings,
    system_prompt: String,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(
        rag: RagService,
        embeddings: Option<Arc<dyn EmbeddingClient>>,
        completions: Arc<dyn CompletionClient>,
        rag_settings: RagSettings,
        system_prompt: impl Into<String>,
    ) -> Self {
        let system_prompt = system_prompt.into();
        Self {
            rag,
            embeddings,
            completions,
            rag_settings,
            history: vec![ChatMessage::system(system_prompt.clone())],
            system_prompt,
        }
    }

    /// Construye la sesión desde la configuración. Un proveedor de embeddings
    /// mal configurado sólo desactiva la recuperación; uno de chat es un error.
    pub fn from_settings(settings: &AppSettings, store: Arc<dyn GraphStore>) -> Result<Self> {
        let llm = LlmManager::from_settings(settings);
        let completions = llm.completions()?;
        let embeddings = if settings.rag.enable_rag {
            match llm.embeddings() {
                Ok(client) => Some(client),
                Err(err) => {
                    warn!("RAG desactivado para esta sesión: {err}");
                    None
                }
            }
        } else {
            None
        };
        let rag = RagService::new(store, settings.graph.tenant_guid, settings.graph.graph_guid);
        Ok(Self::new(rag, embeddings, completions, settings.rag.clone(), settings.system_prompt.clone()))
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Vacía la conversación dejando sólo el prompt de sistema.
    pub fn reset(&mut self) {
        self.history = vec![ChatMessage::system(self.system_prompt.clone())];
        info!("Conversación reiniciada.");
    }

    /// Envía un turno. Los tokens se emiten por `on_token` según llegan; el
    /// historial sólo cambia si la respuesta termina bien.
    pub async fn send(&mut self, user_input: &str, on_token: TokenCallback<'_>) -> Result<ChatReply> {
        let (context, sources) = self.retrieve(user_input).await;
        let messages = build_rag_enhanced_messages(user_input, &context, &self.history);

        let answer = self.completions.stream_completion(&messages, on_token).await?;

        self.history.push(ChatMessage::user(user_input));
        self.history.push(ChatMessage::assistant(answer.clone()));
        Ok(ChatReply { answer, sources })
    }

    async fn retrieve(&self, user_input: &str) -> (String, Vec<SourceRef>) {
        if !self.rag_settings.enable_rag {
            return (String::new(), Vec::new());
        }
        let Some(embeddings) = &self.embeddings else {
            return (String::new(), Vec::new());
        };

        let query = optimize_query(user_input, &self.rag_settings);
        let embedding = match embeddings.embed_query(&query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!("No se pudo vectorizar la consulta, se responde sin contexto: {err}");
                return (String::new(), Vec::new());
            }
        };

        let (results, context) = self.rag.retrieve_relevant_documents(&embedding, &self.rag_settings).await;
        let sources = results
            .iter()
            .enumerate()
            .map(|(i, r)| SourceRef { index: i + 1, source: r.chunk.source_name.clone(), score: r.score })
            .collect();
        (context, sources)
    }

    pub fn turns(&self) -> usize {
        self.history.iter().filter(|m| m.role == Role::User).count()
    }
}
