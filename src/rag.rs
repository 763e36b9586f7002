//! Recuperación RAG y montaje del contexto.
//!
//! Flujo:
//!   1. Búsqueda vectorial de chunks con `score >= umbral`, de mayor a menor.
//!   2. Reordenación opcional (estable, por score).
//!   3. Construcción del contexto con citas opcionales, acotado en longitud.
//!   4. Mensajes para el LLM: historial sin mensajes de sistema, un único
//!      mensaje de sistema con el contexto y, al final, la pregunta.
//!
//! La recuperación nunca falla hacia fuera: cualquier error se registra y se
//! devuelve un resultado vacío.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::RagSettings;
use crate::graph_store::GraphStore;
use crate::models::{ChatMessage, ChunkNode, Role, VectorSearchRequest, VectorSearchResult};

/// Longitud máxima del contexto, en caracteres.
pub const MAX_CONTEXT_LENGTH: usize = 4000;
pub const TRUNCATION_MARKER: &str = "\n\n[Context truncated due to length...]";
pub const NO_CONTENT: &str = "[No Content]";

const CONTEXT_INSTRUCTION: &str = "You are a helpful assistant. Answer the user's question using ONLY the \
information in the context below. If the context does not contain the answer, say that you don't know.";

const RESPOND_ONLY_IN: &str = "Please respond ONLY in ";
const RESPOND_IN: &str = "Please respond in ";

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "could", "did", "do", "does", "for",
    "from", "had", "has", "have", "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "of",
    "on", "or", "please", "should", "so", "tell", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "to", "was", "we", "were", "what", "when", "where", "which", "who",
    "why", "will", "with", "would", "you", "your",
];

pub struct RagService {
    store: Arc<dyn GraphStore>,
    tenant_guid: Uuid,
    graph_guid: Uuid,
}

impl RagService {
    pub fn new(store: Arc<dyn GraphStore>, tenant_guid: Uuid, graph_guid: Uuid) -> Self {
        Self { store, tenant_guid, graph_guid }
    }

    /// Busca los chunks más parecidos a la consulta y arma el contexto.
    pub async fn retrieve_relevant_documents(
        &self,
        query_embedding: &[f64],
        settings: &RagSettings,
    ) -> (Vec<VectorSearchResult>, String) {
        if query_embedding.is_empty() {
            error!("Embedding de la consulta vacío, no se recupera contexto.");
            return (Vec::new(), String::new());
        }

        let request = VectorSearchRequest {
            tenant_guid: self.tenant_guid,
            graph_guid: self.graph_guid,
            embedding: query_embedding.to_vec(),
            top_k: settings.top_k,
            min_score: settings.similarity_threshold,
        };

        let mut results = match self.store.vector_search(&request).await {
            Ok(results) => results,
            Err(err) => {
                error!("Error en la búsqueda vectorial: {err:#}");
                return (Vec::new(), String::new());
            }
        };

        results.retain(|r| r.score >= settings.similarity_threshold);
        sort_by_score(&mut results);
        results.truncate(settings.top_k);

        if settings.enable_context_sorting {
            sort_by_score(&mut results);
        }

        debug!(
            "{} chunks recuperados (umbral {}, top_k {})",
            results.len(),
            settings.similarity_threshold,
            settings.top_k
        );
        let context = build_context(&results, settings.enable_citations);
        (results, context)
    }
}

fn sort_by_score(results: &mut [VectorSearchResult]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

/// Texto de un chunk: texto propio, contenido del primer vector, etiqueta
/// `Content` o el centinela.
fn chunk_content(chunk: &ChunkNode) -> &str {
    if !chunk.text.trim().is_empty() {
        return &chunk.text;
    }
    if let Some(vector) = chunk.vectors.first() {
        if !vector.content.trim().is_empty() {
            return &vector.content;
        }
    }
    match chunk.tags.get("Content") {
        Some(content) if !content.trim().is_empty() => content,
        _ => NO_CONTENT,
    }
}

pub fn build_context(results: &[VectorSearchResult], enable_citations: bool) -> String {
    let segments: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let content = chunk_content(&result.chunk);
            if enable_citations {
                let source = if result.chunk.source_name.is_empty() {
                    "Unknown"
                } else {
                    result.chunk.source_name.as_str()
                };
                format!("[{}] Source: {source}\n{content}", i + 1)
            } else {
                content.to_string()
            }
        })
        .collect();

    let context = segments.join("\n\n");
    if context.chars().count() > MAX_CONTEXT_LENGTH {
        warn!("Contexto recortado a {MAX_CONTEXT_LENGTH} caracteres.");
        let mut truncated: String = context.chars().take(MAX_CONTEXT_LENGTH).collect();
        truncated.push_str(TRUNCATION_MARKER);
        return truncated;
    }
    context
}

fn is_stop_word(word: &str) -> bool {
    let normalized = word
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    normalized.is_empty() || STOP_WORDS.contains(&normalized.as_str())
}

/// Quita palabras vacías de la consulta. Si el resultado se queda demasiado
/// corto, devuelve la consulta original.
pub fn optimize_query(query: &str, settings: &RagSettings) -> String {
    if !settings.query_optimization || query.trim().is_empty() {
        return query.to_string();
    }

    let words: Vec<&str> = query.split_whitespace().collect();
    let kept: Vec<&str> = words.iter().copied().filter(|w| !is_stop_word(w)).collect();

    if kept.is_empty() || (words.len() >= 3 && kept.len() < 3) {
        return query.to_string();
    }
    kept.join(" ")
}

/// Directiva de idioma del mensaje de sistema, normalizada a la forma
/// "Please respond ONLY in X.".
fn language_directive(system_prompt: &str) -> Option<String> {
    let language = |rest: &str| -> Option<String> {
        let end = rest.find(['.', '\n']).unwrap_or(rest.len());
        let lang = rest[..end].trim();
        (!lang.is_empty()).then(|| lang.to_string())
    };

    if let Some(idx) = system_prompt.find(RESPOND_ONLY_IN) {
        let lang = language(&system_prompt[idx + RESPOND_ONLY_IN.len()..])?;
        return Some(format!("{RESPOND_ONLY_IN}{lang}."));
    }
    if let Some(idx) = system_prompt.find(RESPOND_IN) {
        let lang = language(&system_prompt[idx + RESPOND_IN.len()..])?;
        return Some(format!(
            "{RESPOND_ONLY_IN}{lang}. Do not translate or switch languages: even if the context is \
             written in another language, your answer must be in {lang}."
        ));
    }
    None
}

pub fn build_rag_enhanced_messages(user_input: &str, context: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
    if context.is_empty() {
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(user_input));
        return messages;
    }

    let directive = history
        .iter()
        .find(|m| m.role == Role::System)
        .and_then(|m| language_directive(&m.content));

    let mut parts = Vec::new();
    if let Some(directive) = directive {
        parts.push(directive);
    }
    parts.push(CONTEXT_INSTRUCTION.to_string());
    parts.push(format!("Context:\n{context}"));

    let mut messages: Vec<ChatMessage> = history.iter().filter(|m| m.role != Role::System).cloned().collect();
    messages.push(ChatMessage::system(parts.join("\n\n")));
    messages.push(ChatMessage::user(user_input));
    messages
}
