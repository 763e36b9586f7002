//! Ollama local: `/api/embed` para embeddings y `/api/chat` en NDJSON.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::openai::wire_messages;
use super::{
    check_status, collect_ndjson, join_url, CompletionClient, EmbeddingClient, EmbeddingRequest,
    EmbeddingResponse, StreamEvent, TokenCallback,
};
use crate::config::OllamaSettings;
use crate::error::ProviderError;
use crate::models::ChatMessage;

const PROVIDER: &str = "Ollama";

pub struct OllamaEmbeddings {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaEmbeddings {
    pub fn new(settings: &OllamaSettings) -> Result<Self, ProviderError> {
        if settings.endpoint.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta el endpoint"));
        }
        if settings.embedding_model.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta el modelo de embeddings"));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: settings.endpoint.clone(),
            model: settings.embedding_model.clone(),
        })
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f64>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddings {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        if request.contents.is_empty() {
            return Ok(EmbeddingResponse::default());
        }
        debug!("Ollama: {} contenidos con el modelo {}", request.contents.len(), request.model);

        let response = self
            .http
            .post(join_url(&self.endpoint, "api/embed"))
            .json(&json!({ "model": request.model, "input": request.texts() }))
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let response = check_status(PROVIDER, response).await?;
        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::payload(PROVIDER, e.to_string()))?;

        // /api/embed no devuelve índices; responde en el orden de `input`.
        EmbeddingResponse::by_position(PROVIDER, request, body.embeddings)
    }
}

pub struct OllamaChat {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaChat {
    pub fn new(settings: &OllamaSettings) -> Result<Self, ProviderError> {
        if settings.endpoint.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta el endpoint"));
        }
        if settings.completion_model.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta el modelo de chat"));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: settings.endpoint.clone(),
            model: settings.completion_model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }
}

#[derive(Deserialize)]
struct ChatLine {
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

pub fn parse_ndjson_line(line: &str) -> Result<StreamEvent, ProviderError> {
    if line.is_empty() {
        return Ok(StreamEvent::Skip);
    }
    let parsed: ChatLine = serde_json::from_str(line)
        .map_err(|e| ProviderError::payload(PROVIDER, format!("línea NDJSON inválida: {e}")))?;
    if let Some(error) = parsed.error {
        return Err(ProviderError::payload(PROVIDER, error));
    }
    match parsed.message {
        Some(msg) if !msg.content.is_empty() && !parsed.done => Ok(StreamEvent::Delta(msg.content)),
        _ if parsed.done => Ok(StreamEvent::Done),
        _ => Ok(StreamEvent::Skip),
    }
}

#[async_trait]
impl CompletionClient for OllamaChat {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        on_token: TokenCallback<'_>,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": wire_messages(messages),
            "stream": true,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let response = self
            .http
            .post(join_url(&self.endpoint, "api/chat"))
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let response = check_status(PROVIDER, response).await?;
        collect_ndjson(PROVIDER, response, parse_ndjson_line, on_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ndjson_chunks() {
        let line = r#"{"model":"llama3.1","message":{"role":"assistant","content":"Hola"},"done":false}"#;
        assert_eq!(parse_ndjson_line(line).unwrap(), StreamEvent::Delta("Hola".to_string()));

        let last = r#"{"model":"llama3.1","message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(parse_ndjson_line(last).unwrap(), StreamEvent::Done);
    }

    #[test]
    fn error_line_is_reported() {
        let err = parse_ndjson_line(r#"{"error":"model 'x' not found"}"#).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn empty_model_is_a_config_error() {
        let mut settings = OllamaSettings::default();
        settings.embedding_model.clear();
        assert!(matches!(OllamaEmbeddings::new(&settings), Err(ProviderError::Config { .. })));
        assert!(OllamaChat::new(&settings).is_ok());
    }
}
