//! Anthropic (chat vía Messages API en streaming) y Voyage AI (embeddings),
//! que es el proveedor de embeddings recomendado para Anthropic.

use async_trait::async_trait;
use eventsource_stream::Event;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    check_status, collect_sse, join_url, CompletionClient, EmbeddingClient, EmbeddingRequest,
    EmbeddingResponse, StreamEvent, TokenCallback,
};
use crate::config::AnthropicSettings;
use crate::error::ProviderError;
use crate::models::{ChatMessage, Role};

const PROVIDER: &str = "Anthropic";
const VOYAGE: &str = "Voyage";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct VoyageEmbeddings {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl VoyageEmbeddings {
    pub fn new(settings: &AnthropicSettings) -> Result<Self, ProviderError> {
        if settings.voyage_api_key.trim().is_empty() {
            return Err(ProviderError::config(VOYAGE, "falta la API key de Voyage"));
        }
        if settings.voyage_embedding_model.trim().is_empty() {
            return Err(ProviderError::config(VOYAGE, "falta el modelo de embeddings"));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: settings.voyage_endpoint.clone(),
            api_key: settings.voyage_api_key.clone(),
            model: settings.voyage_embedding_model.clone(),
        })
    }
}

#[derive(Deserialize)]
struct VoyageResponse {
    data: Vec<VoyageData>,
}

#[derive(Deserialize)]
struct VoyageData {
    embedding: Vec<f64>,
    index: usize,
}

#[async_trait]
impl EmbeddingClient for VoyageEmbeddings {
    fn provider_name(&self) -> &'static str {
        VOYAGE
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        if request.contents.is_empty() {
            return Ok(EmbeddingResponse::default());
        }
        debug!("Voyage: {} contenidos con el modelo {}", request.contents.len(), request.model);

        let response = self
            .http
            .post(join_url(&self.endpoint, "embeddings"))
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": request.model, "input": request.texts() }))
            .send()
            .await
            .map_err(ProviderError::transport(VOYAGE))?;
        let response = check_status(VOYAGE, response).await?;
        let body: VoyageResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::payload(VOYAGE, e.to_string()))?;

        let indexed = body.data.into_iter().map(|d| (d.index, d.embedding)).collect();
        EmbeddingResponse::by_index(VOYAGE, request, indexed)
    }
}

pub struct AnthropicChat {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl AnthropicChat {
    pub fn new(settings: &AnthropicSettings) -> Result<Self, ProviderError> {
        if settings.api_key.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta la API key"));
        }
        if settings.completion_model.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta el modelo de chat"));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            model: settings.completion_model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }
}

/// La Messages API no acepta mensajes `system` en la lista: se unen en el
/// campo `system` y el resto conserva su orden.
pub fn split_system(messages: &[ChatMessage]) -> (String, Vec<serde_json::Value>) {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let turns = messages
        .iter()
        .filter_map(|m| match m.role {
            Role::System => None,
            Role::User => Some(json!({ "role": "user", "content": m.content })),
            Role::Assistant => Some(json!({ "role": "assistant", "content": m.content })),
        })
        .collect();
    (system, turns)
}

#[derive(Deserialize)]
struct StreamPayload {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<StreamDelta>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamDelta {
    text: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}

/// Interpreta un evento de la Messages API. El nombre del evento decide el
/// tratamiento; si falta, se usa el campo `type` del cuerpo.
pub fn parse_sse_event(event: &Event) -> Result<StreamEvent, ProviderError> {
    match event.event.as_str() {
        "ping" | "message_start" | "content_block_start" | "content_block_stop" | "message_delta" => {
            return Ok(StreamEvent::Skip)
        }
        "message_stop" => return Ok(StreamEvent::Done),
        _ => {}
    }
    if event.data.trim().is_empty() {
        return Ok(StreamEvent::Skip);
    }

    let payload: StreamPayload = serde_json::from_str(&event.data)
        .map_err(|e| ProviderError::payload(PROVIDER, format!("evento SSE inválido: {e}")))?;
    let kind = match event.event.as_str() {
        "" | "message" => payload.kind.as_str(),
        name => name,
    };
    match kind {
        "content_block_delta" => match payload.delta.and_then(|d| d.text) {
            Some(text) if !text.is_empty() => Ok(StreamEvent::Delta(text)),
            _ => Ok(StreamEvent::Skip),
        },
        "message_stop" => Ok(StreamEvent::Done),
        "error" => Err(ProviderError::payload(
            PROVIDER,
            payload.error.map(|e| e.message).unwrap_or_else(|| "error desconocido".to_string()),
        )),
        _ => Ok(StreamEvent::Skip),
    }
}

#[async_trait]
impl CompletionClient for AnthropicChat {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        on_token: TokenCallback<'_>,
    ) -> Result<String, ProviderError> {
        let (system, turns) = split_system(messages);
        let mut body = json!({
            "model": self.model,
            "messages": turns,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }

        let response = self
            .http
            .post(join_url(&self.endpoint, "v1/messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let response = check_status(PROVIDER, response).await?;
        collect_sse(PROVIDER, response, parse_sse_event, on_token).await
    }
}
