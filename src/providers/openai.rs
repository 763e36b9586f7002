//! OpenAI: embeddings a través de Rig y chat completions en streaming (SSE).

use async_trait::async_trait;
use eventsource_stream::Event;
use rig::client::EmbeddingsClient as _;
use rig::embeddings::{EmbeddingError, EmbeddingModel as _};
use rig::http_client;
use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use super::{
    check_status, collect_sse, join_url, CompletionClient, EmbeddingClient, EmbeddingRequest,
    EmbeddingResponse, StreamEvent, TokenCallback,
};
use crate::config::OpenAiSettings;
use crate::error::ProviderError;
use crate::models::{ChatMessage, Role};

const PROVIDER: &str = "OpenAI";

pub struct OpenAiEmbeddings {
    api_key: String,
    endpoint: String,
    model: String,
}

impl OpenAiEmbeddings {
    pub fn new(settings: &OpenAiSettings) -> Result<Self, ProviderError> {
        if settings.api_key.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta la API key"));
        }
        let model = if settings.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL.to_string()
        } else {
            settings.embedding_model.clone()
        };
        Ok(Self {
            api_key: settings.api_key.clone(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model,
        })
    }
}

/// Traduce los errores de Rig, conservando el código de estado cuando lo hay.
fn map_rig_error(err: EmbeddingError) -> ProviderError {
    match err {
        EmbeddingError::HttpError(http_client::Error::InvalidStatusCode(status)) => ProviderError::Http {
            provider: PROVIDER,
            status: status.as_u16(),
            message: String::new(),
        },
        EmbeddingError::HttpError(http_client::Error::InvalidStatusCodeWithMessage(status, message)) => {
            ProviderError::Http { provider: PROVIDER, status: status.as_u16(), message }
        }
        EmbeddingError::HttpError(source) => ProviderError::Transport { provider: PROVIDER, source: Box::new(source) },
        EmbeddingError::UrlError(e) => ProviderError::config(PROVIDER, format!("endpoint inválido: {e}")),
        EmbeddingError::ProviderError(message) => ProviderError::Rejected { provider: PROVIDER, message },
        other => ProviderError::payload(PROVIDER, other.to_string()),
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
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
        debug!("OpenAI: {} contenidos con el modelo {}", request.contents.len(), request.model);

        let client = openai::Client::builder(&self.api_key).base_url(&self.endpoint).build();
        let embedding_model = client.embedding_model(&request.model);

        let embeddings = embedding_model.embed_texts(request.texts()).await.map_err(|e| {
            let err = map_rig_error(e);
            error!("OpenAI: fallo generando embeddings: {err}");
            err
        })?;

        // Rig devuelve el documento de origen junto a cada vector.
        let returned = embeddings.into_iter().map(|e| (e.document, e.vec)).collect();
        EmbeddingResponse::by_content(PROVIDER, request, returned)
    }
}

pub struct OpenAiChat {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChat {
    pub fn new(settings: &OpenAiSettings) -> Result<Self, ProviderError> {
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

#[derive(Serialize)]
pub(crate) struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

pub(crate) fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage<'_>> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &m.content,
        })
        .collect()
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// Interpreta un evento SSE de `chat/completions` (formato OpenAI).
pub fn parse_sse_event(provider: &'static str, event: &Event) -> Result<StreamEvent, ProviderError> {
    let data = event.data.trim();
    if data.is_empty() {
        return Ok(StreamEvent::Skip);
    }
    if data == "[DONE]" {
        return Ok(StreamEvent::Done);
    }
    let payload: ChunkPayload = serde_json::from_str(data)
        .map_err(|e| ProviderError::payload(provider, format!("chunk SSE inválido: {e}")))?;
    let text: String = payload
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    if text.is_empty() {
        Ok(StreamEvent::Skip)
    } else {
        Ok(StreamEvent::Delta(text))
    }
}

/// Petición de chat en streaming contra un endpoint compatible con OpenAI.
pub(crate) async fn stream_chat_completions(
    provider: &'static str,
    http: &reqwest::Client,
    url: &str,
    bearer: &str,
    body: serde_json::Value,
    on_token: TokenCallback<'_>,
) -> Result<String, ProviderError> {
    let response = http
        .post(url)
        .bearer_auth(bearer)
        .json(&body)
        .send()
        .await
        .map_err(ProviderError::transport(provider))?;
    let response = check_status(provider, response).await?;
    collect_sse(provider, response, |event| parse_sse_event(provider, event), on_token).await
}

#[async_trait]
impl CompletionClient for OpenAiChat {
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
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": true,
        });
        let url = join_url(&self.endpoint, "chat/completions");
        stream_chat_completions(PROVIDER, &self.http, &url, &self.api_key, body, on_token).await
    }
}
