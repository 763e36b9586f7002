//! Servicio "View" autoalojado.
//!
//! Embeddings: `POST {endpoint}/v1.0/tenants/{tenant}/embeddings`, que devuelve
//! `{Success, StatusCode, Error, ContentEmbeddings[{Content, Embeddings}]}`.
//! Chat: endpoint compatible con OpenAI en `{endpoint}/v1/chat/completions`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use super::openai::{stream_chat_completions, wire_messages};
use super::{
    check_status, join_url, CompletionClient, EmbeddingClient, EmbeddingRequest, EmbeddingResponse,
    TokenCallback,
};
use crate::config::ViewSettings;
use crate::error::ProviderError;
use crate::models::ChatMessage;

const PROVIDER: &str = "View";

pub struct ViewEmbeddings {
    http: reqwest::Client,
    settings: ViewSettings,
}

impl ViewEmbeddings {
    pub fn new(settings: &ViewSettings) -> Result<Self, ProviderError> {
        if settings.endpoint.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta el endpoint"));
        }
        if settings.access_key.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta la access key"));
        }
        if settings.embedding_model.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta el modelo de embeddings"));
        }
        Ok(Self { http: reqwest::Client::new(), settings: settings.clone() })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ViewEmbeddingsRequest<'a> {
    model: &'a str,
    contents: Vec<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ViewEmbeddingsResult {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    status_code: u16,
    error: Option<ViewError>,
    #[serde(default)]
    content_embeddings: Vec<ViewContentEmbedding>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ViewError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ViewContentEmbedding {
    content: String,
    embeddings: Vec<f64>,
}

/// Convierte el resultado de View en respuesta correlacionada, respetando el
/// indicador `Success` del cuerpo aunque el HTTP haya sido 200.
pub(crate) fn interpret_result(
    request: &EmbeddingRequest,
    result: ViewEmbeddingsResult,
) -> Result<EmbeddingResponse, ProviderError> {
    if !result.success {
        let message = result.error.map(|e| e.message).unwrap_or_default();
        error!("View: generación de embeddings fallida ({}): {message}", result.status_code);
        return Err(ProviderError::Http { provider: PROVIDER, status: result.status_code, message });
    }
    let returned = result
        .content_embeddings
        .into_iter()
        .map(|c| (c.content, c.embeddings))
        .collect();
    EmbeddingResponse::by_content(PROVIDER, request, returned)
}

#[async_trait]
impl EmbeddingClient for ViewEmbeddings {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.settings.embedding_model
    }

    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        if request.contents.is_empty() {
            return Ok(EmbeddingResponse::default());
        }
        debug!("View: {} contenidos con el modelo {}", request.contents.len(), request.model);

        let url = join_url(
            &self.settings.endpoint,
            &format!("v1.0/tenants/{}/embeddings", self.settings.tenant_guid),
        );
        let body = ViewEmbeddingsRequest {
            model: &request.model,
            contents: request.contents.iter().map(|c| c.text.as_str()).collect(),
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.settings.access_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let response = check_status(PROVIDER, response).await?;
        let result: ViewEmbeddingsResult = response
            .json()
            .await
            .map_err(|e| ProviderError::payload(PROVIDER, e.to_string()))?;
        interpret_result(request, result)
    }
}

pub struct ViewChat {
    http: reqwest::Client,
    settings: ViewSettings,
}

impl ViewChat {
    pub fn new(settings: &ViewSettings) -> Result<Self, ProviderError> {
        if settings.endpoint.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta el endpoint"));
        }
        if settings.access_key.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta la access key"));
        }
        if settings.completion_model.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "falta el modelo de chat"));
        }
        Ok(Self { http: reqwest::Client::new(), settings: settings.clone() })
    }
}

#[async_trait]
impl CompletionClient for ViewChat {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        on_token: TokenCallback<'_>,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.settings.completion_model,
            "messages": wire_messages(messages),
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "stream": true,
        });
        let url = join_url(&self.settings.endpoint, "v1/chat/completions");
        stream_chat_completions(PROVIDER, &self.http, &url, &self.settings.access_key, body, on_token).await
    }
}
