//! Clientes de los proveedores de IA (embeddings y chat en streaming).
//!
//! Cada petición de embeddings lleva un id de correlación por contenido; los
//! clientes devuelven los vectores asociados a esos ids, de forma que el
//! llamador no depende del orden de la respuesta.

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod view;

use std::collections::HashMap;
use std::pin::pin;

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::StreamExt;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::models::ChatMessage;

/// Un contenido a vectorizar, con su id de correlación.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingInput {
    pub id: Uuid,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub model: String,
    pub contents: Vec<EmbeddingInput>,
}

impl EmbeddingRequest {
    pub fn texts(&self) -> Vec<String> {
        self.contents.iter().map(|c| c.text.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentEmbedding {
    pub id: Uuid,
    pub content: String,
    pub vector: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<ContentEmbedding>,
}

impl EmbeddingResponse {
    pub fn into_map(self) -> HashMap<Uuid, ContentEmbedding> {
        self.embeddings.into_iter().map(|e| (e.id, e)).collect()
    }

    /// Para APIs que sólo garantizan el orden de la petición.
    pub fn by_position(
        provider: &'static str,
        request: &EmbeddingRequest,
        vectors: Vec<Vec<f64>>,
    ) -> Result<Self, ProviderError> {
        ensure_count(provider, request, vectors.len())?;
        let embeddings = request
            .contents
            .iter()
            .zip(vectors)
            .map(|(input, vector)| ContentEmbedding {
                id: input.id,
                content: input.text.clone(),
                vector,
            })
            .collect();
        Ok(Self { embeddings })
    }

    /// Para APIs que devuelven el índice de cada entrada.
    pub fn by_index(
        provider: &'static str,
        request: &EmbeddingRequest,
        indexed: Vec<(usize, Vec<f64>)>,
    ) -> Result<Self, ProviderError> {
        ensure_count(provider, request, indexed.len())?;
        let mut embeddings = Vec::with_capacity(indexed.len());
        let mut seen = vec![false; request.contents.len()];
        for (index, vector) in indexed {
            let input = request.contents.get(index).ok_or_else(|| {
                ProviderError::payload(provider, format!("índice {index} fuera de rango"))
            })?;
            if std::mem::replace(&mut seen[index], true) {
                return Err(ProviderError::payload(provider, format!("índice {index} repetido")));
            }
            embeddings.push(ContentEmbedding { id: input.id, content: input.text.clone(), vector });
        }
        Ok(Self { embeddings })
    }

    /// Para APIs que devuelven el texto de origen junto al vector.
    pub fn by_content(
        provider: &'static str,
        request: &EmbeddingRequest,
        returned: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, ProviderError> {
        ensure_count(provider, request, returned.len())?;
        let mut pending: Vec<Option<&EmbeddingInput>> = request.contents.iter().map(Some).collect();
        let mut embeddings = Vec::with_capacity(returned.len());
        for (content, vector) in returned {
            let slot = pending
                .iter_mut()
                .find(|slot| slot.is_some_and(|input| input.text == content))
                .ok_or_else(|| {
                    ProviderError::payload(provider, "embedding para un contenido no solicitado")
                })?;
            if let Some(input) = slot.take() {
                embeddings.push(ContentEmbedding { id: input.id, content, vector });
            }
        }
        Ok(Self { embeddings })
    }
}

fn ensure_count(provider: &'static str, request: &EmbeddingRequest, returned: usize) -> Result<(), ProviderError> {
    if returned != request.contents.len() {
        return Err(ProviderError::EmbeddingMismatch {
            provider,
            requested: request.contents.len(),
            returned,
        });
    }
    Ok(())
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn model(&self) -> &str;

    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError>;

    /// Embedding de un único texto (la consulta del usuario).
    async fn embed_query(&self, text: &str) -> Result<Vec<f64>, ProviderError> {
        let request = EmbeddingRequest {
            model: self.model().to_string(),
            contents: vec![EmbeddingInput { id: Uuid::new_v4(), text: text.to_string() }],
        };
        let response = self.generate_embeddings(&request).await?;
        response
            .embeddings
            .into_iter()
            .next()
            .map(|e| e.vector)
            .ok_or(ProviderError::EmbeddingMismatch {
                provider: self.provider_name(),
                requested: 1,
                returned: 0,
            })
    }
}

/// Callback invocado con cada fragmento de texto recibido.
pub type TokenCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Envía la conversación y devuelve la respuesta completa, emitiendo los
    /// fragmentos parciales por `on_token`.
    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        on_token: TokenCallback<'_>,
    ) -> Result<String, ProviderError>;
}

/// Evento interpretado de una línea del stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Done,
    Skip,
}

pub(crate) async fn check_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ProviderError::Http { provider, status: status.as_u16(), message })
}

/// Consume una respuesta `text/event-stream` y acumula los deltas. El
/// decodificador SSE une las líneas `data:` de cada evento y descarta los
/// comentarios.
pub(crate) async fn collect_sse<F>(
    provider: &'static str,
    response: reqwest::Response,
    parse_event: F,
    on_token: TokenCallback<'_>,
) -> Result<String, ProviderError>
where
    F: Fn(&Event) -> Result<StreamEvent, ProviderError> + Send + Sync,
{
    let mut events = pin!(response.bytes_stream().eventsource());
    let mut answer = String::new();

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| match e {
            EventStreamError::Transport(source) => ProviderError::transport(provider)(source),
            other => ProviderError::payload(provider, format!("stream SSE inválido: {other}")),
        })?;
        if apply_event(parse_event(&event)?, &mut answer, on_token) {
            break;
        }
    }
    Ok(answer)
}

/// Consume una respuesta NDJSON (un objeto JSON por línea) y acumula los
/// deltas.
pub(crate) async fn collect_ndjson<F>(
    provider: &'static str,
    response: reqwest::Response,
    parse_line: F,
    on_token: TokenCallback<'_>,
) -> Result<String, ProviderError>
where
    F: Fn(&str) -> Result<StreamEvent, ProviderError> + Send + Sync,
{
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut answer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ProviderError::transport(provider))?;
        buffer.extend_from_slice(&chunk);
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if apply_event(parse_line(line.trim())?, &mut answer, on_token) {
                return Ok(answer);
            }
        }
    }

    let rest = String::from_utf8_lossy(&buffer);
    if !rest.trim().is_empty() {
        apply_event(parse_line(rest.trim())?, &mut answer, on_token);
    }
    Ok(answer)
}

/// Devuelve `true` si el stream ha terminado.
fn apply_event(event: StreamEvent, answer: &mut String, on_token: TokenCallback<'_>) -> bool {
    match event {
        StreamEvent::Delta(text) => {
            on_token(&text);
            answer.push_str(&text);
            false
        }
        StreamEvent::Done => true,
        StreamEvent::Skip => false,
    }
}

/// Une un endpoint base con una ruta sin duplicar barras.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(texts: &[&str]) -> EmbeddingRequest {
        EmbeddingRequest {
            model: "m".to_string(),
            contents: texts
                .iter()
                .map(|t| EmbeddingInput { id: Uuid::new_v4(), text: t.to_string() })
                .collect(),
        }
    }

    #[test]
    fn count_mismatch_is_reported() {
        let req = request(&["a", "b"]);
        let err = EmbeddingResponse::by_position("test", &req, vec![vec![1.0]]).unwrap_err();
        assert!(matches!(err, ProviderError::EmbeddingMismatch { requested: 2, returned: 1, .. }));
    }

    #[test]
    fn index_correlation_ignores_response_order() {
        let req = request(&["a", "b"]);
        let resp = EmbeddingResponse::by_index("test", &req, vec![(1, vec![2.0]), (0, vec![1.0])]).unwrap();
        let map = resp.into_map();
        assert_eq!(map[&req.contents[0].id].vector, vec![1.0]);
        assert_eq!(map[&req.contents[1].id].vector, vec![2.0]);
    }

    #[test]
    fn repeated_index_is_rejected() {
        let req = request(&["a", "b"]);
        assert!(EmbeddingResponse::by_index("test", &req, vec![(0, vec![1.0]), (0, vec![1.0])]).is_err());
    }

    #[test]
    fn content_correlation_handles_duplicates() {
        let req = request(&["same", "other", "same"]);
        let resp = EmbeddingResponse::by_content(
            "test",
            &req,
            vec![
                ("other".to_string(), vec![2.0]),
                ("same".to_string(), vec![1.0]),
                ("same".to_string(), vec![3.0]),
            ],
        )
        .unwrap();
        let map = resp.into_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map[&req.contents[1].id].vector, vec![2.0]);
        assert_eq!(map[&req.contents[0].id].vector, vec![1.0]);
        assert_eq!(map[&req.contents[2].id].vector, vec![3.0]);
    }

    #[test]
    fn content_correlation_rejects_unknown_text() {
        let req = request(&["a"]);
        assert!(EmbeddingResponse::by_content("test", &req, vec![("z".to_string(), vec![1.0])]).is_err());
    }

    #[test]
    fn join_url_normalises_slashes() {
        assert_eq!(join_url("http://h:1/", "/api/embed"), "http://h:1/api/embed");
        assert_eq!(join_url("http://h:1", "api/embed"), "http://h:1/api/embed");
    }
}
