use std::convert::Infallible;
use std::path::PathBuf;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{spawn, sync::mpsc};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    app_state::{AppState, Status},
    chat::{ChatReply, ChatSession},
    config::AppSettings,
    ingest::IngestionSummary,
    models::{DocumentNode, DocumentType},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct IngestPayload {
    paths: Vec<PathBuf>,
}

#[derive(Deserialize)]
pub struct ChatPayload {
    message: String,
}

#[derive(Serialize)]
pub struct DocumentSummary {
    guid: Uuid,
    name: String,
    file_path: String,
    document_type: DocumentType,
    content_length: u64,
    created_utc: DateTime<Utc>,
}

impl From<DocumentNode> for DocumentSummary {
    fn from(doc: DocumentNode) -> Self {
        Self {
            guid: doc.guid,
            name: doc.name,
            file_path: doc.file_path,
            document_type: doc.document_type,
            content_length: doc.content_length,
            created_utc: doc.created_utc,
        }
    }
}

/// Eventos del stream de chat hacia el cliente.
enum ChatEvent {
    Token(String),
    Done(ChatReply),
    Error(String),
}

impl ChatEvent {
    fn into_sse(self) -> Event {
        match self {
            Self::Token(text) => Event::default().event("token").data(text),
            Self::Done(reply) => Event::default()
                .event("done")
                .json_data(&reply)
                .unwrap_or_else(|_| Event::default().event("done").data(reply.answer)),
            Self::Error(message) => Event::default().event("error").data(message),
        }
    }
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/ingest", post(ingest_handler))
        .route("/api/sync", post(sync_handler))
        .route("/api/status", get(status_handler))
        .route("/api/documents", get(list_documents_handler))
        .route("/api/documents/:guid", delete(delete_document_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/reset", post(reset_chat_handler))
        .route("/api/settings", get(get_settings_handler).put(put_settings_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers de Ingesta ---

#[axum::debug_handler]
async fn ingest_handler(
    State(state): State<AppState>,
    Json(payload): Json<IngestPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.paths.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No se indicó ninguna ruta."));
    }
    if let Some(missing) = payload.paths.iter().find(|p| !p.exists()) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("La ruta no existe: {}", missing.display()),
        ));
    }
    let ingester = state
        .ingester()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{e:#}")))?;

    state.progress.clear_finished();
    spawn(async move {
        state.set_message("Iniciando indexación...").await;
        let summary = ingester.ingest_paths(&payload.paths).await;
        finish_ingestion(&state, summary).await;
    });

    Ok(StatusCode::ACCEPTED)
}

#[axum::debug_handler]
async fn sync_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let watched = state.settings.read().await.watched_paths.clone();
    if watched.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No hay rutas vigiladas configuradas."));
    }
    let ingester = state
        .ingester()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{e:#}")))?;

    state.progress.clear_finished();
    spawn(async move {
        state.set_message("Sincronizando rutas vigiladas...").await;
        let summary = ingester.sync_watched_paths(&watched).await;
        finish_ingestion(&state, summary).await;
    });

    Ok(StatusCode::ACCEPTED)
}

async fn finish_ingestion(state: &AppState, summary: IngestionSummary) {
    for (path, err) in &summary.errors {
        error!("Error de ingesta en {}: {err}", path.display());
    }
    let message = if summary.files_failed == 0 {
        format!("¡Indexación completada! {summary}")
    } else {
        format!("Indexación terminada con errores. {summary}")
    };
    state.set_message(message).await;
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status().await)
}

// --- Handlers de Documentos ---

#[axum::debug_handler]
async fn list_documents_handler(State(state): State<AppState>) -> Result<Json<Vec<DocumentSummary>>, ApiError> {
    let ingester = state
        .ingester()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{e:#}")))?;
    let docs = ingester.list_documents().await.map_err(|e| {
        error!("Error listando documentos: {e:#}");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
    })?;
    Ok(Json(docs.into_iter().map(DocumentSummary::from).collect()))
}

#[axum::debug_handler]
async fn delete_document_handler(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let ingester = state
        .ingester()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{e:#}")))?;
    ingester.delete_document(guid).await.map_err(|e| {
        error!("Error borrando el documento {guid}: {e:#}");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
    })?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Handlers de Chat ---

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "El mensaje está vacío."));
    }

    let (tx, rx) = mpsc::unbounded_channel::<ChatEvent>();
    spawn(async move {
        let mut chat = state.chat.lock().await;
        if chat.is_none() {
            let settings = state.settings.read().await.clone();
            match ChatSession::from_settings(&settings, state.store.clone()) {
                Ok(session) => *chat = Some(session),
                Err(e) => {
                    error!("No se pudo iniciar el chat: {e:#}");
                    let _ = tx.send(ChatEvent::Error(format!("{e:#}")));
                    return;
                }
            }
        }
        let Some(session) = chat.as_mut() else {
            return;
        };

        let token_tx = tx.clone();
        let on_token = move |token: &str| {
            let _ = token_tx.send(ChatEvent::Token(token.to_string()));
        };
        match session.send(&payload.message, &on_token).await {
            Ok(reply) => {
                let _ = tx.send(ChatEvent::Done(reply));
            }
            Err(e) => {
                error!("Error en el chat: {e:#}");
                let _ = tx.send(ChatEvent::Error(format!("{e:#}")));
            }
        }
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(event.into_sse()), rx))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[axum::debug_handler]
async fn reset_chat_handler(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(session) = state.chat.lock().await.as_mut() {
        session.reset();
    }
    StatusCode::OK
}

// --- Handlers de Configuración ---

#[axum::debug_handler]
async fn get_settings_handler(State(state): State<AppState>) -> Json<AppSettings> {
    Json(state.settings.read().await.clone())
}

#[axum::debug_handler]
async fn put_settings_handler(
    State(state): State<AppState>,
    Json(settings): Json<AppSettings>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .update_settings(settings)
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{e:#}")))?;
    Ok((StatusCode::OK, Json(json!({ "message": "Configuración guardada." }))))
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().await.take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
