//! Pruebas de la API HTTP local con un servidor real en un puerto efímero.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

use view_personal_rag::api;
use view_personal_rag::app_state::AppState;
use view_personal_rag::config::{AppSettings, CompletionProviderType, EmbeddingProviderType};
use view_personal_rag::graph_store::{GraphStore, StagedIngestion};
use view_personal_rag::local_store::LocalGraphStore;
use view_personal_rag::models::{ChunkNode, DocumentNode, DocumentType};

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    shutdown_rx: Option<oneshot::Receiver<()>>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

fn ollama_settings() -> AppSettings {
    let mut settings = AppSettings::default();
    settings.completion_provider = CompletionProviderType::Ollama;
    settings.embedding_provider = EmbeddingProviderType::Ollama;
    settings.ollama.endpoint = "http://127.0.0.1:11434".to_string();
    settings
}

async fn start(settings: AppSettings) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn GraphStore> = Arc::new(LocalGraphStore::new());
    let (state, shutdown_rx) = AppState::new(settings, dir.path().join("settings.json"), store);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, state, shutdown_rx: Some(shutdown_rx), _dir: dir }
}

async fn seed_document(state: &AppState, path: &str) -> DocumentNode {
    let settings = state.settings.read().await.clone();
    let document = DocumentNode {
        guid: uuid::Uuid::new_v4(),
        tenant_guid: settings.graph.tenant_guid,
        graph_guid: settings.graph.graph_guid,
        name: PathBuf::from(path).file_name().unwrap().to_string_lossy().to_string(),
        file_path: path.to_string(),
        document_type: DocumentType::Pdf,
        mime_type: Some("application/pdf".to_string()),
        extension: "pdf".to_string(),
        content_length: 42,
        created_utc: chrono::Utc::now(),
        atoms: vec!["texto".to_string()],
    };
    let chunk = ChunkNode {
        guid: uuid::Uuid::new_v4(),
        tenant_guid: document.tenant_guid,
        graph_guid: document.graph_guid,
        document_guid: document.guid,
        source_name: document.name.clone(),
        position: 0,
        text: "texto".to_string(),
        content_length: 5,
        created_utc: chrono::Utc::now(),
        tags: Default::default(),
        vectors: vec![],
    };
    state.store.commit(StagedIngestion::new(document.clone(), vec![chunk])).await.unwrap();
    document
}

#[tokio::test]
async fn documents_can_be_listed_and_deleted() {
    let server = start(ollama_settings()).await;
    let doc = seed_document(&server.state, "/docs/informe.pdf").await;
    let client = reqwest::Client::new();

    let listed: Vec<Value> = client.get(server.url("/api/documents")).send().await.unwrap().json().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["name"], "informe.pdf");
    assert_eq!(listed[0]["document_type"], "pdf");
    assert!(listed[0].get("atoms").is_none());

    let resp = client
        .delete(server.url(&format!("/api/documents/{}", doc.guid)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let listed: Vec<Value> = client.get(server.url("/api/documents")).send().await.unwrap().json().await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn settings_are_validated_before_saving() {
    let server = start(ollama_settings()).await;
    let client = reqwest::Client::new();

    let mut invalid = ollama_settings();
    invalid.completion_provider = CompletionProviderType::OpenAi;
    let resp = client.put(server.url("/api/settings")).json(&invalid).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("OpenAI API key"));
    assert!(!server.state.settings_path.exists());

    let mut valid = ollama_settings();
    valid.rag.top_k = 4;
    let resp = client.put(server.url("/api/settings")).json(&valid).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(server.state.settings_path.exists());

    let current: AppSettings = client.get(server.url("/api/settings")).send().await.unwrap().json().await.unwrap();
    assert_eq!(current.rag.top_k, 4);
    assert_eq!(AppSettings::load(&server.state.settings_path).unwrap(), valid);
}

#[tokio::test]
async fn ingest_rejects_missing_paths_and_unconfigured_providers() {
    let client = reqwest::Client::new();

    let server = start(ollama_settings()).await;
    let resp = client
        .post(server.url("/api/ingest"))
        .json(&serde_json::json!({ "paths": ["/no/existe/nada.pdf"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client.post(server.url("/api/sync")).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    // OpenAI sin API key: el error de configuración llega antes de la red.
    let server = start(AppSettings::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let resp = client
        .post(server.url("/api/ingest"))
        .json(&serde_json::json!({ "paths": [dir.path()] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn ingesting_a_directory_reports_progress() {
    let server = start(ollama_settings()).await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notas.txt"), "no es un pdf").unwrap();
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/api/ingest"))
        .json(&serde_json::json!({ "paths": [dir.path()] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let mut status = Value::Null;
    for _ in 0..50 {
        status = client.get(server.url("/api/status")).send().await.unwrap().json().await.unwrap();
        if status["message"].as_str().is_some_and(|m| m.contains("completada")) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(status["is_busy"], false);
    assert_eq!(status["files"][0]["state"], "skipped");
    assert!(status["message"].as_str().unwrap().contains("1 omitidos"));
}

#[tokio::test]
async fn empty_chat_message_is_rejected() {
    let server = start(ollama_settings()).await;
    let resp = reqwest::Client::new()
        .post(server.url("/api/chat"))
        .json(&serde_json::json!({ "message": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = reqwest::Client::new().post(server.url("/api/chat/reset")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn shutdown_fires_once() {
    let mut server = start(ollama_settings()).await;
    let client = reqwest::Client::new();

    assert_eq!(client.post(server.url("/api/shutdown")).send().await.unwrap().status(), 200);
    assert_eq!(client.post(server.url("/api/shutdown")).send().await.unwrap().status(), 200);

    let rx = server.shutdown_rx.take().unwrap();
    assert!(rx.await.is_ok());
}
