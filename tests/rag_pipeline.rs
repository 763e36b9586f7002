//! Ingesta y chat de extremo a extremo sobre el grafo local, con proveedores
//! falsos.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use view_personal_rag::chat::ChatSession;
use view_personal_rag::chunking::{self, MAX_CHUNK_LENGTH, SHIFT_SIZE};
use view_personal_rag::config::RagSettings;
use view_personal_rag::error::ProviderError;
use view_personal_rag::ingest::{FileIngester, IngestOutcome, SourceFile};
use view_personal_rag::local_store::LocalGraphStore;
use view_personal_rag::models::{ChatMessage, Role, DEFAULT_TENANT_GUID};
use view_personal_rag::progress::IngestionProgress;
use view_personal_rag::providers::{
    CompletionClient, EmbeddingClient, EmbeddingRequest, EmbeddingResponse, TokenCallback,
};
use view_personal_rag::rag::RagService;

const GRAPH: Uuid = Uuid::from_u128(7);

/// Embedding de bolsa de palabras sobre un vocabulario fijo.
struct KeywordEmbeddings;

const VOCABULARY: [&str; 4] = ["garantía", "batería", "pantalla", "envío"];

fn keyword_vector(text: &str) -> Vec<f64> {
    let lower = text.to_lowercase();
    VOCABULARY
        .iter()
        .map(|w| if lower.contains(w) { 1.0 } else { 0.0 })
        .collect()
}

#[async_trait]
impl EmbeddingClient for KeywordEmbeddings {
    fn provider_name(&self) -> &'static str {
        "Ollama"
    }

    fn model(&self) -> &str {
        "keywords"
    }

    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        let vectors = request.contents.iter().map(|c| keyword_vector(&c.text)).collect();
        EmbeddingResponse::by_position("Ollama", request, vectors)
    }
}

#[derive(Default)]
struct RecordingChat {
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl CompletionClient for RecordingChat {
    fn provider_name(&self) -> &'static str {
        "Anthropic"
    }

    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        on_token: TokenCallback<'_>,
    ) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        on_token("Dos años.");
        Ok("Dos años.".to_string())
    }
}

fn source(path: &str) -> SourceFile {
    SourceFile {
        path: PathBuf::from(path),
        detected: chunking::detect_type(PathBuf::from(path).as_path()),
        content_length: 2048,
    }
}

#[tokio::test]
async fn ingested_document_feeds_the_chat_context() {
    let store = Arc::new(LocalGraphStore::new());
    let ingester = FileIngester::new(
        store.clone(),
        Arc::new(KeywordEmbeddings),
        IngestionProgress::new(),
        DEFAULT_TENANT_GUID,
        GRAPH,
    );

    let manual = format!(
        "{}{}",
        "La garantía del producto cubre dos años. ".repeat(12),
        "El envío tarda tres días laborables. ".repeat(14)
    );
    let atoms = chunking::split_into_atoms(&manual, MAX_CHUNK_LENGTH, SHIFT_SIZE);
    assert!(atoms.len() >= 2);

    let outcome = ingester.ingest_atoms(&source("/docs/manual.pdf"), atoms.clone()).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Ingested { chunks, .. } if chunks == atoms.len()));

    let chat = Arc::new(RecordingChat::default());
    let settings = RagSettings { similarity_threshold: 0.5, enable_citations: true, ..RagSettings::default() };
    let mut session = ChatSession::new(
        RagService::new(store, DEFAULT_TENANT_GUID, GRAPH),
        Some(Arc::new(KeywordEmbeddings)),
        chat.clone(),
        settings,
        "Please respond ONLY in Spanish.",
    );

    let reply = session.send("¿Cuánto dura la garantía?", &|_: &str| {}).await.unwrap();
    assert_eq!(reply.answer, "Dos años.");
    assert!(!reply.sources.is_empty());
    assert!(reply.sources.iter().all(|s| s.source == "manual.pdf"));

    let prompts = chat.prompts.lock().unwrap();
    let system = prompts[0].iter().find(|m| m.role == Role::System).unwrap();
    assert!(system.content.starts_with("Please respond ONLY in Spanish."));
    assert!(system.content.contains("[1] Source: manual.pdf"));
    assert!(system.content.contains("garantía"));
}

#[tokio::test]
async fn deleting_a_document_removes_it_from_retrieval() {
    let store = Arc::new(LocalGraphStore::new());
    let ingester = FileIngester::new(
        store.clone(),
        Arc::new(KeywordEmbeddings),
        IngestionProgress::new(),
        DEFAULT_TENANT_GUID,
        GRAPH,
    );
    let IngestOutcome::Ingested { document_guid, .. } = ingester
        .ingest_atoms(&source("/docs/bateria.pdf"), vec!["La batería dura diez horas.".to_string()])
        .await
        .unwrap()
    else {
        panic!("se esperaba una ingesta");
    };

    let rag = RagService::new(store, DEFAULT_TENANT_GUID, GRAPH);
    let query = keyword_vector("batería");
    let (results, _) = rag.retrieve_relevant_documents(&query, &RagSettings::default()).await;
    assert_eq!(results.len(), 1);

    ingester.delete_document(document_guid).await.unwrap();
    let (results, context) = rag.retrieve_relevant_documents(&query, &RagSettings::default()).await;
    assert!(results.is_empty());
    assert!(context.is_empty());
}

#[tokio::test]
async fn other_graphs_are_not_visible() {
    let store = Arc::new(LocalGraphStore::new());
    let ingester = FileIngester::new(
        store.clone(),
        Arc::new(KeywordEmbeddings),
        IngestionProgress::new(),
        DEFAULT_TENANT_GUID,
        Uuid::from_u128(99),
    );
    ingester
        .ingest_atoms(&source("/docs/pantalla.pdf"), vec!["La pantalla es de 6 pulgadas.".to_string()])
        .await
        .unwrap();

    let rag = RagService::new(store, DEFAULT_TENANT_GUID, GRAPH);
    let (results, _) = rag
        .retrieve_relevant_documents(&keyword_vector("pantalla"), &RagSettings::default())
        .await;
    assert!(results.is_empty());
}
