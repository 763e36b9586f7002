//! Clientes de proveedores contra un servidor axum local que imita sus APIs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use futures::StreamExt;
use serde_json::{json, Value};
use uuid::Uuid;

use view_personal_rag::config::{AnthropicSettings, OllamaSettings, OpenAiSettings, ViewSettings};
use view_personal_rag::error::ProviderError;
use view_personal_rag::models::ChatMessage;
use view_personal_rag::providers::anthropic::{AnthropicChat, VoyageEmbeddings};
use view_personal_rag::providers::ollama::{OllamaChat, OllamaEmbeddings};
use view_personal_rag::providers::openai::{OpenAiChat, OpenAiEmbeddings};
use view_personal_rag::providers::view::ViewChat;
use view_personal_rag::providers::{CompletionClient, EmbeddingClient, EmbeddingInput, EmbeddingRequest};

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Cuerpo enviado en varias escrituras, con una pausa entre ellas.
fn chunked(parts: Vec<&'static str>) -> Body {
    let stream = futures::stream::iter(parts).then(|part| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok::<_, std::io::Error>(Bytes::from_static(part.as_bytes()))
    });
    Body::from_stream(stream)
}

fn request(texts: &[&str], model: &str) -> EmbeddingRequest {
    EmbeddingRequest {
        model: model.to_string(),
        contents: texts
            .iter()
            .map(|t| EmbeddingInput { id: Uuid::new_v4(), text: t.to_string() })
            .collect(),
    }
}

async fn collect_tokens(client: &dyn CompletionClient) -> (Result<String, ProviderError>, Vec<String>) {
    let tokens = Mutex::new(Vec::new());
    let on_token = |t: &str| tokens.lock().unwrap().push(t.to_string());
    let messages = vec![ChatMessage::system("Sé breve."), ChatMessage::user("¿Hola?")];
    let result = client.stream_completion(&messages, &on_token).await;
    (result, tokens.into_inner().unwrap())
}

#[tokio::test]
async fn ollama_embeddings_send_model_and_inputs() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let recorder = seen.clone();
    let router = Router::new().route(
        "/api/embed",
        post(move |Json(body): Json<Value>| {
            let recorder = recorder.clone();
            async move {
                let count = body["input"].as_array().map(|a| a.len()).unwrap_or(0);
                recorder.lock().unwrap().push(body);
                let embeddings: Vec<Vec<f64>> = (0..count).map(|i| vec![i as f64, 1.0]).collect();
                Json(json!({ "model": "nomic-embed-text", "embeddings": embeddings }))
            }
        }),
    );
    let base = serve(router).await;

    let mut settings = OllamaSettings::default();
    settings.endpoint = base;
    let client = OllamaEmbeddings::new(&settings).unwrap();
    let req = request(&["uno", "dos"], "nomic-embed-text");
    let map = client.generate_embeddings(&req).await.unwrap().into_map();

    assert_eq!(map[&req.contents[0].id].vector, vec![0.0, 1.0]);
    assert_eq!(map[&req.contents[1].id].vector, vec![1.0, 1.0]);
    let body = &seen.lock().unwrap()[0];
    assert_eq!(body["model"], "nomic-embed-text");
    assert_eq!(body["input"], json!(["uno", "dos"]));
}

#[tokio::test]
async fn voyage_embeddings_follow_returned_indices() {
    let router = Router::new().route(
        "/v1/embeddings",
        post(|headers: HeaderMap, Json(body): Json<Value>| async move {
            if headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some("Bearer pa-key") {
                return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "bad key" })));
            }
            assert_eq!(body["model"], "voyage-3");
            (
                StatusCode::OK,
                Json(json!({
                    "object": "list",
                    "data": [
                        { "object": "embedding", "embedding": [0.3], "index": 2 },
                        { "object": "embedding", "embedding": [0.1], "index": 0 },
                        { "object": "embedding", "embedding": [0.2], "index": 1 }
                    ],
                    "model": "voyage-3"
                })),
            )
        }),
    );
    let base = serve(router).await;

    let mut settings = AnthropicSettings::default();
    settings.voyage_endpoint = format!("{base}/v1");
    settings.voyage_api_key = "pa-key".to_string();
    let client = VoyageEmbeddings::new(&settings).unwrap();
    let req = request(&["a", "b", "c"], "voyage-3");
    let map = client.generate_embeddings(&req).await.unwrap().into_map();

    assert_eq!(map[&req.contents[0].id].vector, vec![0.1]);
    assert_eq!(map[&req.contents[1].id].vector, vec![0.2]);
    assert_eq!(map[&req.contents[2].id].vector, vec![0.3]);
}

#[tokio::test]
async fn openai_embeddings_go_through_the_configured_endpoint() {
    let router = Router::new().route(
        "/v1/embeddings",
        post(|headers: HeaderMap, Json(body): Json<Value>| async move {
            if headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some("Bearer sk-test") {
                return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
            }
            let inputs = body["input"].as_array().cloned().unwrap_or_default();
            let data: Vec<Value> = inputs
                .iter()
                .enumerate()
                .map(|(i, _)| json!({ "object": "embedding", "embedding": [i as f64 + 1.0], "index": i }))
                .collect();
            Json(json!({
                "object": "list",
                "data": data,
                "model": body["model"],
                "usage": { "prompt_tokens": 2, "total_tokens": 2 }
            }))
            .into_response()
        }),
    );
    let base = serve(router).await;

    let mut settings = OpenAiSettings::default();
    settings.endpoint = format!("{base}/v1");
    settings.api_key = "sk-test".to_string();
    let client = OpenAiEmbeddings::new(&settings).unwrap();
    let req = request(&["hola", "adiós"], "text-embedding-3-small");
    let map = client.generate_embeddings(&req).await.unwrap().into_map();
    assert_eq!(map[&req.contents[0].id].vector, vec![1.0]);
    assert_eq!(map[&req.contents[1].id].vector, vec![2.0]);

    settings.api_key = "sk-wrong".to_string();
    let client = OpenAiEmbeddings::new(&settings).unwrap();
    let err = client.generate_embeddings(&req).await.unwrap_err();
    assert_eq!(err.status_code(), Some(401));
    assert!(err.to_string().contains("invalid api key"), "{err}");
}

#[tokio::test]
async fn non_success_status_keeps_the_code() {
    let router = Router::new()
        .route("/api/embed", post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
        .route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "upstream down") }),
        );
    let base = serve(router).await;

    let mut ollama = OllamaSettings::default();
    ollama.endpoint = base.clone();
    let err = OllamaEmbeddings::new(&ollama)
        .unwrap()
        .generate_embeddings(&request(&["x"], "nomic-embed-text"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Http { status: 500, .. }));
    assert!(err.to_string().contains("boom"));

    let mut view = ViewSettings::default();
    view.endpoint = base;
    view.access_key = "key".to_string();
    view.completion_model = "llama3.1".to_string();
    let (result, tokens) = collect_tokens(&ViewChat::new(&view).unwrap()).await;
    assert_eq!(result.unwrap_err().status_code(), Some(503));
    assert!(tokens.is_empty());
}

#[tokio::test]
async fn openai_stream_is_reassembled_across_writes() {
    let seen: Arc<Mutex<Option<Value>>> = Arc::default();
    let recorder = seen.clone();
    let router = Router::new().route(
        "/v1/chat/completions",
        post(move |Json(body): Json<Value>| {
            let recorder = recorder.clone();
            async move {
                *recorder.lock().unwrap() = Some(body);
                let parts = vec![
                    ": keep-alive\n\n",
                    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"con",
                    "tent\":\"Hola\"}}]}\n\n",
                    "data: {\"choices\":\ndata: [{\"delta\":{\"content\":\", mundo\"}}]}\n\n",
                    "data: [DONE]\n\n",
                ];
                ([(header::CONTENT_TYPE, "text/event-stream")], chunked(parts))
            }
        }),
    );
    let base = serve(router).await;

    let mut settings = OpenAiSettings::default();
    settings.endpoint = format!("{base}/v1");
    settings.api_key = "sk-test".to_string();
    let (result, tokens) = collect_tokens(&OpenAiChat::new(&settings).unwrap()).await;

    assert_eq!(result.unwrap(), "Hola, mundo");
    assert_eq!(tokens, vec!["Hola".to_string(), ", mundo".to_string()]);
    let body = seen.lock().unwrap().clone().unwrap();
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "¿Hola?");
}

#[tokio::test]
async fn anthropic_stream_is_driven_by_event_names() {
    let router = Router::new().route(
        "/v1/messages",
        post(|headers: HeaderMap, Json(body): Json<Value>| async move {
            assert_eq!(headers.get("x-api-key").and_then(|v| v.to_str().ok()), Some("sk-ant"));
            assert_eq!(body["system"], "Sé breve.");
            assert_eq!(body["messages"].as_array().map(|m| m.len()), Some(1));
            let parts = vec![
                "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
                "event: ping\ndata: {\"type\":\"ping\"}\n\n",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,",
                "\"delta\":{\"type\":\"text_delta\",\"text\":\"Buenas\"}}\n\n",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" tardes\"}}\n\n",
                "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            ];
            ([(header::CONTENT_TYPE, "text/event-stream")], chunked(parts))
        }),
    );
    let base = serve(router).await;

    let mut settings = AnthropicSettings::default();
    settings.endpoint = base;
    settings.api_key = "sk-ant".to_string();
    let (result, tokens) = collect_tokens(&AnthropicChat::new(&settings).unwrap()).await;

    assert_eq!(result.unwrap(), "Buenas tardes");
    assert_eq!(tokens.len(), 2);
}

#[tokio::test]
async fn ollama_ndjson_lines_split_mid_write_are_joined() {
    let router = Router::new().route(
        "/api/chat",
        post(|| async {
            let parts = vec![
                "{\"message\":{\"role\":\"assistant\",\"content\":\"Ho\"},\"done\":false}\n{\"message\":{\"role\":",
                "\"assistant\",\"content\":\"la\"},\"done\":false}\n",
                "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
            ];
            ([(header::CONTENT_TYPE, "application/x-ndjson")], chunked(parts))
        }),
    );
    let base = serve(router).await;

    let mut settings = OllamaSettings::default();
    settings.endpoint = base;
    let (result, tokens) = collect_tokens(&OllamaChat::new(&settings).unwrap()).await;

    assert_eq!(result.unwrap(), "Hola");
    assert_eq!(tokens, vec!["Ho".to_string(), "la".to_string()]);
}
