//! View Personal: ingesta de documentos en un grafo de conocimiento local y
//! chat con recuperación aumentada (RAG) sobre varios proveedores de IA.

pub mod api;
pub mod app_state;
pub mod chat;
pub mod chunking;
pub mod config;
pub mod error;
pub mod graph_store;
pub mod ingest;
pub mod llm;
pub mod local_store;
pub mod models;
pub mod neo4j_client;
pub mod progress;
pub mod providers;
pub mod rag;
pub mod vector_store;
