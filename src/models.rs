//! Modelos de dominio del grafo de conocimiento (documentos, chunks, aristas)
//! y de la conversación con el LLM.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant fijo de la aplicación de escritorio.
pub const DEFAULT_TENANT_GUID: Uuid = Uuid::nil();

/// Etiqueta de la arista documento → chunk.
pub const CONTAINS_CHUNK: &str = "ContainsChunk";

/// Tipo de documento detectado a partir de la extensión / MIME.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Text,
    Markdown,
    Html,
    Json,
    Csv,
    Docx,
    Unknown,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Docx => "docx",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for DocumentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pdf" => Ok(Self::Pdf),
            "text" => Ok(Self::Text),
            "markdown" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "docx" => Ok(Self::Docx),
            "unknown" => Ok(Self::Unknown),
            other => Err(anyhow::anyhow!("Tipo de documento desconocido: {other}")),
        }
    }
}

/// Representa un fichero ingerido (nodo :Document).
/// Se crea una vez por fichero y sólo se sustituye al reingerir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentNode {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub name: String,
    pub file_path: String,
    pub document_type: DocumentType,
    pub mime_type: Option<String>,
    pub extension: String,
    pub content_length: u64,
    pub created_utc: DateTime<Utc>,
    /// Átomos de texto extraídos del fichero.
    pub atoms: Vec<String>,
}

/// Embedding asociado a un chunk. Registra el modelo y la dimensión exactos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEmbedding {
    pub model: String,
    pub dimensionality: usize,
    pub vector: Vec<f64>,
    pub content: String,
}

/// Representa un trozo de texto (nodo :Chunk) de un documento.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkNode {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub document_guid: Uuid,
    /// Nombre del fichero de origen, usado en las citas.
    pub source_name: String,
    pub position: usize,
    pub text: String,
    pub content_length: usize,
    pub created_utc: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub vectors: Vec<VectorEmbedding>,
}

impl ChunkNode {
    /// Adjunta un embedding. Todos los vectores de un nodo deben venir del
    /// mismo modelo.
    pub fn attach_vector(&mut self, embedding: VectorEmbedding) -> anyhow::Result<()> {
        if let Some(existing) = self.vectors.first() {
            if existing.model != embedding.model {
                anyhow::bail!(
                    "El chunk {} ya tiene vectores del modelo '{}', no se admite '{}'",
                    self.guid,
                    existing.model,
                    embedding.model
                );
            }
        }
        self.vectors.push(embedding);
        Ok(())
    }
}

/// Relación dirigida entre nodos (documento → chunk).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub from: Uuid,
    pub to: Uuid,
    pub label: String,
}

impl Edge {
    pub fn contains_chunk(document: &DocumentNode, chunk: &ChunkNode) -> Self {
        Self {
            guid: Uuid::new_v4(),
            tenant_guid: document.tenant_guid,
            graph_guid: document.graph_guid,
            from: document.guid,
            to: chunk.guid,
            label: CONTAINS_CHUNK.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLabel {
    Document,
    Chunk,
}

/// Nodo genérico del grafo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphNode {
    Document(DocumentNode),
    Chunk(ChunkNode),
}

impl GraphNode {
    pub fn guid(&self) -> Uuid {
        match self {
            Self::Document(d) => d.guid,
            Self::Chunk(c) => c.guid,
        }
    }

    pub fn scope(&self) -> (Uuid, Uuid) {
        match self {
            Self::Document(d) => (d.tenant_guid, d.graph_guid),
            Self::Chunk(c) => (c.tenant_guid, c.graph_guid),
        }
    }

    pub fn label(&self) -> NodeLabel {
        match self {
            Self::Document(_) => NodeLabel::Document,
            Self::Chunk(_) => NodeLabel::Chunk,
        }
    }
}

/// Petición de búsqueda por similitud.
#[derive(Debug, Clone)]
pub struct VectorSearchRequest {
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub embedding: Vec<f64>,
    pub top_k: usize,
    pub min_score: f64,
}

/// Resultado efímero de una búsqueda vectorial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorSearchResult {
    pub chunk: ChunkNode,
    pub score: f64,
}

// --- Conversación ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}
