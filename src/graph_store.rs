//! Contrato con el almacén del grafo de conocimiento.
//!
//! El núcleo trata el almacén como un repositorio opaco de nodos, aristas y
//! vectores. Hay dos implementaciones: Neo4j (`neo4j_client`) y el grafo local
//! en proceso (`local_store`).

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    ChunkNode, DocumentNode, Edge, GraphNode, NodeLabel, VectorSearchRequest, VectorSearchResult,
};

/// Escrituras de la ingesta de un fichero, preparadas para confirmarse de una
/// sola vez.
#[derive(Debug, Clone)]
pub struct StagedIngestion {
    pub document: DocumentNode,
    pub chunks: Vec<ChunkNode>,
    pub edges: Vec<Edge>,
}

impl StagedIngestion {
    pub fn new(document: DocumentNode, chunks: Vec<ChunkNode>) -> Self {
        let edges = chunks
            .iter()
            .map(|chunk| Edge::contains_chunk(&document, chunk))
            .collect();
        Self { document, chunks, edges }
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn read_nodes(&self, tenant: Uuid, graph: Uuid, label: NodeLabel) -> Result<Vec<GraphNode>>;

    async fn create_nodes(&self, nodes: &[GraphNode]) -> Result<()>;

    async fn create_edges(&self, edges: &[Edge]) -> Result<()>;

    async fn update_node(&self, node: &GraphNode) -> Result<()>;

    /// Borra un nodo. Un documento arrastra sus chunks y aristas.
    async fn delete_by_guid(&self, tenant: Uuid, graph: Uuid, guid: Uuid) -> Result<()>;

    /// Devuelve chunks con `score >= min_score`, de mayor a menor, como mucho
    /// `top_k`.
    async fn vector_search(&self, request: &VectorSearchRequest) -> Result<Vec<VectorSearchResult>>;

    /// Confirma atómicamente una ingesta. Si ya existía un documento con la
    /// misma ruta en el grafo, se sustituye junto con sus chunks.
    async fn commit(&self, staged: StagedIngestion) -> Result<()>;
}
