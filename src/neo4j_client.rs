//! Almacén del grafo sobre Neo4j: conexión, esquema y operaciones CRUD de
//! nodos :Document / :Chunk y aristas :ContainsChunk.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, Graph, Node, Query};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::graph_store::{GraphStore, StagedIngestion};
use crate::models::{
    ChunkNode, DocumentNode, Edge, GraphNode, NodeLabel, VectorEmbedding, VectorSearchRequest,
    VectorSearchResult,
};
use crate::vector_store;

pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Graph> {
    let url = Url::parse(uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, user, password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints de unicidad para :Document y :Chunk.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE CONSTRAINT document_guid IF NOT EXISTS
         FOR (d:Document)
         REQUIRE d.guid IS UNIQUE",
        "CREATE CONSTRAINT chunk_guid IF NOT EXISTS
         FOR (c:Chunk)
         REQUIRE c.guid IS UNIQUE",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints básicos creados).");
    Ok(())
}

pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    /// Conecta, asegura constraints e índice vectorial.
    pub async fn connect(uri: &str, user: &str, password: &str, vector_dimensions: usize) -> Result<Self> {
        let graph = connect(uri, user, password).await?;
        ensure_schema(&graph).await?;
        vector_store::ensure_chunk_vector_index(&graph, vector_dimensions).await?;
        Ok(Self { graph })
    }

    async fn exists(&self, guid: Uuid) -> Result<bool> {
        let mut cursor = self
            .graph
            .execute(query("MATCH (n {guid: $guid}) RETURN n.guid AS guid LIMIT 1").param("guid", guid.to_string()))
            .await?;
        Ok(cursor.next().await?.is_some())
    }
}

fn label_name(label: NodeLabel) -> &'static str {
    match label {
        NodeLabel::Document => "Document",
        NodeLabel::Chunk => "Chunk",
    }
}

/// Consultas que escriben (o sobrescriben) un nodo completo.
fn upsert_node_queries(node: &GraphNode) -> Result<Vec<Query>> {
    match node {
        GraphNode::Document(doc) => Ok(vec![query(
            "MERGE (d:Document {guid: $guid})
             SET d.tenant_guid = $tenant_guid, d.graph_guid = $graph_guid, d.name = $name,
                 d.file_path = $file_path, d.document_type = $document_type,
                 d.mime_type = $mime_type, d.extension = $extension,
                 d.content_length = $content_length, d.created_utc = $created_utc,
                 d.atoms = $atoms",
        )
        .param("guid", doc.guid.to_string())
        .param("tenant_guid", doc.tenant_guid.to_string())
        .param("graph_guid", doc.graph_guid.to_string())
        .param("name", doc.name.clone())
        .param("file_path", doc.file_path.clone())
        .param("document_type", doc.document_type.to_string())
        .param("mime_type", doc.mime_type.clone().unwrap_or_default())
        .param("extension", doc.extension.clone())
        .param("content_length", doc.content_length as i64)
        .param("created_utc", doc.created_utc.to_rfc3339())
        .param("atoms", doc.atoms.clone())]),
        GraphNode::Chunk(chunk) => {
            let base = query(
                "MERGE (c:Chunk {guid: $guid})
                 SET c.tenant_guid = $tenant_guid, c.graph_guid = $graph_guid,
                     c.document_guid = $document_guid, c.source_name = $source_name,
                     c.position = $position, c.text = $text, c.content_length = $content_length,
                     c.created_utc = $created_utc, c.tags_json = $tags_json,
                     c.vectors_json = $vectors_json",
            )
            .param("guid", chunk.guid.to_string())
            .param("tenant_guid", chunk.tenant_guid.to_string())
            .param("graph_guid", chunk.graph_guid.to_string())
            .param("document_guid", chunk.document_guid.to_string())
            .param("source_name", chunk.source_name.clone())
            .param("position", chunk.position as i64)
            .param("text", chunk.text.clone())
            .param("content_length", chunk.content_length as i64)
            .param("created_utc", chunk.created_utc.to_rfc3339())
            .param("tags_json", serde_json::to_string(&chunk.tags)?)
            .param("vectors_json", serde_json::to_string(&chunk.vectors)?);

            // El índice vectorial sólo mira `embedding`: se indexa el primer vector.
            let embedding = match chunk.vectors.first() {
                Some(v) => query("MATCH (c:Chunk {guid: $guid}) SET c.embedding = $embedding")
                    .param("guid", chunk.guid.to_string())
                    .param("embedding", v.vector.clone()),
                None => query("MATCH (c:Chunk {guid: $guid}) REMOVE c.embedding")
                    .param("guid", chunk.guid.to_string()),
            };
            Ok(vec![base, embedding])
        }
    }
}

fn edge_query(edge: &Edge) -> Query {
    let rel_type: String = edge.label.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
    let cypher = format!(
        "MATCH (a {{guid: $from}}), (b {{guid: $to}})
         MERGE (a)-[r:`{rel_type}` {{guid: $guid}}]->(b)
         SET r.tenant_guid = $tenant_guid, r.graph_guid = $graph_guid"
    );
    query(&cypher)
        .param("from", edge.from.to_string())
        .param("to", edge.to.to_string())
        .param("guid", edge.guid.to_string())
        .param("tenant_guid", edge.tenant_guid.to_string())
        .param("graph_guid", edge.graph_guid.to_string())
}

fn guid_prop(node: &Node, key: &str) -> Result<Uuid> {
    let raw: String = node.get(key).ok_or_else(|| anyhow!("Falta la propiedad '{key}' en el nodo"))?;
    Uuid::parse_str(&raw).with_context(|| format!("Propiedad '{key}' no es un GUID: {raw}"))
}

fn timestamp_prop(node: &Node) -> DateTime<Utc> {
    node.get::<String>("created_utc")
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

pub(crate) fn document_from_node(node: &Node) -> Result<DocumentNode> {
    let mime_type: String = node.get("mime_type").unwrap_or_default();
    let document_type: String = node.get("document_type").unwrap_or_default();
    Ok(DocumentNode {
        guid: guid_prop(node, "guid")?,
        tenant_guid: guid_prop(node, "tenant_guid")?,
        graph_guid: guid_prop(node, "graph_guid")?,
        name: node.get("name").unwrap_or_default(),
        file_path: node.get("file_path").unwrap_or_default(),
        document_type: document_type.parse()?,
        mime_type: (!mime_type.is_empty()).then_some(mime_type),
        extension: node.get("extension").unwrap_or_default(),
        content_length: node.get::<i64>("content_length").unwrap_or_default().max(0) as u64,
        created_utc: timestamp_prop(node),
        atoms: node.get("atoms").unwrap_or_default(),
    })
}

pub(crate) fn chunk_from_node(node: &Node) -> Result<ChunkNode> {
    let tags_json: String = node.get("tags_json").unwrap_or_else(|| "{}".to_string());
    let vectors_json: String = node.get("vectors_json").unwrap_or_else(|| "[]".to_string());
    let tags: BTreeMap<String, String> = serde_json::from_str(&tags_json)?;
    let vectors: Vec<VectorEmbedding> = serde_json::from_str(&vectors_json)?;
    Ok(ChunkNode {
        guid: guid_prop(node, "guid")?,
        tenant_guid: guid_prop(node, "tenant_guid")?,
        graph_guid: guid_prop(node, "graph_guid")?,
        document_guid: guid_prop(node, "document_guid")?,
        source_name: node.get("source_name").unwrap_or_default(),
        position: node.get::<i64>("position").unwrap_or_default().max(0) as usize,
        text: node.get("text").unwrap_or_default(),
        content_length: node.get::<i64>("content_length").unwrap_or_default().max(0) as usize,
        created_utc: timestamp_prop(node),
        tags,
        vectors,
    })
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn read_nodes(&self, tenant: Uuid, graph: Uuid, label: NodeLabel) -> Result<Vec<GraphNode>> {
        let cypher = format!(
            "MATCH (n:{} {{tenant_guid: $tenant, graph_guid: $graph}}) RETURN n",
            label_name(label)
        );
        let mut cursor = self
            .graph
            .execute(query(&cypher).param("tenant", tenant.to_string()).param("graph", graph.to_string()))
            .await?;

        let mut nodes = Vec::new();
        while let Some(row) = cursor.next().await? {
            let node: Node = row.get("n").ok_or_else(|| anyhow!("Falta campo 'n' en resultado de Neo4j"))?;
            nodes.push(match label {
                NodeLabel::Document => GraphNode::Document(document_from_node(&node)?),
                NodeLabel::Chunk => GraphNode::Chunk(chunk_from_node(&node)?),
            });
        }
        Ok(nodes)
    }

    async fn create_nodes(&self, nodes: &[GraphNode]) -> Result<()> {
        for node in nodes {
            for q in upsert_node_queries(node)? {
                self.graph.run(q).await?;
            }
        }
        Ok(())
    }

    async fn create_edges(&self, edges: &[Edge]) -> Result<()> {
        for edge in edges {
            self.graph.run(edge_query(edge)).await?;
        }
        Ok(())
    }

    async fn update_node(&self, node: &GraphNode) -> Result<()> {
        if !self.exists(node.guid()).await? {
            return Err(anyhow!("Nodo {} no encontrado", node.guid()));
        }
        for q in upsert_node_queries(node)? {
            self.graph.run(q).await?;
        }
        Ok(())
    }

    async fn delete_by_guid(&self, tenant: Uuid, graph: Uuid, guid: Uuid) -> Result<()> {
        self.graph
            .run(
                query(
                    "MATCH (n {guid: $guid, tenant_guid: $tenant, graph_guid: $graph})
                     OPTIONAL MATCH (n)-[:ContainsChunk]->(c:Chunk)
                     DETACH DELETE c, n",
                )
                .param("guid", guid.to_string())
                .param("tenant", tenant.to_string())
                .param("graph", graph.to_string()),
            )
            .await?;
        Ok(())
    }

    async fn vector_search(&self, request: &VectorSearchRequest) -> Result<Vec<VectorSearchResult>> {
        vector_store::search_top_chunks(&self.graph, request).await
    }

    async fn commit(&self, staged: StagedIngestion) -> Result<()> {
        let tx = self.graph.start_txn().await?;
        let doc = &staged.document;

        tx.run(
            query(
                "MATCH (d:Document {file_path: $file_path, tenant_guid: $tenant, graph_guid: $graph})
                 OPTIONAL MATCH (d)-[:ContainsChunk]->(c:Chunk)
                 DETACH DELETE c, d",
            )
            .param("file_path", doc.file_path.clone())
            .param("tenant", doc.tenant_guid.to_string())
            .param("graph", doc.graph_guid.to_string()),
        )
        .await?;

        for q in upsert_node_queries(&GraphNode::Document(doc.clone()))? {
            tx.run(q).await?;
        }
        for chunk in &staged.chunks {
            for q in upsert_node_queries(&GraphNode::Chunk(chunk.clone()))? {
                tx.run(q).await?;
            }
        }
        for edge in &staged.edges {
            tx.run(edge_query(edge)).await?;
        }

        tx.commit().await?;
        info!(
            "Ingesta confirmada en Neo4j: {} ({} chunks)",
            doc.file_path,
            staged.chunks.len()
        );
        Ok(())
    }
}
