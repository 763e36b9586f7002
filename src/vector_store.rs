//! Índice vectorial de Neo4j sobre `:Chunk(embedding)` y búsqueda semántica.

use anyhow::{anyhow, Result};
use neo4rs::{query, Graph, Node};
use tracing::{debug, info};

use crate::models::{VectorSearchRequest, VectorSearchResult};
use crate::neo4j_client::chunk_from_node;

pub const CHUNK_INDEX_NAME: &str = "chunkEmbeddingIndex";

/// El índice devuelve vecinos de todos los grafos; se piden más candidatos
/// para que el filtro por tenant/grafo no deje la lista corta.
const CANDIDATE_FACTOR: usize = 4;

/// Garantiza que el índice vectorial sobre `:Chunk(embedding)` exista.
pub async fn ensure_chunk_vector_index(graph: &Graph, dimensions: usize) -> Result<()> {
    let mut cursor = graph
        .execute(
            query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                .param("name", CHUNK_INDEX_NAME),
        )
        .await?;

    if cursor.next().await?.is_some() {
        info!("Índice vectorial '{CHUNK_INDEX_NAME}' ya existe.");
        return Ok(());
    }

    let cypher = format!(
        "\
CREATE VECTOR INDEX {CHUNK_INDEX_NAME}
FOR (c:Chunk)
ON (c.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: 'cosine'
  }}
}}"
    );

    graph.run(query(&cypher)).await?;
    info!("Índice vectorial '{CHUNK_INDEX_NAME}' creado ({dimensions} dimensiones).");

    Ok(())
}

/// Búsqueda vectorial sobre los embeddings almacenados en `:Chunk(embedding)`,
/// filtrada por tenant, grafo y puntuación mínima.
pub async fn search_top_chunks(graph: &Graph, request: &VectorSearchRequest) -> Result<Vec<VectorSearchResult>> {
    let candidates = request.top_k.saturating_mul(CANDIDATE_FACTOR).max(1);
    debug!(
        "Búsqueda vectorial: top_k={}, candidatos={}, min_score={}",
        request.top_k, candidates, request.min_score
    );

    let mut cursor = graph
        .execute(
            query(
                "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                 YIELD node, score
                 WHERE node.tenant_guid = $tenant AND node.graph_guid = $graph AND score >= $min_score
                 RETURN node, score
                 ORDER BY score DESC
                 LIMIT $limit",
            )
            .param("index_name", CHUNK_INDEX_NAME)
            .param("k", candidates as i64)
            .param("embedding", request.embedding.clone())
            .param("tenant", request.tenant_guid.to_string())
            .param("graph", request.graph_guid.to_string())
            .param("min_score", request.min_score)
            .param("limit", request.top_k as i64),
        )
        .await?;

    let mut output = Vec::new();
    while let Some(row) = cursor.next().await? {
        let node: Node = row.get("node").ok_or_else(|| anyhow!("Falta campo 'node' en resultado de Neo4j"))?;
        let score: f64 = row.get("score").ok_or_else(|| anyhow!("Falta campo 'score' en resultado de Neo4j"))?;
        output.push(VectorSearchResult { chunk: chunk_from_node(&node)?, score });
    }

    Ok(output)
}
