//! Grafo de conocimiento local en proceso.
//!
//! Nodos y aristas viven en memoria tras un `tokio::sync::RwLock`; si se
//! indica una ruta, cada escritura vuelca una instantánea JSON a disco y el
//! grafo se recarga al abrir.
//!
//! Cada escritura se aplica sobre una copia del estado; la copia sólo
//! sustituye al estado visible cuando la instantánea ya está en disco.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::graph_store::{GraphStore, StagedIngestion};
use crate::models::{Edge, GraphNode, NodeLabel, VectorSearchRequest, VectorSearchResult};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct GraphState {
    nodes: HashMap<Uuid, GraphNode>,
    edges: HashMap<Uuid, Edge>,
}

impl GraphState {
    /// Borra un nodo; si es un documento, también sus chunks. Las aristas que
    /// tocan cualquier nodo borrado desaparecen.
    fn remove_cascade(&mut self, guid: Uuid) {
        let mut doomed = vec![guid];
        if let Some(GraphNode::Document(doc)) = self.nodes.get(&guid) {
            let doc_guid = doc.guid;
            doomed.extend(self.nodes.values().filter_map(|node| match node {
                GraphNode::Chunk(chunk) if chunk.document_guid == doc_guid => Some(chunk.guid),
                _ => None,
            }));
        }
        for id in &doomed {
            self.nodes.remove(id);
        }
        self.edges
            .retain(|_, edge| !doomed.contains(&edge.from) && !doomed.contains(&edge.to));
    }
}

#[derive(Debug, Default)]
pub struct LocalGraphStore {
    state: RwLock<GraphState>,
    path: Option<PathBuf>,
}

impl LocalGraphStore {
    /// Grafo puramente en memoria.
    pub fn new() -> Self {
        Self::default()
    }

    /// Abre (o crea) un grafo respaldado por un fichero JSON.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let raw = tokio::fs::read(&path)
                .await
                .with_context(|| format!("No se pudo leer el grafo local {}", path.display()))?;
            let state: GraphState = serde_json::from_slice(&raw)
                .with_context(|| format!("Grafo local corrupto en {}", path.display()))?;
            info!(
                "Grafo local cargado desde {} ({} nodos, {} aristas)",
                path.display(),
                state.nodes.len(),
                state.edges.len()
            );
            state
        } else {
            info!("Creando grafo local en {}", path.display());
            GraphState::default()
        };
        Ok(Self { state: RwLock::new(state), path: Some(path) })
    }

    async fn persist(&self, state: &GraphState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec(state)?;
        let tmp = snapshot_tmp_path(path);
        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("No se pudo escribir el grafo local {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("No se pudo reemplazar el grafo local {}", path.display()))?;
        debug!("Instantánea del grafo local escrita en {}", path.display());
        Ok(())
    }

    /// Aplica `change` sobre una copia del grafo, la persiste y sólo entonces
    /// la publica. Si algo falla, el estado visible no cambia.
    async fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut GraphState) -> Result<()> + Send,
    {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        change(&mut next)?;
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }
}

fn snapshot_tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Similitud coseno; 0.0 si algún vector tiene norma cero.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl GraphStore for LocalGraphStore {
    async fn read_nodes(&self, tenant: Uuid, graph: Uuid, label: NodeLabel) -> Result<Vec<GraphNode>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .values()
            .filter(|node| node.scope() == (tenant, graph) && node.label() == label)
            .cloned()
            .collect())
    }

    async fn create_nodes(&self, nodes: &[GraphNode]) -> Result<()> {
        self.mutate(|state| {
            for node in nodes {
                state.nodes.insert(node.guid(), node.clone());
            }
            Ok(())
        })
        .await
    }

    async fn create_edges(&self, edges: &[Edge]) -> Result<()> {
        self.mutate(|state| {
            for edge in edges {
                if !state.nodes.contains_key(&edge.from) || !state.nodes.contains_key(&edge.to) {
                    return Err(anyhow!("La arista {} apunta a nodos inexistentes", edge.guid));
                }
            }
            for edge in edges {
                state.edges.insert(edge.guid, edge.clone());
            }
            Ok(())
        })
        .await
    }

    async fn update_node(&self, node: &GraphNode) -> Result<()> {
        self.mutate(|state| {
            let slot = state
                .nodes
                .get_mut(&node.guid())
                .ok_or_else(|| anyhow!("Nodo {} no encontrado", node.guid()))?;
            *slot = node.clone();
            Ok(())
        })
        .await
    }

    async fn delete_by_guid(&self, tenant: Uuid, graph: Uuid, guid: Uuid) -> Result<()> {
        self.mutate(|state| {
            match state.nodes.get(&guid) {
                Some(node) if node.scope() == (tenant, graph) => {}
                _ => return Err(anyhow!("Nodo {guid} no encontrado en el grafo {graph}")),
            }
            state.remove_cascade(guid);
            Ok(())
        })
        .await
    }

    async fn vector_search(&self, request: &VectorSearchRequest) -> Result<Vec<VectorSearchResult>> {
        let state = self.state.read().await;
        let dims = request.embedding.len();

        let mut scored: Vec<VectorSearchResult> = state
            .nodes
            .values()
            .filter_map(|node| match node {
                GraphNode::Chunk(chunk)
                    if chunk.tenant_guid == request.tenant_guid
                        && chunk.graph_guid == request.graph_guid =>
                {
                    chunk
                        .vectors
                        .iter()
                        .filter(|v| v.vector.len() == dims)
                        .map(|v| cosine_similarity(&v.vector, &request.embedding))
                        .reduce(f64::max)
                        .map(|score| VectorSearchResult { chunk: chunk.clone(), score })
                }
                _ => None,
            })
            .filter(|result| result.score >= request.min_score)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(request.top_k);
        Ok(scored)
    }

    async fn commit(&self, staged: StagedIngestion) -> Result<()> {
        self.mutate(move |state| {
            let doc = &staged.document;
            let previous: Vec<Uuid> = state
                .nodes
                .values()
                .filter_map(|node| match node {
                    GraphNode::Document(d)
                        if d.file_path == doc.file_path
                            && d.tenant_guid == doc.tenant_guid
                            && d.graph_guid == doc.graph_guid =>
                    {
                        Some(d.guid)
                    }
                    _ => None,
                })
                .collect();
            if !previous.is_empty() {
                info!("Reingiriendo {}: se sustituyen {} documento(s) previos.", doc.file_path, previous.len());
            }
            for guid in previous {
                state.remove_cascade(guid);
            }

            state.nodes.insert(doc.guid, GraphNode::Document(staged.document.clone()));
            for chunk in staged.chunks {
                state.nodes.insert(chunk.guid, GraphNode::Chunk(chunk));
            }
            for edge in staged.edges {
                state.edges.insert(edge.guid, edge);
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
impl LocalGraphStore {
    pub(crate) async fn edge_count(&self) -> usize {
        self.state.read().await.edges.len()
    }
}
