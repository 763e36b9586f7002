//! Ingesta de ficheros en el grafo de conocimiento: Document → Chunk con
//! embeddings.
//!
//! Flujo por fichero:
//!   1. Detección del tipo (sólo PDF se procesa de extremo a extremo).
//!   2. Extracción de átomos de texto (512 caracteres, desplazamiento 512).
//!   3. Preparación del nodo documento, los chunks y sus aristas.
//!   4. Embeddings de los chunks con texto, correlacionados por GUID.
//!   5. Confirmación atómica en el almacén (sustituye una ingesta previa).
//!
//! Un fallo en cualquier fase aborta el fichero sin escribir nada.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunking::{self, DetectedType, MAX_CHUNK_LENGTH, SHIFT_SIZE};
use crate::graph_store::{GraphStore, StagedIngestion};
use crate::models::{ChunkNode, DocumentNode, DocumentType, GraphNode, NodeLabel, VectorEmbedding};
use crate::progress::{FileState, IngestionProgress, IngestionStage};
use crate::providers::{EmbeddingClient, EmbeddingInput, EmbeddingRequest};

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    AlreadyRunning,
    Unsupported(DocumentType),
    NoText,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "ya se está ingiriendo"),
            Self::Unsupported(t) => write!(f, "tipo de documento no soportado ({t})"),
            Self::NoText => write!(f, "sin texto extraíble"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Ingested { document_guid: Uuid, chunks: usize },
    Skipped(SkipReason),
}

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub files_scanned: u32,
    pub files_ingested: u32,
    pub files_skipped: u32,
    pub files_failed: u32,
    pub chunks_created: usize,
    pub errors: Vec<(PathBuf, String)>,
}

impl fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} ingeridos, {} omitidos, {} con error. {} chunks creados.",
            self.files_scanned, self.files_ingested, self.files_skipped, self.files_failed, self.chunks_created
        )
    }
}

/// Metadatos del fichero de origen ya inspeccionado.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub detected: DetectedType,
    pub content_length: u64,
}

impl SourceFile {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }
}

pub struct FileIngester {
    store: Arc<dyn GraphStore>,
    embeddings: Arc<dyn EmbeddingClient>,
    progress: IngestionProgress,
    tenant_guid: Uuid,
    graph_guid: Uuid,
}

impl FileIngester {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embeddings: Arc<dyn EmbeddingClient>,
        progress: IngestionProgress,
        tenant_guid: Uuid,
        graph_guid: Uuid,
    ) -> Self {
        Self { store, embeddings, progress, tenant_guid, graph_guid }
    }

    /// Ingiere un fichero registrando su estado en el servicio de progreso.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestOutcome> {
        if !self.progress.try_begin(path) {
            info!("{} ya se está ingiriendo, se ignora la petición duplicada.", path.display());
            return Ok(IngestOutcome::Skipped(SkipReason::AlreadyRunning));
        }

        let result = self.run_pipeline(path).await;
        match &result {
            Ok(IngestOutcome::Ingested { chunks, .. }) => {
                self.progress.set(path, FileState::Completed { chunks: *chunks });
            }
            Ok(IngestOutcome::Skipped(reason)) => {
                self.progress.set(path, FileState::Skipped { reason: reason.to_string() });
            }
            Err(err) => {
                error!("Error ingiriendo {}: {err:#}", path.display());
                self.progress.set(path, FileState::Failed { error: format!("{err:#}") });
            }
        }
        result
    }

    async fn run_pipeline(&self, path: &Path) -> Result<IngestOutcome> {
        let detected = chunking::detect_type(path);
        if detected.document_type != DocumentType::Pdf {
            info!(
                "Saltando {} (tipo '{}'): sólo se ingieren PDF.",
                path.display(),
                detected.document_type
            );
            return Ok(IngestOutcome::Skipped(SkipReason::Unsupported(detected.document_type)));
        }

        self.progress.stage(path, IngestionStage::ExtractingAtoms);
        let metadata = tokio::fs::metadata(path).await?;
        let owned = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || chunking::extract_pdf_text(&owned)).await??;
        let atoms = chunking::split_into_atoms(&text, MAX_CHUNK_LENGTH, SHIFT_SIZE);

        let source = SourceFile {
            path: path.to_path_buf(),
            detected,
            content_length: metadata.len(),
        };
        self.ingest_atoms(&source, atoms).await
    }

    /// Crea documento, chunks y embeddings a partir de átomos ya extraídos y
    /// los confirma de una vez.
    pub async fn ingest_atoms(&self, source: &SourceFile, atoms: Vec<String>) -> Result<IngestOutcome> {
        let path_str = source.path.to_string_lossy().to_string();
        let name = source.name();

        let document = DocumentNode {
            guid: Uuid::new_v4(),
            tenant_guid: self.tenant_guid,
            graph_guid: self.graph_guid,
            name: name.clone(),
            file_path: path_str.clone(),
            document_type: source.detected.document_type,
            mime_type: source.detected.mime_type.clone(),
            extension: source.detected.extension.clone(),
            content_length: source.content_length,
            created_utc: Utc::now(),
            atoms: atoms.clone(),
        };

        let mut chunks = Vec::new();
        for (position, atom) in atoms.into_iter().enumerate() {
            if atom.trim().is_empty() {
                debug!("Átomo {position} de {path_str} vacío, no se guarda.");
                continue;
            }
            chunks.push(ChunkNode {
                guid: Uuid::new_v4(),
                tenant_guid: self.tenant_guid,
                graph_guid: self.graph_guid,
                document_guid: document.guid,
                source_name: name.clone(),
                position,
                content_length: atom.chars().count(),
                text: atom,
                created_utc: Utc::now(),
                tags: Default::default(),
                vectors: Vec::new(),
            });
        }

        if chunks.is_empty() {
            warn!("Fichero vacío o sin texto útil: {path_str}");
            return Ok(IngestOutcome::Skipped(SkipReason::NoText));
        }

        self.progress.stage(&source.path, IngestionStage::GeneratingEmbeddings);
        self.embed_chunks(&mut chunks).await?;

        self.progress.stage(&source.path, IngestionStage::Committing);
        let document_guid = document.guid;
        let count = chunks.len();
        self.store.commit(StagedIngestion::new(document, chunks)).await?;

        info!("Ingerido {path_str} con {count} chunks.");
        Ok(IngestOutcome::Ingested { document_guid, chunks: count })
    }

    /// Pide los embeddings de los chunks con texto y los adjunta. Si el
    /// proveedor falla o no devuelve un vector por chunk, no se adjunta
    /// ninguno.
    pub async fn embed_chunks(&self, chunks: &mut [ChunkNode]) -> Result<()> {
        let contents: Vec<EmbeddingInput> = chunks
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .map(|c| EmbeddingInput { id: c.guid, text: c.text.clone() })
            .collect();
        if contents.is_empty() {
            return Ok(());
        }

        let request = EmbeddingRequest { model: self.embeddings.model().to_string(), contents };
        let provider = self.embeddings.provider_name();
        let response = self.embeddings.generate_embeddings(&request).await.map_err(|e| {
            match e.status_code() {
                Some(status) => error!("{provider}: error generando embeddings ({status}): {e}"),
                None => error!("{provider}: error generando embeddings: {e}"),
            }
            anyhow!(e)
        })?;

        let mut by_id = response.into_map();
        let missing = request.contents.iter().filter(|c| !by_id.contains_key(&c.id)).count();
        if missing > 0 || by_id.len() != request.contents.len() {
            error!(
                "{provider}: {} embeddings recibidos para {} chunks ({missing} sin vector)",
                by_id.len(),
                request.contents.len()
            );
            bail!(
                "{provider} devolvió {} embeddings para {} chunks",
                by_id.len(),
                request.contents.len()
            );
        }

        let dimensionality = by_id.values().next().map(|e| e.vector.len()).unwrap_or_default();
        if by_id.values().any(|e| e.vector.len() != dimensionality || e.vector.is_empty()) {
            error!("{provider}: embeddings con dimensiones inconsistentes");
            bail!("{provider} devolvió embeddings con dimensiones inconsistentes");
        }

        for chunk in chunks.iter_mut() {
            if let Some(embedding) = by_id.remove(&chunk.guid) {
                chunk.attach_vector(VectorEmbedding {
                    model: request.model.clone(),
                    dimensionality,
                    vector: embedding.vector,
                    content: embedding.content,
                })?;
            }
        }
        Ok(())
    }

    /// Ingiere varios ficheros en paralelo. Las rutas repetidas se ingieren
    /// una sola vez.
    pub async fn ingest_files(&self, paths: &[PathBuf]) -> IngestionSummary {
        let mut seen = HashSet::new();
        let unique: Vec<&PathBuf> = paths.iter().filter(|p| seen.insert(p.as_path())).collect();

        let results = join_all(unique.iter().map(|path| self.ingest_file(path))).await;

        let mut summary = IngestionSummary::default();
        for (path, result) in unique.into_iter().zip(results) {
            summary.files_scanned += 1;
            match result {
                Ok(IngestOutcome::Ingested { chunks, .. }) => {
                    summary.files_ingested += 1;
                    summary.chunks_created += chunks;
                }
                Ok(IngestOutcome::Skipped(_)) => summary.files_skipped += 1,
                Err(err) => {
                    summary.files_failed += 1;
                    summary.errors.push((path.clone(), format!("{err:#}")));
                }
            }
        }
        summary
    }

    /// Recorre recursivamente un directorio e ingiere todos sus ficheros.
    pub async fn ingest_directory(&self, root: &Path) -> Result<IngestionSummary> {
        if !root.is_dir() {
            bail!("La ruta no es un directorio: {}", root.display());
        }
        let files = collect_files(root);
        info!("{} ficheros encontrados en {}", files.len(), root.display());
        Ok(self.ingest_files(&files).await)
    }

    /// Ingiere una mezcla de ficheros y directorios.
    pub async fn ingest_paths(&self, paths: &[PathBuf]) -> IngestionSummary {
        let mut files = Vec::new();
        for path in paths {
            if path.is_dir() {
                files.extend(collect_files(path));
            } else if path.is_file() {
                files.push(path.clone());
            } else {
                warn!("Ruta inexistente, se ignora: {}", path.display());
            }
        }
        self.ingest_files(&files).await
    }

    /// Vuelve a ingerir todas las rutas vigiladas. Los ficheros ya ingeridos
    /// se sustituyen.
    pub async fn sync_watched_paths(&self, watched: &[PathBuf]) -> IngestionSummary {
        info!("Sincronizando {} rutas vigiladas.", watched.len());
        let summary = self.ingest_paths(watched).await;
        info!("{summary}");
        summary
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentNode>> {
        let nodes = self.store.read_nodes(self.tenant_guid, self.graph_guid, NodeLabel::Document).await?;
        let mut docs: Vec<DocumentNode> = nodes
            .into_iter()
            .filter_map(|n| match n {
                GraphNode::Document(d) => Some(d),
                GraphNode::Chunk(_) => None,
            })
            .collect();
        docs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(docs)
    }

    /// Borra un documento y, en cascada, sus chunks y aristas.
    pub async fn delete_document(&self, guid: Uuid) -> Result<()> {
        self.store.delete_by_guid(self.tenant_guid, self.graph_guid, guid).await?;
        info!("Documento {guid} eliminado del grafo {}", self.graph_guid);
        Ok(())
    }
}

fn collect_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect()
}
