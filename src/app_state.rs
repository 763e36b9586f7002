use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::info;

use crate::chat::ChatSession;
use crate::config::AppSettings;
use crate::graph_store::GraphStore;
use crate::ingest::FileIngester;
use crate::llm::LlmManager;
use crate::progress::{FileProgress, IngestionProgress};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RwLock<AppSettings>>,
    pub settings_path: Arc<PathBuf>,
    pub store: Arc<dyn GraphStore>,
    pub progress: IngestionProgress,
    /// Se crea con el primer mensaje y se descarta al cambiar la configuración.
    pub chat: Arc<Mutex<Option<ChatSession>>>,
    pub message: Arc<Mutex<String>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    /// Fracción de ficheros terminados, entre 0.0 y 1.0.
    pub progress: f32,
    pub files: Vec<FileProgress>,
}

impl AppState {
    pub fn new(settings: AppSettings, settings_path: PathBuf, store: Arc<dyn GraphStore>) -> (Self, oneshot::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Self {
            settings: Arc::new(RwLock::new(settings)),
            settings_path: Arc::new(settings_path),
            store,
            progress: IngestionProgress::new(),
            chat: Arc::new(Mutex::new(None)),
            message: Arc::new(Mutex::new("Servidor listo.".to_string())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
        };
        (state, shutdown_rx)
    }

    /// Ingestor con el proveedor de embeddings de la configuración vigente.
    pub async fn ingester(&self) -> Result<FileIngester> {
        let settings = self.settings.read().await;
        let embeddings = LlmManager::from_settings(&settings).embeddings()?;
        Ok(FileIngester::new(
            self.store.clone(),
            embeddings,
            self.progress.clone(),
            settings.graph.tenant_guid,
            settings.graph.graph_guid,
        ))
    }

    /// Valida, persiste y activa una configuración nueva.
    pub async fn update_settings(&self, new_settings: AppSettings) -> Result<()> {
        new_settings.validate().await?;
        new_settings.save(&self.settings_path)?;
        *self.settings.write().await = new_settings;
        *self.chat.lock().await = None;
        info!("Configuración actualizada; la sesión de chat se reiniciará.");
        Ok(())
    }

    pub async fn set_message(&self, message: impl Into<String>) {
        *self.message.lock().await = message.into();
    }

    pub async fn status(&self) -> Status {
        let files = self.progress.snapshot();
        let finished = files.iter().filter(|f| !f.state.is_running()).count();
        let progress = if files.is_empty() { 0.0 } else { finished as f32 / files.len() as f32 };
        Status {
            is_busy: self.progress.is_busy(),
            message: self.message.lock().await.clone(),
            progress,
            files,
        }
    }
}
