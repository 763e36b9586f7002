//! Estado de la ingesta por fichero, compartido entre el pipeline y la API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStage {
    DetectingType,
    ExtractingAtoms,
    GeneratingEmbeddings,
    Committing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileState {
    Running { stage: IngestionStage },
    Completed { chunks: usize },
    Skipped { reason: String },
    Failed { error: String },
}

impl FileState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileProgress {
    pub path: PathBuf,
    #[serde(flatten)]
    pub state: FileState,
    pub updated_utc: DateTime<Utc>,
}

/// Servicio de progreso de la ingesta. Se clona barato (estado en `Arc`).
#[derive(Debug, Clone, Default)]
pub struct IngestionProgress {
    files: Arc<Mutex<HashMap<PathBuf, FileProgress>>>,
}

impl IngestionProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> MutexGuard<'_, HashMap<PathBuf, FileProgress>> {
        // Lock envenenado: el mapa sigue siendo válido.
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marca el fichero como en curso. Devuelve `false` si ya lo estaba.
    pub fn try_begin(&self, path: &Path) -> bool {
        let mut files = self.files();
        if files.get(path).is_some_and(|p| p.state.is_running()) {
            return false;
        }
        files.insert(
            path.to_path_buf(),
            FileProgress {
                path: path.to_path_buf(),
                state: FileState::Running { stage: IngestionStage::DetectingType },
                updated_utc: Utc::now(),
            },
        );
        true
    }

    pub fn set(&self, path: &Path, state: FileState) {
        let mut files = self.files();
        files.insert(
            path.to_path_buf(),
            FileProgress { path: path.to_path_buf(), state, updated_utc: Utc::now() },
        );
    }

    pub fn stage(&self, path: &Path, stage: IngestionStage) {
        self.set(path, FileState::Running { stage });
    }

    pub fn get(&self, path: &Path) -> Option<FileProgress> {
        self.files().get(path).cloned()
    }

    pub fn is_busy(&self) -> bool {
        self.files().values().any(|p| p.state.is_running())
    }

    /// Instantánea ordenada por ruta.
    pub fn snapshot(&self) -> Vec<FileProgress> {
        let mut all: Vec<FileProgress> = self.files().values().cloned().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }

    pub fn clear_finished(&self) {
        self.files().retain(|_, p| p.state.is_running());
    }
}
