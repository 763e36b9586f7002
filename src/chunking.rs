//! Detección del tipo de fichero y extracción de átomos de texto.

use std::path::Path;

use anyhow::{anyhow, Result};
use mime_guess::MimeGuess;

use crate::models::DocumentType;

/// Longitud máxima de un átomo, en caracteres.
pub const MAX_CHUNK_LENGTH: usize = 512;
/// Desplazamiento entre el inicio de dos átomos consecutivos.
pub const SHIFT_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedType {
    pub document_type: DocumentType,
    pub mime_type: Option<String>,
    pub extension: String,
}

pub fn detect_type(path: &Path) -> DetectedType {
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase();
    let mime_type = MimeGuess::from_path(path).first().map(|m| m.to_string());

    let document_type = match extension.as_str() {
        "pdf" => DocumentType::Pdf,
        "txt" | "log" => DocumentType::Text,
        "md" | "markdown" => DocumentType::Markdown,
        "html" | "htm" => DocumentType::Html,
        "json" => DocumentType::Json,
        "csv" => DocumentType::Csv,
        "docx" => DocumentType::Docx,
        _ => match mime_type.as_deref() {
            Some("application/pdf") => DocumentType::Pdf,
            Some(m) if m.starts_with("text/") => DocumentType::Text,
            _ => DocumentType::Unknown,
        },
    };

    DetectedType { document_type, mime_type, extension }
}

/// Extrae el texto de un PDF. Bloqueante: llamar desde `spawn_blocking`.
pub fn extract_pdf_text(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path)
        .map_err(|e| anyhow!("No se pudo extraer texto del PDF {}: {e}", path.display()))
}

/// Ventanas de `max_len` caracteres que avanzan `shift` caracteres. Los
/// átomos vacíos o sólo con espacios se devuelven igualmente; filtrarlos es
/// cosa del llamador.
pub fn split_into_atoms(text: &str, max_len: usize, shift: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let shift = if shift == 0 { max_len } else { shift };
    let chars: Vec<char> = text.chars().collect();

    let mut atoms = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_len).min(chars.len());
        atoms.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += shift;
    }
    atoms
}
