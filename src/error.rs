//! Errores tipados en la frontera con los proveedores de IA.

use thiserror::Error;

/// Errores que devuelven los clientes de embeddings y de chat.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Falta configuración (API key, modelo, endpoint). Se detecta antes de
    /// cualquier llamada de red.
    #[error("Configuración incompleta para {provider}: {message}")]
    Config { provider: &'static str, message: String },

    /// El proveedor respondió con un estado distinto de 2xx.
    #[error("{provider} respondió {status}: {message}")]
    Http {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("Error de transporte con {provider}: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// El proveedor rechazó la petición sin exponer el código de estado.
    #[error("{provider} rechazó la petición: {message}")]
    Rejected { provider: &'static str, message: String },

    /// Respuesta imposible de interpretar.
    #[error("Respuesta inválida de {provider}: {message}")]
    Payload { provider: &'static str, message: String },

    /// Número de embeddings devueltos distinto del solicitado, o ids que no
    /// casan con la petición.
    #[error("{provider} devolvió {returned} embeddings para {requested} contenidos")]
    EmbeddingMismatch {
        provider: &'static str,
        requested: usize,
        returned: usize,
    },
}

impl ProviderError {
    pub fn config(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Config { provider, message: message.into() }
    }

    pub fn payload(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Payload { provider, message: message.into() }
    }

    pub fn transport(provider: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Transport { provider, source: Box::new(source) }
    }

    /// Código de estado HTTP, si lo hubo.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport { source, .. } => source
                .downcast_ref::<reqwest::Error>()
                .and_then(|e| e.status())
                .map(|s| s.as_u16()),
            _ => None,
        }
    }
}
