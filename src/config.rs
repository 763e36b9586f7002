//! Carga, validación y persistencia de la configuración de la aplicación
//! (proveedores de IA, RAG, grafo y rutas vigiladas).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::models::DEFAULT_TENANT_GUID;

const APP_DIR_NAME: &str = "view-personal";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionProviderType {
    #[serde(rename = "OpenAI")]
    OpenAi,
    Anthropic,
    Ollama,
    View,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingProviderType {
    #[serde(rename = "OpenAI")]
    OpenAi,
    /// Anthropic no ofrece embeddings; se usan los de Voyage.
    #[serde(rename = "Anthropic", alias = "Voyage")]
    Anthropic,
    Ollama,
    View,
}

impl FromStr for CompletionProviderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            "view" => Ok(Self::View),
            other => Err(anyhow!("Proveedor de chat no soportado: {other}")),
        }
    }
}

impl FromStr for EmbeddingProviderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "voyage" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            "view" => Ok(Self::View),
            other => Err(anyhow!("Proveedor de embeddings no soportado: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: String,
    /// Endpoint de chat completions (compatible con OpenAI).
    pub endpoint: String,
    pub completion_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub batch_size: usize,
    pub max_retries: u32,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.openai.com/v1".to_string(),
            completion_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            batch_size: 10,
            max_retries: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicSettings {
    pub api_key: String,
    pub endpoint: String,
    pub completion_model: String,
    pub voyage_api_key: String,
    pub voyage_endpoint: String,
    pub voyage_embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub batch_size: usize,
    pub max_retries: u32,
}

impl Default for AnthropicSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.anthropic.com".to_string(),
            completion_model: "claude-3-5-sonnet-latest".to_string(),
            voyage_api_key: String::new(),
            voyage_endpoint: "https://api.voyageai.com/v1".to_string(),
            voyage_embedding_model: "voyage-3".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            batch_size: 10,
            max_retries: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub endpoint: String,
    pub completion_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub batch_size: usize,
    pub max_retries: u32,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            completion_model: "llama3.1".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            batch_size: 10,
            max_retries: 3,
        }
    }
}

/// Servicio "View" autoalojado.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    pub endpoint: String,
    pub access_key: String,
    pub tenant_guid: Uuid,
    pub completion_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub batch_size: usize,
    pub max_retries: u32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            access_key: String::new(),
            tenant_guid: DEFAULT_TENANT_GUID,
            completion_model: "llama3.1".to_string(),
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            batch_size: 10,
            max_retries: 3,
        }
    }
}

/// Parámetros de recuperación y construcción de contexto.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub enable_rag: bool,
    pub top_k: usize,
    pub similarity_threshold: f64,
    pub query_optimization: bool,
    pub enable_context_sorting: bool,
    pub enable_citations: bool,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            enable_rag: true,
            top_k: 10,
            similarity_threshold: 0.7,
            query_optimization: true,
            enable_context_sorting: true,
            enable_citations: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphBackend {
    /// Grafo local en memoria con instantánea JSON en disco.
    Local { path: Option<PathBuf> },
    Neo4j {
        uri: String,
        user: String,
        password: String,
    },
}

impl Default for GraphBackend {
    fn default() -> Self {
        Self::Local { path: None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    pub backend: GraphBackend,
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    /// Dimensión del índice vectorial (sólo Neo4j).
    pub vector_dimensions: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            backend: GraphBackend::default(),
            tenant_guid: DEFAULT_TENANT_GUID,
            graph_guid: Uuid::from_u128(1),
            vector_dimensions: 1536,
        }
    }
}

/// Configuración completa de la aplicación. Se lee y escribe entera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub completion_provider: CompletionProviderType,
    pub embedding_provider: EmbeddingProviderType,
    pub openai: OpenAiSettings,
    pub anthropic: AnthropicSettings,
    pub ollama: OllamaSettings,
    pub view: ViewSettings,
    pub rag: RagSettings,
    pub graph: GraphSettings,
    pub system_prompt: String,
    pub watched_paths: Vec<PathBuf>,
    pub server_addr: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            completion_provider: CompletionProviderType::OpenAi,
            embedding_provider: EmbeddingProviderType::OpenAi,
            openai: OpenAiSettings::default(),
            anthropic: AnthropicSettings::default(),
            ollama: OllamaSettings::default(),
            view: ViewSettings::default(),
            rag: RagSettings::default(),
            graph: GraphSettings::default(),
            system_prompt: "You are a helpful assistant. Please respond in English.".to_string(),
            watched_paths: Vec::new(),
            server_addr: "127.0.0.1:3322".to_string(),
        }
    }
}

/// Proveedor de chat seleccionado junto con su configuración.
#[derive(Clone, Debug, PartialEq)]
pub enum CompletionProviderConfig {
    OpenAi(OpenAiSettings),
    Anthropic(AnthropicSettings),
    Ollama(OllamaSettings),
    View(ViewSettings),
}

/// Proveedor de embeddings seleccionado junto con su configuración.
#[derive(Clone, Debug, PartialEq)]
pub enum EmbeddingProviderConfig {
    OpenAi(OpenAiSettings),
    Anthropic(AnthropicSettings),
    Ollama(OllamaSettings),
    View(ViewSettings),
}

impl AppSettings {
    /// Directorio de datos de la aplicación para el usuario actual.
    pub fn app_dir() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| anyhow!("No se pudo determinar el directorio de configuración del usuario"))?;
        Ok(base.join(APP_DIR_NAME))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::app_dir()?.join(SETTINGS_FILE_NAME))
    }

    /// Lee la configuración del fichero; si no existe, devuelve los valores
    /// por defecto.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No existe {}, usando configuración por defecto.", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("No se pudo leer {}", path.display()))?;
        let settings = serde_json::from_str(&raw)
            .with_context(|| format!("Configuración inválida en {}", path.display()))?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).with_context(|| format!("No se pudo escribir {}", path.display()))?;
        info!("Configuración guardada en {}", path.display());
        Ok(())
    }

    /// Carga el fichero de configuración y aplica las variables de entorno
    /// (usando .env si existe).
    pub fn from_env() -> Result<(Self, PathBuf)> {
        let path = match env::var("VIEW_SETTINGS_PATH") {
            Ok(p) => PathBuf::from(p),
            Err(_) => Self::default_path()?,
        };
        let mut settings = Self::load(&path)?;
        settings.apply_env_overrides()?;
        Ok((settings, path))
    }

    /// Las variables de entorno tienen prioridad sobre lo persistido.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        fn set(target: &mut String, key: &str) {
            if let Ok(value) = env::var(key) {
                *target = value;
            }
        }

        set(&mut self.openai.api_key, "OPENAI_API_KEY");
        set(&mut self.anthropic.api_key, "ANTHROPIC_API_KEY");
        set(&mut self.anthropic.voyage_api_key, "VOYAGE_API_KEY");
        set(&mut self.ollama.endpoint, "OLLAMA_ENDPOINT");
        set(&mut self.view.endpoint, "VIEW_ENDPOINT");
        set(&mut self.view.access_key, "VIEW_ACCESS_KEY");
        set(&mut self.server_addr, "SERVER_ADDR");

        if let Ok(provider) = env::var("COMPLETION_PROVIDER") {
            self.completion_provider = provider.parse()?;
        }
        if let Ok(provider) = env::var("EMBEDDING_PROVIDER") {
            self.embedding_provider = provider.parse()?;
        }

        if let Ok(uri) = env::var("NEO4J_URI") {
            let user = env::var("NEO4J_USER").map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
            let password =
                env::var("NEO4J_PASSWORD").map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;
            self.graph.backend = GraphBackend::Neo4j { uri, user, password };
        }
        Ok(())
    }

    pub fn completion_config(&self) -> CompletionProviderConfig {
        match self.completion_provider {
            CompletionProviderType::OpenAi => CompletionProviderConfig::OpenAi(self.openai.clone()),
            CompletionProviderType::Anthropic => {
                CompletionProviderConfig::Anthropic(self.anthropic.clone())
            }
            CompletionProviderType::Ollama => CompletionProviderConfig::Ollama(self.ollama.clone()),
            CompletionProviderType::View => CompletionProviderConfig::View(self.view.clone()),
        }
    }

    pub fn embedding_config(&self) -> EmbeddingProviderConfig {
        match self.embedding_provider {
            EmbeddingProviderType::OpenAi => EmbeddingProviderConfig::OpenAi(self.openai.clone()),
            EmbeddingProviderType::Anthropic => {
                EmbeddingProviderConfig::Anthropic(self.anthropic.clone())
            }
            EmbeddingProviderType::Ollama => EmbeddingProviderConfig::Ollama(self.ollama.clone()),
            EmbeddingProviderType::View => EmbeddingProviderConfig::View(self.view.clone()),
        }
    }

    /// Validación al guardar: campos obligatorios de los proveedores elegidos,
    /// formato de URL y resolución DNS de los endpoints autoalojados.
    pub async fn validate(&self) -> Result<()> {
        self.validate_fields()?;

        let mut self_hosted = Vec::new();
        if matches!(self.completion_provider, CompletionProviderType::Ollama)
            || matches!(self.embedding_provider, EmbeddingProviderType::Ollama)
        {
            self_hosted.push(self.ollama.endpoint.as_str());
        }
        if matches!(self.completion_provider, CompletionProviderType::View)
            || matches!(self.embedding_provider, EmbeddingProviderType::View)
        {
            self_hosted.push(self.view.endpoint.as_str());
        }
        for endpoint in self_hosted {
            ensure_resolvable(endpoint).await?;
        }
        Ok(())
    }

    /// Parte síncrona de la validación (sin red).
    pub fn validate_fields(&self) -> Result<()> {
        match self.completion_config() {
            CompletionProviderConfig::OpenAi(s) => {
                require(&s.api_key, "OpenAI API key")?;
                require(&s.completion_model, "OpenAI completion model")?;
                require_url(&s.endpoint, "OpenAI endpoint")?;
            }
            CompletionProviderConfig::Anthropic(s) => {
                require(&s.api_key, "Anthropic API key")?;
                require(&s.completion_model, "Anthropic completion model")?;
                require_url(&s.endpoint, "Anthropic endpoint")?;
            }
            CompletionProviderConfig::Ollama(s) => {
                require(&s.completion_model, "Ollama completion model")?;
                require_url(&s.endpoint, "Ollama endpoint")?;
            }
            CompletionProviderConfig::View(s) => {
                require(&s.access_key, "View access key")?;
                require(&s.completion_model, "View completion model")?;
                require_url(&s.endpoint, "View endpoint")?;
            }
        }

        match self.embedding_config() {
            EmbeddingProviderConfig::OpenAi(s) => {
                require(&s.api_key, "OpenAI API key")?;
                require(&s.embedding_model, "OpenAI embedding model")?;
            }
            EmbeddingProviderConfig::Anthropic(s) => {
                require(&s.voyage_api_key, "Voyage API key")?;
                require(&s.voyage_embedding_model, "Voyage embedding model")?;
                require_url(&s.voyage_endpoint, "Voyage endpoint")?;
            }
            EmbeddingProviderConfig::Ollama(s) => {
                require(&s.embedding_model, "Ollama embedding model")?;
                require_url(&s.endpoint, "Ollama endpoint")?;
            }
            EmbeddingProviderConfig::View(s) => {
                require(&s.access_key, "View access key")?;
                require(&s.embedding_model, "View embedding model")?;
                require_url(&s.endpoint, "View endpoint")?;
            }
        }

        if self.rag.top_k == 0 {
            bail!("RAG top_k debe ser mayor que cero");
        }
        if !(0.0..=1.0).contains(&self.rag.similarity_threshold) {
            bail!(
                "RAG similarity_threshold fuera de rango: {}",
                self.rag.similarity_threshold
            );
        }
        Ok(())
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("El campo '{field}' es obligatorio");
    }
    Ok(())
}

fn require_url(value: &str, field: &str) -> Result<Url> {
    let url = Url::parse(value).map_err(|e| anyhow!("'{field}' no es una URL válida ({value}): {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("'{field}' debe usar http o https: {value}");
    }
    Ok(url)
}

async fn ensure_resolvable(endpoint: &str) -> Result<()> {
    let url = Url::parse(endpoint)?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("El endpoint {endpoint} no tiene host"))?;
    let port = url.port_or_known_default().unwrap_or(80);
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| anyhow!("No se pudo resolver {host}: {e}"))?;
    if addrs.next().is_none() {
        warn!("El host {host} no devolvió direcciones");
        bail!("No se pudo resolver {host}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!("OpenAI".parse::<CompletionProviderType>().unwrap(), CompletionProviderType::OpenAi);
        assert_eq!("voyage".parse::<EmbeddingProviderType>().unwrap(), EmbeddingProviderType::Anthropic);
        assert!("openia".parse::<CompletionProviderType>().is_err());
    }

    #[test]
    fn unknown_provider_is_rejected_by_serde() {
        let raw = r#"{ "completion_provider": "Gemini" }"#;
        assert!(serde_json::from_str::<AppSettings>(raw).is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let raw = r#"{ "embedding_provider": "Ollama", "rag": { "top_k": 3 } }"#;
        let settings: AppSettings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.embedding_provider, EmbeddingProviderType::Ollama);
        assert_eq!(settings.rag.top_k, 3);
        assert!(settings.rag.enable_rag);
        assert_eq!(settings.ollama.endpoint, "http://localhost:11434");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = AppSettings::default();
        settings.openai.api_key = "sk-test".to_string();
        settings.watched_paths.push(PathBuf::from("/tmp/docs"));
        settings.save(&path).unwrap();

        let loaded = AppSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppSettings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(loaded, AppSettings::default());
    }

    #[test]
    fn embedding_config_carries_selected_settings() {
        let mut settings = AppSettings::default();
        settings.embedding_provider = EmbeddingProviderType::Anthropic;
        settings.anthropic.voyage_embedding_model = "voyage-3-lite".to_string();
        match settings.embedding_config() {
            EmbeddingProviderConfig::Anthropic(s) => assert_eq!(s.voyage_embedding_model, "voyage-3-lite"),
            other => panic!("proveedor inesperado: {other:?}"),
        }
    }

    #[test]
    fn validation_requires_api_key_for_openai() {
        let settings = AppSettings::default();
        let err = settings.validate_fields().unwrap_err();
        assert!(err.to_string().contains("OpenAI API key"));
    }

    #[test]
    fn validation_rejects_malformed_endpoint() {
        let mut settings = AppSettings::default();
        settings.completion_provider = CompletionProviderType::Ollama;
        settings.embedding_provider = EmbeddingProviderType::Ollama;
        settings.ollama.endpoint = "localhost:11434".to_string();
        assert!(settings.validate_fields().is_err());

        settings.ollama.endpoint = "http://localhost:11434".to_string();
        assert!(settings.validate_fields().is_ok());
    }

    #[test]
    fn validation_resolves_self_hosted_endpoint() {
        let mut settings = AppSettings::default();
        settings.completion_provider = CompletionProviderType::Ollama;
        settings.embedding_provider = EmbeddingProviderType::Ollama;
        settings.ollama.endpoint = "http://127.0.0.1:11434".to_string();
        assert!(tokio_test::block_on(settings.validate()).is_ok());

        settings.rag.similarity_threshold = 1.5;
        assert!(tokio_test::block_on(settings.validate()).is_err());
    }
}
