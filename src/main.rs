use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use view_personal_rag::{
    api,
    app_state::AppState,
    config::{AppSettings, GraphBackend},
    graph_store::GraphStore,
    local_store::LocalGraphStore,
    neo4j_client::Neo4jGraphStore,
};

const LOCAL_GRAPH_FILE: &str = "knowledge_graph.json";

async fn open_store(settings: &AppSettings) -> Result<Arc<dyn GraphStore>> {
    match &settings.graph.backend {
        GraphBackend::Neo4j { uri, user, password } => {
            let store = Neo4jGraphStore::connect(uri, user, password, settings.graph.vector_dimensions)
                .await
                .context("Error conectando a Neo4j")?;
            Ok(Arc::new(store))
        }
        GraphBackend::Local { path } => {
            let path = match path {
                Some(p) => p.clone(),
                None => AppSettings::app_dir()?.join(LOCAL_GRAPH_FILE),
            };
            Ok(Arc::new(LocalGraphStore::open(path).await?))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 2. Cargar configuración
    let (settings, settings_path) = AppSettings::from_env().context("Error al cargar la configuración")?;
    if let Err(e) = settings.validate_fields() {
        warn!("Configuración incompleta ({e:#}); ajústala con PUT /api/settings.");
    }

    // 3. Abrir el grafo de conocimiento
    let store = open_store(&settings).await?;

    // 4. Estado compartido y canal de apagado
    let server_addr = settings.server_addr.clone();
    let (app_state, shutdown_rx) = AppState::new(settings, settings_path, store);

    // 5. Router de la API
    let app = api::create_router(app_state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 6. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{server_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
