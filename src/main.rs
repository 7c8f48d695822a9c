use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use chatpdf::agent::{AgentTool, ToolAgent};
use chatpdf::chat::ChatService;
use chatpdf::config::VectorService;
use chatpdf::index::VectorIndex;
use chatpdf::ingest::Ingestor;
use chatpdf::llm::Providers;
use chatpdf::query::{QueryEngine, QueryEngineTool};
use chatpdf::session::SessionStore;
use chatpdf::store;
use chatpdf::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        vector_service = %config.vector_service,
        azure_openai = config.is_azure(),
        data_folder = %config.data_folder.display(),
        "loaded configuration"
    );
    tokio::fs::create_dir_all(&config.data_folder).await?;
    tokio::fs::create_dir_all(&config.vector_folder).await?;

    let providers = Providers::from_config(&config);
    let store = store::from_config(&config, reqwest::Client::new());

    if config.vector_service == VectorService::Local {
        if let Err(err) = store.open().await {
            tracing::warn!("starting with an empty local index: {err:#}");
        }
    }

    let index = VectorIndex::new(
        store.clone(),
        providers.embed_model.clone(),
        config.retrieval.clone(),
    );

    let engine = QueryEngine::new(index.clone(), providers.llm.clone());
    let tool: Arc<dyn AgentTool> = Arc::new(QueryEngineTool::new(engine));
    let agent = ToolAgent::new(providers.llm.clone(), vec![tool]);
    let chat = ChatService::new(store, agent, SessionStore::new());

    let ingestor = Ingestor::new(&config, index);

    run_server(config, chat, ingestor).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
