use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chatpdf::config::AppConfig;
use chatpdf::index::VectorIndex;
use chatpdf::ingest::Ingestor;
use chatpdf::llm::Providers;
use chatpdf::models::{IngestStatus, UploadedFile};
use chatpdf::store;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Ingest a PDF into the configured vector service")]
struct Cli {
    #[arg(long)]
    pdf: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::from_env()?;
    let providers = Providers::from_config(&config);
    let store = store::from_config(&config, reqwest::Client::new());
    let index = VectorIndex::new(store, providers.embed_model, config.retrieval.clone());
    let ingestor = Ingestor::new(&config, index);

    let bytes = tokio::fs::read(&cli.pdf)
        .await
        .with_context(|| format!("failed reading {}", cli.pdf.display()))?;
    let upload = UploadedFile {
        file_name: cli
            .pdf
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        bytes,
    };

    let report = ingestor
        .ingest(Some(upload), |stage| println!("[{}] {}", config.vector_service, stage.as_str()))
        .await;

    for notice in &report.notices {
        println!("notice: {notice}");
    }
    println!(
        "{} documents={} nodes={}",
        report.message, report.document_count, report.node_count
    );

    if report.status != IngestStatus::Success {
        anyhow::bail!("ingest did not complete: {}", report.message);
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
