use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;

use crate::aisearch_store::AiSearchStore;
use crate::config::{AppConfig, VectorService, EMBED_DIMENSIONS};
use crate::local_store::LocalStore;
use crate::models::{Node, ScoredNode};
use crate::pinecone_store::PineconeStore;

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resets the backend before a replace-all ingest. May return a notice for the user.
    async fn prepare_ingest(&self) -> Result<Option<String>>;

    async fn add(&self, nodes: &[Node]) -> Result<()>;

    /// Drops in-process state backed by the vector folder, called once that
    /// folder has been emptied.
    async fn discard_local_state(&self) {}

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    /// Re-opens the backend for querying; fails when there is nothing to query.
    async fn open(&self) -> Result<()>;

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredNode>>;
}

pub fn from_config(config: &AppConfig, http: Client) -> Arc<dyn VectorStore> {
    let store: Arc<dyn VectorStore> = match config.vector_service {
        VectorService::Local => Arc::new(LocalStore::new(config.vector_folder.clone())),
        VectorService::AiSearch => Arc::new(AiSearchStore::new(
            http,
            config.aisearch.endpoint.clone(),
            config.aisearch.api_key.clone(),
            config.index_name.clone(),
            EMBED_DIMENSIONS,
        )),
        VectorService::Pinecone => Arc::new(PineconeStore::new(
            http,
            config.pinecone.clone(),
            config.index_name.clone(),
            EMBED_DIMENSIONS,
        )),
    };

    tracing::info!(
        backend = store.name(),
        index = %config.index_name,
        "selected vector backend"
    );
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_for(service: &str) -> AppConfig {
        let vars: HashMap<String, String> = [("VECTOR_SERVICE", service)]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn each_service_value_builds_exactly_its_backend() {
        let cases = [
            ("LOCAL", "local"),
            ("AISEARCH", "aisearch"),
            ("PINECONE", "pinecone"),
        ];
        for (service, expected) in cases {
            let store = from_config(&config_for(service), Client::new());
            assert_eq!(store.name(), expected, "VECTOR_SERVICE={service}");
        }
    }
}
