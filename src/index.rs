use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::llm::EmbedModel;
use crate::models::{Document, Node, ScoredNode};
use crate::store::VectorStore;

#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    embed_model: Arc<dyn EmbedModel>,
    retrieval: RetrievalConfig,
}

impl VectorIndex {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embed_model: Arc<dyn EmbedModel>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embed_model,
            retrieval,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn similarity_top_k(&self) -> usize {
        self.retrieval.similarity_top_k
    }

    pub async fn build(&self, documents: &[Document]) -> Result<usize> {
        let mut nodes = split_documents(
            documents,
            self.retrieval.chunk_size,
            self.retrieval.chunk_overlap,
        );
        if nodes.is_empty() {
            anyhow::bail!("no nodes generated from {} documents", documents.len());
        }

        let texts: Vec<String> = nodes.iter().map(|node| node.text.clone()).collect();
        let embeddings = self
            .embed_model
            .embed_batch(&texts)
            .await
            .context("failed to embed document nodes")?;
        if embeddings.len() != nodes.len() {
            anyhow::bail!(
                "embedding model returned {} vectors for {} nodes",
                embeddings.len(),
                nodes.len()
            );
        }
        for (node, embedding) in nodes.iter_mut().zip(embeddings) {
            node.embedding = embedding;
        }

        self.store.add(&nodes).await?;
        self.store.commit().await?;

        tracing::info!(
            backend = self.store.name(),
            nodes = nodes.len(),
            "indexed document nodes"
        );
        Ok(nodes.len())
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredNode>> {
        let embedding = self
            .embed_model
            .embed(query)
            .await
            .context("failed to embed query")?;
        self.store.search(&embedding, top_k).await
    }
}

pub fn split_documents(documents: &[Document], chunk_size: usize, overlap: usize) -> Vec<Node> {
    let chunk_size = chunk_size.max(1);
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut nodes = Vec::new();

    for document in documents {
        let words: Vec<&str> = document.text.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        let mut start = 0;
        let mut chunk_index = 0;
        loop {
            let end = (start + chunk_size).min(words.len());
            let mut metadata = document.metadata.clone();
            metadata.insert("chunk_index".to_string(), chunk_index.to_string());

            nodes.push(Node {
                id: Uuid::new_v4().to_string(),
                doc_id: document.id.clone(),
                text: words[start..end].join(" "),
                metadata,
                embedding: vec![],
            });

            if end == words.len() {
                break;
            }
            start += step;
            chunk_index += 1;
        }
    }

    nodes
}
