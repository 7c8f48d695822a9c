use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::{Metadata, Node, ScoredNode};
use crate::store::VectorStore;

const DOCSTORE_FILE: &str = "docstore.json";
const VECTOR_STORE_FILE: &str = "default__vector_store.json";

#[derive(Clone)]
pub struct LocalStore {
    persist_dir: PathBuf,
    nodes: Arc<RwLock<Vec<Node>>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DocStoreFile {
    nodes: BTreeMap<String, StoredNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredNode {
    doc_id: String,
    text: String,
    metadata: Metadata,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VectorStoreFile {
    embedding_dict: BTreeMap<String, Vec<f32>>,
    text_id_to_ref_doc_id: BTreeMap<String, String>,
}

impl LocalStore {
    pub fn new(persist_dir: PathBuf) -> Self {
        Self {
            persist_dir,
            nodes: Arc::new(RwLock::new(Vec::new())),
        }
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(&self, file: &str) -> Result<T> {
        let path = self.persist_dir.join(file);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed reading {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("failed to parse {}", path.display()))
    }
}

#[async_trait]
impl VectorStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn prepare_ingest(&self) -> Result<Option<String>> {
        self.nodes.write().await.clear();
        Ok(None)
    }

    async fn add(&self, nodes: &[Node]) -> Result<()> {
        if let Some(node) = nodes.iter().find(|node| node.embedding.is_empty()) {
            anyhow::bail!("node {} has no embedding", node.id);
        }
        self.nodes.write().await.extend_from_slice(nodes);
        Ok(())
    }

    async fn discard_local_state(&self) {
        self.nodes.write().await.clear();
    }

    async fn commit(&self) -> Result<()> {
        let nodes = self.nodes.read().await;

        let mut docstore = DocStoreFile::default();
        let mut vectors = VectorStoreFile::default();
        for node in nodes.iter() {
            docstore.nodes.insert(
                node.id.clone(),
                StoredNode {
                    doc_id: node.doc_id.clone(),
                    text: node.text.clone(),
                    metadata: node.metadata.clone(),
                },
            );
            vectors
                .embedding_dict
                .insert(node.id.clone(), node.embedding.clone());
            vectors
                .text_id_to_ref_doc_id
                .insert(node.id.clone(), node.doc_id.clone());
        }

        tokio::fs::create_dir_all(&self.persist_dir).await?;
        tokio::fs::write(
            self.persist_dir.join(DOCSTORE_FILE),
            serde_json::to_vec(&docstore)?,
        )
        .await
        .context("failed to persist docstore")?;
        tokio::fs::write(
            self.persist_dir.join(VECTOR_STORE_FILE),
            serde_json::to_vec(&vectors)?,
        )
        .await
        .context("failed to persist vector store")?;

        tracing::info!(
            dir = %self.persist_dir.display(),
            nodes = nodes.len(),
            "persisted local index"
        );
        Ok(())
    }

    async fn open(&self) -> Result<()> {
        if !self.persist_dir.join(DOCSTORE_FILE).exists() {
            self.nodes.write().await.clear();
            anyhow::bail!(
                "no persisted index found in {}; ingest a document first",
                self.persist_dir.display()
            );
        }

        let docstore: DocStoreFile = self.read_json(DOCSTORE_FILE).await?;
        let mut vectors: VectorStoreFile = self.read_json(VECTOR_STORE_FILE).await?;

        let mut loaded = Vec::with_capacity(docstore.nodes.len());
        for (id, stored) in docstore.nodes {
            let embedding = vectors
                .embedding_dict
                .remove(&id)
                .ok_or_else(|| anyhow::anyhow!("persisted node {id} has no embedding"))?;
            loaded.push(Node {
                id,
                doc_id: stored.doc_id,
                text: stored.text,
                metadata: stored.metadata,
                embedding,
            });
        }

        *self.nodes.write().await = loaded;
        Ok(())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredNode>> {
        let nodes = self.nodes.read().await;
        let mut scored: Vec<ScoredNode> = nodes
            .iter()
            .map(|node| ScoredNode {
                score: cosine_similarity(embedding, &node.embedding),
                node: node.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, text: &str, embedding: Vec<f32>) -> Node {
        Node {
            id: id.to_string(),
            doc_id: "doc".to_string(),
            text: text.to_string(),
            metadata: Metadata::from([("page_label".to_string(), "1".to_string())]),
            embedding,
        }
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        store
            .add(&[
                node("a", "about cats", vec![1.0, 0.0]),
                node("b", "about dogs", vec![0.0, 1.0]),
                node("c", "cats and dogs", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].node.id, "a");
        assert_eq!(hits[1].node.id, "c");
    }

    #[tokio::test]
    async fn commit_then_open_restores_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("vector"));
        store
            .add(&[node("a", "persisted text", vec![0.5, 0.5])])
            .await
            .unwrap();
        store.commit().await.unwrap();

        assert!(dir.path().join("vector").join(DOCSTORE_FILE).exists());
        assert!(dir.path().join("vector").join(VECTOR_STORE_FILE).exists());

        let reopened = LocalStore::new(dir.path().join("vector"));
        reopened.open().await.unwrap();
        let hits = reopened.search(&[0.5, 0.5], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.text, "persisted text");
        assert_eq!(hits[0].node.metadata["page_label"], "1");
    }

    #[tokio::test]
    async fn open_without_persisted_index_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        let err = store.open().await.unwrap_err();
        assert!(err.to_string().contains("no persisted index found"));
    }

    #[tokio::test]
    async fn prepare_ingest_clears_previous_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        store.add(&[node("a", "old", vec![1.0])]).await.unwrap();
        assert_eq!(store.prepare_ingest().await.unwrap(), None);
        assert!(store.search(&[1.0], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_after_files_vanish_forgets_stale_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        store.add(&[node("a", "old", vec![1.0])]).await.unwrap();
        store.commit().await.unwrap();
        std::fs::remove_file(dir.path().join(DOCSTORE_FILE)).unwrap();

        assert!(store.open().await.is_err());
        assert!(store.search(&[1.0], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn nodes_without_embeddings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        assert!(store.add(&[node("a", "text", vec![])]).await.is_err());
    }
}
