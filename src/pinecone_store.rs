use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use crate::config::PineconeConfig;
use crate::models::{Metadata, Node, ScoredNode};
use crate::openai::normalize_err_body;
use crate::store::VectorStore;

const API_VERSION: &str = "2024-07";
const UPSERT_BATCH: usize = 64;
const READY_POLL_ATTEMPTS: usize = 120;
const TEXT_KEY: &str = "text";
const DOC_ID_KEY: &str = "doc_id";

#[derive(Clone)]
pub struct PineconeStore {
    client: Client,
    config: PineconeConfig,
    index_name: String,
    dimensions: usize,
    poll_interval: Duration,
    known_host: Arc<RwLock<Option<String>>>,
}

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    name: String,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    status: Option<IndexStatus>,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

impl PineconeStore {
    pub fn new(
        client: Client,
        config: PineconeConfig,
        index_name: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client,
            config,
            index_name: index_name.into(),
            dimensions,
            poll_interval: Duration::from_secs(1),
            known_host: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn controller(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.controller_url.trim_end_matches('/'),
            path
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Api-Key", &self.config.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    pub async fn list_indexes(&self) -> Result<Vec<String>> {
        let response = self
            .authorize(self.client.get(self.controller("indexes")))
            .send()
            .await
            .context("failed to contact pinecone while listing indexes")?;
        let list: IndexList = decode(response, "pinecone list indexes").await?;
        Ok(list.indexes.into_iter().map(|index| index.name).collect())
    }

    async fn describe_index(&self) -> Result<IndexDescription> {
        let url = self.controller(&format!("indexes/{}", self.index_name));
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .context("failed to contact pinecone while describing index")?;
        decode(response, "pinecone describe index").await
    }

    async fn create_index(&self) -> Result<()> {
        let response = self
            .authorize(self.client.post(self.controller("indexes")))
            .json(&create_index_body(
                &self.index_name,
                self.dimensions,
                &self.config,
            ))
            .send()
            .await
            .context("failed to contact pinecone while creating index")?;
        let _: Value = decode(response, "pinecone create index").await?;

        for _ in 0..READY_POLL_ATTEMPTS {
            let description = self.describe_index().await?;
            if description.status.map(|s| s.ready).unwrap_or(false) {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        anyhow::bail!(
            "pinecone index {} did not become ready in time",
            self.index_name
        )
    }

    async fn host(&self) -> Result<String> {
        if let Some(host) = self.known_host.read().await.clone() {
            return Ok(host);
        }

        let host = self
            .describe_index()
            .await?
            .host
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("pinecone index {} has no host yet", self.index_name)
            })?;
        let host = data_plane_url(&host);
        *self.known_host.write().await = Some(host.clone());
        Ok(host)
    }

    async fn data_post(&self, path: &str, body: &Value, what: &str) -> Result<Value> {
        let url = format!("{}/{}", self.host().await?, path);
        let response = self
            .authorize(self.client.post(url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to contact pinecone during {what}"))?;
        decode(response, what).await
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn name(&self) -> &'static str {
        "pinecone"
    }

    async fn prepare_ingest(&self) -> Result<Option<String>> {
        *self.known_host.write().await = None;

        if self.list_indexes().await?.contains(&self.index_name) {
            self.data_post("vectors/delete", &json!({ "deleteAll": true }), "delete all")
                .await?;
            tracing::info!(index = %self.index_name, "cleared pinecone index");
            return Ok(None);
        }

        let notice = format!("index not found: {}", self.index_name);
        tracing::warn!("{notice}");
        self.create_index().await?;
        tracing::info!(
            index = %self.index_name,
            dimensions = self.dimensions,
            "created pinecone index"
        );
        Ok(Some(notice))
    }

    async fn add(&self, nodes: &[Node]) -> Result<()> {
        for batch in nodes.chunks(UPSERT_BATCH) {
            let vectors: Vec<Value> = batch.iter().map(pinecone_vector).collect();
            self.data_post("vectors/upsert", &json!({ "vectors": vectors }), "upsert")
                .await?;
        }
        Ok(())
    }

    async fn open(&self) -> Result<()> {
        *self.known_host.write().await = None;
        self.host().await.map(|_| ())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredNode>> {
        #[derive(Deserialize)]
        struct QueryResp {
            #[serde(default)]
            matches: Vec<QueryMatch>,
        }

        #[derive(Deserialize)]
        struct QueryMatch {
            id: String,
            score: f32,
            #[serde(default)]
            metadata: Map<String, Value>,
        }

        if embedding.is_empty() {
            return Ok(vec![]);
        }

        let body = json!({
            "vector": embedding,
            "topK": top_k,
            "includeMetadata": true,
            "includeValues": false
        });
        let response: QueryResp =
            serde_json::from_value(self.data_post("query", &body, "query").await?)
                .context("failed to decode pinecone query response")?;

        Ok(response
            .matches
            .into_iter()
            .map(|hit| {
                let mut metadata: Metadata = hit
                    .metadata
                    .into_iter()
                    .map(|(key, value)| {
                        let value = match value {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (key, value)
                    })
                    .collect();
                let text = metadata.remove(TEXT_KEY).unwrap_or_default();
                let doc_id = metadata.remove(DOC_ID_KEY).unwrap_or_default();
                ScoredNode {
                    score: hit.score,
                    node: Node {
                        id: hit.id,
                        doc_id,
                        text,
                        metadata,
                        embedding: vec![],
                    },
                }
            })
            .collect())
    }
}

pub fn create_index_body(index_name: &str, dimensions: usize, config: &PineconeConfig) -> Value {
    json!({
        "name": index_name,
        "dimension": dimensions,
        "metric": "euclidean",
        "spec": {
            "serverless": {
                "cloud": config.cloud,
                "region": config.region
            }
        }
    })
}

fn pinecone_vector(node: &Node) -> Value {
    let mut metadata: Map<String, Value> = node
        .metadata
        .iter()
        .map(|(key, value)| (key.clone(), json!(value)))
        .collect();
    metadata.insert(TEXT_KEY.to_string(), json!(node.text));
    metadata.insert(DOC_ID_KEY.to_string(), json!(node.doc_id));

    json!({
        "id": node.id,
        "values": node.embedding,
        "metadata": metadata
    })
}

fn data_plane_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(response: reqwest::Response, what: &str) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{what} returned {status}: {}", normalize_err_body(&body));
    }

    let body = response.text().await.unwrap_or_default();
    let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
    serde_json::from_str(body).with_context(|| format!("failed to decode {what} response"))
}
