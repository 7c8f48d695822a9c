use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::models::{Metadata, Node, ScoredNode};
use crate::openai::normalize_err_body;
use crate::store::VectorStore;

const API_VERSION: &str = "2023-11-01";
const UPLOAD_BATCH: usize = 64;
const VECTOR_PROFILE: &str = "chatpdf-vector-profile";
const VECTOR_ALGORITHM: &str = "chatpdf-exhaustive-knn";

/// Node metadata keys mapped to filterable index fields.
pub const METADATA_FIELDS: [(&str, &str); 3] = [
    ("author", "author"),
    ("theme", "topic"),
    ("director", "director"),
];

#[derive(Clone)]
pub struct AiSearchStore {
    client: Client,
    endpoint: String,
    api_key: String,
    index_name: String,
    dimensions: usize,
}

impl AiSearchStore {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        index_name: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            index_name: index_name.into(),
            dimensions,
        }
    }

    fn index_url(&self) -> String {
        format!(
            "{}/indexes/{}?api-version={}",
            self.endpoint, self.index_name, API_VERSION
        )
    }

    fn docs_url(&self, action: &str) -> String {
        format!(
            "{}/indexes/{}/docs/{}?api-version={}",
            self.endpoint, self.index_name, action, API_VERSION
        )
    }

    pub async fn index_exists(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.index_url())
            .header("api-key", &self.api_key)
            .send()
            .await
            .context("failed to contact AI Search while looking up index")?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!(
                    "AI Search index lookup returned {status}: {}",
                    normalize_err_body(&body)
                )
            }
        }
    }

    async fn create_index(&self) -> Result<()> {
        let response = self
            .client
            .put(self.index_url())
            .header("api-key", &self.api_key)
            .json(&index_definition(&self.index_name, self.dimensions))
            .send()
            .await
            .context("failed to contact AI Search while creating index")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "AI Search index creation returned {status}: {}",
                normalize_err_body(&body)
            );
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for AiSearchStore {
    fn name(&self) -> &'static str {
        "aisearch"
    }

    async fn prepare_ingest(&self) -> Result<Option<String>> {
        if self.index_exists().await? {
            tracing::info!(index = %self.index_name, "AI Search index already exists");
            return Ok(None);
        }

        self.create_index().await?;
        tracing::info!(
            index = %self.index_name,
            dimensions = self.dimensions,
            "created AI Search index"
        );
        Ok(None)
    }

    async fn add(&self, nodes: &[Node]) -> Result<()> {
        for batch in nodes.chunks(UPLOAD_BATCH) {
            let value: Vec<Value> = batch.iter().map(search_document).collect();
            let response = self
                .client
                .post(self.docs_url("index"))
                .header("api-key", &self.api_key)
                .json(&json!({ "value": value }))
                .send()
                .await
                .context("failed to contact AI Search during upload")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!(
                    "AI Search upload returned {status}: {}",
                    normalize_err_body(&body)
                );
            }
        }
        Ok(())
    }

    async fn open(&self) -> Result<()> {
        if !self.index_exists().await? {
            anyhow::bail!("AI Search index {} does not exist", self.index_name);
        }
        Ok(())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredNode>> {
        #[derive(Deserialize)]
        struct SearchResp {
            value: Vec<SearchHit>,
        }

        #[derive(Deserialize)]
        struct SearchHit {
            #[serde(rename = "@search.score")]
            score: f32,
            id: String,
            chunk: Option<String>,
            metadata: Option<String>,
            doc_id: Option<String>,
        }

        if embedding.is_empty() {
            return Ok(vec![]);
        }

        let body = json!({
            "select": "id,chunk,metadata,doc_id",
            "top": top_k,
            "vectorQueries": [{
                "kind": "vector",
                "vector": embedding,
                "k": top_k,
                "fields": "embedding"
            }]
        });

        let response = self
            .client
            .post(self.docs_url("search"))
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to contact AI Search during search")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "AI Search query returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<SearchResp>()
            .await
            .context("failed to decode AI Search response")?;

        Ok(response
            .value
            .into_iter()
            .map(|hit| ScoredNode {
                score: hit.score,
                node: Node {
                    id: hit.id,
                    doc_id: hit.doc_id.unwrap_or_default(),
                    text: hit.chunk.unwrap_or_default(),
                    metadata: hit
                        .metadata
                        .and_then(|raw| serde_json::from_str::<Metadata>(&raw).ok())
                        .unwrap_or_default(),
                    embedding: vec![],
                },
            })
            .collect())
    }
}

pub fn index_definition(index_name: &str, dimensions: usize) -> Value {
    let mut fields = vec![
        json!({ "name": "id", "type": "Edm.String", "key": true, "filterable": true }),
        json!({
            "name": "chunk",
            "type": "Edm.String",
            "searchable": true,
            "analyzer": "en.lucene"
        }),
        json!({
            "name": "embedding",
            "type": "Collection(Edm.Single)",
            "searchable": true,
            "dimensions": dimensions,
            "vectorSearchProfile": VECTOR_PROFILE
        }),
        json!({ "name": "metadata", "type": "Edm.String" }),
        json!({ "name": "doc_id", "type": "Edm.String", "filterable": true }),
    ];
    for (_, field) in METADATA_FIELDS {
        fields.push(json!({ "name": field, "type": "Edm.String", "filterable": true }));
    }

    json!({
        "name": index_name,
        "fields": fields,
        "vectorSearch": {
            "algorithms": [{
                "name": VECTOR_ALGORITHM,
                "kind": "exhaustiveKnn",
                "exhaustiveKnnParameters": { "metric": "cosine" }
            }],
            "profiles": [{ "name": VECTOR_PROFILE, "algorithm": VECTOR_ALGORITHM }]
        }
    })
}

fn search_document(node: &Node) -> Value {
    let mut document = Map::new();
    document.insert("@search.action".to_string(), json!("mergeOrUpload"));
    document.insert("id".to_string(), json!(node.id));
    document.insert("chunk".to_string(), json!(node.text));
    document.insert("embedding".to_string(), json!(node.embedding));
    document.insert(
        "metadata".to_string(),
        json!(serde_json::to_string(&node.metadata).unwrap_or_default()),
    );
    document.insert("doc_id".to_string(), json!(node.doc_id));
    for (key, field) in METADATA_FIELDS {
        if let Some(value) = node.metadata.get(key) {
            document.insert(field.to_string(), json!(value));
        }
    }
    Value::Object(document)
}
