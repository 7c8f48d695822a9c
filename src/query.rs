use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::AgentTool;
use crate::index::VectorIndex;
use crate::llm::{ChatMessage, LlmClient, ToolSpec};
use crate::models::ScoredNode;

pub const EMPTY_RESPONSE: &str = "Empty Response";

const QA_SYSTEM_PROMPT: &str = "You are an expert Q&A system that is trusted around the world.\n\
Always answer the query using the provided context information, and not prior knowledge.\n\
Some rules to follow:\n\
1. Never directly reference the given context in your answer.\n\
2. Avoid statements like 'Based on the context, ...' or 'The context information ...' or anything along those lines.";

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub response: String,
    pub source_nodes: Vec<ScoredNode>,
}

#[derive(Clone)]
pub struct QueryEngine {
    index: VectorIndex,
    llm: Arc<dyn LlmClient>,
}

impl QueryEngine {
    pub fn new(index: VectorIndex, llm: Arc<dyn LlmClient>) -> Self {
        Self { index, llm }
    }

    pub async fn query(&self, query: &str) -> Result<QueryResponse> {
        let source_nodes = self
            .index
            .retrieve(query, self.index.similarity_top_k())
            .await?;

        if source_nodes.is_empty() {
            return Ok(QueryResponse {
                response: EMPTY_RESPONSE.to_string(),
                source_nodes,
            });
        }

        let messages = [
            ChatMessage::system(QA_SYSTEM_PROMPT),
            ChatMessage::user(build_qa_prompt(query, &source_nodes)),
        ];
        let reply = self.llm.chat(&messages, &[]).await?;
        let response = reply.text().trim().to_string();

        Ok(QueryResponse {
            response: if response.is_empty() {
                EMPTY_RESPONSE.to_string()
            } else {
                response
            },
            source_nodes,
        })
    }
}

fn build_qa_prompt(query: &str, nodes: &[ScoredNode]) -> String {
    let context = nodes
        .iter()
        .map(|scored| {
            let mut block = String::new();
            for (key, value) in &scored.node.metadata {
                if key == "file_name" || key == "page_label" {
                    block.push_str(&format!("{key}: {value}\n"));
                }
            }
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str(&scored.node.text);
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Context information is below.\n\
---------------------\n\
{context}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {query}\n\
Answer: "
    )
}

pub struct QueryEngineTool {
    engine: QueryEngine,
}

impl QueryEngineTool {
    pub const NAME: &'static str = "query_engine_tool";

    pub fn new(engine: QueryEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl AgentTool for QueryEngineTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: Self::NAME.to_string(),
            description: "Useful for running a natural language query against a knowledge base and get back a natural language response.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "input": {
                        "type": "string",
                        "description": "The natural language query to run against the document index"
                    }
                },
                "required": ["input"]
            }),
        }
    }

    async fn call(&self, args: &Value) -> Result<String> {
        let input = args
            .get("input")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required 'input' parameter"))?;

        let response = self.engine.query(input).await?;
        tracing::info!(
            query = input,
            sources = response.source_nodes.len(),
            "query engine tool answered"
        );
        Ok(response.response)
    }
}
