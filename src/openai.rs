use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EMBED_DIMENSIONS;
use crate::llm::{ChatMessage, EmbedModel, LlmClient, ToolCall, ToolSpec};

const EMBED_BATCH_SIZE: usize = 10;
const CHAT_TEMPERATURE: f32 = 0.1;

#[derive(Clone, Debug)]
pub enum OpenAiEndpoint {
    Direct {
        api_base: String,
        api_key: String,
    },
    Azure {
        endpoint: String,
        api_key: String,
        api_version: String,
    },
}

impl OpenAiEndpoint {
    pub fn provider(&self) -> &'static str {
        match self {
            OpenAiEndpoint::Direct { .. } => "openai",
            OpenAiEndpoint::Azure { .. } => "azure_openai",
        }
    }

    // Azure routes by deployment name, the direct API by the model field in the body.
    pub fn url(&self, deployment: &str, path: &str) -> String {
        match self {
            OpenAiEndpoint::Direct { api_base, .. } => {
                format!("{}/{}", api_base.trim_end_matches('/'), path)
            }
            OpenAiEndpoint::Azure {
                endpoint,
                api_version,
                ..
            } => format!(
                "{}/openai/deployments/{}/{}?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                path,
                api_version
            ),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            OpenAiEndpoint::Direct { api_key, .. } => request.bearer_auth(api_key),
            OpenAiEndpoint::Azure { api_key, .. } => request.header("api-key", api_key),
        }
    }
}

#[derive(Clone)]
pub struct OpenAiChatClient {
    client: Client,
    endpoint: OpenAiEndpoint,
    model: String,
    deployment: Option<String>,
}

impl OpenAiChatClient {
    pub fn new(client: Client, endpoint: OpenAiEndpoint, model: impl Into<String>) -> Self {
        Self {
            client,
            endpoint,
            model: model.into(),
            deployment: None,
        }
    }

    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = Some(deployment.into());
        self
    }

    fn deployment(&self) -> &str {
        self.deployment.as_deref().unwrap_or(&self.model)
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    fn provider(&self) -> &str {
        self.endpoint.provider()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatMessage> {
        #[derive(Serialize)]
        struct FunctionDef<'a> {
            name: &'a str,
            description: &'a str,
            parameters: &'a Value,
        }

        #[derive(Serialize)]
        struct ToolDef<'a> {
            #[serde(rename = "type")]
            kind: &'static str,
            function: FunctionDef<'a>,
        }

        #[derive(Serialize)]
        struct ChatReq<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            temperature: f32,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            tools: Vec<ToolDef<'a>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            tool_choice: Option<&'static str>,
        }

        #[derive(Deserialize)]
        struct ChatResp {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: RespMessage,
        }

        #[derive(Deserialize)]
        struct RespMessage {
            role: Option<String>,
            content: Option<String>,
            tool_calls: Option<Vec<ToolCall>>,
        }

        let tool_defs: Vec<ToolDef<'_>> = tools
            .iter()
            .map(|tool| ToolDef {
                kind: "function",
                function: FunctionDef {
                    name: &tool.name,
                    description: &tool.description,
                    parameters: &tool.parameters,
                },
            })
            .collect();
        let tool_choice = if tool_defs.is_empty() {
            None
        } else {
            Some("auto")
        };

        let url = self.endpoint.url(self.deployment(), "chat/completions");
        let response = self
            .endpoint
            .authorize(self.client.post(url))
            .json(&ChatReq {
                model: &self.model,
                messages,
                temperature: CHAT_TEMPERATURE,
                tools: tool_defs,
                tool_choice,
            })
            .send()
            .await
            .with_context(|| format!("failed to call {} chat endpoint", self.provider()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "{} chat completion returned {status}: {}",
                self.provider(),
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<ChatResp>()
            .await
            .context("failed to decode chat completion response")?;

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| anyhow::anyhow!("chat completion returned no choices"))?;

        Ok(ChatMessage {
            role: message.role.unwrap_or_else(|| "assistant".to_string()),
            content: message.content,
            tool_calls: message.tool_calls.unwrap_or_default(),
            tool_call_id: None,
        })
    }
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    client: Client,
    endpoint: OpenAiEndpoint,
    model: String,
    deployment: Option<String>,
}

impl OpenAiEmbeddingClient {
    pub fn new(client: Client, endpoint: OpenAiEndpoint, model: impl Into<String>) -> Self {
        Self {
            client,
            endpoint,
            model: model.into(),
            deployment: None,
        }
    }

    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = Some(deployment.into());
        self
    }

    async fn embed_request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(Serialize)]
        struct EmbedReq<'a> {
            model: &'a str,
            input: &'a [String],
        }

        #[derive(Deserialize)]
        struct EmbedResp {
            data: Vec<EmbedData>,
        }

        #[derive(Deserialize)]
        struct EmbedData {
            #[serde(default)]
            index: usize,
            embedding: Vec<f32>,
        }

        let deployment = self.deployment.as_deref().unwrap_or(&self.model);
        let url = self.endpoint.url(deployment, "embeddings");
        let response = self
            .endpoint
            .authorize(self.client.post(url))
            .json(&EmbedReq {
                model: &self.model,
                input,
            })
            .send()
            .await
            .with_context(|| format!("failed to call {} embeddings endpoint", self.provider()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "{} embeddings returned {status}: {}",
                self.provider(),
                normalize_err_body(&body)
            );
        }

        let mut response = response
            .json::<EmbedResp>()
            .await
            .context("failed to decode embeddings response")?;

        if response.data.len() != input.len() {
            anyhow::bail!(
                "embeddings response returned {} vectors for {} inputs",
                response.data.len(),
                input.len()
            );
        }

        response.data.sort_by_key(|item| item.index);
        Ok(response.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl EmbedModel for OpenAiEmbeddingClient {
    fn provider(&self) -> &str {
        self.endpoint.provider()
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        EMBED_DIMENSIONS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            // The API rejects empty strings.
            let batch: Vec<String> = batch
                .iter()
                .map(|text| {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        " ".to_string()
                    } else {
                        trimmed.to_string()
                    }
                })
                .collect();
            vectors.extend(self.embed_request(&batch).await?);
        }
        Ok(vectors)
    }
}

pub(crate) fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        if let Some(err) = json.get("error") {
            if let Some(message) = err.get("message").and_then(|v| v.as_str()) {
                return message.to_string();
            }
            if let Some(message) = err.as_str() {
                return message.to_string();
            }
        }
        if let Some(message) = json.get("message").and_then(|v| v.as_str()) {
            return message.to_string();
        }
    }

    trimmed.to_string()
}
