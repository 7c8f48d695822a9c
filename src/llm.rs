use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{AppConfig, ProviderConfig};
use crate::openai::{OpenAiChatClient, OpenAiEmbeddingClient, OpenAiEndpoint};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: vec![],
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatMessage>;
}

#[async_trait]
pub trait EmbedModel: Send + Sync {
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedding response contained no vectors"))
    }
}

#[derive(Clone)]
pub struct Providers {
    pub llm: Arc<dyn LlmClient>,
    pub embed_model: Arc<dyn EmbedModel>,
}

impl Providers {
    pub fn from_config(config: &AppConfig) -> Self {
        let http = reqwest::Client::new();

        let providers = match &config.provider {
            ProviderConfig::Azure(azure) => {
                let endpoint = OpenAiEndpoint::Azure {
                    endpoint: azure.endpoint.clone(),
                    api_key: azure.api_key.clone(),
                    api_version: azure.api_version.clone(),
                };
                Self {
                    llm: Arc::new(
                        OpenAiChatClient::new(http.clone(), endpoint.clone(), &azure.chat_model)
                            .with_deployment(&azure.chat_deployment),
                    ),
                    embed_model: Arc::new(
                        OpenAiEmbeddingClient::new(http, endpoint, &azure.embed_model)
                            .with_deployment(&azure.embed_deployment),
                    ),
                }
            }
            ProviderConfig::OpenAi(openai) => {
                let endpoint = OpenAiEndpoint::Direct {
                    api_base: openai.api_base.clone(),
                    api_key: openai.api_key.clone(),
                };
                Self {
                    llm: Arc::new(OpenAiChatClient::new(
                        http.clone(),
                        endpoint.clone(),
                        &openai.chat_model,
                    )),
                    embed_model: Arc::new(OpenAiEmbeddingClient::new(
                        http,
                        endpoint,
                        &openai.embed_model,
                    )),
                }
            }
        };

        tracing::info!(
            provider = providers.llm.provider(),
            llm = providers.llm.model(),
            embed_model = providers.embed_model.model(),
            "configured language and embedding models"
        );
        providers
    }
}
