use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;

pub const EMBED_DIMENSIONS: usize = 1536;

const OPENAI_CHAT_MODEL: &str = "gpt-3.5-turbo";
const OPENAI_EMBED_MODEL: &str = "text-embedding-ada-002";
const AZURE_CHAT_MODEL: &str = "gpt-35-turbo";
const AZURE_CHAT_DEPLOYMENT: &str = "rag35";
const AZURE_EMBED_MODEL: &str = "text-embedding-ada-002";
const AZURE_EMBED_DEPLOYMENT: &str = "ragada";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorService {
    Local,
    AiSearch,
    Pinecone,
}

impl VectorService {
    pub fn as_str(self) -> &'static str {
        match self {
            VectorService::Local => "LOCAL",
            VectorService::AiSearch => "AISEARCH",
            VectorService::Pinecone => "PINECONE",
        }
    }
}

impl FromStr for VectorService {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "LOCAL" => Ok(VectorService::Local),
            "AISEARCH" => Ok(VectorService::AiSearch),
            "PINECONE" => Ok(VectorService::Pinecone),
            other => anyhow::bail!(
                "unsupported VECTOR_SERVICE {other:?}; expected LOCAL, AISEARCH or PINECONE"
            ),
        }
    }
}

impl fmt::Display for VectorService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct AzureOpenAiConfig {
    pub api_key: String,
    pub endpoint: String,
    pub api_version: String,
    pub chat_model: String,
    pub chat_deployment: String,
    pub embed_model: String,
    pub embed_deployment: String,
}

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub api_base: String,
    pub chat_model: String,
    pub embed_model: String,
}

#[derive(Clone, Debug)]
pub enum ProviderConfig {
    Azure(AzureOpenAiConfig),
    OpenAi(OpenAiConfig),
}

#[derive(Clone, Debug)]
pub struct AiSearchConfig {
    pub endpoint: String,
    pub api_key: String,
}

#[derive(Clone, Debug)]
pub struct PineconeConfig {
    pub api_key: String,
    pub controller_url: String,
    pub cloud: String,
    pub region: String,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub similarity_top_k: usize,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_folder: PathBuf,
    pub vector_folder: PathBuf,
    pub provider: ProviderConfig,
    pub vector_service: VectorService,
    pub index_name: String,
    pub aisearch: AiSearchConfig,
    pub pinecone: PineconeConfig,
    pub retrieval: RetrievalConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let number = |key: &str, default: usize| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let provider = if lookup("IS_AZURE_OPENAI").as_deref() == Some("True") {
            ProviderConfig::Azure(AzureOpenAiConfig {
                api_key: var("AZURE_OPENAI_API_KEY", ""),
                endpoint: var("AZURE_OPENAI_END_POINT", ""),
                api_version: var("AZURE_OPENAI_API_VERSION", ""),
                chat_model: AZURE_CHAT_MODEL.to_string(),
                chat_deployment: AZURE_CHAT_DEPLOYMENT.to_string(),
                embed_model: AZURE_EMBED_MODEL.to_string(),
                embed_deployment: AZURE_EMBED_DEPLOYMENT.to_string(),
            })
        } else {
            ProviderConfig::OpenAi(OpenAiConfig {
                api_key: var("OPENAI_API_KEY", ""),
                api_base: var("OPENAI_API_BASE", "https://api.openai.com/v1"),
                chat_model: OPENAI_CHAT_MODEL.to_string(),
                embed_model: OPENAI_EMBED_MODEL.to_string(),
            })
        };

        let vector_service = lookup("VECTOR_SERVICE")
            .ok_or_else(|| {
                anyhow::anyhow!("VECTOR_SERVICE must be set to LOCAL, AISEARCH or PINECONE")
            })?
            .parse()?;

        Ok(Self {
            bind_addr: var("CHATPDF_BIND", "127.0.0.1:8501"),
            data_folder: PathBuf::from(var("DATA_FOLDER", "./data")),
            vector_folder: PathBuf::from(var("VECTOR_FOLDER", "./vector")),
            provider,
            vector_service,
            index_name: var("INDEX_NAME", "chatpdf"),
            aisearch: AiSearchConfig {
                endpoint: var("AISEARCH_END_POINT", ""),
                api_key: var("AISEARCH_API_KEY", ""),
            },
            pinecone: PineconeConfig {
                api_key: var("PINECONE_API_KEY", ""),
                controller_url: var("PINECONE_CONTROLLER_URL", "https://api.pinecone.io"),
                cloud: "aws".to_string(),
                region: "us-west-2".to_string(),
            },
            retrieval: RetrievalConfig {
                chunk_size: number("CHUNK_SIZE", 1024).max(1),
                chunk_overlap: number("CHUNK_OVERLAP", 200),
                similarity_top_k: number("SIMILARITY_TOP_K", 2).max(1),
            },
        })
    }

    pub fn is_azure(&self) -> bool {
        matches!(self.provider, ProviderConfig::Azure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn azure_flag_selects_managed_provider() {
        let config = config_from(&[
            ("IS_AZURE_OPENAI", "True"),
            ("AZURE_OPENAI_API_KEY", "azure-key"),
            ("AZURE_OPENAI_END_POINT", "https://rag.openai.azure.com"),
            ("AZURE_OPENAI_API_VERSION", "2024-02-01"),
            ("VECTOR_SERVICE", "LOCAL"),
        ])
        .unwrap();

        match config.provider {
            ProviderConfig::Azure(azure) => {
                assert_eq!(azure.api_key, "azure-key");
                assert_eq!(azure.chat_deployment, "rag35");
                assert_eq!(azure.embed_deployment, "ragada");
            }
            ProviderConfig::OpenAi(_) => panic!("expected azure provider"),
        }
    }

    #[test]
    fn any_other_flag_value_selects_direct_provider() {
        for flag in ["true", "False", "1", ""] {
            let config = config_from(&[
                ("IS_AZURE_OPENAI", flag),
                ("OPENAI_API_KEY", "sk-test"),
                ("VECTOR_SERVICE", "LOCAL"),
            ])
            .unwrap();
            assert!(!config.is_azure(), "flag {flag:?} must not select azure");
        }

        let config = config_from(&[("VECTOR_SERVICE", "PINECONE")]).unwrap();
        match config.provider {
            ProviderConfig::OpenAi(openai) => {
                assert_eq!(openai.chat_model, "gpt-3.5-turbo");
                assert_eq!(openai.api_base, "https://api.openai.com/v1");
            }
            ProviderConfig::Azure(_) => panic!("expected openai provider"),
        }
    }

    #[test]
    fn vector_service_values_parse() {
        assert_eq!("LOCAL".parse::<VectorService>().unwrap(), VectorService::Local);
        assert_eq!(
            "AISEARCH".parse::<VectorService>().unwrap(),
            VectorService::AiSearch
        );
        assert_eq!(
            "PINECONE".parse::<VectorService>().unwrap(),
            VectorService::Pinecone
        );
        assert!("local".parse::<VectorService>().is_err());
        assert!(config_from(&[]).is_err());
    }

    #[test]
    fn folders_and_retrieval_defaults() {
        let config = config_from(&[
            ("VECTOR_SERVICE", "AISEARCH"),
            ("DATA_FOLDER", "/tmp/chatpdf/data"),
            ("CHUNK_SIZE", "256"),
        ])
        .unwrap();

        assert_eq!(config.data_folder, PathBuf::from("/tmp/chatpdf/data"));
        assert_eq!(config.vector_folder, PathBuf::from("./vector"));
        assert_eq!(config.retrieval.chunk_size, 256);
        assert_eq!(config.retrieval.chunk_overlap, 200);
        assert_eq!(config.retrieval.similarity_top_k, 2);
        assert_eq!(config.pinecone.region, "us-west-2");
    }
}
