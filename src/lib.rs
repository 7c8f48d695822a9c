pub mod agent;
pub mod aisearch_store;
pub mod chat;
pub mod config;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod local_store;
pub mod models;
pub mod openai;
pub mod pinecone_store;
pub mod query;
pub mod server;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::AppConfig;
pub use server::run_server;
