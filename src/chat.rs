use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::agent::ToolAgent;
use crate::models::{ChatRequest, ChatResponse, Role, TranscriptEntry};
use crate::session::{SessionHandle, SessionStore};
use crate::store::VectorStore;

#[derive(Debug, Clone)]
pub struct ChatPage {
    pub session_id: String,
    pub messages: Vec<TranscriptEntry>,
    pub index_error: Option<String>,
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn VectorStore>,
    agent: ToolAgent,
    sessions: SessionStore,
}

impl ChatService {
    pub fn new(store: Arc<dyn VectorStore>, agent: ToolAgent, sessions: SessionStore) -> Self {
        Self {
            store,
            agent,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Re-opens the index for this page load. A known `session_id` keeps its
    /// conversation across reloads; otherwise a fresh one is started.
    pub async fn open_page(&self, session_id: Option<&str>) -> Result<ChatPage> {
        let index_error = match self.store.open().await {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(backend = self.store.name(), "failed to open index: {err:#}");
                Some(err.to_string())
            }
        };

        let (session_id, handle) = match session_id {
            Some(id) => match self.sessions.get(id)? {
                Some(handle) => (id.to_string(), handle),
                None => self.new_session()?,
            },
            None => self.new_session()?,
        };
        let messages = handle.lock().await.transcript.clone();

        tracing::debug!(
            session_id = %session_id,
            sessions = self.sessions.session_count()?,
            "opened chat page"
        );
        Ok(ChatPage {
            session_id,
            messages,
            index_error,
        })
    }

    fn new_session(&self) -> Result<(String, SessionHandle)> {
        let session_id = self.sessions.create()?;
        let handle = self.sessions.get_or_create(&session_id)?;
        Ok((session_id, handle))
    }

    pub async fn answer(&self, request: ChatRequest) -> Result<ChatResponse> {
        let started = Instant::now();
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            anyhow::bail!("prompt must not be empty");
        }

        let handle = self.sessions.get_or_create(&request.session_id)?;
        let mut session = handle.lock().await;
        session.push(Role::User, prompt);

        // A failed agent call leaves the user entry in place.
        let reply = self.agent.chat(&mut session.memory, prompt).await?;
        session.push(Role::Assistant, reply.clone());

        tracing::info!(
            session_id = %request.session_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered chat prompt"
        );

        Ok(ChatResponse {
            session_id: request.session_id,
            reply,
            messages: session.transcript.clone(),
        })
    }
}
