use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use uuid::Uuid;

use crate::llm::ChatMessage;
use crate::models::{Role, TranscriptEntry};

pub const GREETING: &str = "Welcome, you can ask me anything about the document";

pub const DEFAULT_SESSION_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Session {
    pub transcript: Vec<TranscriptEntry>,
    pub memory: Vec<ChatMessage>,
}

impl Session {
    fn seeded() -> Self {
        Self {
            transcript: vec![TranscriptEntry::new(Role::Assistant, GREETING)],
            memory: vec![],
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.transcript.push(TranscriptEntry::new(role, content));
    }
}

pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

struct SessionSlot {
    handle: SessionHandle,
    last_used: Instant,
}

/// In-process session registry. Each session has its own async lock so one
/// conversation is answered at a time while others proceed. Once `capacity`
/// sessions exist, the least recently used one is dropped to make room.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, SessionSlot>>>,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SESSION_CAPACITY)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn create(&self) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        self.get_or_create(&session_id)?;
        Ok(session_id)
    }

    pub fn get(&self, session_id: &str) -> Result<Option<SessionHandle>> {
        let mut sessions = self.lock()?;
        Ok(sessions.get_mut(session_id).map(|slot| {
            slot.last_used = Instant::now();
            slot.handle.clone()
        }))
    }

    pub fn get_or_create(&self, session_id: &str) -> Result<SessionHandle> {
        let mut sessions = self.lock()?;
        if let Some(slot) = sessions.get_mut(session_id) {
            slot.last_used = Instant::now();
            return Ok(slot.handle.clone());
        }

        while sessions.len() >= self.capacity {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::debug!(session_id = %oldest, "evicted least recently used session");
        }

        let handle = Arc::new(tokio::sync::Mutex::new(Session::seeded()));
        sessions.insert(
            session_id.to_string(),
            SessionSlot {
                handle: handle.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(handle)
    }

    pub async fn reset(&self, session_id: &str) -> Result<()> {
        let handle = self.get_or_create(session_id)?;
        *handle.lock().await = Session::seeded();
        tracing::info!(session_id, "session reset");
        Ok(())
    }

    pub async fn transcript(&self, session_id: &str) -> Result<Option<Vec<TranscriptEntry>>> {
        match self.get(session_id)? {
            Some(handle) => Ok(Some(handle.lock().await.transcript.clone())),
            None => Ok(None),
        }
    }

    pub fn session_count(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, SessionSlot>>> {
        self.sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("session registry lock poisoned"))
    }
}
