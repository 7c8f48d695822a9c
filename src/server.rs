use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use askama::Template;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

use crate::chat::ChatService;
use crate::config::AppConfig;
use crate::ingest::Ingestor;
use crate::models::{
    ChatRequest, ChatResponse, IngestReport, IngestStatus, SessionRequest, SessionResponse,
    TranscriptEntry, TranscriptResponse, UploadedFile,
};

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    chat: ChatService,
    ingestor: Ingestor,
    backend: &'static str,
    ingest_limit: Arc<Semaphore>,
}

pub async fn run_server(config: AppConfig, chat: ChatService, ingestor: Ingestor) -> Result<()> {
    let app = router(chat, ingestor);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!(
        vector_service = %config.vector_service,
        "listening on http://{}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(chat: ChatService, ingestor: Ingestor) -> Router {
    let state = AppState {
        backend: ingestor.backend(),
        chat,
        ingestor,
        ingest_limit: Arc::new(Semaphore::new(1)),
    };

    Router::new()
        .route("/", get(data_page))
        .route("/api/ingest", post(ingest_handler))
        .route("/chat", get(chat_page))
        .route("/api/session", post(create_session))
        .route("/api/session/:session_id", get(get_transcript))
        .route("/api/chat", post(chat_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn data_page(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let template = DataTemplate {
        backend: state.backend,
    };
    Ok(Html(template.render()?))
}

async fn ingest_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestReport>), ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        upload = Some(UploadedFile {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    let _permit = state
        .ingest_limit
        .acquire()
        .await
        .map_err(|_| ApiError::from(anyhow::anyhow!("ingest queue closed")))?;

    let report = state
        .ingestor
        .ingest(upload, |stage| {
            tracing::debug!(stage = stage.as_str(), "ingest progress");
        })
        .await;

    let status = match report.status {
        IngestStatus::Success => StatusCode::OK,
        IngestStatus::Warning => StatusCode::BAD_REQUEST,
        IngestStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(report)))
}

#[derive(Debug, Deserialize)]
struct ChatPageQuery {
    session_id: Option<String>,
}

async fn chat_page(
    State(state): State<AppState>,
    Query(query): Query<ChatPageQuery>,
) -> Result<Html<String>, ApiError> {
    let page = state.chat.open_page(query.session_id.as_deref()).await?;

    let template = ChatTemplate {
        session_id: page.session_id,
        messages: page.messages,
        index_error: page.index_error,
    };
    Ok(Html(template.render()?))
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    if request.reset.unwrap_or(false) {
        if let Some(session_id) = request.session_id {
            state.chat.sessions().reset(&session_id).await?;
            return Ok(Json(SessionResponse { session_id }));
        }
    }

    let session_id = state.chat.sessions().create()?;
    Ok(Json(SessionResponse { session_id }))
}

async fn get_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    match state.chat.sessions().transcript(&session_id).await? {
        Some(messages) => Ok(Json(TranscriptResponse {
            session_id,
            messages,
        })),
        None => Err(ApiError::not_found(format!(
            "session not found: {}",
            session_id
        ))),
    }
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty".to_string()));
    }
    let response = state.chat.answer(request).await?;
    Ok(Json(response))
}

#[derive(Template)]
#[template(path = "data.html")]
struct DataTemplate {
    backend: &'static str,
}

#[derive(Template)]
#[template(path = "chat.html")]
struct ChatTemplate {
    session_id: String,
    messages: Vec<TranscriptEntry>,
    index_error: Option<String>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }

    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl From<askama::Error> for ApiError {
    fn from(value: askama::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(value: MultipartError) -> Self {
        Self::bad_request(value.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::agent::ToolAgent;
    use crate::config::RetrievalConfig;
    use crate::index::tests::LetterEmbedding;
    use crate::index::VectorIndex;
    use crate::llm::ChatMessage;
    use crate::local_store::LocalStore;
    use crate::query::tests::ScriptedLlm;
    use crate::session::{SessionStore, GREETING};
    use crate::store::VectorStore;
    use crate::test_support::spawn_mock;

    const BOUNDARY: &str = "chatpdf-test-boundary";

    async fn spawn_app(root: &std::path::Path, replies: Vec<ChatMessage>) -> String {
        let vector = root.join("vector");
        let store: Arc<dyn VectorStore> = Arc::new(LocalStore::new(vector.clone()));
        let index = VectorIndex::new(
            store.clone(),
            Arc::new(LetterEmbedding::new()),
            RetrievalConfig {
                chunk_size: 1024,
                chunk_overlap: 200,
                similarity_top_k: 2,
            },
        );
        let agent = ToolAgent::new(Arc::new(ScriptedLlm::new(replies)), vec![]);
        let chat = ChatService::new(store, agent, SessionStore::new());
        let ingestor = Ingestor::with_folders(root.join("data"), vector, index);
        spawn_mock(router(chat, ingestor)).await
    }

    fn multipart_body(field: &str, file_name: &str, content: &str) -> String {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n--{BOUNDARY}--\r\n"
        )
    }

    async fn post_upload(base: &str, body: String) -> (StatusCode, Value) {
        let response = reqwest::Client::new()
            .post(format!("{base}/api/ingest"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(body)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn upload_without_file_field_is_a_warning() {
        let root = tempfile::tempdir().unwrap();
        let base = spawn_app(root.path(), vec![]).await;

        let (status, report) =
            post_upload(&base, multipart_body("other", "notes.txt", "text")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(report["status"], "warning");
        assert_eq!(report["message"], "Please select the pdf document");
        assert!(!root.path().join("data").exists());
    }

    #[tokio::test]
    async fn upload_then_chat_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let base = spawn_app(root.path(), vec![ChatMessage::assistant("About trains.")]).await;

        let (status, report) = post_upload(
            &base,
            multipart_body("file", "notes.txt", "a story about trains"),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{report}");
        assert_eq!(report["message"], "File processed");

        let client = reqwest::Client::new();
        let page = client
            .get(format!("{base}/chat"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(page.contains(GREETING));
        assert!(!page.contains("Index unavailable"));

        let session: Value = client
            .post(format!("{base}/api/session"))
            .json(&json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let session_id = session["session_id"].as_str().unwrap().to_string();

        let answer: Value = client
            .post(format!("{base}/api/chat"))
            .json(&json!({ "session_id": session_id, "prompt": "What is it about?" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(answer["reply"], "About trains.");
        assert_eq!(answer["messages"].as_array().unwrap().len(), 3);

        let transcript: Value = client
            .get(format!("{base}/api/session/{session_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(transcript["messages"][1]["role"], "user");
    }

    #[tokio::test]
    async fn blank_prompt_and_unknown_session_are_client_errors() {
        let root = tempfile::tempdir().unwrap();
        let base = spawn_app(root.path(), vec![]).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/api/chat"))
            .json(&json!({ "session_id": "s", "prompt": " " }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "prompt must not be empty");

        let response = client
            .get(format!("{base}/api/session/missing"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn chat_page_reload_reuses_the_session() {
        let root = tempfile::tempdir().unwrap();
        let base = spawn_app(root.path(), vec![]).await;
        let client = reqwest::Client::new();

        let session: Value = client
            .post(format!("{base}/api/session"))
            .json(&json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let session_id = session["session_id"].as_str().unwrap().to_string();

        for _ in 0..3 {
            let page = client
                .get(format!("{base}/chat?session_id={session_id}"))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap();
            assert!(page.contains(&format!("const sessionId = \"{session_id}\";")));
        }
    }

    #[tokio::test]
    async fn chat_page_shows_missing_index() {
        let root = tempfile::tempdir().unwrap();
        let base = spawn_app(root.path(), vec![]).await;

        let page = reqwest::get(format!("{base}/chat"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(page.contains("Index unavailable"));
        assert!(page.contains(GREETING));
    }
}
