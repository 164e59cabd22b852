//! Tutor HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Welcome message |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/chat` | Answer a question and record the turn |
//! | `GET`  | `/progress/{username}` | Progress snapshot |
//! | `GET`  | `/history/{username}` | Persisted transcript |
//!
//! # Error Contract
//!
//! Every error response has the shape `{"detail": "<message>"}`. Malformed
//! request bodies and invalid usernames are `400`, unknown users on the
//! progress route are `404`, anything else (provider or storage failure) is
//! `500` with the underlying message as detail.
//!
//! # CORS
//!
//! Any origin, method, and header is accepted with credentials. The request
//! origin is mirrored back since a wildcard origin cannot carry credentials.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{error, info};

use crate::chain::ConversationalChain;
use crate::config::Config;
use crate::index::VectorIndex;
use crate::llm::create_chat_model;
use crate::models::{ChatEntry, ChatMessage};
use crate::users::{ProgressSnapshot, StoreError, UserStore};

/// Topic recorded for every chat turn; no topic detection is performed.
pub const DEFAULT_TOPIC: &str = "General Science";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<ConversationalChain>,
    pub users: Arc<UserStore>,
}

/// Bootstrap the index, wire the chain and user store, and serve until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let index = VectorIndex::bootstrap(config).await?;
    let llm = create_chat_model(&config.llm)?;
    let chain = ConversationalChain::new(Arc::from(llm), Arc::new(index), config.retrieval.k);
    let users = UserStore::open(&config.paths.users_dir, config.history.max_entries)?;

    let state = AppState {
        chain: Arc::new(chain),
        users: Arc::new(users),
    };

    let bind_addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Tutor API listening on http://{}", bind_addr);

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route("/progress/{username}", get(handle_progress))
        .route("/history/{username}", get(handle_history))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidUsername(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::internal(other),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

// ============ GET / and /health ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Welcome to Science AI Tutor API" }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub username: String,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub chat_history: Vec<ChatMessage>,
    pub progress: Option<ProgressSnapshot>,
}

/// Run the chain over the caller's history, then record both turns and one
/// question against the user in a single write. Either everything succeeds
/// or the call fails.
async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    let username = request.username.clone();

    let name = username.clone();
    with_store(&state.users, move |users| users.create_user(&name)).await?;

    let output = state
        .chain
        .invoke(&request.message, &request.chat_history)
        .await
        .map_err(|e| {
            error!(username = %username, "chat failed: {:#}", e);
            ApiError::Internal(format!("{:#}", e))
        })?;

    let mut chat_history = request.chat_history;
    chat_history.push(ChatMessage::user(&request.message));
    chat_history.push(ChatMessage::ai(&output.answer));

    let question = request.message;
    let answer = output.answer.clone();
    let progress = with_store(&state.users, move |users| {
        users.record_turn(&username, &question, &answer, DEFAULT_TOPIC, true)
    })
    .await?;

    Ok(Json(ChatResponse {
        answer: output.answer,
        chat_history,
        progress: Some(progress),
    }))
}

// ============ GET /progress/{username} ============

async fn handle_progress(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<ProgressSnapshot>, ApiError> {
    with_store(&state.users, move |users| users.get_progress(&username))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}

// ============ GET /history/{username} ============

async fn handle_history(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<ChatEntry>>, ApiError> {
    let history = with_store(&state.users, move |users| users.chat_history(&username)).await?;
    Ok(Json(history))
}

/// Run a user store operation on the blocking pool; it does file I/O.
async fn with_store<T, F>(users: &Arc<UserStore>, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&UserStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let users = Arc::clone(users);
    tokio::task::spawn_blocking(move || op(&users))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        let cases = [
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn invalid_username_is_a_bad_request() {
        let err: ApiError = StoreError::InvalidUsername("../x".into()).into();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn chat_history_is_optional() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"message":"hi","username":"alice"}"#).unwrap();
        assert!(req.chat_history.is_empty());
    }
}
