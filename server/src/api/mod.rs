use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::{
    error::ApiError,
    response::aggregate,
    state::AppState,
    store::{ConversationStore, ConversationSummary, Message, StoreError},
    worker::WorkerKind,
};

/// Uploads are whole PDFs; allow a generous body.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/upload-pdf", post(upload_pdf))
        .route("/api/ingest-document", post(ingest_document))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/{id}", get(get_conversation))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// GET /health: liveness probe
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    /// Structured extras from the worker (sources, tables, formulas),
    /// forwarded verbatim at the top level.
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// POST /api/chat: answer a question, recording the exchange on success
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::InvalidRequest("message must not be empty".into()));
    }

    // Prior turns go to the worker as context. An id the store does not know
    // is a client error; no worker is spawned for it.
    let history: Vec<Message> = match req.conversation_id.as_deref() {
        Some(id) => match state.store.get(id).await {
            Ok(messages) => messages,
            Err(StoreError::NotFound) => {
                return Err(ApiError::InvalidRequest(format!(
                    "unknown conversation '{id}'"
                )));
            }
            Err(e) => return Err(e.into()),
        },
        None => Vec::new(),
    };

    let input = json!({ "message": message, "history": history }).to_string();
    let outcome = state.workers.invoke(WorkerKind::Chat, input.as_bytes()).await?;
    let reply = aggregate(WorkerKind::Chat, outcome)?;

    let conversation_id = state
        .store
        .append_exchange(req.conversation_id.as_deref(), message, &reply.answer)
        .await?;

    info!(%conversation_id, "chat answered");
    Ok(Json(ChatResponse {
        answer: reply.answer,
        conversation_id,
        timestamp: Utc::now(),
        extras: reply.extras,
    }))
}

/// POST /api/upload-pdf: accept a document and index it
async fn upload_pdf(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut staged: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(sanitize_filename)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ApiError::InvalidRequest("file field needs a filename".into()))?;

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("reading upload: {e}")))?;
        if bytes.is_empty() {
            return Err(ApiError::InvalidRequest("uploaded file is empty".into()));
        }

        let dest = state.upload_dir.join(&filename);
        tokio::fs::write(&dest, &bytes).await.map_err(|e| {
            error!(%filename, "failed to stage upload: {e}");
            ApiError::StoreUnavailable
        })?;
        state.store.stage_document(&filename).await?;

        info!(%filename, bytes = bytes.len(), "document staged");
        staged = Some(filename);
        break;
    }

    let filename = staged
        .ok_or_else(|| ApiError::InvalidRequest("multipart field 'file' is required".into()))?;

    let message = run_ingest(&state, &filename).await?;
    Ok(Json(json!({ "message": message })))
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub file: String,
}

/// POST /api/ingest-document: re-run ingestion for an already staged upload
async fn ingest_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<Value>, ApiError> {
    let filename = sanitize_filename(&req.file);
    if filename.is_empty() {
        return Err(ApiError::InvalidRequest("file must not be empty".into()));
    }
    if !state.store.document_exists(&filename).await? {
        return Err(ApiError::InvalidRequest(format!(
            "'{filename}' has not been uploaded"
        )));
    }

    let message = run_ingest(&state, &filename).await?;
    Ok(Json(json!({ "message": message })))
}

/// Feed one staged document to the ingest worker and mark it indexed on
/// success. On any failure the document stays unindexed so the client can
/// retry.
async fn run_ingest(state: &AppState, filename: &str) -> Result<String, ApiError> {
    let path = state.upload_dir.join(filename);
    let input = json!({ "file": path.to_string_lossy() }).to_string();

    let outcome = state
        .workers
        .invoke(WorkerKind::Ingest, input.as_bytes())
        .await?;
    let reply = aggregate(WorkerKind::Ingest, outcome)?;

    state.store.mark_indexed(filename).await?;
    info!(%filename, "document indexed");
    Ok(reply.answer)
}

/// GET /api/conversations: history sidebar feed
async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let summaries = state.store.list().await?;
    Ok(Json(summaries))
}

/// GET /api/conversations/{id}: full message history of one conversation
async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let messages = state.store.get(&id).await?;
    Ok(Json(json!({ "messages": messages })))
}

/// Strip any path components from a client-supplied filename.
fn sanitize_filename(raw: &str) -> String {
    std::path::Path::new(raw)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_lose_their_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("policy.pdf"), "policy.pdf");
        assert_eq!(sanitize_filename("dir/policy.pdf"), "policy.pdf");
        assert_eq!(sanitize_filename(""), "");
    }
}
