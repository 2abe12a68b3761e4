pub mod http;

use crate::db::models::{Document, DocumentId, HistoryRecord, Source};
use crate::upload::FileUpload;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub document_id: DocumentId,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatResponse {
    pub answer: String,
    #[serde(default)]
    pub relevant_chunks: Vec<Source>,
}

/// The retrieval backend as seen by the client.
pub trait Backend: Send + Sync {
    fn list_documents(&self) -> BoxFuture<'_, ApiResult<Vec<Document>>>;

    fn upload_document(&self, upload: FileUpload) -> BoxFuture<'_, ApiResult<Document>>;

    fn delete_document(&self, id: DocumentId) -> BoxFuture<'_, ApiResult<()>>;

    fn fetch_history(&self, id: DocumentId) -> BoxFuture<'_, ApiResult<Vec<HistoryRecord>>>;

    fn ask(&self, request: ChatRequest) -> BoxFuture<'_, ApiResult<ChatResponse>>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {}", .detail.as_deref().unwrap_or("no detail"))]
    Api { status: u16, detail: Option<String> },
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ApiError {
    /// Human-readable detail supplied by the backend, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Api { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}
