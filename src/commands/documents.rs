use crate::api::{ApiError, Backend};
use crate::db::models::{Document, DocumentId};
use crate::events::{AppEvent, EventBus};
use crate::session::SessionStore;
use crate::upload::FileUpload;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub const UPLOAD_FALLBACK: &str = "Error uploading file. Please try again.";
pub const DELETE_FALLBACK: &str = "Error deleting document. Please try again.";
pub const UNSUPPORTED_FILE_TYPE: &str =
    "Unsupported file type. Only PDF and TXT files are supported.";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("upload failed: {0}")]
    Upload(#[source] ApiError),
    #[error("delete failed: {0}")]
    Delete(#[source] ApiError),
    #[error("unsupported file type: .{0}")]
    UnsupportedFileType(String),
}

impl RegistryError {
    /// Text for the dismissible error notice.
    pub fn user_message(&self) -> String {
        match self {
            RegistryError::Upload(e) => e.detail().unwrap_or(UPLOAD_FALLBACK).to_string(),
            RegistryError::Delete(e) => e.detail().unwrap_or(DELETE_FALLBACK).to_string(),
            RegistryError::UnsupportedFileType(_) => UNSUPPORTED_FILE_TYPE.to_string(),
        }
    }
}

/// Keeps the session's document collection in step with the backend.
pub struct DocumentRegistry {
    backend: Arc<dyn Backend>,
    session: Arc<SessionStore>,
    events: EventBus,
    restored: AtomicBool,
    uploads_in_flight: AtomicUsize,
    error_notice: Mutex<Option<String>>,
}

impl DocumentRegistry {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<SessionStore>, events: EventBus) -> Self {
        Self {
            backend,
            session,
            events,
            restored: AtomicBool::new(false),
            uploads_in_flight: AtomicUsize::new(0),
            error_notice: Mutex::new(None),
        }
    }

    fn notice(&self) -> MutexGuard<'_, Option<String>> {
        self.error_notice
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_uploading(&self) -> bool {
        self.uploads_in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn error_notice(&self) -> Option<String> {
        self.notice().clone()
    }

    pub fn dismiss_error(&self) {
        self.set_notice(None);
    }

    fn set_notice(&self, notice: Option<String>) {
        let changed = {
            let mut current = self.notice();
            let changed = *current != notice;
            *current = notice.clone();
            changed
        };
        if changed {
            self.events.emit(AppEvent::ErrorNotice(notice));
        }
    }

    fn fail(&self, err: RegistryError) -> RegistryError {
        tracing::error!(error = %err, "document operation failed");
        self.set_notice(Some(err.user_message()));
        err
    }

    /// Fetches the collection, newest first. Failures leave the current
    /// collection in place. Returns true if a new collection was installed.
    pub async fn refresh(&self) -> bool {
        let mut documents = match self.backend.list_documents().await {
            Ok(documents) => documents,
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch documents");
                return false;
            }
        };

        // Stable: equal timestamps keep the backend's order.
        documents.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        tracing::debug!(count = documents.len(), "installing document list");
        self.session.set_documents(documents);

        if !self.restored.swap(true, Ordering::SeqCst) {
            self.session.restore_selection();
        }
        true
    }

    pub async fn upload(&self, upload: FileUpload) -> Result<Document, RegistryError> {
        self.set_notice(None);
        if !upload.is_supported() {
            return Err(self.fail(RegistryError::UnsupportedFileType(upload.extension())));
        }

        let title = upload.title.clone();
        self.begin_upload();
        let result = self.backend.upload_document(upload).await;
        self.end_upload();

        match result {
            Ok(document) => {
                tracing::info!(document_id = document.id, title = %title, "document uploaded");
                self.session.prepend_and_select(document.clone());
                Ok(document)
            }
            Err(e) => Err(self.fail(RegistryError::Upload(e))),
        }
    }

    /// Removes the document only once the backend confirms the deletion.
    pub async fn delete(&self, id: DocumentId) -> Result<(), RegistryError> {
        match self.backend.delete_document(id).await {
            Ok(()) => {
                tracing::info!(document_id = id, "document deleted");
                self.session.remove_document(id);
                Ok(())
            }
            Err(e) => Err(self.fail(RegistryError::Delete(e))),
        }
    }

    fn begin_upload(&self) {
        if self.uploads_in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
            self.events.emit(AppEvent::UploadStateChanged(true));
        }
    }

    fn end_upload(&self) {
        if self.uploads_in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.events.emit(AppEvent::UploadStateChanged(false));
        }
    }
}
