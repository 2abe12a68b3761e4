//! Known documents, the active selection, and its durable pointer.

use crate::db::models::{Document, DocumentId};
use crate::events::{AppEvent, EventBus};
use std::sync::{Arc, Mutex, MutexGuard};

pub const SELECTED_DOCUMENT_KEY: &str = "selectedDocumentId";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for a single scalar: the last selected document id.
pub trait SelectionStore: Send + Sync {
    fn read(&self) -> Result<Option<String>, StoreError>;
    fn write(&self, value: &str) -> Result<(), StoreError>;
    fn erase(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemorySelectionStore {
    value: Mutex<Option<String>>,
}

impl MemorySelectionStore {
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(value.into())),
        }
    }

    fn value(&self) -> MutexGuard<'_, Option<String>> {
        self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SelectionStore for MemorySelectionStore {
    fn read(&self) -> Result<Option<String>, StoreError> {
        Ok(self.value().clone())
    }

    fn write(&self, value: &str) -> Result<(), StoreError> {
        *self.value() = Some(value.to_string());
        Ok(())
    }

    fn erase(&self) -> Result<(), StoreError> {
        *self.value() = None;
        Ok(())
    }
}

#[derive(Default)]
struct SessionState {
    documents: Vec<Document>,
    selected: Option<Document>,
}

pub struct SessionStore {
    state: Mutex<SessionState>,
    persistence: Arc<dyn SelectionStore>,
    events: EventBus,
}

impl SessionStore {
    pub fn new(persistence: Arc<dyn SelectionStore>, events: EventBus) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            persistence,
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn documents(&self) -> Vec<Document> {
        self.state().documents.clone()
    }

    pub fn document(&self, id: DocumentId) -> Option<Document> {
        self.state().documents.iter().find(|d| d.id == id).cloned()
    }

    pub fn selected(&self) -> Option<Document> {
        self.state().selected.clone()
    }

    pub fn selected_id(&self) -> Option<DocumentId> {
        self.state().selected.as_ref().map(|d| d.id)
    }

    /// Replaces the collection. Returns true if this cleared the selection.
    pub fn set_documents(&self, documents: Vec<Document>) -> bool {
        let cleared = {
            let mut state = self.state();
            let stale = state
                .selected
                .as_ref()
                .is_some_and(|s| !documents.iter().any(|d| d.id == s.id));
            state.documents = documents;
            if stale {
                state.selected = None;
            }
            stale
        };

        self.events.emit(AppEvent::DocumentsChanged);
        if cleared {
            self.persist(None);
            self.events.emit(AppEvent::SelectionChanged(None));
        }
        cleared
    }

    /// Outside the crate, selection changes go through `DocChat` so the
    /// conversation follows them.
    pub(crate) fn select(&self, document: Option<Document>) {
        let id = document.as_ref().map(|d| d.id);
        self.state().selected = document;
        self.persist(id);
        tracing::debug!(selected = ?id, "selection changed");
        self.events.emit(AppEvent::SelectionChanged(id));
    }

    /// Selects the persisted document if it is still known, otherwise purges
    /// the stale pointer.
    pub fn restore_selection(&self) -> Option<Document> {
        let saved = match self.persistence.read() {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read saved selection");
                None
            }
        };
        let saved = saved?;

        let restored = saved
            .trim()
            .parse::<DocumentId>()
            .ok()
            .and_then(|id| self.document(id));

        match &restored {
            Some(document) => {
                self.state().selected = Some(document.clone());
                tracing::info!(document_id = document.id, "restored selection");
                self.events.emit(AppEvent::SelectionChanged(Some(document.id)));
            }
            None => {
                tracing::debug!(saved = %saved, "discarding stale saved selection");
                if let Err(e) = self.persistence.erase() {
                    tracing::warn!(error = %e, "failed to erase saved selection");
                }
            }
        }
        restored
    }

    /// Puts a freshly created document at the front and selects it, as one step.
    pub(crate) fn prepend_and_select(&self, document: Document) {
        let id = document.id;
        {
            let mut state = self.state();
            state.documents.retain(|d| d.id != id);
            state.documents.insert(0, document.clone());
            state.selected = Some(document);
        }
        self.persist(Some(id));
        self.events.emit(AppEvent::DocumentsChanged);
        self.events.emit(AppEvent::SelectionChanged(Some(id)));
    }

    /// Drops a document from the collection. Returns true if it was selected.
    pub(crate) fn remove_document(&self, id: DocumentId) -> bool {
        let was_selected = {
            let mut state = self.state();
            state.documents.retain(|d| d.id != id);
            let was_selected = state.selected.as_ref().is_some_and(|s| s.id == id);
            if was_selected {
                state.selected = None;
            }
            was_selected
        };

        self.events.emit(AppEvent::DocumentsChanged);
        if was_selected {
            self.persist(None);
            self.events.emit(AppEvent::SelectionChanged(None));
        }
        was_selected
    }

    fn persist(&self, id: Option<DocumentId>) {
        let result = match id {
            Some(id) => self.persistence.write(&id.to_string()),
            None => self.persistence.erase(),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist selection");
        }
    }
}
