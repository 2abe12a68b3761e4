//! Wires the session store, document registry and conversation controller
//! together, and forwards selection changes to the conversation.

use crate::api::Backend;
use crate::commands::chat::{ConversationController, SubmitOutcome};
use crate::commands::documents::{DocumentRegistry, RegistryError};
use crate::db::models::{Document, DocumentId};
use crate::events::{AppEvent, EventBus};
use crate::session::{SelectionStore, SessionStore};
use crate::upload::FileUpload;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct DocChat {
    events: EventBus,
    session: Arc<SessionStore>,
    registry: DocumentRegistry,
    conversation: ConversationController,
}

impl DocChat {
    pub fn new(backend: Arc<dyn Backend>, persistence: Arc<dyn SelectionStore>) -> Self {
        let events = EventBus::new();
        let session = Arc::new(SessionStore::new(persistence, events.clone()));
        let registry = DocumentRegistry::new(backend.clone(), session.clone(), events.clone());
        let conversation = ConversationController::new(backend, session.clone(), events.clone());
        Self {
            events,
            session,
            registry,
            conversation,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    pub fn conversation(&self) -> &ConversationController {
        &self.conversation
    }

    /// Reloads the conversation if the selection moved away from it.
    async fn follow_selection(&self) {
        if self.session.selected_id() != self.conversation.document_id() {
            self.conversation.on_selection_changed().await;
        }
    }

    pub async fn refresh(&self) -> bool {
        let installed = self.registry.refresh().await;
        self.follow_selection().await;
        installed
    }

    /// Re-selecting the current document refetches its history. Documents
    /// missing from the collection are refused and nothing changes.
    pub async fn select(&self, document: Option<Document>) -> bool {
        match document {
            Some(document) => self.select_id(document.id).await,
            None => {
                self.apply_selection(None).await;
                true
            }
        }
    }

    /// Selects a known document by id. Returns false for unknown ids.
    pub async fn select_id(&self, id: DocumentId) -> bool {
        match self.session.document(id) {
            Some(document) => {
                self.apply_selection(Some(document)).await;
                true
            }
            None => {
                tracing::debug!(document_id = id, "refusing to select unknown document");
                false
            }
        }
    }

    async fn apply_selection(&self, document: Option<Document>) {
        self.session.select(document);
        self.conversation.on_selection_changed().await;
    }

    pub async fn upload(&self, upload: FileUpload) -> Result<Document, RegistryError> {
        let document = self.registry.upload(upload).await?;
        self.conversation.on_selection_changed().await;
        Ok(document)
    }

    pub async fn delete(&self, id: DocumentId) -> Result<(), RegistryError> {
        self.registry.delete(id).await?;
        self.follow_selection().await;
        Ok(())
    }

    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        self.conversation.submit(text).await
    }
}
