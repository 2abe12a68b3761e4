use crate::commands::chat::ConversationState;
use crate::db::models::DocumentId;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// State-change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    DocumentsChanged,
    SelectionChanged(Option<DocumentId>),
    ConversationChanged {
        document_id: Option<DocumentId>,
        state: ConversationState,
    },
    SourcesToggled {
        message_id: String,
        expanded: bool,
    },
    UploadStateChanged(bool),
    ErrorNotice(Option<String>),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: AppEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
