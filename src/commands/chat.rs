use crate::api::{ApiResult, Backend, ChatRequest, ChatResponse};
use crate::db::models::{DocumentId, Message};
use crate::events::{AppEvent, EventBus};
use crate::session::SessionStore;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shown in place of an answer when the question call fails.
pub const ERROR_REPLY: &str = "Sorry, there was an error processing your request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// No document selected.
    Empty,
    /// History fetch in progress.
    Loading,
    Idle,
    AwaitingAnswer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Answered,
    /// The call failed and an error message was appended.
    Failed,
    /// Blank text, no selection, or not idle. Nothing changed.
    Rejected,
    /// The conversation moved on before the answer arrived.
    Discarded,
}

struct Conversation {
    document_id: Option<DocumentId>,
    // Bumped every time the timeline is replaced; tags outstanding requests.
    generation: u64,
    state: ConversationState,
    messages: Vec<Message>,
    expanded: HashSet<String>,
    draft: String,
}

/// Message timeline for the selected document.
pub struct ConversationController {
    backend: Arc<dyn Backend>,
    session: Arc<SessionStore>,
    events: EventBus,
    inner: Mutex<Conversation>,
}

impl ConversationController {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<SessionStore>, events: EventBus) -> Self {
        Self {
            backend,
            session,
            events,
            inner: Mutex::new(Conversation {
                document_id: None,
                generation: 0,
                state: ConversationState::Empty,
                messages: Vec::new(),
                expanded: HashSet::new(),
                draft: String::new(),
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Conversation> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        let (document_id, state) = {
            let conv = self.inner();
            (conv.document_id, conv.state)
        };
        self.events
            .emit(AppEvent::ConversationChanged { document_id, state });
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        self.inner().document_id
    }

    pub fn state(&self) -> ConversationState {
        self.inner().state
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner().messages.clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.state() == ConversationState::Loading
    }

    pub fn is_awaiting_answer(&self) -> bool {
        self.state() == ConversationState::AwaitingAnswer
    }

    pub fn draft(&self) -> String {
        self.inner().draft.clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.inner().draft = text.into();
    }

    /// Text for an empty timeline.
    pub fn welcome_text(&self) -> String {
        match self.session.selected() {
            Some(document) => format!("Ask questions about \"{}\"", document.title),
            None => "Please upload a document from the sidebar to start asking questions".into(),
        }
    }

    /// Replaces the timeline with the history of whatever is selected now.
    /// Results for a selection that has since changed are dropped.
    pub async fn on_selection_changed(&self) {
        loop {
            let selected = self.session.selected_id();
            let generation = self.reset(selected);
            self.notify();

            let Some(document_id) = selected else {
                return;
            };

            let result = self.backend.fetch_history(document_id).await;

            let current = self.session.selected_id();
            {
                let mut conv = self.inner();
                if conv.generation != generation {
                    tracing::debug!(document_id, "dropping stale history response");
                    return;
                }
                if current != Some(document_id) {
                    // Nobody else reloads for this selection; follow it.
                    tracing::debug!(document_id, "selection moved during history fetch");
                    continue;
                }
                match result {
                    Ok(records) => {
                        conv.messages = records.into_iter().map(Message::from).collect();
                        tracing::debug!(document_id, count = conv.messages.len(), "history loaded");
                    }
                    Err(e) => {
                        tracing::warn!(document_id, error = %e, "failed to fetch history");
                    }
                }
                conv.state = ConversationState::Idle;
            }
            self.notify();
            return;
        }
    }

    /// Starts a new timeline for `selected`. Returns its generation.
    fn reset(&self, selected: Option<DocumentId>) -> u64 {
        let mut conv = self.inner();
        conv.generation += 1;
        conv.document_id = selected;
        conv.messages.clear();
        conv.expanded.clear();
        conv.state = match selected {
            Some(_) => ConversationState::Loading,
            None => ConversationState::Empty,
        };
        conv.generation
    }

    /// Asks a question about the selected document. The question is shown
    /// right away; the answer or an error follows once the backend replies.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        if text.trim().is_empty() {
            return SubmitOutcome::Rejected;
        }
        let Some(document_id) = self.session.selected_id() else {
            return SubmitOutcome::Rejected;
        };

        let generation = {
            let mut conv = self.inner();
            if conv.state != ConversationState::Idle || conv.document_id != Some(document_id) {
                return SubmitOutcome::Rejected;
            }
            conv.messages.push(Message::question(text));
            conv.draft.clear();
            conv.state = ConversationState::AwaitingAnswer;
            conv.generation
        };
        self.notify();

        let request = ChatRequest {
            message: text.to_string(),
            document_id,
        };
        let result = self.backend.ask(request).await;

        let current = self.session.selected_id();
        let outcome = {
            let mut conv = self.inner();
            if conv.generation != generation {
                tracing::debug!(document_id, "dropping answer for superseded conversation");
                return SubmitOutcome::Discarded;
            }
            if current != Some(document_id) {
                None
            } else {
                Some(Self::resolve(&mut conv, document_id, result))
            }
        };
        let Some(outcome) = outcome else {
            // The selection moved without a reload; this timeline is stale.
            tracing::debug!(document_id, "dropping answer, selection moved while awaiting it");
            self.on_selection_changed().await;
            return SubmitOutcome::Discarded;
        };
        self.notify();
        outcome
    }

    fn resolve(
        conv: &mut Conversation,
        document_id: DocumentId,
        result: ApiResult<ChatResponse>,
    ) -> SubmitOutcome {
        let outcome = match result {
            Ok(response) => {
                conv.messages
                    .push(Message::answer(response.answer, response.relevant_chunks));
                SubmitOutcome::Answered
            }
            Err(e) => {
                tracing::error!(document_id, error = %e, "question failed");
                conv.messages.push(Message::error(ERROR_REPLY));
                SubmitOutcome::Failed
            }
        };
        conv.state = ConversationState::Idle;
        outcome
    }

    pub async fn submit_draft(&self) -> SubmitOutcome {
        let text = self.draft();
        self.submit(&text).await
    }

    /// Flips the source list of a message. Returns the new state; unknown ids
    /// stay collapsed.
    pub fn toggle_sources(&self, message_id: &str) -> bool {
        let expanded = {
            let mut conv = self.inner();
            if !conv.messages.iter().any(|m| m.id == message_id) {
                return false;
            }
            if conv.expanded.remove(message_id) {
                false
            } else {
                conv.expanded.insert(message_id.to_string());
                true
            }
        };
        self.events.emit(AppEvent::SourcesToggled {
            message_id: message_id.to_string(),
            expanded,
        });
        expanded
    }

    pub fn is_expanded(&self, message_id: &str) -> bool {
        self.inner().expanded.contains(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::db::models::{Document, Role, Source};
    use crate::session::MemorySelectionStore;
    use crate::testing::{doc, record, FakeBackend};

    struct Fixture {
        backend: Arc<FakeBackend>,
        session: Arc<SessionStore>,
        chat: ConversationController,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(FakeBackend::with_documents(vec![doc(1, 10), doc(2, 20)]));
        let events = EventBus::new();
        let session = Arc::new(SessionStore::new(
            Arc::new(MemorySelectionStore::default()),
            events.clone(),
        ));
        session.set_documents(vec![doc(2, 20), doc(1, 10)]);
        let chat = ConversationController::new(backend.clone(), session.clone(), events);
        Fixture {
            backend,
            session,
            chat,
        }
    }

    impl Fixture {
        async fn select(&self, document: Option<Document>) {
            self.session.select(document);
            self.chat.on_selection_changed().await;
        }
    }

    fn roles(messages: &[Message]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    fn contents(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.content.clone()).collect()
    }

    fn answer(text: &str) -> ChatResponse {
        ChatResponse {
            answer: text.into(),
            relevant_chunks: vec![Source {
                text: "excerpt".into(),
                relevance: 0.9,
            }],
        }
    }

    #[tokio::test]
    async fn selecting_loads_history_in_given_order() {
        let f = fixture();
        f.backend
            .set_history(1, vec![record(true, "q1", 1), record(false, "a1", 2)]);

        f.select(Some(doc(1, 10))).await;

        assert_eq!(f.chat.state(), ConversationState::Idle);
        assert_eq!(roles(&f.chat.messages()), vec![Role::Question, Role::Answer]);
        assert_eq!(contents(&f.chat.messages()), vec!["q1", "a1"]);
    }

    #[tokio::test]
    async fn deselecting_empties_the_timeline() {
        let f = fixture();
        f.backend.set_history(1, vec![record(true, "q1", 1)]);
        f.select(Some(doc(1, 10))).await;

        f.select(None).await;

        assert_eq!(f.chat.state(), ConversationState::Empty);
        assert!(f.chat.messages().is_empty());
        assert_eq!(f.chat.submit("anyone?").await, SubmitOutcome::Rejected);
    }

    #[tokio::test]
    async fn history_failure_leaves_empty_idle_timeline() {
        let f = fixture();
        f.backend.fail_next_history(ApiError::Parse("nope".into()));

        f.select(Some(doc(1, 10))).await;

        assert_eq!(f.chat.state(), ConversationState::Idle);
        assert!(f.chat.messages().is_empty());
    }

    #[tokio::test]
    async fn stale_history_is_never_applied() {
        let f = fixture();
        f.backend.set_history(2, vec![record(true, "about b", 1)]);
        let gate = f.backend.gate_history(1);

        tokio::join!(f.select(Some(doc(1, 10))), async {
            f.select(Some(doc(2, 20))).await;
            let _ = gate.send(Ok(vec![record(true, "about a", 1)]));
        });

        assert_eq!(f.chat.document_id(), Some(2));
        assert_eq!(contents(&f.chat.messages()), vec!["about b"]);
        assert_eq!(f.chat.state(), ConversationState::Idle);
    }

    #[tokio::test]
    async fn answer_follows_its_question() {
        let f = fixture();
        f.select(Some(doc(1, 10))).await;
        f.chat.set_draft("What is X?");

        let outcome = f.chat.submit_draft().await;

        assert_eq!(outcome, SubmitOutcome::Answered);
        let messages = f.chat.messages();
        assert_eq!(roles(&messages), vec![Role::Question, Role::Answer]);
        assert_eq!(messages[0].content, "What is X?");
        assert!(messages[1].has_sources());
        assert_eq!(f.chat.draft(), "");
        assert_eq!(
            f.backend.questions(),
            vec![ChatRequest {
                message: "What is X?".into(),
                document_id: 1,
            }]
        );
    }

    #[tokio::test]
    async fn question_is_appended_before_answer_arrives() {
        let f = fixture();
        f.select(Some(doc(1, 10))).await;
        let gate = f.backend.gate_answer();

        let (outcome, _) = tokio::join!(f.chat.submit("slow one"), async {
            assert_eq!(f.chat.state(), ConversationState::AwaitingAnswer);
            assert_eq!(contents(&f.chat.messages()), vec!["slow one"]);
            let _ = gate.send(Ok(answer("done")));
        });

        assert_eq!(outcome, SubmitOutcome::Answered);
        assert_eq!(contents(&f.chat.messages()), vec!["slow one", "done"]);
    }

    #[tokio::test]
    async fn second_question_while_awaiting_is_rejected() {
        let f = fixture();
        f.select(Some(doc(1, 10))).await;
        let gate = f.backend.gate_answer();

        let (first, second) = tokio::join!(f.chat.submit("first"), async {
            let second = f.chat.submit("second").await;
            assert_eq!(contents(&f.chat.messages()), vec!["first"]);
            let _ = gate.send(Ok(answer("one")));
            second
        });

        assert_eq!(first, SubmitOutcome::Answered);
        assert_eq!(second, SubmitOutcome::Rejected);
        assert_eq!(contents(&f.chat.messages()), vec!["first", "one"]);
        assert_eq!(f.backend.questions().len(), 1);
    }

    #[tokio::test]
    async fn blank_or_unselected_submissions_are_noops() {
        let f = fixture();
        assert_eq!(f.chat.submit("hello").await, SubmitOutcome::Rejected);

        f.select(Some(doc(1, 10))).await;
        f.chat.set_draft("   ");
        assert_eq!(f.chat.submit_draft().await, SubmitOutcome::Rejected);
        assert_eq!(f.chat.draft(), "   ");
        assert!(f.chat.messages().is_empty());
        assert!(f.backend.questions().is_empty());
    }

    #[tokio::test]
    async fn failed_question_appends_one_generic_error() {
        let f = fixture();
        f.select(Some(doc(1, 10))).await;
        f.backend.fail_next_answer(ApiError::Api {
            status: 500,
            detail: Some("openai quota exceeded".into()),
        });

        let outcome = f.chat.submit("why?").await;

        assert_eq!(outcome, SubmitOutcome::Failed);
        let messages = f.chat.messages();
        assert_eq!(roles(&messages), vec![Role::Question, Role::Error]);
        assert_eq!(contents(&messages), vec!["why?", ERROR_REPLY]);
        assert_eq!(f.chat.state(), ConversationState::Idle);
    }

    #[tokio::test]
    async fn answer_for_previous_document_is_discarded() {
        let f = fixture();
        f.backend.set_history(2, vec![record(true, "b history", 1)]);
        f.select(Some(doc(1, 10))).await;
        let gate = f.backend.gate_answer();

        let (outcome, _) = tokio::join!(f.chat.submit("about a"), async {
            f.select(Some(doc(2, 20))).await;
            // The new conversation has nothing in flight.
            assert_eq!(f.chat.state(), ConversationState::Idle);
            let _ = gate.send(Ok(answer("a answer")));
        });

        assert_eq!(outcome, SubmitOutcome::Discarded);
        assert_eq!(contents(&f.chat.messages()), vec!["b history"]);
        assert_eq!(f.chat.state(), ConversationState::Idle);
    }

    #[tokio::test]
    async fn unannounced_switch_while_awaiting_answer_is_followed() {
        let f = fixture();
        f.backend.set_history(2, vec![record(true, "b history", 1)]);
        f.select(Some(doc(1, 10))).await;
        let gate = f.backend.gate_answer();

        let (outcome, _) = tokio::join!(f.chat.submit("about a"), async {
            // Selection changes without telling the controller.
            f.session.select(Some(doc(2, 20)));
            let _ = gate.send(Ok(answer("a answer")));
        });

        assert_eq!(outcome, SubmitOutcome::Discarded);
        assert_eq!(f.chat.document_id(), Some(2));
        assert_eq!(f.chat.state(), ConversationState::Idle);
        assert_eq!(contents(&f.chat.messages()), vec!["b history"]);
        assert_eq!(f.chat.submit("about b").await, SubmitOutcome::Answered);
    }

    #[tokio::test]
    async fn unannounced_switch_during_history_fetch_is_followed() {
        let f = fixture();
        f.backend.set_history(2, vec![record(true, "about b", 1)]);
        let gate = f.backend.gate_history(1);

        tokio::join!(f.select(Some(doc(1, 10))), async {
            f.session.select(Some(doc(2, 20)));
            let _ = gate.send(Ok(vec![record(true, "about a", 1)]));
        });

        assert_eq!(f.chat.document_id(), Some(2));
        assert_eq!(contents(&f.chat.messages()), vec!["about b"]);
        assert_eq!(f.chat.state(), ConversationState::Idle);
    }

    #[tokio::test]
    async fn submit_while_loading_is_rejected() {
        let f = fixture();
        let gate = f.backend.gate_history(1);

        tokio::join!(f.select(Some(doc(1, 10))), async {
            assert!(f.chat.is_fetching());
            assert_eq!(f.chat.submit("too early").await, SubmitOutcome::Rejected);
            let _ = gate.send(Ok(vec![]));
        });

        assert!(f.chat.messages().is_empty());
    }

    #[tokio::test]
    async fn source_expansion_is_per_message_and_reset_on_switch() {
        let f = fixture();
        f.select(Some(doc(1, 10))).await;
        f.chat.submit("one").await;
        f.chat.submit("two").await;
        let messages = f.chat.messages();
        let (first, second) = (&messages[1].id, &messages[3].id);

        assert!(!f.chat.is_expanded(first));
        assert!(f.chat.toggle_sources(first));
        assert!(f.chat.is_expanded(first));
        assert!(!f.chat.is_expanded(second));
        assert!(!f.chat.toggle_sources(first));
        assert!(!f.chat.toggle_sources("no-such-message"));

        f.chat.toggle_sources(second);
        f.select(Some(doc(2, 20))).await;
        assert!(!f.chat.is_expanded(second));
    }

    #[tokio::test]
    async fn welcome_text_follows_selection() {
        let f = fixture();
        assert!(f.chat.welcome_text().starts_with("Please upload a document"));
        f.select(Some(doc(2, 20))).await;
        assert_eq!(f.chat.welcome_text(), "Ask questions about \"doc-2.pdf\"");
    }
}
