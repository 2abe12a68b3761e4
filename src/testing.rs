//! Scriptable in-process backend for component tests.

use crate::api::{ApiError, ApiResult, Backend, ChatRequest, ChatResponse};
use crate::db::models::{Document, DocumentId, HistoryRecord, Source};
use crate::upload::FileUpload;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub(crate) fn doc(id: DocumentId, uploaded_secs: i64) -> Document {
    Document {
        id,
        title: format!("doc-{id}.pdf"),
        uploaded_at: at(uploaded_secs),
    }
}

pub(crate) fn record(is_user: bool, content: &str, secs: i64) -> HistoryRecord {
    HistoryRecord {
        is_user,
        content: content.to_string(),
        sources: None,
        timestamp: at(secs),
    }
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    documents: Mutex<Vec<Document>>,
    histories: Mutex<HashMap<DocumentId, Vec<HistoryRecord>>>,
    history_gates: Mutex<HashMap<DocumentId, oneshot::Receiver<ApiResult<Vec<HistoryRecord>>>>>,
    answer_gates: Mutex<VecDeque<oneshot::Receiver<ApiResult<ChatResponse>>>>,
    upload_gates: Mutex<VecDeque<oneshot::Receiver<ApiResult<Document>>>>,
    list_errors: Mutex<VecDeque<ApiError>>,
    upload_errors: Mutex<VecDeque<ApiError>>,
    delete_errors: Mutex<VecDeque<ApiError>>,
    history_errors: Mutex<VecDeque<ApiError>>,
    answer_errors: Mutex<VecDeque<ApiError>>,
    questions: Mutex<Vec<ChatRequest>>,
    uploads: AtomicUsize,
    next_id: AtomicI64,
}

impl FakeBackend {
    pub(crate) fn with_documents(documents: Vec<Document>) -> Self {
        let next_id = documents.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        Self {
            documents: Mutex::new(documents),
            next_id: AtomicI64::new(next_id),
            ..Default::default()
        }
    }

    pub(crate) fn set_history(&self, id: DocumentId, records: Vec<HistoryRecord>) {
        self.histories.lock().unwrap().insert(id, records);
    }

    /// The next history fetch for `id` waits for the returned sender.
    pub(crate) fn gate_history(
        &self,
        id: DocumentId,
    ) -> oneshot::Sender<ApiResult<Vec<HistoryRecord>>> {
        let (tx, rx) = oneshot::channel();
        self.history_gates.lock().unwrap().insert(id, rx);
        tx
    }

    /// The next question waits for the returned sender.
    pub(crate) fn gate_answer(&self) -> oneshot::Sender<ApiResult<ChatResponse>> {
        let (tx, rx) = oneshot::channel();
        self.answer_gates.lock().unwrap().push_back(rx);
        tx
    }

    /// The next upload waits for the returned sender.
    pub(crate) fn gate_upload(&self) -> oneshot::Sender<ApiResult<Document>> {
        let (tx, rx) = oneshot::channel();
        self.upload_gates.lock().unwrap().push_back(rx);
        tx
    }

    pub(crate) fn fail_next_list(&self, err: ApiError) {
        self.list_errors.lock().unwrap().push_back(err);
    }

    pub(crate) fn fail_next_upload(&self, err: ApiError) {
        self.upload_errors.lock().unwrap().push_back(err);
    }

    pub(crate) fn fail_next_delete(&self, err: ApiError) {
        self.delete_errors.lock().unwrap().push_back(err);
    }

    pub(crate) fn fail_next_history(&self, err: ApiError) {
        self.history_errors.lock().unwrap().push_back(err);
    }

    pub(crate) fn fail_next_answer(&self, err: ApiError) {
        self.answer_errors.lock().unwrap().push_back(err);
    }

    pub(crate) fn questions(&self) -> Vec<ChatRequest> {
        self.questions.lock().unwrap().clone()
    }

    pub(crate) fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

fn dropped_gate() -> ApiError {
    ApiError::Parse("gate dropped".into())
}

impl Backend for FakeBackend {
    fn list_documents(&self) -> BoxFuture<'_, ApiResult<Vec<Document>>> {
        let result = match self.list_errors.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(self.documents.lock().unwrap().clone()),
        };
        async move { result }.boxed()
    }

    fn upload_document(&self, upload: FileUpload) -> BoxFuture<'_, ApiResult<Document>> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(rx) = self.upload_gates.lock().unwrap().pop_front() {
            return async move { rx.await.unwrap_or_else(|_| Err(dropped_gate())) }.boxed();
        }
        let result = match self.upload_errors.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => {
                let document = Document {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst),
                    title: upload.title,
                    uploaded_at: Utc::now(),
                };
                self.documents.lock().unwrap().push(document.clone());
                Ok(document)
            }
        };
        async move { result }.boxed()
    }

    fn delete_document(&self, id: DocumentId) -> BoxFuture<'_, ApiResult<()>> {
        let result = match self.delete_errors.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => {
                self.documents.lock().unwrap().retain(|d| d.id != id);
                Ok(())
            }
        };
        async move { result }.boxed()
    }

    fn fetch_history(&self, id: DocumentId) -> BoxFuture<'_, ApiResult<Vec<HistoryRecord>>> {
        let gate = self.history_gates.lock().unwrap().remove(&id);
        let immediate = match self.history_errors.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(self
                .histories
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .unwrap_or_default()),
        };
        async move {
            match gate {
                Some(rx) => rx.await.unwrap_or_else(|_| Err(dropped_gate())),
                None => immediate,
            }
        }
        .boxed()
    }

    fn ask(&self, request: ChatRequest) -> BoxFuture<'_, ApiResult<ChatResponse>> {
        let gate = self.answer_gates.lock().unwrap().pop_front();
        let immediate = match self.answer_errors.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(ChatResponse {
                answer: format!("answer to: {}", request.message),
                relevant_chunks: vec![Source {
                    text: "supporting passage".into(),
                    relevance: 0.75,
                }],
            }),
        };
        self.questions.lock().unwrap().push(request);
        async move {
            match gate {
                Some(rx) => rx.await.unwrap_or_else(|_| Err(dropped_gate())),
                None => immediate,
            }
        }
        .boxed()
    }
}
