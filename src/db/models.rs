use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DocumentId = i64;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Question,
    Answer,
    Error,
}

/// A passage of the document returned alongside an answer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Source {
    pub text: String,
    pub relevance: f64,
}

impl Source {
    /// Relevance as a 0-100 bar width. Only meaningful relative to other sources.
    pub fn relevance_percent(&self) -> f64 {
        if !self.relevance.is_finite() {
            return 0.0;
        }
        self.relevance.clamp(0.0, 1.0) * 100.0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub sources: Option<Vec<Source>>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String, sources: Option<Vec<Source>>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            sources,
            timestamp,
        }
    }

    pub fn question(content: impl Into<String>) -> Self {
        Self::new(Role::Question, content.into(), None, Utc::now())
    }

    pub fn answer(content: impl Into<String>, sources: Vec<Source>) -> Self {
        Self::new(Role::Answer, content.into(), Some(sources), Utc::now())
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Role::Error, content.into(), None, Utc::now())
    }

    pub fn has_sources(&self) -> bool {
        self.sources.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Label shown on the collapsed source list, if there is one.
    pub fn sources_summary(&self) -> Option<String> {
        match &self.sources {
            Some(sources) if !sources.is_empty() => {
                Some(format!("{} relevant passages from document", sources.len()))
            }
            _ => None,
        }
    }
}

/// One stored turn as returned by the history endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryRecord {
    pub is_user: bool,
    pub content: String,
    #[serde(default)]
    pub sources: Option<Vec<Source>>,
    pub timestamp: DateTime<Utc>,
}

impl From<HistoryRecord> for Message {
    fn from(record: HistoryRecord) -> Self {
        let role = if record.is_user {
            Role::Question
        } else {
            Role::Answer
        };
        Message::new(role, record.content, record.sources, record.timestamp)
    }
}
