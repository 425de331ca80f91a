//! In-memory chat sessions and their derived summaries.
//!
//! A [`SessionStore`] owns every live session's append-only message log and
//! recomputes the [`SessionSummary`] list after each mutation. Summaries are
//! never stored on their own; they always reflect the current logs and are
//! ordered newest-first by last message time.

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};

/// Opaque session identifier (UUID v4 string).
pub type SessionId = String;

/// Titles of single-question sessions are cut after this many characters.
const TITLE_MAX_CHARS: usize = 30;
/// Titles of multi-question sessions are cut shorter to leave room for `(+N)`.
const TITLE_MULTI_MAX_CHARS: usize = 20;
const EMPTY_TITLE: &str = "New Chat";
const EMPTY_PREVIEW: &str = "New chat";

/// A single chat message. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub is_user: bool,
    /// The response was generated from a prompt augmented with retrieved context.
    pub has_context: bool,
    /// Creation time, epoch milliseconds.
    pub timestamp_ms: i64,
    /// The message came from speech recognition.
    pub is_voice: bool,
}

impl Message {
    /// A user message stamped with the current time.
    pub fn user(text: impl Into<String>, is_voice: bool) -> Self {
        Self {
            text: text.into(),
            is_user: true,
            has_context: false,
            timestamp_ms: now_ms(),
            is_voice,
        }
    }

    /// An assistant message stamped with the current time.
    pub fn assistant(text: impl Into<String>, has_context: bool) -> Self {
        Self {
            text: text.into(),
            is_user: false,
            has_context,
            timestamp_ms: now_ms(),
            is_voice: false,
        }
    }

    /// Override the creation time.
    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }
}

/// Derived per-session metadata for the session list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub last_message_preview: String,
    pub last_timestamp_ms: i64,
    pub message_count: usize,
}

#[derive(Debug, Clone)]
struct Session {
    id: SessionId,
    created_at_ms: i64,
    messages: Vec<Message>,
}

impl Session {
    fn summary(&self) -> SessionSummary {
        let last = self.messages.last();
        SessionSummary {
            id: self.id.clone(),
            title: session_title(&self.messages),
            last_message_preview: last
                .map(|m| m.text.clone())
                .unwrap_or_else(|| EMPTY_PREVIEW.to_owned()),
            last_timestamp_ms: last.map_or(self.created_at_ms, |m| m.timestamp_ms),
            message_count: self.messages.len(),
        }
    }
}

/// Keyed container of chat sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    /// Insertion order; keeps summary ordering stable for equal timestamps.
    sessions: Vec<Session>,
    summaries: Vec<SessionSummary>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty session and return its id.
    pub fn create(&mut self) -> SessionId {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.push(Session {
            id: id.clone(),
            created_at_ms: now_ms(),
            messages: Vec::new(),
        });
        self.refresh();
        id
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }

    /// Append a message to a session's log.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Session`] if the session does not exist.
    pub fn append(&mut self, id: &str, message: Message) -> Result<()> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ChatError::Session(format!("unknown session {id}")))?;
        session.messages.push(message);
        self.refresh();
        Ok(())
    }

    /// Delete a session and its log.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Session`] if the session does not exist.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            return Err(ChatError::Session(format!("unknown session {id}")));
        }
        self.refresh();
        Ok(())
    }

    /// Ordered message log of a session.
    pub fn messages(&self, id: &str) -> Option<&[Message]> {
        self.sessions
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.messages.as_slice())
    }

    /// Summaries, newest first.
    pub fn summaries(&self) -> &[SessionSummary] {
        &self.summaries
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn refresh(&mut self) {
        let mut summaries: Vec<SessionSummary> =
            self.sessions.iter().map(Session::summary).collect();
        // Stable sort: ties keep creation order.
        summaries.sort_by(|a, b| b.last_timestamp_ms.cmp(&a.last_timestamp_ms));
        self.summaries = summaries;
    }
}

/// Title from the first user message, annotated with `(+N)` for follow-ups.
pub fn session_title(messages: &[Message]) -> String {
    let mut user_messages = messages.iter().filter(|m| m.is_user);
    let Some(first) = user_messages.next() else {
        return EMPTY_TITLE.to_owned();
    };
    let extra = user_messages.count();
    if extra == 0 {
        truncate_with_ellipsis(&first.text, TITLE_MAX_CHARS)
    } else {
        format!(
            "{} (+{extra})",
            truncate_with_ellipsis(&first.text, TITLE_MULTI_MAX_CHARS)
        )
    }
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        text.to_owned()
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
