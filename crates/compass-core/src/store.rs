//! Conversation Store
//!
//! Per-session message history. Each session sits behind its own async
//! mutex inside a sharded map, so sessions never block each other while
//! one session's requests are serialized.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::SessionStoreError;
use crate::message::{Message, MessageBody, SessionId};

type SessionCell = Arc<Mutex<Vec<Message>>>;

#[derive(Default)]
pub struct ConversationStore {
    sessions: DashMap<SessionId, SessionCell>,
    max_retained_messages: Option<usize>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop oldest whole turns once a session exceeds `max` messages
    pub fn with_retention(max: Option<usize>) -> Self {
        Self {
            sessions: DashMap::new(),
            max_retained_messages: max,
        }
    }

    fn cell(&self, session_id: &str) -> SessionCell {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Snapshot of a session's history; empty for unseen ids
    pub async fn get(&self, session_id: &str) -> Vec<Message> {
        let cell = self.sessions.get(session_id).map(|e| e.value().clone());
        match cell {
            Some(cell) => cell.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn append(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), SessionStoreError> {
        let mut guard = self.lock(session_id).await;
        guard.append(messages)
    }

    /// Remove a session's history. Waits for an in-flight turn on the same
    /// session to finish. Idempotent.
    pub async fn clear(&self, session_id: &str) {
        let Some(cell) = self.sessions.get(session_id).map(|e| e.value().clone()) else {
            return;
        };
        cell.lock().await.clear();
        drop(cell);
        // Only drop the entry when nobody else holds the cell
        self.sessions
            .remove_if(session_id, |_, cell| Arc::strong_count(cell) == 1);
        debug!(session_id = %session_id, "Session cleared");
    }

    /// Exclusive access to a session for the length of a turn
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        let messages = self.cell(session_id).lock_owned().await;
        SessionGuard {
            session_id: session_id.to_string(),
            messages,
            max_retained_messages: self.max_retained_messages,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }
}

/// Held by the orchestrator while it runs a turn
pub struct SessionGuard {
    session_id: SessionId,
    messages: OwnedMutexGuard<Vec<Message>>,
    max_retained_messages: Option<usize>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a batch. Tool results must answer the outstanding tool calls
    /// in request order; otherwise nothing is appended.
    pub fn append(&mut self, messages: Vec<Message>) -> Result<(), SessionStoreError> {
        validate_append(&self.messages, &messages)?;
        self.messages.extend(messages);
        Ok(())
    }

    /// Apply the store's retention limit
    pub fn apply_retention(&mut self) {
        if let Some(max) = self.max_retained_messages {
            self.trim(max);
        }
    }

    /// Drop oldest whole turns until at most `max` messages remain.
    /// The most recent turn is never dropped.
    pub fn trim(&mut self, max: usize) {
        let mut dropped = 0;
        while self.messages.len() > max {
            let next_turn = self
                .messages
                .iter()
                .enumerate()
                .skip(1)
                .find(|(_, m)| m.is_user())
                .map(|(i, _)| i);
            match next_turn {
                Some(idx) => {
                    self.messages.drain(..idx);
                    dropped += idx;
                }
                None => break,
            }
        }
        if dropped > 0 {
            debug!(session_id = %self.session_id, dropped, "Trimmed session history");
        }
    }
}

/// Tool calls of the latest request message that have no result yet, in
/// request order
fn outstanding_calls(history: &[Message]) -> Vec<String> {
    let mut answered = 0;
    for msg in history.iter().rev() {
        match &msg.body {
            MessageBody::ToolResult { .. } => answered += 1,
            MessageBody::Assistant { tool_calls, .. } => {
                return tool_calls
                    .iter()
                    .skip(answered)
                    .map(|c| c.call_id.clone())
                    .collect();
            }
            MessageBody::User { .. } => return Vec::new(),
        }
    }
    Vec::new()
}

fn validate_append(history: &[Message], batch: &[Message]) -> Result<(), SessionStoreError> {
    let mut outstanding = outstanding_calls(history);
    for msg in batch {
        match &msg.body {
            MessageBody::User { .. } => outstanding.clear(),
            MessageBody::Assistant { tool_calls, .. } => {
                outstanding = tool_calls.iter().map(|c| c.call_id.clone()).collect();
            }
            MessageBody::ToolResult { call_id, .. } => {
                if outstanding.first() != Some(call_id) {
                    return Err(SessionStoreError::UnmatchedToolResult {
                        call_id: call_id.clone(),
                    });
                }
                outstanding.remove(0);
            }
        }
    }
    Ok(())
}
