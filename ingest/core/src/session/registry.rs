//! In-flight session registry
//!
//! At most one session runs per conversation. Beginning a new one cancels the
//! token of the previous one. The registry is an ordinary value: construct it
//! once and share it (`Arc`) with whoever starts sends.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::store::ConversationId;

/// Handle for one registered session
#[derive(Clone, Debug)]
pub struct SessionTicket {
    conversation: ConversationId,
    generation: u64,
    token: CancellationToken,
}

impl SessionTicket {
    /// Cancellation token to pass to the session
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Conversation this ticket belongs to
    #[must_use]
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    next_generation: u64,
    sessions: HashMap<ConversationId, Entry>,
}

/// Tracks the in-flight session of each conversation
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session, cancelling any prior one for the conversation
    pub fn begin(&self, conversation: &ConversationId) -> SessionTicket {
        let mut inner = self.inner.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let token = CancellationToken::new();

        let previous = inner.sessions.insert(
            conversation.clone(),
            Entry {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(conversation = %conversation, "Cancelling superseded session");
            previous.token.cancel();
        }

        SessionTicket {
            conversation: conversation.clone(),
            generation,
            token,
        }
    }

    /// Deregister a finished session. A newer session for the same
    /// conversation is left untouched.
    pub fn finish(&self, ticket: &SessionTicket) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.get(&ticket.conversation) {
            Some(entry) if entry.generation == ticket.generation => {
                inner.sessions.remove(&ticket.conversation);
                true
            }
            _ => false,
        }
    }

    /// Cancel the in-flight session of a conversation
    pub fn cancel(&self, conversation: &ConversationId) -> bool {
        let entry = self.inner.lock().sessions.remove(conversation);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight session
    pub fn cancel_all(&self) {
        let sessions = std::mem::take(&mut self.inner.lock().sessions);
        for entry in sessions.into_values() {
            entry.token.cancel();
        }
    }

    /// Number of in-flight sessions
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Whether a conversation has an in-flight session
    #[must_use]
    pub fn is_in_flight(&self, conversation: &ConversationId) -> bool {
        self.inner.lock().sessions.contains_key(conversation)
    }
}
