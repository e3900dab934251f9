//! Shared Conversation State
//!
//! A single store holding the message thread, the connection flag, the
//! "assistant is composing" flag and the backend-assigned conversation id.
//! Writers hold a [`ConversationStore`]; readers get a [`ConversationView`]
//! that can observe every change but cannot mutate anything.

use crate::message::{Message, Role};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// A snapshot of the conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    /// Messages in insertion order. Only ever appended to, or emptied by a clear.
    pub messages: Vec<Message>,
    /// Assigned by the backend on its first response; sticky until the next clear.
    pub conversation_id: Option<String>,
    pub is_connected: bool,
    pub is_typing: bool,
}

impl ConversationState {
    /// The most recent message, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Write access to the conversation. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct ConversationStore {
    tx: Arc<watch::Sender<ConversationState>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Creates an empty, disconnected conversation.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConversationState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Hands out a read-only view for presentation code.
    pub fn view(&self) -> ConversationView {
        ConversationView {
            rx: self.tx.subscribe(),
        }
    }

    /// Clones the current state.
    pub fn snapshot(&self) -> ConversationState {
        self.tx.borrow().clone()
    }

    /// Appends a new message and returns a copy of it.
    pub fn add_message(&self, role: Role, content: impl Into<String>) -> Message {
        let message = Message::new(role, content);
        debug!(id = %message.id, %role, "Appending message");
        let appended = message.clone();
        self.tx.send_modify(|state| state.messages.push(appended));
        message
    }

    pub fn set_connected(&self, connected: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.is_connected != connected;
            state.is_connected = connected;
            changed
        });
    }

    pub fn set_typing(&self, typing: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.is_typing != typing;
            state.is_typing = typing;
            changed
        });
    }

    pub fn set_conversation_id(&self, id: impl Into<String>) {
        let id = id.into();
        self.tx.send_if_modified(|state| {
            if state.conversation_id.as_deref() == Some(id.as_str()) {
                return false;
            }
            state.conversation_id = Some(id);
            true
        });
    }

    /// Empties the thread and forgets the conversation id. Clearing an already
    /// empty conversation changes nothing and wakes no observers.
    pub fn clear(&self) {
        self.tx.send_if_modified(|state| {
            let changed = !state.messages.is_empty() || state.conversation_id.is_some();
            state.messages.clear();
            state.conversation_id = None;
            changed
        });
    }
}

/// Read-only handle on the conversation.
#[derive(Clone)]
pub struct ConversationView {
    rx: watch::Receiver<ConversationState>,
}

impl ConversationView {
    /// Clones the current state and marks it as seen.
    pub fn snapshot(&mut self) -> ConversationState {
        self.rx.borrow_and_update().clone()
    }

    /// Waits until the state changes after the last [`snapshot`](Self::snapshot).
    ///
    /// Fails only once every [`ConversationStore`] has been dropped.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.rx.borrow().conversation_id.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.rx.borrow().is_connected
    }
}
