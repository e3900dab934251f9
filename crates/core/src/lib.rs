//! Core types for the docvoice client.
//!
//! This crate holds everything that does not touch the network or the terminal:
//! the conversation model and its store, the realtime wire protocol, the inbound
//! frame dispatcher, and the voice adapter state machine together with the
//! speech backend traits it drives.

pub mod conversation;
pub mod dispatch;
pub mod message;
pub mod protocol;
pub mod voice;

pub use conversation::{ConversationState, ConversationStore, ConversationView};
pub use message::{Message, Role};
pub use protocol::{ClientFrame, FrameError, ServerFrame};

/// Anything that can carry a client frame upstream.
///
/// The realtime channel implements this; the session loop only depends on the
/// trait so the transcript hand-off can be exercised without a socket.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSink: Send + Sync {
    /// Transmits `frame` if the underlying transport is open, otherwise drops it.
    fn send(&self, frame: &ClientFrame);
}
