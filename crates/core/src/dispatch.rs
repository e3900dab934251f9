//! Applies inbound realtime frames to the shared conversation state.

use crate::{
    conversation::ConversationStore,
    message::Role,
    protocol::{FrameError, ServerFrame},
};
use tracing::{debug, error, warn};

/// Prepended to the text of `error` frames before they enter the thread.
pub const ERROR_PREFIX: &str = "Error: ";

/// Decodes one text frame and applies it. Frames that cannot be decoded are
/// logged and otherwise ignored; they never affect the connection.
pub fn handle_text(store: &ConversationStore, text: &str) {
    match ServerFrame::decode(text) {
        Ok(frame) => apply(store, frame),
        Err(FrameError::UnknownType(tag)) => warn!(%tag, "Unknown message type"),
        Err(e) => error!(error = %e, "Error parsing realtime frame"),
    }
}

/// Applies a decoded frame.
pub fn apply(store: &ConversationStore, frame: ServerFrame) {
    match frame {
        ServerFrame::System { message, .. } => {
            store.add_message(Role::System, message.unwrap_or_default());
        }
        ServerFrame::VoiceResponse {
            transcript,
            response,
            conversation_id,
            ..
        } => {
            if let Some(transcript) = non_empty(transcript) {
                store.add_message(Role::User, transcript);
            }
            if let Some(response) = non_empty(response) {
                store.add_message(Role::Assistant, response);
            }
            if let Some(id) = non_empty(conversation_id) {
                store.set_conversation_id(id);
            }
        }
        ServerFrame::Typing { status } => store.set_typing(status.unwrap_or(false)),
        ServerFrame::Error { message } => {
            let text = format!("{}{}", ERROR_PREFIX, message.unwrap_or_default());
            store.add_message(Role::System, text);
        }
        ServerFrame::Pong { .. } => debug!("Received pong"),
    }
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.is_empty())
}
