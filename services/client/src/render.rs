use chrono::Local;
use docvoice_core::{ConversationState, Message, Role, voice::VoiceState};
use std::io::{self, Write};

/// Prints the conversation to a terminal-like writer.
///
/// Each message is printed once. Connection, typing and voice changes are
/// printed as they happen rather than redrawn.
pub struct Renderer<W: Write> {
    out: W,
    /// Id of the newest message already on screen.
    last_printed: Option<String>,
    connected: Option<bool>,
    typing: bool,
    voice: VoiceState,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_printed: None,
            connected: None,
            typing: false,
            voice: VoiceState::default(),
        }
    }

    pub fn conversation(&mut self, state: &ConversationState) -> io::Result<()> {
        if self.connected != Some(state.is_connected) {
            if state.is_connected {
                writeln!(self.out, "-- connected --")?;
            } else if self.connected.is_some() {
                writeln!(self.out, "-- disconnected, reconnecting --")?;
            } else {
                writeln!(self.out, "-- connecting --")?;
            }
            self.connected = Some(state.is_connected);
        }

        // Messages are append-only between clears, so a printed id that is
        // no longer in the thread means it was cleared.
        let start = match &self.last_printed {
            None => 0,
            Some(id) => match state.messages.iter().position(|m| &m.id == id) {
                Some(index) => index + 1,
                None => {
                    writeln!(self.out, "-- conversation cleared --")?;
                    0
                }
            },
        };
        for message in &state.messages[start..] {
            writeln!(self.out, "{}", format_message(message))?;
        }
        self.last_printed = state.last_message().map(|m| m.id.clone());

        if state.is_typing && !self.typing {
            writeln!(self.out, "   assistant is typing...")?;
        }
        self.typing = state.is_typing;
        self.out.flush()
    }

    pub fn voice(&mut self, state: &VoiceState) -> io::Result<()> {
        let previous = std::mem::replace(&mut self.voice, state.clone());
        if state.is_listening && !previous.is_listening {
            writeln!(self.out, "   listening... (type what you say)")?;
        }
        if state.is_listening && !state.transcript.is_empty() && state.transcript != previous.transcript
        {
            writeln!(self.out, "   heard: {}", state.transcript)?;
        }
        if !state.is_listening && previous.is_listening {
            writeln!(self.out, "   stopped listening")?;
        }
        if state.is_speaking && !previous.is_speaking {
            writeln!(self.out, "   speaking...")?;
        }
        if let Some(error) = &state.error {
            if previous.error.as_ref() != Some(error) {
                writeln!(self.out, "   voice: {}", error)?;
            }
        }
        self.out.flush()
    }

    #[cfg(test)]
    pub(crate) fn output(&self) -> &W {
        &self.out
    }

    /// Prints a line that is not part of the conversation.
    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text)?;
        self.out.flush()
    }
}

fn format_message(message: &Message) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M:%S");
    let who = match message.role {
        Role::User => "You",
        Role::Assistant => "Assistant",
        Role::System => "System",
    };
    format!("[{}] {}: {}", time, who, message.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvoice_core::ConversationStore;

    fn output(renderer: &Renderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.output().clone()).unwrap()
    }

    #[test]
    fn test_messages_are_printed_once() {
        let store = ConversationStore::new();
        let mut renderer = Renderer::new(Vec::new());

        store.add_message(Role::User, "what is in chapter one?");
        renderer.conversation(&store.snapshot()).unwrap();
        store.add_message(Role::Assistant, "An introduction.");
        renderer.conversation(&store.snapshot()).unwrap();
        renderer.conversation(&store.snapshot()).unwrap();

        let text = output(&renderer);
        assert_eq!(text.matches("You: what is in chapter one?").count(), 1);
        assert_eq!(text.matches("Assistant: An introduction.").count(), 1);
    }

    #[test]
    fn test_connection_banners() {
        let store = ConversationStore::new();
        let mut renderer = Renderer::new(Vec::new());

        renderer.conversation(&store.snapshot()).unwrap();
        store.set_connected(true);
        renderer.conversation(&store.snapshot()).unwrap();
        store.set_connected(false);
        renderer.conversation(&store.snapshot()).unwrap();

        let text = output(&renderer);
        let banners: Vec<&str> = text.lines().collect();
        assert_eq!(
            banners,
            vec![
                "-- connecting --",
                "-- connected --",
                "-- disconnected, reconnecting --"
            ]
        );
    }

    #[test]
    fn test_clear_restarts_thread() {
        let store = ConversationStore::new();
        let mut renderer = Renderer::new(Vec::new());
        store.add_message(Role::System, "hello");
        renderer.conversation(&store.snapshot()).unwrap();

        store.clear();
        renderer.conversation(&store.snapshot()).unwrap();
        store.add_message(Role::System, "fresh start");
        renderer.conversation(&store.snapshot()).unwrap();

        let text = output(&renderer);
        assert!(text.contains("-- conversation cleared --"));
        assert!(text.contains("System: fresh start"));
    }

    #[test]
    fn test_clear_followed_by_many_messages_before_render() {
        let store = ConversationStore::new();
        let mut renderer = Renderer::new(Vec::new());
        store.add_message(Role::User, "old question");
        store.add_message(Role::Assistant, "old answer");
        renderer.conversation(&store.snapshot()).unwrap();

        store.clear();
        store.add_message(Role::System, "new one");
        store.add_message(Role::User, "new two");
        store.add_message(Role::Assistant, "new three");
        renderer.conversation(&store.snapshot()).unwrap();

        let text = output(&renderer);
        let after_clear = text
            .split("-- conversation cleared --")
            .nth(1)
            .expect("clear banner missing");
        assert!(after_clear.contains("System: new one"));
        assert!(after_clear.contains("You: new two"));
        assert!(after_clear.contains("Assistant: new three"));
        assert_eq!(text.matches("old answer").count(), 1);
    }

    #[test]
    fn test_typing_indicator_printed_on_rise() {
        let store = ConversationStore::new();
        let mut renderer = Renderer::new(Vec::new());

        store.set_typing(true);
        renderer.conversation(&store.snapshot()).unwrap();
        renderer.conversation(&store.snapshot()).unwrap();
        store.set_typing(false);
        renderer.conversation(&store.snapshot()).unwrap();

        assert_eq!(output(&renderer).matches("assistant is typing").count(), 1);
    }

    #[test]
    fn test_voice_status_changes() {
        let mut renderer = Renderer::new(Vec::new());
        let mut state = VoiceState {
            is_listening: true,
            ..VoiceState::default()
        };
        renderer.voice(&state).unwrap();
        state.transcript = "hello".to_string();
        renderer.voice(&state).unwrap();
        state.is_listening = false;
        state.error = Some("no-speech".to_string());
        renderer.voice(&state).unwrap();
        renderer.voice(&state).unwrap();

        let text = output(&renderer);
        assert!(text.contains("listening..."));
        assert!(text.contains("heard: hello"));
        assert!(text.contains("stopped listening"));
        assert_eq!(text.matches("voice: no-speech").count(), 1);
    }
}
