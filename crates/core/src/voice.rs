//! Voice I/O Adapter
//!
//! Bridges a host's speech-to-text and text-to-speech capabilities to the rest
//! of the client through one [`VoiceState`]. The capabilities themselves sit
//! behind the [`SpeechRecognizer`] and [`SpeechSynthesizer`] traits; they report
//! progress asynchronously as [`VoiceEvent`]s, which the owner of the adapter
//! feeds back through [`VoiceAdapter::handle_event`] from its event loop.
//!
//! Every recognition session and every utterance gets a fresh id. Events that
//! belong to a session or utterance that has since been stopped or superseded
//! are dropped, which is what gives `speak` its last-write-wins behaviour.

use std::mem;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Recorded when the host has no speech recognizer.
pub const RECOGNITION_UNSUPPORTED: &str = "Speech recognition is not supported on this host";
/// Recorded when an utterance fails to play.
pub const SYNTHESIS_FAILED: &str = "Speech synthesis failed";

/// Observable state of the adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceState {
    pub is_listening: bool,
    pub is_speaking: bool,
    /// The running transcript of the current (or last) recognition session.
    pub transcript: String,
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("failed to start speech recognition: {0}")]
    StartFailed(String),
}

/// How a recognition session should capture speech.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionSettings {
    /// Keep listening after the first utterance ends.
    pub continuous: bool,
    /// Report partial hypotheses while the user is still speaking.
    pub interim_results: bool,
    pub lang: String,
}

impl RecognitionSettings {
    /// One utterance per session, with interim results.
    pub fn single_utterance(lang: impl Into<String>) -> Self {
        Self {
            continuous: false,
            interim_results: true,
            lang: lang.into(),
        }
    }
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self::single_utterance("en-US")
    }
}

/// Progress reported by a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    Recognition { session: u64, event: RecognitionEvent },
    Synthesis { utterance: u64, event: SynthesisEvent },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// All result segments recognized so far in this session, interim and final.
    Result(Vec<String>),
    /// The recognizer stopped on its own, e.g. at end of speech.
    End,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    Started,
    Ended,
    Failed(String),
}

pub type VoiceEventSender = mpsc::UnboundedSender<VoiceEvent>;
pub type VoiceEventReceiver = mpsc::UnboundedReceiver<VoiceEvent>;

/// A single recognition session handed to a [`SpeechRecognizer`].
#[derive(Debug, Clone)]
pub struct RecognitionSession {
    id: u64,
    settings: RecognitionSettings,
    events: VoiceEventSender,
}

impl RecognitionSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn settings(&self) -> &RecognitionSettings {
        &self.settings
    }

    pub fn result(&self, segments: Vec<String>) {
        self.emit(RecognitionEvent::Result(segments));
    }

    pub fn end(&self) {
        self.emit(RecognitionEvent::End);
    }

    pub fn error(&self, description: impl Into<String>) {
        self.emit(RecognitionEvent::Error(description.into()));
    }

    fn emit(&self, event: RecognitionEvent) {
        // The adapter may already be gone; there is nobody left to tell.
        let _ = self.events.send(VoiceEvent::Recognition {
            session: self.id,
            event,
        });
    }
}

/// One piece of text to be spoken, handed to a [`SpeechSynthesizer`].
#[derive(Debug, Clone)]
pub struct Utterance {
    id: u64,
    text: String,
    events: VoiceEventSender,
}

impl Utterance {
    pub const RATE: f32 = 1.0;
    pub const PITCH: f32 = 1.0;
    pub const VOLUME: f32 = 1.0;

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn started(&self) {
        self.emit(SynthesisEvent::Started);
    }

    pub fn ended(&self) {
        self.emit(SynthesisEvent::Ended);
    }

    pub fn failed(&self, description: impl Into<String>) {
        self.emit(SynthesisEvent::Failed(description.into()));
    }

    fn emit(&self, event: SynthesisEvent) {
        let _ = self.events.send(VoiceEvent::Synthesis {
            utterance: self.id,
            event,
        });
    }
}

/// A host speech-to-text capability. Only one session runs at a time.
#[cfg_attr(test, mockall::automock)]
pub trait SpeechRecognizer: Send {
    /// Begins capturing. Progress is reported through `session`.
    fn start(&mut self, session: RecognitionSession) -> Result<(), VoiceError>;
    /// Halts the current capture, if any.
    fn stop(&mut self);
}

/// A host text-to-speech capability. Only one utterance plays at a time.
#[cfg_attr(test, mockall::automock)]
pub trait SpeechSynthesizer: Send {
    /// Begins speaking. Progress is reported through `utterance`.
    fn speak(&mut self, utterance: Utterance);
    /// Drops anything queued or playing.
    fn cancel(&mut self);
}

/// The voice state machine.
pub struct VoiceAdapter {
    state: VoiceState,
    recognizer: Option<Box<dyn SpeechRecognizer>>,
    synthesizer: Option<Box<dyn SpeechSynthesizer>>,
    settings: RecognitionSettings,
    events: VoiceEventSender,
    next_id: u64,
    active_session: Option<u64>,
    active_utterance: Option<u64>,
}

impl VoiceAdapter {
    /// Creates an adapter over whichever capabilities the host has.
    ///
    /// Returns the receiving end of the event channel the backends report on.
    pub fn new(
        recognizer: Option<Box<dyn SpeechRecognizer>>,
        synthesizer: Option<Box<dyn SpeechSynthesizer>>,
        settings: RecognitionSettings,
    ) -> (Self, VoiceEventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let mut state = VoiceState::default();
        if recognizer.is_none() {
            warn!("{}", RECOGNITION_UNSUPPORTED);
            state.error = Some(RECOGNITION_UNSUPPORTED.to_string());
        }
        if synthesizer.is_none() {
            info!("No speech synthesizer available; replies will not be spoken.");
        }
        let adapter = Self {
            state,
            recognizer,
            synthesizer,
            settings,
            events,
            next_id: 0,
            active_session: None,
            active_utterance: None,
        };
        (adapter, rx)
    }

    pub fn state(&self) -> &VoiceState {
        &self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state.is_listening
    }

    pub fn can_listen(&self) -> bool {
        self.recognizer.is_some()
    }

    pub fn can_speak(&self) -> bool {
        self.synthesizer.is_some()
    }

    pub fn start_listening(&mut self) {
        if self.state.is_listening {
            return;
        }
        let Some(recognizer) = self.recognizer.as_mut() else {
            return;
        };

        self.next_id += 1;
        let session = RecognitionSession {
            id: self.next_id,
            settings: self.settings.clone(),
            events: self.events.clone(),
        };
        self.state.transcript.clear();
        self.state.error = None;
        self.state.is_listening = true;
        self.active_session = Some(session.id);

        info!(session = session.id, "Listening");
        if let Err(e) = recognizer.start(session) {
            warn!(error = %e, "Speech recognition failed to start");
            self.state.is_listening = false;
            self.state.error = Some(e.to_string());
            self.active_session = None;
        }
    }

    /// Stops capturing. Whatever was recognized so far stays in the transcript;
    /// results that arrive after this call are discarded.
    pub fn stop_listening(&mut self) {
        if !self.state.is_listening {
            return;
        }
        if let Some(recognizer) = self.recognizer.as_mut() {
            recognizer.stop();
        }
        self.state.is_listening = false;
        self.active_session = None;
    }

    /// Speaks `text`, cutting off anything currently being spoken.
    pub fn speak(&mut self, text: &str) {
        let Some(synthesizer) = self.synthesizer.as_mut() else {
            return;
        };
        synthesizer.cancel();
        self.state.is_speaking = false;

        self.next_id += 1;
        let utterance = Utterance {
            id: self.next_id,
            text: text.to_string(),
            events: self.events.clone(),
        };
        self.active_utterance = Some(utterance.id);
        debug!(utterance = utterance.id, chars = text.len(), "Speaking");
        synthesizer.speak(utterance);
    }

    pub fn stop_speaking(&mut self) {
        if let Some(synthesizer) = self.synthesizer.as_mut() {
            synthesizer.cancel();
        }
        self.state.is_speaking = false;
        self.active_utterance = None;
    }

    pub fn reset_transcript(&mut self) {
        self.state.transcript.clear();
    }

    /// Hands over the transcript of a finished recognition session.
    ///
    /// Returns `None` while still listening or when nothing was recognized.
    /// A returned transcript is consumed: the state's transcript is left empty.
    pub fn take_finished_transcript(&mut self) -> Option<String> {
        if self.state.is_listening || self.state.transcript.is_empty() {
            return None;
        }
        Some(mem::take(&mut self.state.transcript))
    }

    /// Applies one backend event. Returns whether the state was affected.
    pub fn handle_event(&mut self, event: VoiceEvent) -> bool {
        match event {
            VoiceEvent::Recognition { session, event } => {
                if self.active_session != Some(session) {
                    debug!(session, ?event, "Ignoring event from inactive recognition session");
                    return false;
                }
                match event {
                    RecognitionEvent::Result(segments) => {
                        self.state.transcript = segments.concat();
                    }
                    RecognitionEvent::End => {
                        self.state.is_listening = false;
                        self.active_session = None;
                    }
                    RecognitionEvent::Error(description) => {
                        warn!(error = %description, "Speech recognition error");
                        self.state.is_listening = false;
                        self.state.error = Some(description);
                        self.active_session = None;
                    }
                }
            }
            VoiceEvent::Synthesis { utterance, event } => {
                if self.active_utterance != Some(utterance) {
                    debug!(utterance, ?event, "Ignoring event from superseded utterance");
                    return false;
                }
                match event {
                    SynthesisEvent::Started => self.state.is_speaking = true,
                    SynthesisEvent::Ended => {
                        self.state.is_speaking = false;
                        self.active_utterance = None;
                    }
                    SynthesisEvent::Failed(description) => {
                        warn!(error = %description, "Speech synthesis error");
                        self.state.is_speaking = false;
                        self.state.error = Some(SYNTHESIS_FAILED.to_string());
                        self.active_utterance = None;
                    }
                }
            }
        }
        true
    }
}

impl Drop for VoiceAdapter {
    fn drop(&mut self) {
        if self.state.is_listening {
            if let Some(recognizer) = self.recognizer.as_mut() {
                recognizer.stop();
            }
        }
        if self.active_utterance.is_some() {
            if let Some(synthesizer) = self.synthesizer.as_mut() {
                synthesizer.cancel();
            }
        }
    }
}
