//! Terminal speech backends.
//!
//! The terminal has no microphone pipeline, so [`PromptRecognizer`] treats each
//! line typed while listening as one spoken utterance and reports it the way a
//! live recognizer would: interim results that grow word by word, then the end
//! of the session. [`CommandSynthesizer`] reads text aloud through an external
//! program such as `espeak-ng` or `say`.

use docvoice_core::voice::{
    RecognitionSession, SpeechRecognizer, SpeechSynthesizer, Utterance, VoiceError,
};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::{process::Command, task::JoinHandle};
use tracing::{debug, warn};

type SessionSlot = Arc<Mutex<Option<RecognitionSession>>>;

fn lock(slot: &SessionSlot) -> MutexGuard<'_, Option<RecognitionSession>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recognizer fed by typed dictation.
pub struct PromptRecognizer {
    session: SessionSlot,
}

/// The input side of a [`PromptRecognizer`].
#[derive(Clone)]
pub struct DictationFeed {
    session: SessionSlot,
    word_delay: Duration,
}

impl PromptRecognizer {
    /// Creates the recognizer and the feed that supplies its "speech".
    ///
    /// `word_delay` paces the interim results.
    pub fn new(word_delay: Duration) -> (Self, DictationFeed) {
        let session = SessionSlot::default();
        let feed = DictationFeed {
            session: session.clone(),
            word_delay,
        };
        (Self { session }, feed)
    }
}

impl SpeechRecognizer for PromptRecognizer {
    fn start(&mut self, session: RecognitionSession) -> Result<(), VoiceError> {
        let mut slot = lock(&self.session);
        if slot.is_some() {
            return Err(VoiceError::StartFailed(
                "a recognition session is already running".to_string(),
            ));
        }
        debug!(session = session.id(), lang = %session.settings().lang, "Dictation session started");
        *slot = Some(session);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(session) = lock(&self.session).take() {
            debug!(session = session.id(), "Dictation session stopped");
        }
    }
}

impl DictationFeed {
    /// Feeds one utterance to the running session.
    ///
    /// Returns `false` when no session is listening. A single-utterance session
    /// ends after this; a continuous one keeps listening.
    pub fn dictate(&self, text: &str) -> bool {
        let session = {
            let mut slot = lock(&self.session);
            let continuous = slot.as_ref().is_some_and(|s| s.settings().continuous);
            if continuous {
                slot.clone()
            } else {
                slot.take()
            }
        };
        let Some(session) = session else {
            return false;
        };

        let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        let interim = session.settings().interim_results;
        let continuous = session.settings().continuous;
        let delay = self.word_delay;
        tokio::spawn(async move {
            if words.is_empty() {
                session.error("no-speech");
                return;
            }
            if interim {
                for heard in 1..words.len() {
                    session.result(vec![words[..heard].join(" ")]);
                    tokio::time::sleep(delay).await;
                }
            }
            session.result(vec![words.join(" ")]);
            if !continuous {
                session.end();
            }
        });
        true
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.session).is_some()
    }
}

/// Synthesizer that runs an external program with the text as last argument.
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    playing: Option<JoinHandle<()>>,
}

impl CommandSynthesizer {
    /// `command` is split on whitespace, e.g. `"espeak-ng -v en-us"`.
    /// Returns `None` for an empty command.
    pub fn new(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            playing: None,
        })
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn speak(&mut self, utterance: Utterance) {
        self.cancel();

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(utterance.text())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.program, error = %e, "Failed to start speech program");
                utterance.failed(e.to_string());
                return;
            }
        };

        utterance.started();
        // Aborting this task drops the child, which kills the program.
        self.playing = Some(tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => utterance.ended(),
                Ok(status) => utterance.failed(format!("speech program exited with {}", status)),
                Err(e) => utterance.failed(e.to_string()),
            }
        }));
    }

    fn cancel(&mut self) {
        if let Some(playing) = self.playing.take() {
            playing.abort();
        }
    }
}

impl Drop for CommandSynthesizer {
    fn drop(&mut self) {
        self.cancel();
    }
}
