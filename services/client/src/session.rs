//! The interactive session.
//!
//! One loop owns the voice adapter and the renderer and multiplexes four
//! sources: lines typed by the user, voice backend events, conversation
//! changes and replies from backend HTTP calls. Every state transition of the
//! adapter therefore happens on this task, in the order its causes arrived.
//! HTTP calls run on their own tasks so a slow backend never holds the loop.

use crate::{
    api::{self, ApiError, BackendStats, ChatReply, ClearReceipt, DocumentIngest, HealthReport, UploadOutcome},
    commands::{HELP, UserCommand},
    render::Renderer,
    speech::DictationFeed,
};
use anyhow::Context;
use docvoice_core::{
    ClientFrame, ConversationStore, ConversationView, FrameSink, Role,
    voice::{RECOGNITION_UNSUPPORTED, VoiceAdapter, VoiceEvent, VoiceEventReceiver},
};
use std::{future::Future, io::Write, path::PathBuf, sync::Arc};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::mpsc,
};
use tracing::{debug, info, warn};

/// Whether the loop should keep going after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Quit,
}

/// Result of a backend call, delivered back to the loop.
#[derive(Debug)]
pub(crate) enum BackendReply {
    Uploaded(Result<UploadOutcome, ApiError>),
    Answered(Result<ChatReply, ApiError>),
    Health(Result<HealthReport, ApiError>),
    Stats(Result<BackendStats, ApiError>),
    Forgotten(Result<ClearReceipt, ApiError>),
}

/// Sends a finished transcript upstream, tagged with the current conversation id.
///
/// The user message itself is not added here; it arrives back from the
/// backend inside the `voice_response`.
pub fn forward_transcript(sink: &dyn FrameSink, store: &ConversationStore, transcript: String) {
    let conversation_id = store.snapshot().conversation_id;
    info!(chars = transcript.len(), ?conversation_id, "Sending transcript");
    sink.send(&ClientFrame::VoiceInput {
        transcript,
        conversation_id,
    });
}

pub struct Session<W: Write> {
    store: ConversationStore,
    view: ConversationView,
    sink: Arc<dyn FrameSink>,
    ingest: Arc<dyn DocumentIngest>,
    voice: VoiceAdapter,
    voice_events: VoiceEventReceiver,
    dictation: Option<DictationFeed>,
    renderer: Renderer<W>,
    /// Id of the last assistant message read aloud.
    last_spoken: Option<String>,
    replies_tx: mpsc::UnboundedSender<BackendReply>,
    replies: mpsc::UnboundedReceiver<BackendReply>,
    upload_pending: bool,
}

impl<W: Write> Session<W> {
    pub fn new(
        store: ConversationStore,
        sink: Arc<dyn FrameSink>,
        ingest: Arc<dyn DocumentIngest>,
        (voice, voice_events): (VoiceAdapter, VoiceEventReceiver),
        dictation: Option<DictationFeed>,
        out: W,
    ) -> Self {
        // Anything already in the thread is not read aloud on startup.
        let last_spoken = store
            .snapshot()
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.id.clone());
        let (replies_tx, replies) = mpsc::unbounded_channel();
        Self {
            view: store.view(),
            store,
            sink,
            ingest,
            voice,
            voice_events,
            dictation,
            renderer: Renderer::new(out),
            last_spoken,
            replies_tx,
            replies,
            upload_pending: false,
        }
    }

    /// Runs until `/quit` or the end of `input`.
    ///
    /// Backend calls still in flight at that point are abandoned.
    pub async fn run<R>(mut self, input: R) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        self.renderer
            .notice("Type /help for commands, /listen to ask a question.")?;
        self.on_conversation_change()?;
        self.renderer.voice(self.voice.state())?;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line.context("Failed to read terminal input")? {
                        Some(line) => {
                            if self.handle_line(&line)? == Flow::Quit {
                                break;
                            }
                        }
                        None => {
                            debug!("Input closed");
                            break;
                        }
                    }
                }
                Some(event) = self.voice_events.recv() => self.on_voice_event(event)?,
                Some(reply) = self.replies.recv() => self.on_backend_reply(reply)?,
                changed = self.view.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.on_conversation_change()?;
                }
            }
        }

        info!("Session ended");
        Ok(())
    }

    pub(crate) fn handle_line(&mut self, line: &str) -> anyhow::Result<Flow> {
        let Some(command) = UserCommand::parse(line) else {
            return Ok(Flow::Continue);
        };
        debug!(?command, "User command");

        match command {
            UserCommand::Listen => {
                if self.voice.can_listen() {
                    self.voice.start_listening();
                } else {
                    self.renderer.notice(RECOGNITION_UNSUPPORTED)?;
                }
            }
            UserCommand::StopListening => self.voice.stop_listening(),
            UserCommand::Speak => {
                let latest = self
                    .store
                    .snapshot()
                    .messages
                    .into_iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant);
                match latest {
                    Some(message) if self.voice.can_speak() => {
                        self.voice.speak(&message.content);
                        self.last_spoken = Some(message.id);
                    }
                    Some(_) => self.renderer.notice("Speech output is not configured (set TTS_COMMAND).")?,
                    None => self.renderer.notice("Nothing to read yet.")?,
                }
            }
            UserCommand::Hush => self.voice.stop_speaking(),
            UserCommand::Upload(path) => self.upload(path)?,
            UserCommand::Ask(question) => self.ask(question),
            UserCommand::ClearConversation => self.store.clear(),
            UserCommand::Health => {
                let ingest = self.ingest.clone();
                self.spawn_call(async move { ingest.health().await }, BackendReply::Health);
            }
            UserCommand::Stats => {
                let ingest = self.ingest.clone();
                self.spawn_call(async move { ingest.stats().await }, BackendReply::Stats);
            }
            UserCommand::ForgetDocuments => {
                let ingest = self.ingest.clone();
                self.spawn_call(
                    async move { ingest.clear_documents().await },
                    BackendReply::Forgotten,
                );
            }
            UserCommand::Help => self.renderer.notice(HELP)?,
            UserCommand::Quit => return Ok(Flow::Quit),
            UserCommand::Text(text) => self.dictate(&text)?,
            UserCommand::Invalid(message) => self.renderer.notice(&message)?,
        }

        self.after_voice_change()?;
        Ok(Flow::Continue)
    }

    /// Runs `call` off the loop; its result comes back through `replies`.
    fn spawn_call<F, T>(&self, call: F, reply: fn(T) -> BackendReply)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let replies = self.replies_tx.clone();
        tokio::spawn(async move {
            // The session may already be gone.
            let _ = replies.send(reply(call.await));
        });
    }

    fn dictate(&mut self, text: &str) -> anyhow::Result<()> {
        let accepted = match &self.dictation {
            Some(feed) if self.voice.is_listening() => feed.dictate(text),
            _ => false,
        };
        if !accepted {
            self.renderer
                .notice("Not listening. Use /listen, then type what you would say.")?;
        }
        Ok(())
    }

    fn upload(&mut self, path: PathBuf) -> anyhow::Result<()> {
        if self.upload_pending {
            self.renderer
                .notice("An upload is already in progress, wait for it to finish.")?;
            return Ok(());
        }
        self.renderer
            .notice(&format!("Uploading {}...", path.display()))?;
        self.upload_pending = true;
        let ingest = self.ingest.clone();
        self.spawn_call(
            async move { api::upload_file(ingest.as_ref(), &path).await },
            BackendReply::Uploaded,
        );
        Ok(())
    }

    /// Typed questions show up in the thread like spoken ones.
    fn ask(&mut self, question: String) {
        let conversation_id = self.store.snapshot().conversation_id;
        self.store.add_message(Role::User, question.clone());
        self.store.set_typing(true);
        let ingest = self.ingest.clone();
        self.spawn_call(
            async move { ingest.ask(&question, conversation_id).await },
            BackendReply::Answered,
        );
    }

    pub(crate) fn on_backend_reply(&mut self, reply: BackendReply) -> anyhow::Result<()> {
        match reply {
            BackendReply::Uploaded(result) => {
                self.upload_pending = false;
                match result {
                    Ok(outcome) if outcome.success => self.renderer.notice(&outcome.message)?,
                    Ok(outcome) => self
                        .renderer
                        .notice(&format!("Upload failed: {}", outcome.message))?,
                    Err(e) => {
                        warn!(error = %e, "Upload aborted");
                        self.renderer.notice(&e.to_string())?;
                    }
                }
            }
            BackendReply::Answered(result) => {
                self.store.set_typing(false);
                match result {
                    Ok(reply) => {
                        self.store.set_conversation_id(reply.conversation_id);
                        self.store.add_message(Role::Assistant, reply.response);
                    }
                    Err(e) => {
                        warn!(error = %e, "Question failed");
                        self.renderer.notice(&format!("Question failed: {}", e))?;
                    }
                }
            }
            BackendReply::Health(Ok(report)) => self.renderer.notice(&format!(
                "Backend {}: vector store {}, agent {}, pdf processor {}",
                report.status,
                up_or_down(report.components.vector_store),
                up_or_down(report.components.ai_agent),
                up_or_down(report.components.pdf_processor),
            ))?,
            BackendReply::Health(Err(e)) => {
                self.renderer.notice(&format!("Health check failed: {}", e))?
            }
            BackendReply::Stats(Ok(stats)) => self.renderer.notice(&format!(
                "{} document chunks indexed, {} active connections",
                stats.documents_count, stats.active_connections
            ))?,
            BackendReply::Stats(Err(e)) => {
                self.renderer.notice(&format!("Could not fetch stats: {}", e))?
            }
            BackendReply::Forgotten(Ok(receipt)) => self.renderer.notice(&receipt.message)?,
            BackendReply::Forgotten(Err(e)) => {
                self.renderer.notice(&format!("Could not clear documents: {}", e))?
            }
        }
        Ok(())
    }

    pub(crate) fn on_voice_event(&mut self, event: VoiceEvent) -> anyhow::Result<()> {
        if self.voice.handle_event(event) {
            self.after_voice_change()?;
        }
        Ok(())
    }

    /// Renders the voice state and hands off a finished transcript, if any.
    fn after_voice_change(&mut self) -> anyhow::Result<()> {
        self.renderer.voice(self.voice.state())?;
        if let Some(transcript) = self.voice.take_finished_transcript() {
            forward_transcript(self.sink.as_ref(), &self.store, transcript);
        }
        Ok(())
    }

    pub(crate) fn on_conversation_change(&mut self) -> anyhow::Result<()> {
        let state = self.view.snapshot();
        self.renderer.conversation(&state)?;

        let Some(latest) = state.last_message() else {
            return Ok(());
        };
        let unspoken = self.last_spoken.as_deref() != Some(latest.id.as_str());
        if latest.role == Role::Assistant && unspoken && self.voice.can_speak() {
            self.voice.speak(&latest.content);
            self.last_spoken = Some(latest.id.clone());
            self.renderer.voice(self.voice.state())?;
        }
        Ok(())
    }
}

fn up_or_down(ok: bool) -> &'static str {
    if ok { "ok" } else { "down" }
}
