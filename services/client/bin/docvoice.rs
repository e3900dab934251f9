//! Main Entrypoint for the docvoice client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment, with command-line overrides.
//! 2. Initializing logging on stderr.
//! 3. Running either a one-shot backend command or the interactive chat, which
//!    opens the realtime channel, sets up the voice backends and hands the
//!    terminal to the session loop.

use anyhow::Context;
use clap::{Parser, Subcommand};
use docvoice_client::{
    api::{self, ApiClient, DocumentIngest},
    config::Config,
    session::Session,
    speech::{CommandSynthesizer, DictationFeed, PromptRecognizer},
};
use docvoice_core::{
    ConversationStore,
    voice::{RecognitionSettings, SpeechRecognizer, SpeechSynthesizer, VoiceAdapter},
};
use docvoice_realtime::{ChannelConfig, connect};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::io::BufReader;
use tracing::info;
use uuid::Uuid;

/// Pace of interim results while "hearing" typed dictation.
const DICTATION_WORD_DELAY: Duration = Duration::from_millis(80);

#[derive(Parser, Debug)]
#[command(version, about = "Ask questions about your PDFs by voice")]
struct Cli {
    /// Base HTTP location of the backend (overrides API_URL).
    #[arg(long)]
    api_url: Option<String>,
    /// Base socket location of the backend (overrides WS_URL).
    #[arg(long)]
    ws_url: Option<String>,
    /// Program used to read answers aloud (overrides TTS_COMMAND).
    #[arg(long)]
    tts: Option<String>,
    /// Do not read answers aloud.
    #[arg(long)]
    mute: bool,
    /// Disable voice input.
    #[arg(long)]
    no_listen: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive voice chat (default).
    Chat,
    /// Upload a PDF and exit.
    Upload { path: PathBuf },
    /// Ask one question without voice and print the answer.
    Ask {
        #[arg(required = true)]
        question: Vec<String>,
    },
    /// Show backend health and exit.
    Health,
    /// Show backend statistics and exit.
    Stats,
    /// Remove every uploaded document from the backend.
    Forget,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    if let Some(ws_url) = cli.ws_url {
        config.ws_url = ws_url;
    }
    if let Some(tts) = cli.tts {
        config.tts_command = Some(tts);
    }
    if cli.mute {
        config.tts_command = None;
    }
    config.validate().context("Invalid command-line override")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(api_url = %config.api_url, ws_url = %config.ws_url, "Configuration loaded.");

    let backend = ApiClient::new(config.api_url.clone(), config.request_timeout)
        .context("Failed to build HTTP client")?;

    // --- 3. Run ---
    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(config, backend, !cli.no_listen).await,
        Command::Upload { path } => {
            let outcome = api::upload_file(&backend, &path).await?;
            println!("{}", outcome.message);
            if !outcome.success {
                anyhow::bail!("upload was not accepted");
            }
            Ok(())
        }
        Command::Ask { question } => {
            let reply = backend
                .ask(&question.join(" "), None)
                .await
                .context("Question failed")?;
            println!("{}", reply.response);
            Ok(())
        }
        Command::Health => {
            let report = backend.health().await.context("Health check failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Stats => {
            let stats = backend.stats().await.context("Could not fetch stats")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Forget => {
            let receipt = backend.clear_documents().await.context("Could not clear documents")?;
            println!("{}", receipt.message);
            Ok(())
        }
    }
}

async fn chat(config: Config, backend: ApiClient, listen: bool) -> anyhow::Result<()> {
    let client_id = Uuid::new_v4().to_string();
    let store = ConversationStore::new();

    let mut channel_config = ChannelConfig::new(config.ws_url.clone());
    channel_config.reconnect_delay = config.reconnect_delay;
    channel_config.keepalive = config.keepalive;
    let channel = Arc::new(connect(channel_config, &client_id, store.clone()));

    let (recognizer, dictation): (Option<Box<dyn SpeechRecognizer>>, Option<DictationFeed>) =
        if listen {
            let (recognizer, feed) = PromptRecognizer::new(DICTATION_WORD_DELAY);
            (Some(Box::new(recognizer)), Some(feed))
        } else {
            (None, None)
        };
    let synthesizer = config
        .tts_command
        .as_deref()
        .and_then(CommandSynthesizer::new)
        .map(|synth| Box::new(synth) as Box<dyn SpeechSynthesizer>);
    let voice = VoiceAdapter::new(
        recognizer,
        synthesizer,
        RecognitionSettings::single_utterance(config.speech_lang.clone()),
    );

    info!(%client_id, "Starting interactive session");
    let session = Session::new(
        store,
        channel.clone(),
        Arc::new(backend),
        voice,
        dictation,
        std::io::stdout(),
    );
    let result = session.run(BufReader::new(tokio::io::stdin())).await;

    if let Ok(mut channel) = Arc::try_unwrap(channel) {
        channel.disconnect().await;
    }
    result
}
