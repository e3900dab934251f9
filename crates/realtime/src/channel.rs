//! The public face of the realtime channel.

use crate::supervisor;
use docvoice_core::{ClientFrame, ConversationStore, FrameSink};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, warn};

/// How long to wait before reconnecting after the socket goes away.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Socket base location, e.g. `ws://localhost:8000`.
    pub ws_base: String,
    /// Fixed delay between an unplanned close and the next connection attempt.
    pub reconnect_delay: Duration,
    /// Interval for `ping` frames while connected; `None` disables them.
    pub keepalive: Option<Duration>,
}

impl ChannelConfig {
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            keepalive: None,
        }
    }

    /// The full endpoint address for a client.
    pub fn endpoint(&self, client_id: &str) -> String {
        format!("{}/ws/{}", self.ws_base.trim_end_matches('/'), client_id)
    }
}

/// Lifecycle of the channel.
///
/// `Disconnected -> Connecting -> Connected -> Disconnected -> Connecting -> ...`
/// until a planned teardown, which ends in `Closed` for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// Writer for the currently open connection, if there is one.
pub(crate) type Outbound = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

pub(crate) fn lock(outbound: &Outbound) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
    outbound.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle on a running channel.
///
/// Dropping the handle tears the channel down the same way
/// [`disconnect`](Self::disconnect) does, without waiting for it to finish.
pub struct ChannelHandle {
    outbound: Outbound,
    state: watch::Receiver<ChannelState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Opens the channel for `client_id` and keeps it open until teardown.
///
/// Connection state and every inbound frame are written to `store`.
/// Must be called from within a Tokio runtime.
pub fn connect(config: ChannelConfig, client_id: &str, store: ConversationStore) -> ChannelHandle {
    let url = config.endpoint(client_id);
    let outbound = Outbound::default();
    let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let span = tracing::info_span!("realtime", %client_id);
    let task = tokio::spawn(
        supervisor::run(url, config, store, outbound.clone(), state_tx, shutdown_rx)
            .instrument(span),
    );

    ChannelHandle {
        outbound,
        state: state_rx,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    }
}

impl ChannelHandle {
    /// Sends `frame` if the connection is open. Otherwise the frame is dropped
    /// with a warning; it is neither queued nor retried.
    pub fn send(&self, frame: &ClientFrame) {
        let payload = match frame.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize outbound frame");
                return;
            }
        };
        let delivered = lock(&self.outbound)
            .as_ref()
            .is_some_and(|tx| tx.send(payload).is_ok());
        if delivered {
            debug!("Outbound frame handed to writer");
        } else {
            warn!("WebSocket is not connected; dropping outbound frame");
        }
    }

    /// Whether a frame sent now would be written to an open connection.
    pub fn is_open(&self) -> bool {
        lock(&self.outbound).is_some()
    }

    /// Observes the channel's lifecycle.
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Planned teardown: cancels any pending reconnect, closes the open
    /// connection and waits for the supervisor to finish. Idempotent.
    pub async fn disconnect(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            info!("Tearing down realtime channel");
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Realtime supervisor task failed");
            }
        }
    }
}

impl FrameSink for ChannelHandle {
    fn send(&self, frame: &ClientFrame) {
        ChannelHandle::send(self, frame);
    }
}
