//! Connection supervision: connect, serve until the socket goes away, wait the
//! fixed reconnect delay, repeat. A single task runs this loop, so at most one
//! reconnect timer is ever pending.

use crate::channel::{ChannelConfig, ChannelState, Outbound, lock};
use docvoice_core::{ClientFrame, ConversationStore, dispatch};
use futures_util::{SinkExt, StreamExt};
use std::{fmt, time::Duration};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, protocol::Message as WsMessage},
};
use tracing::{debug, error, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a connection stopped being served.
enum ConnectionEnd {
    /// Teardown was requested.
    Shutdown,
    ClosedByPeer(Option<String>),
    Failed(WsError),
    StreamEnded,
}

impl fmt::Display for ConnectionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEnd::Shutdown => write!(f, "shutdown requested"),
            ConnectionEnd::ClosedByPeer(Some(reason)) if !reason.is_empty() => {
                write!(f, "closed by peer: {}", reason)
            }
            ConnectionEnd::ClosedByPeer(_) => write!(f, "closed by peer"),
            ConnectionEnd::Failed(e) => write!(f, "socket error: {}", e),
            ConnectionEnd::StreamEnded => write!(f, "stream ended"),
        }
    }
}

pub(crate) async fn run(
    url: String,
    config: ChannelConfig,
    store: ConversationStore,
    outbound: Outbound,
    state: watch::Sender<ChannelState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        state.send_replace(ChannelState::Connecting);
        debug!(%url, "Opening WebSocket");
        let attempt = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = &mut shutdown => break,
        };

        match attempt {
            Ok((socket, _response)) => {
                info!("WebSocket connected");
                let (tx, rx) = mpsc::unbounded_channel();
                *lock(&outbound) = Some(tx);
                store.set_connected(true);
                state.send_replace(ChannelState::Connected);

                let end = serve(socket, rx, &store, config.keepalive, &mut shutdown).await;
                lock(&outbound).take();
                if let ConnectionEnd::Shutdown = end {
                    break;
                }
                warn!(reason = %end, "WebSocket disconnected");
            }
            Err(e) => warn!(error = %e, "Failed to open WebSocket"),
        }

        store.set_connected(false);
        state.send_replace(ChannelState::Disconnected);
        info!(
            delay_ms = config.reconnect_delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => info!("Attempting to reconnect..."),
            _ = &mut shutdown => break,
        }
    }

    lock(&outbound).take();
    store.set_connected(false);
    state.send_replace(ChannelState::Closed);
    info!("Realtime channel closed");
}

/// Pumps one open connection until it ends.
async fn serve(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    store: &ConversationStore,
    keepalive: Option<Duration>,
    shutdown: &mut oneshot::Receiver<()>,
) -> ConnectionEnd {
    let (mut sink, mut stream) = socket.split();
    let mut keepalive = keepalive.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => dispatch::handle_text(store, text.as_str()),
                Some(Ok(WsMessage::Binary(data))) => {
                    warn!(bytes = data.len(), "Ignoring binary frame");
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    return ConnectionEnd::ClosedByPeer(frame.map(|f| f.reason.as_str().to_owned()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return ConnectionEnd::Failed(e),
                None => return ConnectionEnd::StreamEnded,
            },
            Some(payload) = outbound.recv() => {
                if let Err(e) = sink.send(WsMessage::Text(payload.into())).await {
                    return ConnectionEnd::Failed(e);
                }
            }
            _ = next_tick(&mut keepalive) => match ClientFrame::Ping.encode() {
                Ok(ping) => {
                    if let Err(e) = sink.send(WsMessage::Text(ping.into())).await {
                        return ConnectionEnd::Failed(e);
                    }
                }
                Err(e) => error!(error = %e, "Failed to serialize ping"),
            },
            _ = &mut *shutdown => {
                if let Err(e) = sink.send(WsMessage::Close(None)).await {
                    debug!(error = %e, "Close frame not delivered");
                }
                return ConnectionEnd::Shutdown;
            }
        }
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
