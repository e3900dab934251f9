//! Realtime Channel
//!
//! Owns one persistent WebSocket to the backend at `{ws_base}/ws/{client_id}`,
//! feeds every inbound frame into the shared conversation state, and offers a
//! fire-and-forget [`ChannelHandle::send`]. The connection is supervised by a
//! single task that reconnects after a fixed delay whenever the socket goes
//! away, until the handle is torn down.
//!
//! - `channel`: the public handle and its configuration.
//! - `supervisor`: the connect / run / wait-and-retry loop.

mod channel;
mod supervisor;

pub use channel::{ChannelConfig, ChannelHandle, ChannelState, connect};
