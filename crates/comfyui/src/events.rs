//! Lifecycle events emitted by the progress channel.
//!
//! Presentation consumers subscribe to these to surface a degraded state
//! (stale progress) while the channel reconnects. The current connection
//! state is also available as
//! [`ChannelStatus`](crate::progress::ChannelStatus) in the shared state.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// A WebSocket session was established.
    Connected { client_id: String },

    /// The session was lost; progress values are stale until reconnected.
    Disconnected { client_id: String },

    /// The channel was shut down and will not reconnect.
    Stopped,
}
