//! Long-lived progress channel task.
//!
//! [`ProgressChannel`] owns the WebSocket session to one ComfyUI instance
//! and holds the only [`ProgressPublisher`]. It runs a connect -> process
//! -> reconnect loop in a background task until shut down.
//!
//! Lifecycle events are broadcast via a [`tokio::sync::broadcast`]
//! channel. Call [`ProgressChannel::subscribe`] to receive them.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::ComfyUIClient;
use crate::config::ClientConfig;
use crate::events::ChannelEvent;
use crate::processor::{process_messages, SessionEnd};
use crate::progress::{self, ChannelStatus, ProgressPublisher, ProgressState};
use crate::reconnect::{reconnect_loop, ReconnectConfig};

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long [`ProgressChannel::shutdown`] waits for the task to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the running progress channel.
pub struct ProgressChannel {
    state: ProgressState,
    event_tx: broadcast::Sender<ChannelEvent>,
    cancel: CancellationToken,
    task_handle: JoinHandle<()>,
}

impl ProgressChannel {
    /// Start the connection task. Must be called inside a tokio runtime.
    pub fn spawn(client: ComfyUIClient, reconnect: ReconnectConfig) -> Self {
        let (publisher, state) = progress::channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let task_event_tx = event_tx.clone();
        let task_cancel = cancel.clone();
        let task_handle = tokio::spawn(async move {
            tracing::info!(ws_url = %client.ws_url(), "Starting progress channel");
            run_connection_loop(&client, &reconnect, &publisher, &task_event_tx, &task_cancel)
                .await;
            publisher.publish_connection(ChannelStatus::Disconnected);
            let _ = task_event_tx.send(ChannelEvent::Stopped);
            tracing::info!(ws_url = %client.ws_url(), "Progress channel stopped");
        });

        Self {
            state,
            event_tx,
            cancel,
            task_handle,
        }
    }

    /// Start a channel to the instance described by `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::spawn(
            ComfyUIClient::new(config.ws_url.clone()),
            config.reconnect.clone(),
        )
    }

    /// A read handle onto the shared progress state.
    pub fn state(&self) -> ProgressState {
        self.state.clone()
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the connection task and wait briefly for it to exit.
    ///
    /// Once the task has exited its publisher is dropped, so pending
    /// state subscriptions observe a closed channel.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down progress channel");
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.task_handle)
            .await
            .is_err()
        {
            tracing::warn!("Progress channel task did not exit in time");
        }
    }
}

/// Core connection loop: connect -> process messages -> reconnect.
///
/// Runs until the cancellation token is triggered.
async fn run_connection_loop(
    client: &ComfyUIClient,
    reconnect: &ReconnectConfig,
    publisher: &ProgressPublisher,
    event_tx: &broadcast::Sender<ChannelEvent>,
    cancel: &CancellationToken,
) {
    let mut conn = match client.connect().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(error = %e, "Connection failed, entering reconnect loop");
            match reconnect_loop(client, reconnect, cancel).await {
                Some(conn) => conn,
                None => return,
            }
        }
    };

    loop {
        let client_id = conn.client_id.clone();
        publisher.publish_connection(ChannelStatus::Connected {
            client_id: client_id.clone(),
        });
        let _ = event_tx.send(ChannelEvent::Connected {
            client_id: client_id.clone(),
        });

        let mut ws_stream = conn.ws_stream;
        let end = process_messages(&mut ws_stream, &client_id, publisher, cancel).await;

        publisher.publish_connection(ChannelStatus::Disconnected);
        let _ = event_tx.send(ChannelEvent::Disconnected {
            client_id: client_id.clone(),
        });

        if end == SessionEnd::Cancelled || cancel.is_cancelled() {
            return;
        }

        tracing::info!(client_id = %client_id, ?end, "Connection lost, entering reconnect loop");
        conn = match reconnect_loop(client, reconnect, cancel).await {
            Some(conn) => conn,
            None => return,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_backend_reports_stopped_on_shutdown() {
        let channel = ProgressChannel::spawn(
            ComfyUIClient::new("ws://127.0.0.1:9"),
            ReconnectConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
            },
        );
        let state = channel.state();
        let mut events = channel.subscribe();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.client_id().is_none());

        channel.shutdown().await;
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Stopped);
        assert_eq!(state.connection(), ChannelStatus::Disconnected);
    }
}
