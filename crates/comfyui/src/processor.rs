//! WebSocket frame processing loop.
//!
//! Reads raw frames from a progress channel session, parses them into
//! typed [`ComfyUIMessage`] variants, and publishes queue depth and step
//! progress into the shared state. Frames are handled strictly in arrival
//! order. A frame that fails to parse is logged and skipped; it never ends
//! the session.

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::messages::{parse_message, ComfyUIMessage, ErrorData, ProgressData, StatusData};
use crate::progress::{ProgressPublisher, StepProgress};

/// Why a session's processing loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The backend closed the socket or the stream ended.
    Closed,
    /// A transport error occurred while receiving.
    Failed,
    /// The channel was shut down.
    Cancelled,
}

/// Process frames until the session closes, fails, or `cancel` fires.
///
/// Binary frames (preview images) are ignored.
pub async fn process_messages<S>(
    stream: &mut S,
    client_id: &str,
    publisher: &ProgressPublisher,
    cancel: &CancellationToken,
) -> SessionEnd
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                handle_text_message(&text, client_id, publisher);
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!(client_id, "Ignoring binary message (preview image)");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(client_id, ?frame, "ComfyUI WebSocket closed");
                return SessionEnd::Closed;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::error!(client_id, error = %e, "WebSocket receive error");
                return SessionEnd::Failed;
            }
            None => {
                tracing::info!(client_id, "WebSocket stream exhausted");
                return SessionEnd::Closed;
            }
        }
    }
}

/// Parse a single text frame and apply it to the shared state.
pub fn handle_text_message(text: &str, client_id: &str, publisher: &ProgressPublisher) {
    let msg = match parse_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(
                client_id,
                error = %e,
                raw_message = %text,
                "Failed to parse ComfyUI message",
            );
            return;
        }
    };

    match msg {
        ComfyUIMessage::Status(data) => handle_status(client_id, publisher, &data),
        ComfyUIMessage::Progress(data) => handle_progress(client_id, publisher, &data),
        ComfyUIMessage::ExecutionStart(data) => {
            tracing::info!(client_id, prompt_id = ?data.prompt_id, "Execution started");
        }
        ComfyUIMessage::ExecutionSuccess(data) => {
            tracing::info!(client_id, prompt_id = ?data.prompt_id, "Execution succeeded");
        }
        ComfyUIMessage::Executing(data) => match data.node {
            Some(node) => {
                tracing::debug!(client_id, prompt_id = ?data.prompt_id, node = %node, "Executing node");
            }
            None => {
                tracing::debug!(client_id, prompt_id = ?data.prompt_id, "All nodes done");
            }
        },
        ComfyUIMessage::ExecutionError(data) => handle_execution_error(client_id, &data),
        ComfyUIMessage::Other(kind) => {
            tracing::trace!(client_id, kind = %kind, "Ignoring ComfyUI message");
        }
    }
}

// ---- individual message handlers ----

fn handle_status(client_id: &str, publisher: &ProgressPublisher, data: &StatusData) {
    let Some(remaining) = data.queue_remaining() else {
        tracing::debug!(client_id, "Status frame without queue_remaining");
        return;
    };
    if publisher.publish_queue(remaining) {
        tracing::debug!(client_id, queue_remaining = remaining, "ComfyUI queue status");
    }
}

fn handle_progress(client_id: &str, publisher: &ProgressPublisher, data: &ProgressData) {
    let (Some(value), Some(max)) = (data.value, data.max) else {
        tracing::debug!(client_id, value = ?data.value, max = ?data.max, "Discarding incomplete progress frame");
        return;
    };
    match StepProgress::from_counts(value, max) {
        Some(progress) => {
            if publisher.publish_step(progress) {
                tracing::debug!(
                    client_id,
                    value,
                    max,
                    percent = progress.percent,
                    "Generation progress",
                );
            }
        }
        None => {
            tracing::warn!(client_id, value, max, "Discarding out-of-range progress frame");
        }
    }
}

fn handle_execution_error(client_id: &str, data: &ErrorData) {
    tracing::error!(
        client_id,
        prompt_id = ?data.prompt_id,
        node_id = ?data.node_id,
        error_type = %data.exception_type,
        error_message = %data.exception_message,
        "Execution error",
    );
}
