//! Shared progress state fed by the progress channel.
//!
//! Three independent fields are tracked, each in its own
//! [`tokio::sync::watch`] channel so observers can subscribe to exactly the
//! field they care about:
//!
//! - latest [`QueueStatus`] (`None` until the first status frame),
//! - latest [`StepProgress`] (`None` until the first progress frame),
//! - [`ChannelStatus`] of the WebSocket session.
//!
//! [`channel`] returns the single [`ProgressPublisher`] (write side, held by
//! the progress channel task) and a [`ProgressState`] (read side, cheap to
//! clone). A publish that does not change the stored value neither
//! modifies it nor wakes subscribers.
//!
//! The state is not keyed by job. With more than one job in flight on the
//! backend, a snapshot cannot be attributed to a particular job.

use chrono::Utc;
use genstudio_core::types::Timestamp;
use serde::Serialize;
use tokio::sync::watch;

/// Backend-wide queue depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueueStatus {
    pub remaining: u32,
    pub observed_at: Timestamp,
}

impl QueueStatus {
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }
}

/// Sampling progress of the currently executing job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepProgress {
    pub completed_steps: u32,
    pub total_steps: u32,
    /// `100 * completed_steps / total_steps`, within `[0, 100]`.
    pub percent: f64,
    pub observed_at: Timestamp,
}

impl StepProgress {
    /// Build a snapshot from raw step counts.
    ///
    /// Returns `None` when `total` is zero or `completed` exceeds `total`,
    /// since either would yield a misleading percentage.
    pub fn from_counts(completed: u32, total: u32) -> Option<Self> {
        if total == 0 || completed > total {
            return None;
        }
        Some(Self {
            completed_steps: completed,
            total_steps: total,
            percent: 100.0 * f64::from(completed) / f64::from(total),
            observed_at: Utc::now(),
        })
    }

    fn same_counts(&self, other: &StepProgress) -> bool {
        self.completed_steps == other.completed_steps && self.total_steps == other.total_steps
    }
}

/// Connection state of the progress channel.
///
/// `Disconnected` means the queue and step snapshots are stale until the
/// next valid frame after a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelStatus {
    Connecting,
    Connected { client_id: String },
    Disconnected,
}

/// Create a fresh state with its single write handle.
pub fn channel() -> (ProgressPublisher, ProgressState) {
    let (queue_tx, queue_rx) = watch::channel(None);
    let (step_tx, step_rx) = watch::channel(None);
    let (connection_tx, connection_rx) = watch::channel(ChannelStatus::Connecting);

    let publisher = ProgressPublisher {
        queue: queue_tx,
        step: step_tx,
        connection: connection_tx,
    };
    let state = ProgressState {
        queue: queue_rx,
        step: step_rx,
        connection: connection_rx,
    };
    (publisher, state)
}

/// Write side of the shared progress state.
///
/// Deliberately not `Clone`: the progress channel is the only writer.
/// Dropping the publisher closes every subscription.
#[derive(Debug)]
pub struct ProgressPublisher {
    queue: watch::Sender<Option<QueueStatus>>,
    step: watch::Sender<Option<StepProgress>>,
    connection: watch::Sender<ChannelStatus>,
}

impl ProgressPublisher {
    /// Record a new queue depth. Returns `true` if the value changed.
    pub fn publish_queue(&self, remaining: u32) -> bool {
        self.queue.send_if_modified(|current| {
            if current.is_some_and(|q| q.remaining == remaining) {
                return false;
            }
            *current = Some(QueueStatus {
                remaining,
                observed_at: Utc::now(),
            });
            true
        })
    }

    /// Record a new step snapshot. Returns `true` if the counts changed.
    pub fn publish_step(&self, progress: StepProgress) -> bool {
        self.step.send_if_modified(|current| {
            if current.is_some_and(|p| p.same_counts(&progress)) {
                return false;
            }
            *current = Some(progress);
            true
        })
    }

    /// Record a connection state change. Returns `true` if it changed.
    pub fn publish_connection(&self, status: ChannelStatus) -> bool {
        self.connection.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        })
    }

    /// A new read handle onto this state.
    pub fn state(&self) -> ProgressState {
        ProgressState {
            queue: self.queue.subscribe(),
            step: self.step.subscribe(),
            connection: self.connection.subscribe(),
        }
    }
}

/// Read side of the shared progress state.
#[derive(Debug, Clone)]
pub struct ProgressState {
    queue: watch::Receiver<Option<QueueStatus>>,
    step: watch::Receiver<Option<StepProgress>>,
    connection: watch::Receiver<ChannelStatus>,
}

impl ProgressState {
    pub fn queue_status(&self) -> Option<QueueStatus> {
        *self.queue.borrow()
    }

    pub fn step_progress(&self) -> Option<StepProgress> {
        *self.step.borrow()
    }

    pub fn connection(&self) -> ChannelStatus {
        self.connection.borrow().clone()
    }

    /// Session id of the live connection, if connected.
    pub fn client_id(&self) -> Option<String> {
        match &*self.connection.borrow() {
            ChannelStatus::Connected { client_id } => Some(client_id.clone()),
            _ => None,
        }
    }

    /// Subscribe to queue depth changes made after this call.
    pub fn subscribe_queue(&self) -> watch::Receiver<Option<QueueStatus>> {
        let mut rx = self.queue.clone();
        rx.borrow_and_update();
        rx
    }

    /// Subscribe to step progress changes made after this call.
    pub fn subscribe_step(&self) -> watch::Receiver<Option<StepProgress>> {
        let mut rx = self.step.clone();
        rx.borrow_and_update();
        rx
    }

    /// Subscribe to connection state changes made after this call.
    pub fn subscribe_connection(&self) -> watch::Receiver<ChannelStatus> {
        let mut rx = self.connection.clone();
        rx.borrow_and_update();
        rx
    }
}
