//! ComfyUI generation client.
//!
//! Submits workflow graphs over REST, keeps a live view of queue depth and
//! sampling progress over a WebSocket progress channel, and resolves the
//! generated artifact once the queue drains.
//!
//! - [`channel::ProgressChannel`] owns the WebSocket session and is the
//!   only writer of the shared [`progress::ProgressState`].
//! - [`controller::JobController`] drives one generation request from
//!   submission to artifact.
//!
//! Queue and step progress are backend-wide, not job-scoped. A controller
//! treats "queue drained" as the completion signal for its pending job,
//! which is only reliable with a single job in flight.

pub mod api;
pub mod channel;
pub mod client;
pub mod config;
pub mod controller;
pub mod events;
pub mod history;
pub mod messages;
pub mod processor;
pub mod progress;
pub mod reconnect;
