//! Exponential-backoff reconnection for the progress channel.
//!
//! After a session drops, [`reconnect_loop`] waits, dials again under a
//! fresh session identifier, and keeps growing the wait until a session is
//! established or the [`CancellationToken`] fires.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIConnection};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Wait before the first attempt.
    pub initial_delay: Duration,
    /// Ceiling for any single wait.
    pub max_delay: Duration,
    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Stateful delay schedule: `initial, initial * m, initial * m^2, ...`
/// capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    upcoming: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            config: config.clone(),
            upcoming: config.initial_delay.min(config.max_delay),
            attempts: 0,
        }
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.upcoming;
        let grown = delay.as_secs_f64() * self.config.multiplier;
        self.upcoming = Duration::try_from_secs_f64(grown)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay);
        self.attempts += 1;
        delay
    }
}

/// Dial until a session is established.
///
/// Waits before every attempt, including the first, so a backend that
/// just dropped the session is not hammered. Returns `None` if `cancel`
/// fires first.
pub async fn reconnect_loop(
    client: &ComfyUIClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<ComfyUIConnection> {
    let mut backoff = Backoff::new(config);

    loop {
        let delay = backoff.next_delay();
        let attempt = backoff.attempts();

        let dial = async {
            tokio::time::sleep(delay).await;
            tracing::info!(
                ws_url = %client.ws_url(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to ComfyUI",
            );
            client.connect().await
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(ws_url = %client.ws_url(), attempt, "Reconnect cancelled");
                return None;
            }
            result = dial => result,
        };

        match result {
            Ok(conn) => {
                tracing::info!(client_id = %conn.client_id, attempt, "Reconnected to ComfyUI");
                return Some(conn);
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "Reconnect attempt failed");
            }
        }
    }
}
