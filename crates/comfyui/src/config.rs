use std::str::FromStr;
use std::time::Duration;

use crate::reconnect::ReconnectConfig;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8188";
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8188";
const DEFAULT_OUTPUTS_URL: &str = "http://127.0.0.1:8188/outputs";
const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Client configuration loaded from environment variables.
///
/// All fields have defaults pointing at a ComfyUI instance on
/// `127.0.0.1:8188`. Override via environment variables in deployment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP base URL; `/api/prompt` and `/api/history/{id}` are appended.
    pub api_url: String,
    /// WebSocket base URL; `/ws?clientId=...` is appended.
    pub ws_url: String,
    /// Base URL generated files are served from.
    pub outputs_base_url: String,
    /// Upper bound on the `POST /api/prompt` round trip.
    pub submit_timeout: Duration,
    /// Upper bound on a single history lookup.
    pub fetch_timeout: Duration,
    /// Backoff used by the progress channel after a connection drop.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            outputs_base_url: DEFAULT_OUTPUTS_URL.to_string(),
            submit_timeout: Duration::from_secs(DEFAULT_SUBMIT_TIMEOUT_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load a `.env` file if one exists, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                         |
    /// |------------------------------|---------------------------------|
    /// | `COMFYUI_API_URL`            | `http://127.0.0.1:8188`         |
    /// | `COMFYUI_WS_URL`             | `ws://127.0.0.1:8188`           |
    /// | `COMFYUI_OUTPUTS_URL`        | `http://127.0.0.1:8188/outputs` |
    /// | `SUBMIT_TIMEOUT_SECS`        | `30`                            |
    /// | `FETCH_TIMEOUT_SECS`         | `30`                            |
    /// | `RECONNECT_INITIAL_DELAY_MS` | `1000`                          |
    /// | `RECONNECT_MAX_DELAY_SECS`   | `30`                            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = |name: &str, default: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
                .trim_end_matches('/')
                .to_string()
        };

        let defaults = ReconnectConfig::default();
        let submit_secs = parse_var(&lookup, "SUBMIT_TIMEOUT_SECS", DEFAULT_SUBMIT_TIMEOUT_SECS)?;
        let fetch_secs = parse_var(&lookup, "FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS)?;
        let initial_ms = parse_var(
            &lookup,
            "RECONNECT_INITIAL_DELAY_MS",
            defaults.initial_delay.as_millis() as u64,
        )?;
        let max_secs = parse_var(
            &lookup,
            "RECONNECT_MAX_DELAY_SECS",
            defaults.max_delay.as_secs(),
        )?;

        Ok(Self {
            api_url: url("COMFYUI_API_URL", DEFAULT_API_URL),
            ws_url: url("COMFYUI_WS_URL", DEFAULT_WS_URL),
            outputs_base_url: url("COMFYUI_OUTPUTS_URL", DEFAULT_OUTPUTS_URL),
            submit_timeout: Duration::from_secs(submit_secs),
            fetch_timeout: Duration::from_secs(fetch_secs),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_secs(max_secs),
                ..defaults
            },
        })
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var: name,
            value: raw,
        }),
        None => Ok(default),
    }
}

/// Errors raised while loading [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}
