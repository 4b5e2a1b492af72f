//! Error types for device control

use thiserror::Error;

/// Device control errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tuya API error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid channel for countdown: {0}")]
    InvalidChannel(String),

    #[error("Countdown must be between 0 and 86400 seconds, got {0}")]
    InvalidCountdown(u32),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Simulated failure for device {0}")]
    Injected(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ControlError {
    /// Whether retrying the same command later could succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ControlError::Http(_) | ControlError::Timeout | ControlError::Injected(_)
        )
    }
}
