//! Device control abstraction

use crate::error::ControlError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Longest countdown a power strip accepts (24 hours)
pub const MAX_COUNTDOWN_SECONDS: u32 = 86_400;

/// Status reported by a device, keyed by data point code
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    /// Data points (e.g. `switch_1 -> true`, `countdown_1 -> 0`)
    pub status: BTreeMap<String, serde_json::Value>,
    pub fetched_at: DateTime<Utc>,
}

impl DeviceStatus {
    /// On/off state of a channel, if the device reports it
    #[must_use]
    pub fn channel_state(&self, channel: &str) -> Option<bool> {
        self.status.get(channel).and_then(serde_json::Value::as_bool)
    }
}

/// A provider able to report and switch outlet channels.
///
/// Calls may be slow network I/O; callers are expected to bound them with
/// their own timeout.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Fetch the current data points of a device
    async fn get_status(&self, device_id: &str) -> Result<DeviceStatus, ControlError>;

    /// Switch one channel on or off
    async fn switch(&self, device_id: &str, channel: &str, on: bool) -> Result<(), ControlError>;

    /// Arm the countdown timer of one channel
    async fn set_countdown(
        &self,
        device_id: &str,
        channel: &str,
        seconds: u32,
    ) -> Result<(), ControlError>;

    /// Whether this provider only simulates hardware
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Map a switch channel (`switch_N`) to its countdown data point (`countdown_N`)
pub fn countdown_code(channel: &str) -> Result<String, ControlError> {
    match channel.strip_prefix("switch_") {
        Some(n) if matches!(n, "1" | "2" | "3" | "4" | "5") => Ok(format!("countdown_{n}")),
        _ => Err(ControlError::InvalidChannel(channel.to_string())),
    }
}

/// Validate a countdown duration
pub fn check_countdown(seconds: u32) -> Result<(), ControlError> {
    if seconds > MAX_COUNTDOWN_SECONDS {
        return Err(ControlError::InvalidCountdown(seconds));
    }
    Ok(())
}
