//! In-process simulation of Tuya power strips
//!
//! Used when no cloud credentials are configured, and by tests. Every
//! device id is accepted and reports five switch channels with their
//! countdown data points; commands are recorded in order.

use crate::error::ControlError;
use crate::provider::{check_countdown, countdown_code, DeviceControl, DeviceStatus};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Number of switch channels on a simulated strip
const CHANNELS: u8 = 5;

/// A command received by the simulation
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedCommand {
    pub device_id: String,
    pub code: String,
    pub value: serde_json::Value,
}

/// Deterministic device simulation
#[derive(Default)]
pub struct SimulatedDevices {
    /// Data point values keyed by (device id, code)
    points: DashMap<(String, String), serde_json::Value>,
    /// Every accepted command, in arrival order
    commands: Mutex<Vec<SimulatedCommand>>,
    /// Devices whose calls fail
    failing: DashSet<String>,
    /// Artificial delay applied to every call
    latency: Option<Duration>,
}

impl SimulatedDevices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every call for `device_id` fail until restored
    pub fn fail_device(&self, device_id: &str) {
        self.failing.insert(device_id.to_string());
    }

    /// Undo [`fail_device`](Self::fail_device)
    pub fn restore_device(&self, device_id: &str) {
        self.failing.remove(device_id);
    }

    /// Set a channel's hardware state without recording a command
    pub fn set_channel(&self, device_id: &str, channel: &str, on: bool) {
        self.points.insert(
            (device_id.to_string(), channel.to_string()),
            serde_json::Value::Bool(on),
        );
    }

    /// Current simulated state of a channel
    #[must_use]
    pub fn channel(&self, device_id: &str, channel: &str) -> bool {
        self.points
            .get(&(device_id.to_string(), channel.to_string()))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// All commands received so far
    #[must_use]
    pub fn commands(&self) -> Vec<SimulatedCommand> {
        self.commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Number of commands received so far
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands.lock().map(|c| c.len()).unwrap_or_default()
    }

    async fn enter(&self, device_id: &str) -> Result<(), ControlError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.contains(device_id) {
            return Err(ControlError::Injected(device_id.to_string()));
        }
        Ok(())
    }

    fn record(&self, device_id: &str, code: String, value: serde_json::Value) {
        tracing::info!("SIMULATION: {} {} = {}", device_id, code, value);
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(SimulatedCommand {
                device_id: device_id.to_string(),
                code: code.clone(),
                value: value.clone(),
            });
        }
        self.points.insert((device_id.to_string(), code), value);
    }
}

#[async_trait]
impl DeviceControl for SimulatedDevices {
    async fn get_status(&self, device_id: &str) -> Result<DeviceStatus, ControlError> {
        self.enter(device_id).await?;

        let mut status = BTreeMap::new();
        for n in 1..=CHANNELS {
            status.insert(format!("switch_{n}"), serde_json::Value::Bool(false));
            status.insert(format!("countdown_{n}"), serde_json::json!(0));
        }
        for entry in self.points.iter() {
            let (device, code) = entry.key();
            if device == device_id {
                status.insert(code.clone(), entry.value().clone());
            }
        }

        Ok(DeviceStatus {
            device_id: device_id.to_string(),
            status,
            fetched_at: Utc::now(),
        })
    }

    async fn switch(&self, device_id: &str, channel: &str, on: bool) -> Result<(), ControlError> {
        self.enter(device_id).await?;
        self.record(device_id, channel.to_string(), serde_json::Value::Bool(on));
        Ok(())
    }

    async fn set_countdown(
        &self,
        device_id: &str,
        channel: &str,
        seconds: u32,
    ) -> Result<(), ControlError> {
        let code = countdown_code(channel)?;
        check_countdown(seconds)?;
        self.enter(device_id).await?;
        self.record(device_id, code, serde_json::json!(seconds));
        Ok(())
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
