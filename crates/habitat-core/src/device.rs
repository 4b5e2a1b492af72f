//! Power strips and their outlets

use crate::{DeviceId, OutletId, ZoneId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote-controlled power strip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Control provider ("tuya")
    pub provider: String,
    /// Device id in the provider's cloud
    pub provider_device_id: String,
    pub name: String,
    pub zone_id: ZoneId,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// One switchable channel on a [`Device`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outlet {
    pub id: OutletId,
    pub device_id: DeviceId,
    /// Provider data point ("switch_1".."switch_5")
    pub channel: String,
    /// What is plugged in ("heating", "lighting", ...)
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub custom_name: Option<String>,
    pub enabled: bool,
    /// Last state confirmed by the device provider
    #[serde(default)]
    pub last_state: bool,
    #[serde(default)]
    pub manual_override: bool,
    #[serde(default)]
    pub manual_override_until: Option<DateTime<Utc>>,
}

impl Outlet {
    /// Create an enabled outlet that is off and not overridden
    #[must_use]
    pub fn new(id: OutletId, device_id: DeviceId, channel: impl Into<String>) -> Self {
        Self {
            id,
            device_id,
            channel: channel.into(),
            role: None,
            custom_name: None,
            enabled: true,
            last_state: false,
            manual_override: false,
            manual_override_until: None,
        }
    }

    /// Whether a manual override currently blocks automation
    #[must_use]
    pub fn override_active(&self, now: DateTime<Utc>) -> bool {
        self.manual_override && self.manual_override_until.is_some_and(|until| until > now)
    }

    /// Get a display name (custom name, role, or channel)
    #[must_use]
    pub fn display_name(&self) -> String {
        self.custom_name
            .clone()
            .or_else(|| self.role.clone())
            .unwrap_or_else(|| self.channel.clone())
    }
}
