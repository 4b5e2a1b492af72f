//! Sensors and their readings

use crate::{ReadingId, SensorId, ZoneId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Environmental quantity measured in a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Temperature,
    Humidity,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Temperature, Metric::Humidity];

    #[must_use]
    pub fn unit(self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            Metric::Humidity => "%",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical sensor installed in a zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    pub zone_id: ZoneId,
    /// Sensor provider ("nous_e6", "gateway")
    pub provider: String,
    #[serde(default)]
    pub provider_sensor_id: Option<String>,
    /// What the sensor measures ("temperature_humidity")
    pub kind: String,
    pub name: String,
}

/// An immutable timestamped measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub id: ReadingId,
    pub sensor_id: SensorId,
    pub metric: Metric,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}
