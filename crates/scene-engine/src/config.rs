//! Engine tuning knobs

use std::time::Duration;

/// Runtime configuration for [`SceneEngine`](crate::SceneEngine)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the background scheduler
    pub tick_interval: Duration,
    /// Readings older than this never satisfy a condition
    pub freshness_window: Duration,
    /// Margin added to `<=` and `>=` thresholds, and tolerance for `==`
    pub hysteresis: f64,
    /// Upper bound for a single device command
    pub command_timeout: Duration,
    /// Session length when a start request omits it
    pub default_session_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            freshness_window: Duration::from_secs(120),
            hysteresis: 0.0,
            command_timeout: Duration::from_secs(10),
            default_session_minutes: 15,
        }
    }
}

impl EngineConfig {
    /// Freshness window as a chrono duration, for comparing timestamps
    #[must_use]
    pub fn freshness(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.freshness_window).unwrap_or(chrono::Duration::MAX)
    }
}
