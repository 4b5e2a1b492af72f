//! Server configuration from environment variables

use scene_engine::EngineConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tuya_cloud::{Region, TuyaCredentials};

/// Everything `main` needs to wire the server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub seed_defaults: bool,
    /// `None` runs against simulated power strips
    pub tuya: Option<TuyaCredentials>,
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = EngineConfig::default();

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let bind_addr = bind_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid BIND_ADDR '{}': {}", bind_addr, e))?;

        let data_dir = PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let seed_defaults = parse_or(&lookup, "SEED_DEFAULTS", true)?;

        let tuya = match (lookup("TUYA_ACCESS_KEY"), lookup("TUYA_SECRET_KEY")) {
            (Some(access_id), Some(access_secret))
                if !access_id.is_empty() && !access_secret.is_empty() =>
            {
                let region = lookup("TUYA_REGION").unwrap_or_else(|| "eu".to_string());
                Some(TuyaCredentials {
                    access_id,
                    access_secret,
                    region: Region::from_str(&region).map_err(anyhow::Error::msg)?,
                })
            }
            _ => None,
        };

        let engine = EngineConfig {
            tick_interval: Duration::from_secs(parse_or(
                &lookup,
                "RULE_TICK_SECONDS",
                defaults.tick_interval.as_secs(),
            )?),
            freshness_window: Duration::from_secs(parse_or(
                &lookup,
                "SENSOR_STALE_SECONDS",
                defaults.freshness_window.as_secs(),
            )?),
            hysteresis: parse_or(&lookup, "HYSTERESIS_MARGIN", defaults.hysteresis)?,
            command_timeout: Duration::from_secs(parse_or(
                &lookup,
                "DEVICE_TIMEOUT_SECONDS",
                defaults.command_timeout.as_secs(),
            )?),
            default_session_minutes: parse_or(
                &lookup,
                "DEFAULT_SESSION_MINUTES",
                defaults.default_session_minutes,
            )?,
        };

        if engine.tick_interval.is_zero() {
            anyhow::bail!("RULE_TICK_SECONDS must be positive");
        }
        if !engine.hysteresis.is_finite() || engine.hysteresis < 0.0 {
            anyhow::bail!("HYSTERESIS_MARGIN must be a finite, non-negative number");
        }
        if engine.command_timeout.is_zero() {
            anyhow::bail!("DEVICE_TIMEOUT_SECONDS must be positive");
        }
        if engine.default_session_minutes == 0 {
            anyhow::bail!("DEFAULT_SESSION_MINUTES must be positive");
        }

        Ok(Self {
            bind_addr,
            data_dir,
            seed_defaults,
            tuya,
            engine,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", key, raw, e)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert!(config.seed_defaults);
        assert!(config.tuya.is_none());
        assert_eq!(config.engine.tick_interval, Duration::from_secs(30));
        assert_eq!(config.engine.freshness_window, Duration::from_secs(120));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("RULE_TICK_SECONDS", "5"),
            ("HYSTERESIS_MARGIN", "0.5"),
            ("SEED_DEFAULTS", "false"),
            ("TUYA_ACCESS_KEY", "id"),
            ("TUYA_SECRET_KEY", "secret"),
            ("TUYA_REGION", "US"),
        ])
        .unwrap();
        assert_eq!(config.engine.tick_interval, Duration::from_secs(5));
        assert_eq!(config.engine.hysteresis, 0.5);
        assert!(!config.seed_defaults);
        assert_eq!(config.tuya.unwrap().region, Region::Us);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(config(&[("RULE_TICK_SECONDS", "soon")]).is_err());
        assert!(config(&[("RULE_TICK_SECONDS", "0")]).is_err());
        assert!(config(&[("HYSTERESIS_MARGIN", "-1")]).is_err());
        assert!(config(&[("HYSTERESIS_MARGIN", "NaN")]).is_err());
        assert!(config(&[("HYSTERESIS_MARGIN", "inf")]).is_err());
        assert!(config(&[("DEVICE_TIMEOUT_SECONDS", "0")]).is_err());
        assert!(config(&[("BIND_ADDR", "nowhere")]).is_err());
        assert!(config(&[
            ("TUYA_ACCESS_KEY", "id"),
            ("TUYA_SECRET_KEY", "secret"),
            ("TUYA_REGION", "mars"),
        ])
        .is_err());
    }
}
