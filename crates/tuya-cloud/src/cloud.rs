//! Signed HTTPS client for the Tuya OpenAPI

use crate::error::ControlError;
use crate::provider::{check_countdown, countdown_code, DeviceControl, DeviceStatus};
use crate::sign;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Refresh tokens this long before the cloud expires them
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Error codes the API returns for an expired or invalid token
const TOKEN_INVALID_CODES: [i64; 2] = [1010, 1011];

/// Tuya data center
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Eu,
    Us,
    Cn,
    In,
}

impl Region {
    #[must_use]
    pub fn base_url(self) -> &'static str {
        match self {
            Region::Eu => "https://openapi.tuyaeu.com",
            Region::Us => "https://openapi.tuyaus.com",
            Region::Cn => "https://openapi.tuyacn.com",
            Region::In => "https://openapi.tuyain.com",
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eu" => Ok(Region::Eu),
            "us" => Ok(Region::Us),
            "cn" => Ok(Region::Cn),
            "in" => Ok(Region::In),
            other => Err(format!("unknown Tuya region: {other}")),
        }
    }
}

/// Cloud project credentials
#[derive(Clone)]
pub struct TuyaCredentials {
    pub access_id: String,
    pub access_secret: String,
    pub region: Region,
}

impl fmt::Debug for TuyaCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TuyaCredentials")
            .field("access_id", &self.access_id)
            .field("access_secret", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Response envelope shared by every endpoint
#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    result: Option<T>,
}

#[derive(Deserialize)]
struct TokenResult {
    access_token: String,
    /// Lifetime in seconds
    expire_time: u64,
}

#[derive(Deserialize)]
struct DataPoint {
    code: String,
    value: serde_json::Value,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Tuya OpenAPI client
pub struct TuyaCloud {
    http: reqwest::Client,
    credentials: TuyaCredentials,
    base_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl TuyaCloud {
    /// Create a client with the default request timeout
    pub fn new(credentials: TuyaCredentials) -> Result<Self, ControlError> {
        Self::with_timeout(credentials, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(
        credentials: TuyaCredentials,
        timeout: Duration,
    ) -> Result<Self, ControlError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = credentials.region.base_url().to_string();
        tracing::info!(
            "Tuya cloud client configured for {} (timeout {:?})",
            base_url,
            timeout
        );
        Ok(Self {
            http,
            credentials,
            base_url,
            token: Mutex::new(None),
        })
    }

    /// Point the client at another endpoint (e.g. a local proxy)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Get a valid access token, fetching a new one when needed
    async fn access_token(&self) -> Result<String, ControlError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.access_token.clone());
            }
        }

        tracing::debug!("Fetching new Tuya access token");
        let result: TokenResult = self
            .request(Method::GET, "/v1.0/token", &[("grant_type", "1")], None, None)
            .await?;

        let access_token = result.access_token.clone();
        *cached = Some(CachedToken {
            access_token: result.access_token,
            expires_at: Instant::now() + Duration::from_secs(result.expire_time),
        });
        Ok(access_token)
    }

    /// Drop the cached token if the API rejected it
    async fn forget_token_on(&self, error: &ControlError) {
        if let ControlError::Api { code, .. } = error {
            if TOKEN_INVALID_CODES.contains(code) {
                tracing::warn!("Tuya rejected access token (code {}), will refresh", code);
                *self.token.lock().await = None;
            }
        }
    }

    /// Send a signed request and unwrap the response envelope
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
        access_token: Option<&str>,
    ) -> Result<T, ControlError> {
        let body_bytes = match body {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };
        let url = sign::canonical_url(path, query);
        let timestamp = Utc::now().timestamp_millis();
        let string_to_sign = sign::string_to_sign(method.as_str(), &body_bytes, &url);
        let signature = sign::sign(
            &self.credentials.access_id,
            &self.credentials.access_secret,
            access_token,
            timestamp,
            "",
            &string_to_sign,
        );

        let mut request = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, url))
            .header("client_id", &self.credentials.access_id)
            .header("sign", signature)
            .header("t", timestamp.to_string())
            .header("sign_method", "HMAC-SHA256");
        if let Some(token) = access_token {
            request = request.header("access_token", token);
        }
        if body.is_some() {
            request = request
                .header("Content-Type", "application/json")
                .body(body_bytes);
        }

        tracing::debug!("Tuya request: {} {}", method, url);

        let response = request.send().await.map_err(map_transport_error)?;
        let envelope: Envelope<T> = response.json().await.map_err(map_transport_error)?;

        if !envelope.success {
            return Err(ControlError::Api {
                code: envelope.code.unwrap_or(-1),
                msg: envelope.msg.unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        envelope.result.ok_or_else(|| ControlError::Api {
            code: -1,
            msg: "Response carried no result".to_string(),
        })
    }

    /// Send data point commands to a device
    async fn send_commands(
        &self,
        device_id: &str,
        commands: serde_json::Value,
    ) -> Result<(), ControlError> {
        let token = self.access_token().await?;
        let path = format!("/v1.0/iot-03/devices/{device_id}/commands");
        let body = serde_json::json!({ "commands": commands });

        let result: Result<serde_json::Value, _> = self
            .request(Method::POST, &path, &[], Some(&body), Some(&token))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.forget_token_on(&e).await;
                tracing::error!("Command failed for device {}: {}", device_id, e);
                Err(e)
            }
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> ControlError {
    if e.is_timeout() {
        ControlError::Timeout
    } else {
        ControlError::Http(e)
    }
}

#[async_trait]
impl DeviceControl for TuyaCloud {
    async fn get_status(&self, device_id: &str) -> Result<DeviceStatus, ControlError> {
        let token = self.access_token().await?;
        let path = format!("/v1.0/iot-03/devices/{device_id}/status");

        let points: Vec<DataPoint> = match self
            .request(Method::GET, &path, &[], None, Some(&token))
            .await
        {
            Ok(points) => points,
            Err(e) => {
                self.forget_token_on(&e).await;
                tracing::error!("Failed to get device status for {}: {}", device_id, e);
                return Err(e);
            }
        };

        Ok(DeviceStatus {
            device_id: device_id.to_string(),
            status: points.into_iter().map(|p| (p.code, p.value)).collect(),
            fetched_at: Utc::now(),
        })
    }

    async fn switch(&self, device_id: &str, channel: &str, on: bool) -> Result<(), ControlError> {
        tracing::info!(
            "Switching {} on device {} {}",
            channel,
            device_id,
            if on { "ON" } else { "OFF" }
        );
        self.send_commands(
            device_id,
            serde_json::json!([{ "code": channel, "value": on }]),
        )
        .await
    }

    async fn set_countdown(
        &self,
        device_id: &str,
        channel: &str,
        seconds: u32,
    ) -> Result<(), ControlError> {
        let code = countdown_code(channel)?;
        check_countdown(seconds)?;
        self.send_commands(
            device_id,
            serde_json::json!([{ "code": code, "value": seconds }]),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_parse() {
        assert_eq!("eu".parse::<Region>().unwrap(), Region::Eu);
        assert_eq!("US".parse::<Region>().unwrap(), Region::Us);
        assert!("mars".parse::<Region>().is_err());
        assert_eq!(Region::Eu.base_url(), "https://openapi.tuyaeu.com");
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = TuyaCredentials {
            access_id: "abc".to_string(),
            access_secret: "super-secret".to_string(),
            region: Region::Eu,
        };
        let printed = format!("{creds:?}");
        assert!(printed.contains("abc"));
        assert!(!printed.contains("super-secret"));
    }

    #[test]
    fn test_envelope_failure_shape() {
        let raw = r#"{"success":false,"code":1106,"msg":"permission deny","t":1}"#;
        let envelope: Envelope<serde_json::Value> = serde_json::from_str(raw).unwrap();
        assert!(!envelope.success);
        assert_eq!(envelope.code, Some(1106));
        assert!(envelope.result.is_none());
    }

    #[test]
    fn test_status_points_parse() {
        let raw = r#"{"success":true,"result":[{"code":"switch_1","value":true},{"code":"countdown_1","value":0}]}"#;
        let envelope: Envelope<Vec<DataPoint>> = serde_json::from_str(raw).unwrap();
        let points = envelope.result.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].code, "switch_1");
        assert_eq!(points[0].value, serde_json::json!(true));
    }
}
