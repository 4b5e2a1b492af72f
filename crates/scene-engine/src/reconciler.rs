//! Outlet reconciler: brings outlets in line with a desired state

use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::model::{ApplyResult, OutletOutcome, SkipReason};
use chrono::{DateTime, Utc};
use habitat_core::{Device, Outlet, OutletId, Repository, ZoneId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tuya_cloud::{ControlError, DeviceControl};

/// Issues device commands only where actual and desired state differ
pub struct OutletReconciler {
    repo: Arc<dyn Repository>,
    devices: Arc<dyn DeviceControl>,
    command_timeout: Duration,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl OutletReconciler {
    /// Create a new outlet reconciler
    pub fn new(
        repo: Arc<dyn Repository>,
        devices: Arc<dyn DeviceControl>,
        command_timeout: Duration,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            repo,
            devices,
            command_timeout,
            event_tx,
        }
    }

    /// Reconcile a zone's outlets with `desired`.
    ///
    /// Callers must hold the zone lock. Each outlet is handled on its own;
    /// a failure is recorded and the rest of the batch still runs.
    pub async fn apply(
        &self,
        zone_id: ZoneId,
        desired: &BTreeMap<OutletId, bool>,
        now: DateTime<Utc>,
    ) -> Result<ApplyResult, EngineError> {
        let outlets: HashMap<OutletId, Outlet> = self
            .repo
            .list_zone_outlets(zone_id)
            .await?
            .into_iter()
            .map(|o| (o.id, o))
            .collect();
        let mut devices: HashMap<i64, Device> = HashMap::new();

        let mut result = ApplyResult {
            executed: Vec::with_capacity(desired.len()),
            success: true,
        };

        for (&outlet_id, &want) in desired {
            let Some(outlet) = outlets.get(&outlet_id) else {
                tracing::warn!(
                    "Outlet {} is not part of zone {}, skipping",
                    outlet_id,
                    zone_id
                );
                result.executed.push(OutletOutcome::skipped(
                    outlet_id,
                    None,
                    want,
                    SkipReason::UnknownOutlet,
                ));
                continue;
            };
            let name = Some(outlet.display_name());

            if !outlet.enabled {
                tracing::debug!("Outlet {} is disabled, skipping", outlet.display_name());
                result.executed.push(OutletOutcome::skipped(
                    outlet_id,
                    name,
                    want,
                    SkipReason::OutletDisabled,
                ));
                continue;
            }

            if outlet.override_active(now) {
                tracing::info!(
                    "Outlet {} under manual override until {:?}, skipping",
                    outlet.display_name(),
                    outlet.manual_override_until
                );
                result.executed.push(OutletOutcome::skipped(
                    outlet_id,
                    name,
                    want,
                    SkipReason::ManualOverrideActive,
                ));
                continue;
            }

            if outlet.last_state == want {
                tracing::debug!(
                    "Outlet {} already {}",
                    outlet.display_name(),
                    on_off(want)
                );
                result.executed.push(OutletOutcome::skipped(
                    outlet_id,
                    name,
                    want,
                    SkipReason::AlreadyInDesiredState,
                ));
                continue;
            }

            let device = match devices.get(&outlet.device_id) {
                Some(device) => device.clone(),
                None => match self.repo.get_device(outlet.device_id).await {
                    Ok(Some(device)) => {
                        devices.insert(device.id, device.clone());
                        device
                    }
                    Ok(None) => {
                        tracing::warn!(
                            "Device {} of outlet {} not found",
                            outlet.device_id,
                            outlet_id
                        );
                        result.executed.push(OutletOutcome::skipped(
                            outlet_id,
                            name,
                            want,
                            SkipReason::UnknownOutlet,
                        ));
                        continue;
                    }
                    Err(e) => {
                        result.success = false;
                        result.executed.push(failed(outlet_id, name, want, e.to_string()));
                        continue;
                    }
                },
            };

            match self.switch(&device, outlet, want, "automation").await {
                Ok(_) => result.executed.push(OutletOutcome {
                    outlet_id,
                    outlet_name: name,
                    desired: want,
                    switched: true,
                    reason: None,
                    error: None,
                }),
                Err(e) => {
                    result.success = false;
                    result.executed.push(failed(outlet_id, name, want, e.to_string()));
                }
            }
        }

        Ok(result)
    }

    /// Send one bounded command and persist the confirmed state
    pub async fn switch(
        &self,
        device: &Device,
        outlet: &Outlet,
        on: bool,
        source: &'static str,
    ) -> Result<Outlet, EngineError> {
        tracing::info!(
            "Turning {} outlet {} ({} {})",
            on_off(on),
            outlet.display_name(),
            device.provider_device_id,
            outlet.channel
        );

        let command = self
            .devices
            .switch(&device.provider_device_id, &outlet.channel, on);
        match tokio::time::timeout(self.command_timeout, command).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    "Failed to turn {} outlet {}: {}",
                    on_off(on),
                    outlet.display_name(),
                    e
                );
                return Err(e.into());
            }
            Err(_) => {
                tracing::error!(
                    "Timed out turning {} outlet {} after {:?}",
                    on_off(on),
                    outlet.display_name(),
                    self.command_timeout
                );
                return Err(ControlError::Timeout.into());
            }
        }

        let updated = self.repo.set_outlet_state(outlet.id, on).await?;
        let _ = self.event_tx.send(EngineEvent::OutletStateChanged {
            zone_id: device.zone_id,
            outlet_id: outlet.id,
            state: on,
            source,
        });
        Ok(updated)
    }

    /// Bound an arbitrary device call by the command timeout
    pub async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, ControlError>>,
    ) -> Result<T, ControlError> {
        tokio::time::timeout(self.command_timeout, call)
            .await
            .unwrap_or(Err(ControlError::Timeout))
    }
}

fn failed(outlet_id: OutletId, outlet_name: Option<String>, desired: bool, error: String) -> OutletOutcome {
    OutletOutcome {
        outlet_id,
        outlet_name,
        desired,
        switched: false,
        reason: Some(SkipReason::CommandFailed),
        error: Some(error),
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
