//! Global kill switch backed by the append-only kill-switch log

use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::model::KillSwitchStatus;
use chrono::Utc;
use habitat_core::{KillSwitchEntry, Repository};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Emergency stop for all automation and mutating control
pub struct KillSwitch {
    repo: Arc<dyn Repository>,
    event_tx: broadcast::Sender<EngineEvent>,
    /// Serializes read-then-append transitions
    transition: Mutex<()>,
}

impl KillSwitch {
    /// Create a new kill switch
    pub fn new(repo: Arc<dyn Repository>, event_tx: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            repo,
            event_tx,
            transition: Mutex::new(()),
        }
    }

    /// Whether the most recent log entry is active
    pub async fn is_active(&self) -> Result<bool, EngineError> {
        Ok(self
            .repo
            .latest_kill_switch()
            .await?
            .is_some_and(|entry| entry.is_active))
    }

    pub async fn status(&self) -> Result<KillSwitchStatus, EngineError> {
        let latest = self.repo.latest_kill_switch().await?;
        Ok(KillSwitchStatus {
            active: latest.as_ref().is_some_and(|e| e.is_active),
            latest,
        })
    }

    /// Return `KillSwitchActive` if the switch is engaged
    pub async fn ensure_inactive(&self) -> Result<(), EngineError> {
        if self.is_active().await? {
            return Err(EngineError::KillSwitchActive);
        }
        Ok(())
    }

    /// Engage the kill switch
    pub async fn activate(&self, reason: Option<String>) -> Result<KillSwitchEntry, EngineError> {
        let _guard = self.transition.lock().await;
        if self.is_active().await? {
            return Err(EngineError::KillSwitchAlreadyActive);
        }

        let now = Utc::now();
        let entry = self
            .repo
            .append_kill_switch(KillSwitchEntry {
                id: 0,
                is_active: true,
                reason: reason.clone(),
                activated_at: Some(now),
                deactivated_at: None,
                created_at: now,
            })
            .await?;
        self.repo
            .append_audit("kill_switch_activated", json!({ "reason": reason }))
            .await?;

        tracing::warn!(
            "Kill switch activated: {}",
            reason.as_deref().unwrap_or("no reason given")
        );
        let _ = self.event_tx.send(EngineEvent::KillSwitchChanged {
            active: true,
            reason,
        });
        Ok(entry)
    }

    /// Release the kill switch
    pub async fn deactivate(&self) -> Result<KillSwitchEntry, EngineError> {
        let _guard = self.transition.lock().await;
        let Some(current) = self
            .repo
            .latest_kill_switch()
            .await?
            .filter(|e| e.is_active)
        else {
            return Err(EngineError::KillSwitchNotActive);
        };

        let now = Utc::now();
        let entry = self
            .repo
            .append_kill_switch(KillSwitchEntry {
                id: 0,
                is_active: false,
                reason: current.reason.clone(),
                activated_at: current.activated_at,
                deactivated_at: Some(now),
                created_at: now,
            })
            .await?;
        self.repo
            .append_audit(
                "kill_switch_deactivated",
                json!({ "activated_entry": current.id }),
            )
            .await?;

        tracing::info!("Kill switch deactivated");
        let _ = self.event_tx.send(EngineEvent::KillSwitchChanged {
            active: false,
            reason: None,
        });
        Ok(entry)
    }
}
