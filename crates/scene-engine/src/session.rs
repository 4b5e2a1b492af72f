//! Automation session lifecycle
//!
//! `running` is the only live state. Sessions leave it by completing
//! (duration elapsed), being stopped (explicitly or by a newer session) or
//! failing (their scene is gone). The zone's mode follows: `automatic`
//! while a session runs, `manual` otherwise.

use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::model::{AutomationStatus, SessionView};
use chrono::{DateTime, Utc};
use habitat_core::{
    AutomationSession, Repository, SceneId, SessionId, SessionStatus, ZoneId, ZoneMode,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Manages session records and the zone mode they imply
pub struct SessionManager {
    repo: Arc<dyn Repository>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(repo: Arc<dyn Repository>, event_tx: broadcast::Sender<EngineEvent>) -> Self {
        Self { repo, event_tx }
    }

    /// Validate and open a session, superseding any running one.
    ///
    /// Callers must hold the zone lock.
    pub async fn begin(
        &self,
        zone_id: ZoneId,
        scene_id: SceneId,
        duration_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<AutomationSession, EngineError> {
        if duration_minutes == 0 {
            return Err(EngineError::InvalidDuration(duration_minutes));
        }
        self.repo
            .get_zone(zone_id)
            .await?
            .ok_or(EngineError::ZoneNotFound(zone_id))?;
        let scene = self
            .repo
            .get_scene(scene_id)
            .await?
            .ok_or(EngineError::SceneNotFound(scene_id))?;
        if scene.zone_id != zone_id {
            return Err(EngineError::SceneZoneMismatch { scene_id, zone_id });
        }

        if let Some(mut previous) = self.repo.running_session(zone_id).await? {
            if previous.is_expired(now) {
                // Ran its full course before anyone replaced it
                self.complete(previous).await?;
            } else {
                previous.status = SessionStatus::Stopped;
                previous.notes = Some(format!("superseded at {}", now.to_rfc3339()));
                let previous = self.repo.update_session(previous).await?;
                self.repo
                    .append_audit(
                        "session_superseded",
                        json!({"zone_id": zone_id, "session_id": previous.id}),
                    )
                    .await?;
                tracing::info!(
                    "Superseded session {} in zone {}",
                    previous.id,
                    zone_id
                );
                let _ = self.event_tx.send(EngineEvent::SessionStopped {
                    zone_id,
                    session_id: previous.id,
                });
            }
        }

        let session = self
            .repo
            .insert_session(AutomationSession {
                id: 0,
                zone_id,
                scene_id,
                started_at: now,
                duration_minutes,
                status: SessionStatus::Running,
                last_evaluation_at: None,
                notes: None,
            })
            .await?;
        self.repo.set_zone_mode(zone_id, ZoneMode::Automatic).await?;
        self.repo
            .append_audit(
                "session_started",
                json!({
                    "zone_id": zone_id,
                    "scene_id": scene_id,
                    "session_id": session.id,
                    "duration_minutes": duration_minutes,
                }),
            )
            .await?;

        tracing::info!(
            "Started session {} for zone {} with scene '{}' ({} min)",
            session.id,
            zone_id,
            scene.name,
            duration_minutes
        );
        let _ = self.event_tx.send(EngineEvent::SessionStarted {
            zone_id,
            scene_id,
            session_id: session.id,
            duration_minutes,
        });
        Ok(session)
    }

    /// Stamp an evaluation on a running session, with an optional note
    pub async fn record_evaluation(
        &self,
        mut session: AutomationSession,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> Result<AutomationSession, EngineError> {
        session.last_evaluation_at = Some(at);
        if note.is_some() {
            session.notes = note;
        }
        Ok(self.repo.update_session(session).await?)
    }

    /// Stop the zone's running session. A session whose duration has
    /// already elapsed is completed instead.
    pub async fn stop(
        &self,
        zone_id: ZoneId,
        now: DateTime<Utc>,
    ) -> Result<AutomationSession, EngineError> {
        let mut session = self
            .repo
            .running_session(zone_id)
            .await?
            .ok_or(EngineError::NoRunningSession(zone_id))?;
        if session.is_expired(now) {
            return self.complete(session).await;
        }
        session.status = SessionStatus::Stopped;
        let session = self.finish(session, "session_stopped").await?;

        tracing::info!("Stopped session {} in zone {}", session.id, zone_id);
        let _ = self.event_tx.send(EngineEvent::SessionStopped {
            zone_id,
            session_id: session.id,
        });
        Ok(session)
    }

    /// Mark a session completed
    pub async fn complete(
        &self,
        mut session: AutomationSession,
    ) -> Result<AutomationSession, EngineError> {
        session.status = SessionStatus::Completed;
        let session = self.finish(session, "session_completed").await?;

        tracing::info!(
            "Session {} in zone {} completed after {} min",
            session.id,
            session.zone_id,
            session.duration_minutes
        );
        let _ = self.event_tx.send(EngineEvent::SessionCompleted {
            zone_id: session.zone_id,
            session_id: session.id,
        });
        Ok(session)
    }

    /// Mark a session failed; it will not be evaluated again
    pub async fn fail(
        &self,
        mut session: AutomationSession,
        error: &str,
    ) -> Result<AutomationSession, EngineError> {
        session.status = SessionStatus::Error;
        session.notes = Some(error.to_string());
        let session = self.finish(session, "session_failed").await?;

        tracing::error!(
            "Session {} in zone {} failed: {}",
            session.id,
            session.zone_id,
            error
        );
        let _ = self.event_tx.send(EngineEvent::SessionFailed {
            zone_id: session.zone_id,
            session_id: session.id,
            error: error.to_string(),
        });
        Ok(session)
    }

    /// Complete a session if it is still running and its duration has
    /// elapsed. Callers must hold the zone lock.
    pub async fn complete_if_expired(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<AutomationSession>, EngineError> {
        match self.repo.get_session(session_id).await? {
            Some(session) if session.is_running() && session.is_expired(now) => {
                Ok(Some(self.complete(session).await?))
            }
            _ => Ok(None),
        }
    }

    /// Running session of a zone with its remaining time; an expired
    /// session is completed on read
    pub async fn status(
        &self,
        zone_id: ZoneId,
        now: DateTime<Utc>,
    ) -> Result<AutomationStatus, EngineError> {
        let mut session = self.repo.running_session(zone_id).await?;
        if let Some(running) = session.take() {
            if running.is_expired(now) {
                self.complete(running).await?;
            } else {
                session = Some(running);
            }
        }

        let zone = self
            .repo
            .get_zone(zone_id)
            .await?
            .ok_or(EngineError::ZoneNotFound(zone_id))?;
        Ok(AutomationStatus {
            zone_id,
            mode: zone.mode,
            session: session.map(|s| SessionView::new(s, now)),
        })
    }

    /// Sessions of a zone, newest first
    pub async fn history(
        &self,
        zone_id: ZoneId,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionView>, EngineError> {
        self.repo
            .get_zone(zone_id)
            .await?
            .ok_or(EngineError::ZoneNotFound(zone_id))?;
        Ok(self
            .repo
            .list_zone_sessions(zone_id, limit)
            .await?
            .into_iter()
            .map(|s| SessionView::new(s, now))
            .collect())
    }

    async fn finish(
        &self,
        session: AutomationSession,
        action: &str,
    ) -> Result<AutomationSession, EngineError> {
        let session = self.repo.update_session(session).await?;
        if self.repo.running_session(session.zone_id).await?.is_none() {
            self.repo
                .set_zone_mode(session.zone_id, ZoneMode::Manual)
                .await?;
        }
        self.repo
            .append_audit(
                action,
                json!({"zone_id": session.zone_id, "session_id": session.id}),
            )
            .await?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use habitat_core::{JsonStore, Scene};

    async fn manager() -> (Arc<JsonStore>, SessionManager, broadcast::Receiver<EngineEvent>) {
        let store = Arc::new(JsonStore::in_memory());
        store.seed_default().await.unwrap();
        for (zone_id, slug) in [(1, "crescita"), (2, "giorno")] {
            store
                .insert_scene(Scene {
                    id: 0,
                    zone_id,
                    name: slug.to_string(),
                    slug: slug.to_string(),
                    settings: serde_json::Value::Null,
                    is_active: false,
                })
                .await
                .unwrap();
        }
        let (event_tx, events) = broadcast::channel(64);
        (store.clone(), SessionManager::new(store, event_tx), events)
    }

    #[tokio::test]
    async fn test_begin_validates_input() {
        let (_, sessions, _) = manager().await;
        let now = Utc::now();

        assert!(matches!(
            sessions.begin(1, 1, 0, now).await,
            Err(EngineError::InvalidDuration(0))
        ));
        assert!(matches!(
            sessions.begin(9, 1, 15, now).await,
            Err(EngineError::ZoneNotFound(9))
        ));
        assert!(matches!(
            sessions.begin(1, 9, 15, now).await,
            Err(EngineError::SceneNotFound(9))
        ));
        assert!(matches!(
            sessions.begin(1, 2, 15, now).await,
            Err(EngineError::SceneZoneMismatch { scene_id: 2, zone_id: 1 })
        ));
    }

    #[tokio::test]
    async fn test_new_session_supersedes_running_one() {
        let (store, sessions, mut events) = manager().await;
        let now = Utc::now();

        let first = sessions.begin(1, 1, 15, now).await.unwrap();
        let second = sessions
            .begin(1, 1, 30, now + Duration::minutes(1))
            .await
            .unwrap();

        let first = store.get_session(first.id).await.unwrap().unwrap();
        assert_eq!(first.status, SessionStatus::Stopped);
        assert_eq!(
            store.running_session(1).await.unwrap().unwrap().id,
            second.id
        );
        assert_eq!(
            store.get_zone(1).await.unwrap().unwrap().mode,
            ZoneMode::Automatic
        );

        assert!(matches!(events.try_recv(), Ok(EngineEvent::SessionStarted { .. })));
        assert!(matches!(events.try_recv(), Ok(EngineEvent::SessionStopped { .. })));
        assert!(matches!(events.try_recv(), Ok(EngineEvent::SessionStarted { .. })));
    }

    #[tokio::test]
    async fn test_stop_returns_zone_to_manual() {
        let (store, sessions, _) = manager().await;
        sessions.begin(2, 2, 15, Utc::now()).await.unwrap();

        let stopped = sessions.stop(2, Utc::now()).await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Stopped);
        assert_eq!(
            store.get_zone(2).await.unwrap().unwrap().mode,
            ZoneMode::Manual
        );
        assert!(matches!(
            sessions.stop(2, Utc::now()).await,
            Err(EngineError::NoRunningSession(2))
        ));
    }

    #[tokio::test]
    async fn test_expired_session_completes_instead_of_being_superseded() {
        let (store, sessions, mut events) = manager().await;
        let start = Utc::now();
        let old = sessions.begin(1, 1, 15, start).await.unwrap();
        let _ = events.try_recv();

        let later = start + Duration::minutes(20);
        let new = sessions.begin(1, 1, 10, later).await.unwrap();

        let old = store.get_session(old.id).await.unwrap().unwrap();
        assert_eq!(old.status, SessionStatus::Completed);
        assert!(old.notes.is_none());
        assert!(matches!(events.try_recv(), Ok(EngineEvent::SessionCompleted { .. })));
        assert_eq!(store.running_session(1).await.unwrap().unwrap().id, new.id);
        assert_eq!(
            store.get_zone(1).await.unwrap().unwrap().mode,
            ZoneMode::Automatic
        );
    }

    #[tokio::test]
    async fn test_stop_after_expiry_completes() {
        let (store, sessions, _) = manager().await;
        let start = Utc::now();
        sessions.begin(2, 2, 5, start).await.unwrap();

        let ended = sessions
            .stop(2, start + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert_eq!(
            store.get_zone(2).await.unwrap().unwrap().mode,
            ZoneMode::Manual
        );
    }

    #[tokio::test]
    async fn test_expiry_is_inclusive() {
        let (store, sessions, _) = manager().await;
        let start = Utc::now();
        let session = sessions.begin(1, 1, 10, start).await.unwrap();

        let early = start + Duration::minutes(10) - Duration::seconds(1);
        assert!(sessions
            .complete_if_expired(session.id, early)
            .await
            .unwrap()
            .is_none());

        let expired = sessions
            .complete_if_expired(session.id, start + Duration::minutes(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(expired.status, SessionStatus::Completed);
        assert!(sessions
            .complete_if_expired(session.id, start + Duration::minutes(20))
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.get_zone(1).await.unwrap().unwrap().mode,
            ZoneMode::Manual
        );
    }

    #[tokio::test]
    async fn test_status_completes_expired_session_on_read() {
        let (_, sessions, _) = manager().await;
        let start = Utc::now();
        sessions.begin(1, 1, 5, start).await.unwrap();

        let status = sessions
            .status(1, start + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(status.mode, ZoneMode::Automatic);
        assert_eq!(status.session.unwrap().remaining_seconds, 180);

        let status = sessions
            .status(1, start + Duration::minutes(6))
            .await
            .unwrap();
        assert_eq!(status.mode, ZoneMode::Manual);
        assert!(status.session.is_none());

        let history = sessions.history(1, 10, start).await.unwrap();
        assert_eq!(history[0].session.status, SessionStatus::Completed);
        assert_eq!(history[0].remaining_seconds, 0);
    }

    #[tokio::test]
    async fn test_fail_records_error() {
        let (store, sessions, mut events) = manager().await;
        let session = sessions.begin(1, 1, 15, Utc::now()).await.unwrap();
        let _ = events.try_recv();

        let failed = sessions.fail(session, "scene 1 was deleted").await.unwrap();
        assert_eq!(failed.status, SessionStatus::Error);
        assert_eq!(failed.notes.as_deref(), Some("scene 1 was deleted"));
        assert_eq!(
            store.get_zone(1).await.unwrap().unwrap().mode,
            ZoneMode::Manual
        );
        assert!(matches!(events.try_recv(), Ok(EngineEvent::SessionFailed { .. })));
    }
}
