//! Automation sessions

use crate::{SceneId, SessionId, ZoneId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session. Everything except `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Stopped,
    Error,
}

/// Binds a zone to a scene for a bounded duration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationSession {
    pub id: SessionId,
    pub zone_id: ZoneId,
    pub scene_id: SceneId,
    pub started_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: SessionStatus,
    #[serde(default)]
    pub last_evaluation_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AutomationSession {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    #[must_use]
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.started_at
    }

    /// Time left before expiry, never negative
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.duration() - self.elapsed(now)).max(Duration::zero())
    }

    /// Whether the elapsed time has reached the duration
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.elapsed(now) >= self.duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(started_at: DateTime<Utc>, minutes: u32) -> AutomationSession {
        AutomationSession {
            id: 1,
            zone_id: 1,
            scene_id: 1,
            started_at,
            duration_minutes: minutes,
            status: SessionStatus::Running,
            last_evaluation_at: None,
            notes: None,
        }
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let start = Utc::now();
        let s = session(start, 15);
        assert!(!s.is_expired(start + Duration::minutes(15) - Duration::milliseconds(1)));
        assert!(s.is_expired(start + Duration::minutes(15)));
        assert!(s.is_expired(start + Duration::minutes(16)));
    }

    #[test]
    fn test_remaining_clamps_at_zero() {
        let start = Utc::now();
        let s = session(start, 10);
        assert_eq!(s.remaining(start + Duration::minutes(4)), Duration::minutes(6));
        assert_eq!(s.remaining(start + Duration::minutes(30)), Duration::zero());
    }
}
