//! Habitat data layer
//!
//! Records for zones, power strips, sensors, scenes, automation sessions and
//! the kill-switch log, the [`Repository`] trait the engine consumes, and a
//! JSON-file-backed implementation of it.

pub mod device;
pub mod error;
pub mod kill_switch;
pub mod persistence;
pub mod repository;
pub mod scene;
mod seed;
pub mod sensor;
pub mod session;
pub mod store;
pub mod zone;

pub use device::{Device, Outlet};
pub use error::StoreError;
pub use kill_switch::{AuditEntry, KillSwitchEntry};
pub use repository::Repository;
pub use scene::{Scene, SceneRule};
pub use sensor::{Metric, Reading, Sensor};
pub use session::{AutomationSession, SessionStatus};
pub use store::JsonStore;
pub use zone::{Zone, ZoneMode};

pub type ZoneId = i64;
pub type DeviceId = i64;
pub type OutletId = i64;
pub type SensorId = i64;
pub type ReadingId = i64;
pub type SceneId = i64;
pub type RuleId = i64;
pub type SessionId = i64;
