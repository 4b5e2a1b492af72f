//! JSON-file-backed [`Repository`]

use crate::device::{Device, Outlet};
use crate::error::StoreError;
use crate::kill_switch::{AuditEntry, KillSwitchEntry};
use crate::persistence::{self, Tables};
use crate::repository::Repository;
use crate::scene::{Scene, SceneRule};
use crate::sensor::{Metric, Reading, Sensor};
use crate::session::AutomationSession;
use crate::zone::{Zone, ZoneMode};
use crate::{DeviceId, OutletId, SceneId, SessionId, ZoneId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// File name of the snapshot inside the data directory
pub const STORE_FILE: &str = "habitat.json";

/// Readings kept in the snapshot; older ones are dropped first
const MAX_READINGS: usize = 5_000;

/// In-memory tables persisted as one JSON document after every write
pub struct JsonStore {
    tables: RwLock<Tables>,
    path: Option<PathBuf>,
}

fn next_key<T>(map: &BTreeMap<i64, T>) -> i64 {
    map.keys().next_back().map_or(1, |k| k + 1)
}

fn pick_key<T>(map: &BTreeMap<i64, T>, requested: i64) -> i64 {
    if requested > 0 {
        requested
    } else {
        next_key(map)
    }
}

fn zone_device_ids(tables: &Tables, zone_id: ZoneId) -> HashSet<DeviceId> {
    tables
        .devices
        .values()
        .filter(|d| d.zone_id == zone_id)
        .map(|d| d.id)
        .collect()
}

impl JsonStore {
    /// Create a store that never touches the filesystem
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            path: None,
        }
    }

    /// Open (or create) the store under `data_dir`
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join(STORE_FILE);
        let tables = persistence::load_tables(&path).await?.unwrap_or_default();
        Ok(Self {
            tables: RwLock::new(tables),
            path: Some(path),
        })
    }

    /// Path of the snapshot file, if persistent
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let tables = self.tables.read().await;
        f(&tables)
    }

    /// Apply a mutation to a staged copy, persist it, then publish it.
    ///
    /// The live tables change only when both the mutation and the save
    /// succeed; the write lock is held throughout.
    async fn write<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let result = f(&mut staged)?;
        if let Some(path) = &self.path {
            persistence::save_tables(path, &staged).await?;
        }
        *tables = staged;
        Ok(result)
    }

    /// Insert a zone; a zero id is replaced by the next free one
    pub async fn insert_zone(&self, mut zone: Zone) -> Result<Zone, StoreError> {
        self.write(|t| {
            zone.id = pick_key(&t.zones, zone.id);
            t.zones.insert(zone.id, zone.clone());
            Ok(zone)
        })
        .await
    }

    pub async fn insert_device(&self, mut device: Device) -> Result<Device, StoreError> {
        self.write(|t| {
            if !t.zones.contains_key(&device.zone_id) {
                return Err(StoreError::not_found("zone", device.zone_id));
            }
            device.id = pick_key(&t.devices, device.id);
            t.devices.insert(device.id, device.clone());
            Ok(device)
        })
        .await
    }

    pub async fn insert_outlet(&self, mut outlet: Outlet) -> Result<Outlet, StoreError> {
        self.write(|t| {
            if !t.devices.contains_key(&outlet.device_id) {
                return Err(StoreError::not_found("device", outlet.device_id));
            }
            outlet.id = pick_key(&t.outlets, outlet.id);
            t.outlets.insert(outlet.id, outlet.clone());
            Ok(outlet)
        })
        .await
    }

    /// Replace an outlet's configuration (name, role, enabled flag, ...)
    pub async fn update_outlet(&self, outlet: Outlet) -> Result<Outlet, StoreError> {
        self.write(|t| {
            let slot = t
                .outlets
                .get_mut(&outlet.id)
                .ok_or_else(|| StoreError::not_found("outlet", outlet.id))?;
            *slot = outlet.clone();
            Ok(outlet)
        })
        .await
    }

    pub async fn insert_sensor(&self, mut sensor: Sensor) -> Result<Sensor, StoreError> {
        self.write(|t| {
            if !t.zones.contains_key(&sensor.zone_id) {
                return Err(StoreError::not_found("zone", sensor.zone_id));
            }
            sensor.id = pick_key(&t.sensors, sensor.id);
            t.sensors.insert(sensor.id, sensor.clone());
            Ok(sensor)
        })
        .await
    }

    pub async fn insert_scene(&self, mut scene: Scene) -> Result<Scene, StoreError> {
        self.write(|t| {
            if !t.zones.contains_key(&scene.zone_id) {
                return Err(StoreError::not_found("zone", scene.zone_id));
            }
            scene.id = pick_key(&t.scenes, scene.id);
            t.scenes.insert(scene.id, scene.clone());
            Ok(scene)
        })
        .await
    }

    pub async fn insert_rule(&self, mut rule: SceneRule) -> Result<SceneRule, StoreError> {
        self.write(|t| {
            if !t.scenes.contains_key(&rule.scene_id) {
                return Err(StoreError::not_found("scene", rule.scene_id));
            }
            rule.id = pick_key(&t.rules, rule.id);
            t.rules.insert(rule.id, rule.clone());
            Ok(rule)
        })
        .await
    }

    /// Remove a scene and its rules
    pub async fn delete_scene(&self, id: SceneId) -> Result<Scene, StoreError> {
        self.write(|t| {
            let scene = t
                .scenes
                .remove(&id)
                .ok_or_else(|| StoreError::not_found("scene", id))?;
            t.rules.retain(|_, r| r.scene_id != id);
            Ok(scene)
        })
        .await
    }

    /// Most recent audit entries, newest first
    pub async fn list_audit(&self, limit: usize) -> Vec<AuditEntry> {
        self.read(|t| t.audit.iter().rev().take(limit).cloned().collect())
            .await
    }

    /// Kill-switch log, oldest first
    pub async fn kill_switch_log(&self) -> Vec<KillSwitchEntry> {
        self.read(|t| t.kill_switch.clone()).await
    }

    /// Populate an empty store with the two default habitats.
    ///
    /// Returns `false` without touching anything if zones already exist.
    pub async fn seed_default(&self) -> Result<bool, StoreError> {
        let seeded = self
            .write(|t| {
                if !t.zones.is_empty() {
                    return Ok(false);
                }
                crate::seed::populate(t);
                Ok(true)
            })
            .await?;

        if seeded {
            tracing::info!("Seeded default zones: serra, terrario");
        } else {
            tracing::debug!("Store already initialized, skipping seed");
        }
        Ok(seeded)
    }
}

#[async_trait]
impl Repository for JsonStore {
    async fn get_zone(&self, id: ZoneId) -> Result<Option<Zone>, StoreError> {
        Ok(self.read(|t| t.zones.get(&id).cloned()).await)
    }

    async fn list_zones(&self) -> Result<Vec<Zone>, StoreError> {
        Ok(self.read(|t| t.zones.values().cloned().collect()).await)
    }

    async fn set_zone_mode(&self, id: ZoneId, mode: ZoneMode) -> Result<Zone, StoreError> {
        self.write(|t| {
            let zone = t
                .zones
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("zone", id))?;
            zone.mode = mode;
            Ok(zone.clone())
        })
        .await
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        Ok(self.read(|t| t.devices.get(&id).cloned()).await)
    }

    async fn get_outlet(&self, id: OutletId) -> Result<Option<Outlet>, StoreError> {
        Ok(self.read(|t| t.outlets.get(&id).cloned()).await)
    }

    async fn list_zone_outlets(&self, zone_id: ZoneId) -> Result<Vec<Outlet>, StoreError> {
        Ok(self
            .read(|t| {
                let devices = zone_device_ids(t, zone_id);
                t.outlets
                    .values()
                    .filter(|o| devices.contains(&o.device_id))
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn set_outlet_state(&self, id: OutletId, state: bool) -> Result<Outlet, StoreError> {
        self.write(|t| {
            let outlet = t
                .outlets
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("outlet", id))?;
            outlet.last_state = state;
            Ok(outlet.clone())
        })
        .await
    }

    async fn set_manual_override(
        &self,
        id: OutletId,
        until: Option<DateTime<Utc>>,
    ) -> Result<Outlet, StoreError> {
        self.write(|t| {
            let outlet = t
                .outlets
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("outlet", id))?;
            outlet.manual_override = until.is_some();
            outlet.manual_override_until = until;
            Ok(outlet.clone())
        })
        .await
    }

    async fn list_zone_sensors(&self, zone_id: ZoneId) -> Result<Vec<Sensor>, StoreError> {
        Ok(self
            .read(|t| {
                t.sensors
                    .values()
                    .filter(|s| s.zone_id == zone_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn ensure_zone_sensor(&self, zone_id: ZoneId) -> Result<Sensor, StoreError> {
        self.write(|t| {
            if let Some(sensor) = t.sensors.values().find(|s| s.zone_id == zone_id) {
                return Ok(sensor.clone());
            }
            let zone = t
                .zones
                .get(&zone_id)
                .ok_or_else(|| StoreError::not_found("zone", zone_id))?;
            let sensor = Sensor {
                id: next_key(&t.sensors),
                zone_id,
                provider: "gateway".to_string(),
                provider_sensor_id: None,
                kind: "temperature_humidity".to_string(),
                name: format!("Gateway {}", zone.slug),
            };
            tracing::info!("Created gateway sensor {} for zone {}", sensor.id, zone_id);
            t.sensors.insert(sensor.id, sensor.clone());
            Ok(sensor)
        })
        .await
    }

    async fn latest_reading(
        &self,
        zone_id: ZoneId,
        metric: Metric,
    ) -> Result<Option<Reading>, StoreError> {
        Ok(self
            .read(|t| {
                let sensors: HashSet<i64> = t
                    .sensors
                    .values()
                    .filter(|s| s.zone_id == zone_id)
                    .map(|s| s.id)
                    .collect();
                t.readings
                    .iter()
                    .filter(|r| r.metric == metric && sensors.contains(&r.sensor_id))
                    .max_by_key(|r| (r.observed_at, r.id))
                    .cloned()
            })
            .await)
    }

    async fn insert_reading(&self, mut reading: Reading) -> Result<Reading, StoreError> {
        self.write(|t| {
            if !t.sensors.contains_key(&reading.sensor_id) {
                return Err(StoreError::not_found("sensor", reading.sensor_id));
            }
            reading.id = t.readings.last().map_or(1, |r| r.id + 1);
            t.readings.push(reading.clone());
            if t.readings.len() > MAX_READINGS {
                let excess = t.readings.len() - MAX_READINGS;
                t.readings.drain(..excess);
            }
            Ok(reading)
        })
        .await
    }

    async fn get_scene(&self, id: SceneId) -> Result<Option<Scene>, StoreError> {
        Ok(self.read(|t| t.scenes.get(&id).cloned()).await)
    }

    async fn list_zone_scenes(&self, zone_id: ZoneId) -> Result<Vec<Scene>, StoreError> {
        Ok(self
            .read(|t| {
                t.scenes
                    .values()
                    .filter(|s| s.zone_id == zone_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn list_active_scenes(&self) -> Result<Vec<Scene>, StoreError> {
        Ok(self
            .read(|t| t.scenes.values().filter(|s| s.is_active).cloned().collect())
            .await)
    }

    async fn activate_scene(&self, id: SceneId) -> Result<Scene, StoreError> {
        self.write(|t| {
            let zone_id = t
                .scenes
                .get(&id)
                .map(|s| s.zone_id)
                .ok_or_else(|| StoreError::not_found("scene", id))?;
            for scene in t.scenes.values_mut().filter(|s| s.zone_id == zone_id) {
                scene.is_active = scene.id == id;
            }
            t.scenes
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("scene", id))
        })
        .await
    }

    async fn list_rules(&self, scene_id: SceneId) -> Result<Vec<SceneRule>, StoreError> {
        Ok(self
            .read(|t| {
                t.rules
                    .values()
                    .filter(|r| r.scene_id == scene_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<AutomationSession>, StoreError> {
        Ok(self.read(|t| t.sessions.get(&id).cloned()).await)
    }

    async fn running_session(
        &self,
        zone_id: ZoneId,
    ) -> Result<Option<AutomationSession>, StoreError> {
        Ok(self
            .read(|t| {
                t.sessions
                    .values()
                    .filter(|s| s.zone_id == zone_id && s.is_running())
                    .max_by_key(|s| (s.started_at, s.id))
                    .cloned()
            })
            .await)
    }

    async fn list_running_sessions(&self) -> Result<Vec<AutomationSession>, StoreError> {
        Ok(self
            .read(|t| {
                t.sessions
                    .values()
                    .filter(|s| s.is_running())
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn list_zone_sessions(
        &self,
        zone_id: ZoneId,
        limit: usize,
    ) -> Result<Vec<AutomationSession>, StoreError> {
        Ok(self
            .read(|t| {
                let mut sessions: Vec<AutomationSession> = t
                    .sessions
                    .values()
                    .filter(|s| s.zone_id == zone_id)
                    .cloned()
                    .collect();
                sessions.sort_by(|a, b| (b.started_at, b.id).cmp(&(a.started_at, a.id)));
                sessions.truncate(limit);
                sessions
            })
            .await)
    }

    async fn insert_session(
        &self,
        mut session: AutomationSession,
    ) -> Result<AutomationSession, StoreError> {
        self.write(|t| {
            if !t.zones.contains_key(&session.zone_id) {
                return Err(StoreError::not_found("zone", session.zone_id));
            }
            session.id = next_key(&t.sessions);
            t.sessions.insert(session.id, session.clone());
            Ok(session)
        })
        .await
    }

    async fn update_session(
        &self,
        session: AutomationSession,
    ) -> Result<AutomationSession, StoreError> {
        self.write(|t| {
            let slot = t
                .sessions
                .get_mut(&session.id)
                .ok_or_else(|| StoreError::not_found("session", session.id))?;
            *slot = session.clone();
            Ok(session)
        })
        .await
    }

    async fn latest_kill_switch(&self) -> Result<Option<KillSwitchEntry>, StoreError> {
        Ok(self.read(|t| t.kill_switch.last().cloned()).await)
    }

    async fn append_kill_switch(
        &self,
        mut entry: KillSwitchEntry,
    ) -> Result<KillSwitchEntry, StoreError> {
        self.write(|t| {
            entry.id = t.kill_switch.last().map_or(1, |e| e.id + 1);
            t.kill_switch.push(entry.clone());
            Ok(entry)
        })
        .await
    }

    async fn append_audit(
        &self,
        action: &str,
        details: serde_json::Value,
    ) -> Result<AuditEntry, StoreError> {
        self.write(|t| {
            let entry = AuditEntry {
                id: t.audit.last().map_or(1, |e| e.id + 1),
                action: action.to_string(),
                details,
                created_at: Utc::now(),
            };
            t.audit.push(entry.clone());
            Ok(entry)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use chrono::Duration;

    fn session(zone_id: ZoneId, scene_id: SceneId, started_at: DateTime<Utc>) -> AutomationSession {
        AutomationSession {
            id: 0,
            zone_id,
            scene_id,
            started_at,
            duration_minutes: 15,
            status: SessionStatus::Running,
            last_evaluation_at: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_seed_default_is_idempotent() {
        let store = JsonStore::in_memory();
        assert!(store.seed_default().await.unwrap());
        assert!(!store.seed_default().await.unwrap());

        let zones = store.list_zones().await.unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].slug, "serra");
        assert_eq!(zones[1].slug, "terrario");

        let outlets = store.list_zone_outlets(zones[1].id).await.unwrap();
        assert_eq!(outlets.len(), 5);
        assert!(outlets.iter().any(|o| o.custom_name.as_deref() == Some("Ceramica Notte")));
    }

    #[tokio::test]
    async fn test_latest_reading_uses_observed_at() {
        let store = JsonStore::in_memory();
        store.seed_default().await.unwrap();
        let sensor = store.ensure_zone_sensor(1).await.unwrap();
        let now = Utc::now();

        for (value, offset) in [(21.0, 0), (19.0, -60), (25.0, -30)] {
            store
                .insert_reading(Reading {
                    id: 0,
                    sensor_id: sensor.id,
                    metric: Metric::Temperature,
                    value,
                    observed_at: now + Duration::seconds(offset),
                })
                .await
                .unwrap();
        }

        let latest = store
            .latest_reading(1, Metric::Temperature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.value, 21.0);
        assert!(store
            .latest_reading(1, Metric::Humidity)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .latest_reading(2, Metric::Temperature)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_ensure_zone_sensor_creates_gateway_once() {
        let store = JsonStore::in_memory();
        let zone = store
            .insert_zone(Zone {
                id: 0,
                slug: "vivaio".to_string(),
                name: "Vivaio".to_string(),
                mode: ZoneMode::Manual,
                active: true,
                settings: serde_json::Value::Null,
            })
            .await
            .unwrap();

        let first = store.ensure_zone_sensor(zone.id).await.unwrap();
        let second = store.ensure_zone_sensor(zone.id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.provider, "gateway");
        assert!(matches!(
            store.ensure_zone_sensor(99).await,
            Err(StoreError::NotFound { entity: "zone", id: 99 })
        ));
    }

    #[tokio::test]
    async fn test_activate_scene_is_exclusive_per_zone() {
        let store = JsonStore::in_memory();
        store.seed_default().await.unwrap();
        let mut ids = Vec::new();
        for (zone_id, slug) in [(1, "giorno"), (1, "notte"), (2, "giorno")] {
            let scene = store
                .insert_scene(Scene {
                    id: 0,
                    zone_id,
                    name: slug.to_string(),
                    slug: slug.to_string(),
                    settings: serde_json::Value::Null,
                    is_active: true,
                })
                .await
                .unwrap();
            ids.push(scene.id);
        }

        store.activate_scene(ids[1]).await.unwrap();
        let active: Vec<SceneId> = store
            .list_active_scenes()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(active, vec![ids[1], ids[2]]);
    }

    #[tokio::test]
    async fn test_sessions_newest_first() {
        let store = JsonStore::in_memory();
        store.seed_default().await.unwrap();
        let now = Utc::now();

        let mut old = store
            .insert_session(session(1, 1, now - Duration::minutes(30)))
            .await
            .unwrap();
        old.status = SessionStatus::Stopped;
        store.update_session(old.clone()).await.unwrap();
        let new = store.insert_session(session(1, 1, now)).await.unwrap();

        let history = store.list_zone_sessions(1, 10).await.unwrap();
        assert_eq!(history.iter().map(|s| s.id).collect::<Vec<_>>(), vec![new.id, old.id]);
        assert_eq!(store.list_zone_sessions(1, 1).await.unwrap().len(), 1);

        let running = store.running_session(1).await.unwrap().unwrap();
        assert_eq!(running.id, new.id);
        assert!(store.running_session(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manual_override_set_and_clear() {
        let store = JsonStore::in_memory();
        store.seed_default().await.unwrap();
        let until = Utc::now() + Duration::minutes(5);

        let outlet = store.set_manual_override(1, Some(until)).await.unwrap();
        assert!(outlet.manual_override);
        assert_eq!(outlet.manual_override_until, Some(until));

        let outlet = store.set_manual_override(1, None).await.unwrap();
        assert!(!outlet.manual_override);
        assert!(outlet.manual_override_until.is_none());

        assert!(store.set_manual_override(999, None).await.is_err());
    }

    #[tokio::test]
    async fn test_reopen_restores_tables() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonStore::open(dir.path()).await.unwrap();
            store.seed_default().await.unwrap();
            store.set_outlet_state(3, true).await.unwrap();
            store
                .append_kill_switch(KillSwitchEntry {
                    id: 0,
                    is_active: true,
                    reason: Some("maintenance".to_string()),
                    activated_at: Some(Utc::now()),
                    deactivated_at: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        assert!(dir.path().join(STORE_FILE).exists());

        let store = JsonStore::open(dir.path()).await.unwrap();
        assert_eq!(store.list_zones().await.unwrap().len(), 2);
        assert!(store.get_outlet(3).await.unwrap().unwrap().last_state);
        let latest = store.latest_kill_switch().await.unwrap().unwrap();
        assert!(latest.is_active);
        assert_eq!(latest.id, 1);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_tables_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap();
        store.seed_default().await.unwrap();

        // A directory where the staging file goes makes every save fail
        std::fs::create_dir(dir.path().join("habitat.json.tmp")).unwrap();

        assert!(store.set_outlet_state(3, true).await.is_err());
        assert!(!store.get_outlet(3).await.unwrap().unwrap().last_state);

        let entry = KillSwitchEntry {
            id: 0,
            is_active: true,
            reason: None,
            activated_at: Some(Utc::now()),
            deactivated_at: None,
            created_at: Utc::now(),
        };
        assert!(store.append_kill_switch(entry.clone()).await.is_err());
        assert!(store.latest_kill_switch().await.unwrap().is_none());

        std::fs::remove_dir(dir.path().join("habitat.json.tmp")).unwrap();
        let saved = store.append_kill_switch(entry).await.unwrap();
        assert_eq!(saved.id, 1);

        let reopened = JsonStore::open(dir.path()).await.unwrap();
        assert!(!reopened.get_outlet(3).await.unwrap().unwrap().last_state);
        assert!(reopened.latest_kill_switch().await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_rejected_mutation_changes_nothing() {
        let store = JsonStore::in_memory();
        store.seed_default().await.unwrap();
        let sensor = store.ensure_zone_sensor(1).await.unwrap();

        let orphan = Reading {
            id: 0,
            sensor_id: sensor.id + 100,
            metric: Metric::Temperature,
            value: 21.0,
            observed_at: Utc::now(),
        };
        assert!(store.insert_reading(orphan).await.is_err());
        assert!(store.latest_reading(1, Metric::Temperature).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_is_compact() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap();
        store.seed_default().await.unwrap();
        let sensor = store.ensure_zone_sensor(2).await.unwrap();
        for i in 0..10 {
            store
                .insert_reading(Reading {
                    id: 0,
                    sensor_id: sensor.id,
                    metric: Metric::Humidity,
                    value: 60.0 + f64::from(i),
                    observed_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let raw = std::fs::read_to_string(dir.path().join(STORE_FILE)).unwrap();
        assert!(!raw.contains('\n'));
        assert!(!dir.path().join("habitat.json.tmp").exists());
        let reopened = JsonStore::open(dir.path()).await.unwrap();
        let latest = reopened.latest_reading(2, Metric::Humidity).await.unwrap().unwrap();
        assert_eq!(latest.value, 69.0);
    }

    #[tokio::test]
    async fn test_audit_log_newest_first() {
        let store = JsonStore::in_memory();
        store
            .append_audit("kill_switch_activated", serde_json::json!({"reason": "test"}))
            .await
            .unwrap();
        store
            .append_audit("kill_switch_deactivated", serde_json::json!({}))
            .await
            .unwrap();

        let log = store.list_audit(10).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].action, "kill_switch_deactivated");
        assert_eq!(log[1].id, 1);
    }
}
