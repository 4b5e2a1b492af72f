//! Core scene engine

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::evaluator::ConditionEvaluator;
use crate::events::EngineEvent;
use crate::kill_switch::KillSwitch;
use crate::model::{
    AutomationStatus, EvaluationReport, IngestReading, KillSwitchStatus, SensorSnapshot,
    SessionView, TickFailure, TickReport,
};
use crate::reconciler::OutletReconciler;
use crate::resolver;
use crate::scheduler::Scheduler;
use crate::session::SessionManager;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use habitat_core::{
    AutomationSession, DeviceId, KillSwitchEntry, Metric, Outlet, OutletId, Reading, Repository,
    Scene, SceneId, SessionId, StoreError, Zone, ZoneId,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tuya_cloud::{DeviceControl, DeviceStatus, MAX_COUNTDOWN_SECONDS};

/// Work picked for one zone during a tick
enum ZonePass {
    Session(AutomationSession),
    Scene(Scene),
}

/// Outcome of one zone's share of a tick
enum PassOutcome {
    Evaluated(EvaluationReport),
    Expired(SessionId),
    SessionFailed(SessionId, String),
    Skipped,
}

/// The main scene engine
pub struct SceneEngine {
    repo: Arc<dyn Repository>,
    devices: Arc<dyn DeviceControl>,
    config: EngineConfig,
    evaluator: ConditionEvaluator,
    reconciler: OutletReconciler,
    sessions: SessionManager,
    kill_switch: KillSwitch,
    /// Serializes reconciliation and manual switching per zone
    zone_locks: DashMap<ZoneId, Arc<Mutex<()>>>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl SceneEngine {
    /// Create a new scene engine
    pub fn new(
        repo: Arc<dyn Repository>,
        devices: Arc<dyn DeviceControl>,
        config: EngineConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let evaluator = ConditionEvaluator::from_config(&config);
        let reconciler = OutletReconciler::new(
            repo.clone(),
            devices.clone(),
            config.command_timeout,
            event_tx.clone(),
        );
        let sessions = SessionManager::new(repo.clone(), event_tx.clone());
        let kill_switch = KillSwitch::new(repo.clone(), event_tx.clone());

        if devices.is_simulated() {
            tracing::info!("Device control running in simulation mode");
        }

        Self {
            repo,
            devices,
            config,
            evaluator,
            reconciler,
            sessions,
            kill_switch,
            zone_locks: DashMap::new(),
            event_tx,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// Whether commands go to simulated devices
    #[must_use]
    pub fn is_simulated(&self) -> bool {
        self.devices.is_simulated()
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Start the periodic scheduler
    pub fn spawn_scheduler(self: &Arc<Self>) -> Scheduler {
        Scheduler::spawn(Arc::clone(self), self.config.tick_interval)
    }

    fn zone_lock(&self, zone_id: ZoneId) -> Arc<Mutex<()>> {
        self.zone_locks.entry(zone_id).or_default().clone()
    }

    async fn zone(&self, zone_id: ZoneId) -> Result<Zone, EngineError> {
        self.repo
            .get_zone(zone_id)
            .await?
            .ok_or(EngineError::ZoneNotFound(zone_id))
    }

    async fn scene(&self, scene_id: SceneId) -> Result<Scene, EngineError> {
        self.repo
            .get_scene(scene_id)
            .await?
            .ok_or(EngineError::SceneNotFound(scene_id))
    }

    async fn outlet(&self, outlet_id: OutletId) -> Result<Outlet, EngineError> {
        self.repo
            .get_outlet(outlet_id)
            .await?
            .ok_or(EngineError::OutletNotFound(outlet_id))
    }

    // Kill switch

    pub async fn kill_switch_status(&self) -> Result<KillSwitchStatus, EngineError> {
        self.kill_switch.status().await
    }

    pub async fn activate_kill_switch(
        &self,
        reason: Option<String>,
    ) -> Result<KillSwitchEntry, EngineError> {
        self.kill_switch.activate(reason).await
    }

    pub async fn deactivate_kill_switch(&self) -> Result<KillSwitchEntry, EngineError> {
        self.kill_switch.deactivate().await
    }

    /// Whether mutating requests may proceed
    pub async fn mutation_allowed(&self) -> Result<bool, EngineError> {
        Ok(!self.kill_switch.is_active().await?)
    }

    // Zones and sensors

    pub async fn zones(&self) -> Result<Vec<Zone>, EngineError> {
        Ok(self.repo.list_zones().await?)
    }

    /// Latest reading of every metric in a zone
    pub async fn zone_snapshot(&self, zone_id: ZoneId) -> Result<SensorSnapshot, EngineError> {
        let mut snapshot = SensorSnapshot::new();
        for metric in Metric::ALL {
            if let Some(reading) = self.repo.latest_reading(zone_id, metric).await? {
                snapshot.insert(metric, reading.value, reading.observed_at);
            }
        }
        Ok(snapshot)
    }

    /// Store readings pushed for a zone
    pub async fn ingest_reading(
        &self,
        ingest: IngestReading,
    ) -> Result<Vec<Reading>, EngineError> {
        self.zone(ingest.zone_id).await?;
        let observed_at = ingest.observed_at.unwrap_or_else(Utc::now);
        let sensor = self.repo.ensure_zone_sensor(ingest.zone_id).await?;

        let mut stored = Vec::new();
        for (metric, value) in ingest.values() {
            let reading = self
                .repo
                .insert_reading(Reading {
                    id: 0,
                    sensor_id: sensor.id,
                    metric,
                    value,
                    observed_at,
                })
                .await?;
            tracing::debug!(
                "Zone {} {} = {}{}",
                ingest.zone_id,
                metric,
                value,
                metric.unit()
            );
            stored.push(reading);
        }
        Ok(stored)
    }

    // Scenes

    /// Make a scene the active one of its zone
    pub async fn activate_scene(&self, scene_id: SceneId) -> Result<Scene, EngineError> {
        let scene = match self.repo.activate_scene(scene_id).await {
            Ok(scene) => scene,
            Err(StoreError::NotFound { .. }) => return Err(EngineError::SceneNotFound(scene_id)),
            Err(e) => return Err(e.into()),
        };
        self.repo
            .append_audit(
                "scene_activated",
                json!({"zone_id": scene.zone_id, "scene_id": scene.id}),
            )
            .await?;
        tracing::info!("Activated scene '{}' for zone {}", scene.name, scene.zone_id);
        Ok(scene)
    }

    /// Evaluate a scene immediately and reconcile its zone
    pub async fn evaluate_scene(&self, scene_id: SceneId) -> Result<EvaluationReport, EngineError> {
        self.kill_switch.ensure_inactive().await?;
        let scene = self.scene(scene_id).await?;

        let lock = self.zone_lock(scene.zone_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut session_id = None;
        if let Some(session) = self.repo.running_session(scene.zone_id).await? {
            // An elapsed session ends before any rule runs on its behalf
            let expired = self.sessions.complete_if_expired(session.id, now).await?;
            if expired.is_none() && session.scene_id == scene_id {
                session_id = Some(session.id);
            }
        }
        self.evaluate_locked(&scene, session_id, now).await
    }

    /// Resolve a scene's rules and reconcile the zone. Callers hold the
    /// zone lock.
    async fn evaluate_locked(
        &self,
        scene: &Scene,
        session_id: Option<SessionId>,
        now: DateTime<Utc>,
    ) -> Result<EvaluationReport, EngineError> {
        let snapshot = self.zone_snapshot(scene.zone_id).await?;
        let rules = self.repo.list_rules(scene.id).await?;
        let resolution = resolver::resolve(&self.evaluator, &rules, &snapshot, now);
        let apply = self
            .reconciler
            .apply(scene.zone_id, &resolution.desired, now)
            .await?;

        let report = EvaluationReport {
            zone_id: scene.zone_id,
            scene_id: scene.id,
            session_id,
            evaluated_at: now,
            snapshot,
            rules: resolution.traces,
            desired: resolution.desired,
            warnings: resolution.warnings,
            apply,
        };

        tracing::info!(
            "Evaluated scene '{}' in zone {}: {}/{} rules matched, {} commands",
            scene.name,
            scene.zone_id,
            report.matched_rules(),
            report.rules.len(),
            report.apply.commands_issued()
        );
        let _ = self.event_tx.send(EngineEvent::SceneEvaluated {
            zone_id: report.zone_id,
            scene_id: report.scene_id,
            matched_rules: report.matched_rules(),
            commands: report.apply.commands_issued(),
            success: report.apply.success,
            evaluated_at: now,
        });
        Ok(report)
    }

    // Sessions

    /// Start a session for a zone, superseding any running one, and run
    /// one evaluation immediately
    pub async fn start_automation(
        &self,
        zone_id: ZoneId,
        scene_id: SceneId,
        duration_minutes: Option<u32>,
    ) -> Result<SessionView, EngineError> {
        self.kill_switch.ensure_inactive().await?;
        let duration = duration_minutes.unwrap_or(self.config.default_session_minutes);

        let lock = self.zone_lock(zone_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let session = self.sessions.begin(zone_id, scene_id, duration, now).await?;
        let scene = self.scene(scene_id).await?;

        let note = match self.evaluate_locked(&scene, Some(session.id), now).await {
            Ok(report) if report.apply.success => None,
            Ok(report) => {
                let failed = report.apply.executed.iter().filter(|o| o.failed()).count();
                Some(format!("initial evaluation: {failed} outlet command(s) failed"))
            }
            Err(e) => {
                tracing::warn!("Initial evaluation of session {} failed: {}", session.id, e);
                Some(format!("initial evaluation failed: {e}"))
            }
        };
        let session = self.sessions.record_evaluation(session, now, note).await?;
        Ok(SessionView::new(session, now))
    }

    /// Stop the zone's running session
    pub async fn stop_automation(&self, zone_id: ZoneId) -> Result<AutomationSession, EngineError> {
        self.zone(zone_id).await?;
        let lock = self.zone_lock(zone_id);
        let _guard = lock.lock().await;
        self.sessions.stop(zone_id, Utc::now()).await
    }

    pub async fn automation_status(&self, zone_id: ZoneId) -> Result<AutomationStatus, EngineError> {
        let lock = self.zone_lock(zone_id);
        let _guard = lock.lock().await;
        self.sessions.status(zone_id, Utc::now()).await
    }

    pub async fn automation_history(
        &self,
        zone_id: ZoneId,
        limit: usize,
    ) -> Result<Vec<SessionView>, EngineError> {
        self.sessions.history(zone_id, limit, Utc::now()).await
    }

    // Outlets and devices

    /// Switch an outlet by hand, persisting the confirmed state
    pub async fn switch_outlet(&self, outlet_id: OutletId, on: bool) -> Result<Outlet, EngineError> {
        self.kill_switch.ensure_inactive().await?;
        let outlet = self.outlet(outlet_id).await?;
        if !outlet.enabled {
            return Err(EngineError::OutletDisabled(outlet_id));
        }
        let device = self
            .repo
            .get_device(outlet.device_id)
            .await?
            .ok_or(EngineError::DeviceNotFound(outlet.device_id))?;

        let lock = self.zone_lock(device.zone_id);
        let _guard = lock.lock().await;
        self.reconciler.switch(&device, &outlet, on, "manual").await
    }

    /// Block automation on an outlet for `minutes`, or lift the block
    pub async fn set_manual_override(
        &self,
        outlet_id: OutletId,
        minutes: Option<u32>,
    ) -> Result<Outlet, EngineError> {
        let outlet = self.outlet(outlet_id).await?;
        let until = match minutes {
            Some(0) => return Err(EngineError::InvalidDuration(0)),
            Some(m) => Some(Utc::now() + Duration::minutes(i64::from(m))),
            None => None,
        };
        let device = self
            .repo
            .get_device(outlet.device_id)
            .await?
            .ok_or(EngineError::DeviceNotFound(outlet.device_id))?;

        let lock = self.zone_lock(device.zone_id);
        let _guard = lock.lock().await;
        let outlet = self.repo.set_manual_override(outlet_id, until).await?;
        self.repo
            .append_audit(
                if until.is_some() {
                    "manual_override_set"
                } else {
                    "manual_override_cleared"
                },
                json!({"outlet_id": outlet_id, "until": until}),
            )
            .await?;

        match until {
            Some(until) => tracing::info!(
                "Manual override on outlet {} until {}",
                outlet.display_name(),
                until
            ),
            None => tracing::info!("Manual override cleared on outlet {}", outlet.display_name()),
        }
        Ok(outlet)
    }

    /// Arm the device's countdown timer for an outlet
    pub async fn set_outlet_countdown(
        &self,
        outlet_id: OutletId,
        seconds: u32,
    ) -> Result<(), EngineError> {
        self.kill_switch.ensure_inactive().await?;
        if seconds > MAX_COUNTDOWN_SECONDS {
            return Err(EngineError::InvalidCountdown(format!(
                "{seconds}s exceeds {MAX_COUNTDOWN_SECONDS}s"
            )));
        }
        let outlet = self.outlet(outlet_id).await?;
        let device = self
            .repo
            .get_device(outlet.device_id)
            .await?
            .ok_or(EngineError::DeviceNotFound(outlet.device_id))?;

        self.reconciler
            .bounded(
                self.devices
                    .set_countdown(&device.provider_device_id, &outlet.channel, seconds),
            )
            .await?;
        tracing::info!(
            "Countdown of {}s set on outlet {}",
            seconds,
            outlet.display_name()
        );
        Ok(())
    }

    /// Live data points of a device from its provider
    pub async fn device_status(&self, device_id: DeviceId) -> Result<DeviceStatus, EngineError> {
        let device = self
            .repo
            .get_device(device_id)
            .await?
            .ok_or(EngineError::DeviceNotFound(device_id))?;
        Ok(self
            .reconciler
            .bounded(self.devices.get_status(&device.provider_device_id))
            .await?)
    }

    /// Complete every running session whose duration has elapsed
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<AutomationSession>, EngineError> {
        let (expired, failures) = self.expire_sessions(now).await?;
        for failure in failures {
            tracing::error!("Failed to expire {}: {}", failure.scope, failure.error);
        }
        Ok(expired)
    }

    async fn expire_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(Vec<AutomationSession>, Vec<TickFailure>), EngineError> {
        let mut expired = Vec::new();
        let mut failures = Vec::new();
        for session in self.repo.list_running_sessions().await? {
            if !session.is_expired(now) {
                continue;
            }
            let lock = self.zone_lock(session.zone_id);
            let _guard = lock.lock().await;
            match self.sessions.complete_if_expired(session.id, now).await {
                Ok(Some(session)) => expired.push(session),
                Ok(None) => {}
                Err(e) => failures.push(TickFailure {
                    scope: format!("session {}", session.id),
                    error: e.to_string(),
                }),
            }
        }
        Ok((expired, failures))
    }

    // Ticks

    /// Run one scheduler pass now
    pub async fn tick(&self) -> Result<TickReport, EngineError> {
        self.tick_at(Utc::now()).await
    }

    /// Run one scheduler pass as of `now`.
    ///
    /// Only a failure to list sessions, zones or scenes aborts the pass;
    /// anything else is isolated to its zone and recorded in the report.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, EngineError> {
        let mut report = TickReport::new(now);

        if self.kill_switch.is_active().await? {
            report.skipped_kill_switch = true;
            return Ok(report);
        }

        // Expiry is committed before anything is evaluated
        let (expired, failures) = self.expire_sessions(now).await?;
        report.expired.extend(expired.iter().map(|s| s.id));
        report.failures.extend(failures);

        let zones = self.repo.list_zones().await?;
        let running = self.repo.list_running_sessions().await?;
        let active_scenes = self.repo.list_active_scenes().await?;

        let mut passes = Vec::new();
        for zone in zones.iter().filter(|z| z.active) {
            if let Some(session) = running.iter().find(|s| s.zone_id == zone.id) {
                passes.push((zone.id, ZonePass::Session(session.clone())));
                continue;
            }

            let mut candidates: Vec<&Scene> =
                active_scenes.iter().filter(|s| s.zone_id == zone.id).collect();
            candidates.sort_by_key(|s| s.id);
            if candidates.len() > 1 {
                tracing::warn!(
                    "Zone {} has {} active scenes, using scene {}",
                    zone.id,
                    candidates.len(),
                    candidates[0].id
                );
            }
            if let Some(scene) = candidates.first() {
                passes.push((zone.id, ZonePass::Scene((*scene).clone())));
            }
        }

        let outcomes = join_all(passes.into_iter().map(|(zone_id, pass)| async move {
            (zone_id, self.run_pass(zone_id, pass, now).await)
        }))
        .await;

        for (zone_id, outcome) in outcomes {
            match outcome {
                Ok(PassOutcome::Evaluated(evaluation)) => report.evaluations.push(evaluation),
                Ok(PassOutcome::Expired(session_id)) => report.expired.push(session_id),
                Ok(PassOutcome::SessionFailed(session_id, error)) => {
                    report.failures.push(TickFailure {
                        scope: format!("session {session_id}"),
                        error,
                    });
                }
                Ok(PassOutcome::Skipped) => {}
                Err(e) => {
                    tracing::error!("Evaluation of zone {} failed: {}", zone_id, e);
                    report.failures.push(TickFailure {
                        scope: format!("zone {zone_id}"),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn run_pass(
        &self,
        zone_id: ZoneId,
        pass: ZonePass,
        now: DateTime<Utc>,
    ) -> Result<PassOutcome, EngineError> {
        let lock = self.zone_lock(zone_id);
        let _guard = lock.lock().await;

        match pass {
            ZonePass::Session(session) => {
                // The session may have changed since it was listed
                let Some(session) = self
                    .repo
                    .get_session(session.id)
                    .await?
                    .filter(AutomationSession::is_running)
                else {
                    return Ok(PassOutcome::Skipped);
                };
                if session.is_expired(now) {
                    self.sessions.complete(session.clone()).await?;
                    return Ok(PassOutcome::Expired(session.id));
                }

                let scene = match self.repo.get_scene(session.scene_id).await? {
                    Some(scene) if scene.zone_id == session.zone_id => scene,
                    Some(_) => {
                        let error = format!(
                            "scene {} no longer belongs to zone {}",
                            session.scene_id, session.zone_id
                        );
                        self.sessions.fail(session.clone(), &error).await?;
                        return Ok(PassOutcome::SessionFailed(session.id, error));
                    }
                    None => {
                        let error = format!("scene {} no longer exists", session.scene_id);
                        self.sessions.fail(session.clone(), &error).await?;
                        return Ok(PassOutcome::SessionFailed(session.id, error));
                    }
                };

                let evaluation = self.evaluate_locked(&scene, Some(session.id), now).await?;
                self.sessions.record_evaluation(session, now, None).await?;
                Ok(PassOutcome::Evaluated(evaluation))
            }
            ZonePass::Scene(scene) => {
                if self.repo.running_session(zone_id).await?.is_some() {
                    // A session started after the pass was planned
                    return Ok(PassOutcome::Skipped);
                }
                let evaluation = self.evaluate_locked(&scene, None, now).await?;
                Ok(PassOutcome::Evaluated(evaluation))
            }
        }
    }
}
