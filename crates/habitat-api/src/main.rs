//! Habitat Control - scene automation API server

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use habitat_core::{DeviceId, JsonStore, OutletId, SceneId, ZoneId};
use scene_engine::{EngineError, IngestReading, SceneEngine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tuya_cloud::{DeviceControl, SimulatedDevices, TuyaCloud};

mod config;
mod gate;
mod sse;
mod websocket;

use config::ServerConfig;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SceneEngine>,
}

/// API response wrapper using serde_json::Value for flexibility
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// HTTP status for an engine error
fn error_status(error: &EngineError) -> StatusCode {
    if error.is_not_found() {
        return StatusCode::NOT_FOUND;
    }
    match error {
        EngineError::KillSwitchActive => StatusCode::LOCKED,
        EngineError::DeviceControl(_) => StatusCode::BAD_GATEWAY,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// Wrap an engine result in the response envelope
fn reply<T: Serialize>(result: Result<T, EngineError>) -> (StatusCode, Json<ApiResponse>) {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            let status = error_status(&e);
            if status.is_server_error() {
                tracing::error!("Request failed: {}", e);
            } else {
                tracing::debug!("Request rejected ({}): {}", status, e);
            }
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}

#[derive(Deserialize)]
struct KillRequest {
    reason: Option<String>,
}

#[derive(Deserialize)]
struct StartRequest {
    scene_id: SceneId,
    duration_minutes: Option<u32>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    20
}

#[derive(Deserialize)]
struct SwitchRequest {
    state: bool,
}

#[derive(Deserialize)]
struct OverrideRequest {
    minutes: u32,
}

#[derive(Deserialize)]
struct CountdownRequest {
    seconds: u32,
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "habitat-api" }))
}

/// API health with engine state
async fn api_health(State(state): State<AppState>) -> impl IntoResponse {
    reply(state.engine.kill_switch_status().await.map(|kill| {
        serde_json::json!({
            "status": "ok",
            "api_version": "v1",
            "version": env!("CARGO_PKG_VERSION"),
            "simulated": state.engine.is_simulated(),
            "kill_switch_active": kill.active,
        })
    }))
}

/// List all zones
async fn list_zones(State(state): State<AppState>) -> impl IntoResponse {
    reply(state.engine.zones().await)
}

/// Current kill switch state
async fn kill_status(State(state): State<AppState>) -> impl IntoResponse {
    reply(state.engine.kill_switch_status().await)
}

/// Engage the kill switch
async fn kill_activate(
    State(state): State<AppState>,
    body: Option<Json<KillRequest>>,
) -> impl IntoResponse {
    let reason = body.and_then(|Json(req)| req.reason);
    reply(state.engine.activate_kill_switch(reason).await)
}

/// Release the kill switch
async fn kill_deactivate(State(state): State<AppState>) -> impl IntoResponse {
    reply(state.engine.deactivate_kill_switch().await)
}

async fn automation_status(
    State(state): State<AppState>,
    Path(zone_id): Path<ZoneId>,
) -> impl IntoResponse {
    reply(state.engine.automation_status(zone_id).await)
}

/// Start an automation session for a zone
async fn automation_start(
    State(state): State<AppState>,
    Path(zone_id): Path<ZoneId>,
    Json(req): Json<StartRequest>,
) -> impl IntoResponse {
    reply(
        state
            .engine
            .start_automation(zone_id, req.scene_id, req.duration_minutes)
            .await,
    )
}

async fn automation_stop(
    State(state): State<AppState>,
    Path(zone_id): Path<ZoneId>,
) -> impl IntoResponse {
    reply(state.engine.stop_automation(zone_id).await)
}

async fn automation_history(
    State(state): State<AppState>,
    Path(zone_id): Path<ZoneId>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    reply(state.engine.automation_history(zone_id, query.limit).await)
}

async fn scene_activate(
    State(state): State<AppState>,
    Path(scene_id): Path<SceneId>,
) -> impl IntoResponse {
    reply(state.engine.activate_scene(scene_id).await)
}

/// Evaluate a scene now and reconcile its outlets
async fn scene_evaluate(
    State(state): State<AppState>,
    Path(scene_id): Path<SceneId>,
) -> impl IntoResponse {
    reply(state.engine.evaluate_scene(scene_id).await)
}

/// Switch an outlet by hand
async fn outlet_switch(
    State(state): State<AppState>,
    Path(outlet_id): Path<OutletId>,
    Json(req): Json<SwitchRequest>,
) -> impl IntoResponse {
    reply(state.engine.switch_outlet(outlet_id, req.state).await)
}

async fn outlet_override_set(
    State(state): State<AppState>,
    Path(outlet_id): Path<OutletId>,
    Json(req): Json<OverrideRequest>,
) -> impl IntoResponse {
    reply(
        state
            .engine
            .set_manual_override(outlet_id, Some(req.minutes))
            .await,
    )
}

async fn outlet_override_clear(
    State(state): State<AppState>,
    Path(outlet_id): Path<OutletId>,
) -> impl IntoResponse {
    reply(state.engine.set_manual_override(outlet_id, None).await)
}

async fn outlet_countdown(
    State(state): State<AppState>,
    Path(outlet_id): Path<OutletId>,
    Json(req): Json<CountdownRequest>,
) -> impl IntoResponse {
    reply(
        state
            .engine
            .set_outlet_countdown(outlet_id, req.seconds)
            .await
            .map(|()| {
                serde_json::json!({
                    "outlet_id": outlet_id,
                    "countdown_seconds": req.seconds,
                })
            }),
    )
}

/// Live data points reported by a device
async fn device_status(
    State(state): State<AppState>,
    Path(device_id): Path<DeviceId>,
) -> impl IntoResponse {
    reply(state.engine.device_status(device_id).await)
}

/// Accept readings pushed by a sensor gateway
async fn sensors_ingest(
    State(state): State<AppState>,
    Json(reading): Json<IngestReading>,
) -> impl IntoResponse {
    if reading.values().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("temperature or humidity is required")),
        );
    }
    reply(state.engine.ingest_reading(reading).await)
}

/// Latest reading per metric for a zone
async fn sensors_latest(
    State(state): State<AppState>,
    Path(zone_id): Path<ZoneId>,
) -> impl IntoResponse {
    let result = async {
        if !state.engine.zones().await?.iter().any(|z| z.id == zone_id) {
            return Err(EngineError::ZoneNotFound(zone_id));
        }
        state.engine.zone_snapshot(zone_id).await
    }
    .await;
    reply(result.map(|snapshot| serde_json::json!({ "zone_id": zone_id, "readings": snapshot })))
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket::handle_socket(socket, state))
}

/// Build the router
fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/health", get(api_health))
        .route("/api/v1/zones", get(list_zones))
        .route(
            "/api/v1/kill",
            get(kill_status).post(kill_activate).delete(kill_deactivate),
        )
        .route(
            "/api/v1/automation/zone/:zone_id/status",
            get(automation_status),
        )
        .route(
            "/api/v1/automation/zone/:zone_id/start",
            post(automation_start),
        )
        .route("/api/v1/automation/zone/:zone_id/stop", post(automation_stop))
        .route(
            "/api/v1/automation/zone/:zone_id/history",
            get(automation_history),
        )
        .route("/api/v1/scenes/:scene_id/activate", post(scene_activate))
        .route("/api/v1/scenes/:scene_id/evaluate", post(scene_evaluate))
        .route("/api/v1/outlets/:outlet_id/switch", post(outlet_switch))
        .route(
            "/api/v1/outlets/:outlet_id/override",
            post(outlet_override_set).delete(outlet_override_clear),
        )
        .route("/api/v1/outlets/:outlet_id/countdown", post(outlet_countdown))
        .route("/api/v1/devices/:device_id/status", get(device_status))
        .route("/api/v1/sensors/ingest", post(sensors_ingest))
        .route("/api/v1/sensors/zone/:zone_id/latest", get(sensors_latest))
        .route("/api/v1/events/sse", get(sse::events))
        // WebSocket
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gate::kill_switch_gate,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "habitat_api=debug,scene_engine=debug,tuya_cloud=info,info".into()
            }),
        )
        .init();

    tracing::info!("Starting Habitat Control API server");
    let config = ServerConfig::from_env()?;

    tracing::info!("Opening store in {}", config.data_dir.display());
    let store = JsonStore::open(&config.data_dir).await?;
    if config.seed_defaults && store.seed_default().await? {
        tracing::info!("Seeded default zones, devices and sensors");
    }

    let devices: Arc<dyn DeviceControl> = match config.tuya.clone() {
        Some(credentials) => Arc::new(TuyaCloud::with_timeout(
            credentials,
            config.engine.command_timeout,
        )?),
        None => {
            tracing::warn!("TUYA_ACCESS_KEY/TUYA_SECRET_KEY not set, using simulated devices");
            Arc::new(SimulatedDevices::new())
        }
    };

    let engine = Arc::new(SceneEngine::new(
        Arc::new(store),
        devices,
        config.engine.clone(),
    ));
    let scheduler = engine.spawn_scheduler();

    let state = AppState {
        engine: engine.clone(),
    };

    tracing::info!("Listening on http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}
