//! Browser control panel: one slider per joint, a center button and a
//! position read-back, served over HTTP with `axum`.
//!
//! All bus access goes through one async mutex. Without a connected arm the
//! panel still works and only stores the requested positions.

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    arm::{center_pose, Arm, ArmMotor},
    error::MotorError,
    transport::MotorTransport,
};

const INDEX_HTML: &str = include_str!("../static/index.html");
const PROBE_DELAY: Duration = Duration::from_millis(50);

pub struct PanelState<T: MotorTransport> {
    robot: Option<Arm<T>>,
    positions: BTreeMap<String, f64>,
}

pub struct AppState<T: MotorTransport> {
    inner: Arc<Mutex<PanelState<T>>>,
}

impl<T: MotorTransport> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: MotorTransport> AppState<T> {
    /// Panel for `motors`; `robot` is `None` when no arm is connected.
    pub fn new(motors: &[ArmMotor], robot: Option<Arm<T>>) -> Self {
        let positions = center_pose(motors);
        Self { inner: Arc::new(Mutex::new(PanelState { robot, positions })) }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.robot.is_some()
    }

    pub async fn positions(&self) -> BTreeMap<String, f64> {
        self.inner.lock().await.positions.clone()
    }

    /// Takes the arm out of the panel and disconnects it.
    pub async fn disconnect(&self) -> Result<(), MotorError> {
        let robot = self.inner.lock().await.robot.take();
        if let Some(arm) = robot {
            info!("disconnecting robot");
            arm.disconnect(true)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct MotorRequest {
    pub motor: String,
    pub position: f64,
}

#[derive(Debug, Serialize)]
struct MotorResponse {
    success: bool,
    motor: String,
    position: f64,
}

fn failure(status: StatusCode, err: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "success": false, "error": err.to_string() }))).into_response()
}

pub fn router<T: MotorTransport>(state: AppState<T>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/motor", post(set_motor::<T>))
        .route("/api/center", post(center::<T>))
        .route("/api/positions", get(positions::<T>))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn set_motor<T: MotorTransport>(
    State(state): State<AppState<T>>,
    body: Result<Json<MotorRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!("bad motor request: {}", rejection.body_text());
            return failure(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };
    let mut panel = state.inner.lock().await;
    if !panel.positions.contains_key(&req.motor) {
        return failure(StatusCode::BAD_REQUEST, format!("Invalid motor: {}", req.motor));
    }
    panel.positions.insert(req.motor.clone(), req.position);

    match panel.robot.as_mut() {
        Some(arm) => {
            let action = BTreeMap::from([(format!("{}.pos", req.motor), req.position)]);
            info!(?action, "sending action");
            if let Err(e) = arm.send_action(&action) {
                error!("error controlling motor: {e}");
                return failure(StatusCode::INTERNAL_SERVER_ERROR, e);
            }
            tokio::time::sleep(PROBE_DELAY).await;
            match arm.probe(&req.motor) {
                Ok(probe) => info!("motor {} | Target={} | {probe}", req.motor, req.position),
                Err(e) => warn!("could not read motor status: {e}"),
            }
        }
        None => warn!("robot not connected, storing position only"),
    }

    Json(MotorResponse { success: true, motor: req.motor, position: req.position }).into_response()
}

async fn center<T: MotorTransport>(State(state): State<AppState<T>>) -> Response {
    let mut panel = state.inner.lock().await;
    for (name, value) in panel.positions.iter_mut() {
        *value = if name == crate::arm::GRIPPER { 50.0 } else { 0.0 };
    }

    match panel.robot.as_mut() {
        Some(arm) => {
            let action = center_pose(arm.motors());
            if let Err(e) = arm.send_action(&action) {
                error!("error centering motors: {e}");
                return failure(StatusCode::INTERNAL_SERVER_ERROR, e);
            }
            info!("all motors centered");
        }
        None => warn!("robot not connected, storing positions only"),
    }
    Json(json!({ "success": true, "message": "All motors centered" })).into_response()
}

async fn positions<T: MotorTransport>(State(state): State<AppState<T>>) -> Response {
    let mut panel = state.inner.lock().await;
    let PanelState { robot, positions } = &mut *panel;
    if let Some(arm) = robot.as_mut() {
        match arm.observation() {
            Ok(obs) => {
                for (name, value) in obs {
                    if let Some(cached) = positions.get_mut(&name) {
                        *cached = value;
                    }
                }
            }
            Err(e) => {
                error!("error getting positions: {e}");
                return failure(StatusCode::INTERNAL_SERVER_ERROR, e);
            }
        }
    }
    Json(json!({ "success": true, "positions": positions })).into_response()
}

/// Sends the arm to the center pose if one is connected. An arm that cannot
/// be centered is dropped and the panel carries on storing positions only.
pub async fn center_on_start<T: MotorTransport>(state: &AppState<T>) {
    let mut panel = state.inner.lock().await;
    let Some(arm) = panel.robot.as_mut() else {
        return;
    };
    let action = center_pose(arm.motors());
    match arm.send_action(&action) {
        Ok(_) => info!("robot moved to center position"),
        Err(e) => {
            error!("error initializing robot: {e}");
            if let Some(arm) = panel.robot.take() {
                if let Err(e) = arm.disconnect(true) {
                    warn!("could not release torque: {e}");
                }
            }
            warn!("continuing without robot, positions are stored only");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }
}

/// Serves the panel on `addr` until Ctrl+C, then disconnects the arm.
pub async fn serve<T: MotorTransport>(state: AppState<T>, addr: SocketAddr) -> Result<()> {
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control panel on {addr}"))?;
    info!("control panel listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("control panel server error")?;

    state.disconnect().await?;
    Ok(())
}

