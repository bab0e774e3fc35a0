use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::{runtime::Builder, sync::mpsc, time};
use tracing::{info, warn};

use crate::{
    bus::ServoBus, control_table::Register, error::MotorError, model::MotorId,
    transport::MotorTransport,
};

#[derive(Debug, Clone, Copy)]
pub struct ControlLoopConfig {
    pub read_period: Duration,
    pub channel_capacity: usize,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self { read_period: Duration::from_millis(10), channel_capacity: 128 }
    }
}

/// Raw Present_Position of every motor at one instant.
#[derive(Debug, Clone)]
pub struct MotorSnapshot {
    pub ids: Vec<MotorId>,
    pub positions: Vec<i32>,
    pub timestamp_s: f64,
}

#[derive(Debug, Clone)]
pub enum MotorCommand {
    SetGoalPositions { ids: Vec<MotorId>, positions: Vec<i32> },
    SetTorque { ids: Vec<MotorId>, enabled: bool },
    /// Logs Goal/Present position, Goal_Velocity, Lock, Status and Moving.
    Probe { id: MotorId },
}

pub struct ControlLoopHandle {
    tx: mpsc::Sender<MotorCommand>,
    last_snapshot: Arc<Mutex<Result<MotorSnapshot, MotorError>>>,
    stop: Arc<AtomicBool>,
}

impl ControlLoopHandle {
    pub fn push(&self, cmd: MotorCommand) -> Result<(), MotorError> {
        self.tx.blocking_send(cmd).map_err(|_| MotorError::Closed)
    }

    pub fn last_snapshot(&self) -> Result<MotorSnapshot, MotorError> {
        self.last_snapshot.lock().map_err(|_| MotorError::Closed)?.clone()
    }

    pub fn close(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn apply<T: MotorTransport>(bus: &mut ServoBus<T>, cmd: MotorCommand) -> Result<(), MotorError> {
    match cmd {
        MotorCommand::SetGoalPositions { ids, positions } => {
            if ids.len() != positions.len() {
                return Err(MotorError::InvalidResponse(format!(
                    "{} ids for {} positions",
                    ids.len(),
                    positions.len()
                )));
            }
            let values: Vec<(MotorId, i32)> = ids.into_iter().zip(positions).collect();
            bus.sync_write(Register::GoalPosition, &values)
        }
        MotorCommand::SetTorque { ids, enabled } => {
            for id in ids {
                if enabled {
                    bus.enable_torque(id)?;
                } else {
                    bus.disable_torque(id)?;
                }
            }
            Ok(())
        }
        MotorCommand::Probe { id } => {
            let probe = bus.probe(id)?;
            info!(id = id.0, "{probe}");
            Ok(())
        }
    }
}

pub fn start_control_loop<T: MotorTransport>(
    mut bus: ServoBus<T>,
    all_ids: Vec<MotorId>,
    cfg: ControlLoopConfig,
) -> Result<ControlLoopHandle, MotorError> {
    let missing = bus.transport_mut().scan_missing_ids(&all_ids)?;
    if !missing.is_empty() {
        return Err(MotorError::MissingMotors(missing.into_iter().map(|m| m.0).collect()));
    }

    let runtime = Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| MotorError::Communication(format!("tokio runtime: {e}")))?;

    let (tx, mut rx) = mpsc::channel::<MotorCommand>(cfg.channel_capacity);
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);

    let snapshot = Arc::new(Mutex::new(Err(MotorError::Communication(
        "no positions read yet".to_string(),
    ))));
    let snapshot_clone = Arc::clone(&snapshot);

    std::thread::spawn(move || {
        runtime.block_on(async move {
            let mut interval = time::interval(cfg.read_period);

            loop {
                tokio::select! {
                    Some(cmd) = rx.recv() => {
                        if let Err(e) = apply(&mut bus, cmd) {
                            warn!("command failed: {e}");
                        }
                    }
                    _ = interval.tick() => {
                        let read = bus.sync_read(Register::PresentPosition, &all_ids).map(|positions| {
                            let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs_f64();
                            MotorSnapshot { ids: all_ids.clone(), positions, timestamp_s: ts }
                        });
                        if let Ok(mut guard) = snapshot_clone.lock() {
                            *guard = read;
                        }
                    }
                }

                if stop_clone.load(Ordering::SeqCst) {
                    break;
                }
            }
        });
    });

    Ok(ControlLoopHandle { tx, last_snapshot: snapshot, stop })
}
