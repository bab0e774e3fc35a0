//! Command-and-poll: write a goal, then sample the motor at a fixed cadence
//! until it reaches the target or the timeout elapses.
//!
//! There is no retry and no cancellation. The first failing register access
//! ends the poll with its error.

use std::{
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use crate::{
    bus::ServoBus, control_table::Register, error::MotorError, model::MotorId,
    transport::MotorTransport,
};

/// Target position with the optional registers written before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoalCommand {
    pub position: i32,
    pub velocity: Option<i32>,
    pub acceleration: Option<i32>,
}

impl GoalCommand {
    pub fn position(position: i32) -> Self {
        Self { position, velocity: None, acceleration: None }
    }

    pub fn with_velocity(mut self, velocity: i32) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn with_acceleration(mut self, acceleration: i32) -> Self {
        self.acceleration = Some(acceleration);
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
    /// Ticks from the target that count as reached.
    pub tolerance: i32,
    /// Ticks of displacement that count as movement.
    pub movement_threshold: i32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(2),
            tolerance: 10,
            movement_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSample {
    pub at: Duration,
    pub position: i32,
    pub current: Option<i32>,
    pub moving: bool,
    pub status: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub start: i32,
    pub target: i32,
    pub final_position: i32,
    pub reached: bool,
    pub moved: bool,
    pub samples: Vec<PollSample>,
    pub elapsed: Duration,
}

impl PollOutcome {
    pub fn delta(&self) -> i32 {
        self.final_position - self.start
    }
}

/// Issues Acceleration, Goal_Velocity and Goal_Position in that order.
pub fn issue<T: MotorTransport>(
    bus: &mut ServoBus<T>,
    id: MotorId,
    cmd: &GoalCommand,
) -> Result<(), MotorError> {
    if let Some(acc) = cmd.acceleration {
        bus.write(Register::Acceleration, id, acc)?;
    }
    if let Some(vel) = cmd.velocity {
        bus.write(Register::GoalVelocity, id, vel)?;
    }
    bus.write(Register::GoalPosition, id, cmd.position)
}

fn sample<T: MotorTransport>(
    bus: &mut ServoBus<T>,
    id: MotorId,
    at: Duration,
) -> Result<PollSample, MotorError> {
    let position = bus.read(Register::PresentPosition, id)?;
    let current = if bus.supports(Register::PresentCurrent, id) {
        Some(bus.read(Register::PresentCurrent, id)?)
    } else {
        None
    };
    Ok(PollSample {
        at,
        position,
        current,
        moving: bus.read(Register::Moving, id)? != 0,
        status: bus.read(Register::Status, id)?,
    })
}

/// Issues `cmd` and polls until the motor is within tolerance or the
/// timeout elapses.
pub fn command_and_poll<T: MotorTransport>(
    bus: &mut ServoBus<T>,
    id: MotorId,
    cmd: &GoalCommand,
    cfg: &PollConfig,
) -> Result<PollOutcome, MotorError> {
    let start = bus.read(Register::PresentPosition, id)?;
    issue(bus, id, cmd)?;
    info!(id = id.0, start, target = cmd.position, "goal issued");

    let began = Instant::now();
    let mut samples = Vec::new();
    let reached = loop {
        thread::sleep(cfg.interval);
        let s = sample(bus, id, began.elapsed())?;
        debug!(id = id.0, position = s.position, moving = s.moving, "poll");
        let close = (s.position - cmd.position).abs() <= cfg.tolerance;
        samples.push(s);
        if close {
            break true;
        }
        if began.elapsed() >= cfg.timeout {
            break false;
        }
    };

    let final_position = samples.last().map(|s| s.position).unwrap_or(start);
    Ok(PollOutcome {
        start,
        target: cmd.position,
        final_position,
        reached,
        moved: (final_position - start).abs() > cfg.movement_threshold,
        samples,
        elapsed: began.elapsed(),
    })
}

/// Moves `delta` ticks from the present position, clamped to the encoder
/// range.
pub fn move_relative<T: MotorTransport>(
    bus: &mut ServoBus<T>,
    id: MotorId,
    delta: i32,
    velocity: Option<i32>,
    acceleration: Option<i32>,
    cfg: &PollConfig,
) -> Result<PollOutcome, MotorError> {
    let present = bus.read(Register::PresentPosition, id)?;
    let max = bus.model(id).resolution() as i32 - 1;
    let cmd = GoalCommand {
        position: (present + delta).clamp(0, max),
        velocity,
        acceleration,
    };
    command_and_poll(bus, id, &cmd, cfg)
}

/// How the motor reacted to the Goal_Velocity experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocityVerdict {
    /// Moves with Goal_Velocity left as it was.
    MovesWithoutVelocity,
    /// Only moves once Goal_Velocity is set to the given value.
    NeedsVelocity(i32),
    /// Does not move with any of the tried velocities.
    NoMovement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VelocityTestReport {
    pub without_velocity: PollOutcome,
    pub with_velocity: Vec<(i32, PollOutcome)>,
    pub verdict: VelocityVerdict,
}

impl std::fmt::Display for VelocityVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MovesWithoutVelocity => {
                write!(f, "motor moves without Goal_Velocity, the problem is elsewhere")
            }
            Self::NeedsVelocity(v) => write!(
                f,
                "Goal_Velocity was the missing piece: write Goal_Velocity={v} before Goal_Position"
            ),
            Self::NoMovement => {
                write!(f, "no movement even with Goal_Velocity set, check power, limits and Status")
            }
        }
    }
}

pub const VELOCITY_TEST_STEP: i32 = 300;
/// Goal_Velocity values tried in order; the last one gets 1.5x the timeout.
const VELOCITY_TRIALS: [i32; 2] = [200, 1000];

fn trial_timeout(timeout: Duration, trial: usize) -> Duration {
    if trial == 0 {
        timeout
    } else {
        timeout.saturating_mul(3) / 2
    }
}

/// Checks whether a motor needs Goal_Velocity to move: +300 ticks as-is,
/// back, then +300 with Goal_Velocity 200 and, if that fails, 1000.
pub fn velocity_test<T: MotorTransport>(
    bus: &mut ServoBus<T>,
    id: MotorId,
    cfg: &PollConfig,
) -> Result<VelocityTestReport, MotorError> {
    bus.enable_torque(id)?;

    let without_velocity = move_relative(bus, id, VELOCITY_TEST_STEP, None, None, cfg)?;
    info!(id = id.0, delta = without_velocity.delta(), moved = without_velocity.moved, "without Goal_Velocity");
    command_and_poll(bus, id, &GoalCommand::position(without_velocity.start), cfg)?;

    let mut with_velocity = Vec::new();
    let mut verdict = if without_velocity.moved {
        VelocityVerdict::MovesWithoutVelocity
    } else {
        VelocityVerdict::NoMovement
    };
    for (n, velocity) in VELOCITY_TRIALS.into_iter().enumerate() {
        let trial_cfg = PollConfig { timeout: trial_timeout(cfg.timeout, n), ..*cfg };
        let outcome = move_relative(bus, id, VELOCITY_TEST_STEP, Some(velocity), None, &trial_cfg)?;
        info!(id = id.0, velocity, delta = outcome.delta(), moved = outcome.moved, "with Goal_Velocity");
        let moved = outcome.moved;
        let start = outcome.start;
        with_velocity.push((velocity, outcome));
        if moved {
            if verdict == VelocityVerdict::NoMovement {
                verdict = VelocityVerdict::NeedsVelocity(velocity);
            }
            break;
        }
        command_and_poll(bus, id, &GoalCommand::position(start), &trial_cfg)?;
    }

    Ok(VelocityTestReport { without_velocity, with_velocity, verdict })
}
