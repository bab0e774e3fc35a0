//! Leader/follower teleoperation: the follower mirrors the hand-moved leader.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{arm::Arm, error::MotorError, transport::MotorTransport};

pub const DEFAULT_FPS: u32 = 30;

pub struct Teleop {
    fps: u32,
    max_iterations: Option<u64>,
    stop: Arc<AtomicBool>,
}

impl Default for Teleop {
    fn default() -> Self {
        Self::new(DEFAULT_FPS)
    }
}

impl Teleop {
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1), max_iterations: None, stop: Arc::new(AtomicBool::new(false)) }
    }

    pub fn max_iterations(mut self, iterations: Option<u64>) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Disables leader torque, then copies the leader observation to the
    /// follower at `fps` until stopped. Both arms are disconnected on exit,
    /// also after a failure, and the number of iterations is returned.
    pub fn run<L: MotorTransport, F: MotorTransport>(
        &self,
        mut leader: Arm<L>,
        mut follower: Arm<F>,
    ) -> Result<u64, MotorError> {
        let result = self.mirror(&mut leader, &mut follower);
        info!("stopping teleoperation");

        let follower_released = follower.disconnect(true);
        let leader_released = leader.disconnect(true);
        let iterations = result?;
        follower_released?;
        leader_released?;
        Ok(iterations)
    }

    fn mirror<L: MotorTransport, F: MotorTransport>(
        &self,
        leader: &mut Arm<L>,
        follower: &mut Arm<F>,
    ) -> Result<u64, MotorError> {
        leader.set_torque(false)?;
        follower.set_torque(true)?;
        info!(fps = self.fps, "teleoperation active");

        let period = Duration::from_secs_f64(1.0 / f64::from(self.fps));
        let mut iteration: u64 = 0;
        while !self.stop.load(Ordering::SeqCst)
            && self.max_iterations.map_or(true, |max| iteration < max)
        {
            let t0 = Instant::now();
            match leader.observation() {
                Ok(action) => {
                    if let Err(e) = follower.send_action(&action) {
                        warn!(iteration, "follower write error: {e}");
                    }
                    if iteration % u64::from(self.fps) == 0 {
                        let joints: Vec<String> = action
                            .iter()
                            .take(3)
                            .map(|(name, v)| format!("{name}: {v:6.1}"))
                            .collect();
                        info!("[{iteration:5}] leader -> follower | {}", joints.join(" | "));
                    }
                }
                Err(e) => warn!(iteration, "leader read error: {e}"),
            }
            iteration += 1;
            thread::sleep(period.saturating_sub(t0.elapsed()));
        }
        info!(iterations = iteration, "mirroring ended");
        Ok(iteration)
    }
}
