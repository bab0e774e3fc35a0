//! Alternate the arm between two poses until asked to stop.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::{info, warn};

use crate::{arm::Arm, error::MotorError, transport::MotorTransport};

pub const MIN_INTERVAL: Duration = Duration::from_millis(500);
const STOP_CHECK: Duration = Duration::from_millis(500);
const VERBOSE_SETTLE: Duration = Duration::from_millis(500);

pub type Pose = BTreeMap<String, f64>;

fn pose(values: [(&str, f64); 6]) -> Pose {
    values.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// The two poses recorded from the control panel.
pub fn default_poses() -> (Pose, Pose) {
    let first = pose([
        ("shoulder_pan", 34.221038615179765),
        ("shoulder_lift", -42.34071396294623),
        ("elbow_flex", 0.4166666666666714),
        ("wrist_flex", 0.10718113612004743),
        ("wrist_roll", 0.033411293017039156),
        ("gripper", 49.86320109439124),
    ]);
    let second = pose([
        ("shoulder_pan", -14.114513981358186),
        ("shoulder_lift", 32.85133303208315),
        ("elbow_flex", 0.4166666666666714),
        ("wrist_flex", 0.10718113612004743),
        ("wrist_roll", 0.033411293017039156),
        ("gripper", 49.86320109439124),
    ]);
    (first, second)
}

pub struct Cycler {
    poses: [Pose; 2],
    interval: Duration,
    verbose: bool,
    max_cycles: Option<usize>,
    stop: Arc<AtomicBool>,
}

impl Cycler {
    pub fn new(first: Pose, second: Pose, interval: Duration) -> Self {
        let interval = if interval < MIN_INTERVAL {
            warn!(?interval, "interval below 0.5 s, clamped");
            MIN_INTERVAL
        } else {
            interval
        };
        Self {
            poses: [first, second],
            interval,
            verbose: false,
            max_cycles: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Interval from a user-supplied number of seconds. Negative, NaN and
    /// unrepresentably large values are configuration errors.
    pub fn interval_from_secs(secs: f64) -> Result<Duration, MotorError> {
        Duration::try_from_secs_f64(secs)
            .map_err(|e| MotorError::Config(format!("invalid interval {secs}: {e}")))
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn max_cycles(mut self, cycles: Option<usize>) -> Self {
        self.max_cycles = cycles;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Flag that stops [`Cycler::run`] within half a second of being set.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Runs until the stop flag is set or `max_cycles` is reached and
    /// returns the number of moves sent. A failed move is logged and the
    /// cycle continues.
    pub fn run<T: MotorTransport>(&self, arm: &mut Arm<T>) -> usize {
        info!(interval = ?self.interval, "cycling between two poses");
        let mut count = 0;
        let mut target = 0;

        while !self.stopped() {
            match arm.send_action(&self.poses[target]) {
                Ok(_) => {
                    count += 1;
                    info!(cycle = count, "moving to position {}", target + 1);
                }
                Err(e) => warn!("error during cycle: {e}, continuing"),
            }

            if self.verbose {
                thread::sleep(VERBOSE_SETTLE);
                match arm.observation() {
                    Ok(obs) => info!("actual positions: {obs:?}"),
                    Err(e) => warn!("could not read positions: {e}"),
                }
            }
            target = 1 - target;

            if self.max_cycles.is_some_and(|max| count >= max) {
                break;
            }

            let mut slept = Duration::ZERO;
            while slept < self.interval && !self.stopped() {
                let step = STOP_CHECK.min(self.interval - slept);
                thread::sleep(step);
                slept += step;
            }
        }
        info!(cycles = count, "cycling finished");
        count
    }
}
