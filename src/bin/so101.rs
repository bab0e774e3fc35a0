use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use so101_servo_tools::{
    arm::{center_pose, so101_motors, Arm},
    bus::ServoBus,
    control_loop::{start_control_loop, ControlLoopConfig, MotorCommand},
    control_table::{MemoryArea, Register},
    conversion::{load_calibration, CalibrationTable},
    cycle::{default_poses, Cycler},
    diagnostics::{repair, DiagnosticReport, DiagnosticSnapshot, RepairPlan},
    model::MotorId,
    poll::{move_relative, velocity_test, PollConfig, PollOutcome},
    sim::SimTransport,
    teleop::Teleop,
    web::{self, AppState},
    FeetechTransport, MotorTransport, ToolConfig,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type DynTransport = Box<dyn MotorTransport>;

/// Diagnostics and control for the Feetech servos of an SO-101 arm
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port of the servo bus
    #[arg(short, long)]
    port: Option<String>,

    /// Bus baudrate
    #[arg(short, long)]
    baudrate: Option<u32>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run against a simulated SO-101 instead of a serial port
    #[arg(long)]
    sim: bool,

    /// Calibration JSON for the arm commands
    #[arg(long)]
    calibration: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ping a range of IDs and report the model of each motor found
    Scan {
        #[arg(long, default_value_t = 1)]
        start: u8,
        #[arg(long, default_value_t = 20)]
        end: u8,
    },
    /// Read one register
    Read { id: u8, register: Register },
    /// Write one register
    Write {
        id: u8,
        register: Register,
        #[arg(allow_hyphen_values = true)]
        value: i32,
        /// Disable torque and unlock EEPROM around the write
        #[arg(long)]
        force: bool,
    },
    /// Dump every diagnostic register
    Params {
        #[arg(default_values_t = [1, 2, 3, 4, 5, 6])]
        ids: Vec<u8>,
    },
    /// Dump registers and explain why a motor might not move
    Diagnose {
        #[arg(default_values_t = [1, 2, 3, 4, 5, 6])]
        ids: Vec<u8>,
    },
    /// Restore torque limits, operating mode and position limits
    Repair {
        ids: Vec<u8>,
        /// Leave Min/Max_Position_Limit untouched
        #[arg(long)]
        keep_limits: bool,
    },
    /// Move a motor by a number of ticks and watch it
    Move {
        id: u8,
        #[arg(allow_hyphen_values = true)]
        delta: i32,
        #[arg(long)]
        velocity: Option<i32>,
        #[arg(long)]
        acceleration: Option<i32>,
    },
    /// Check whether a motor only moves with Goal_Velocity set
    VelocityTest {
        #[arg(default_value_t = 6)]
        id: u8,
    },
    /// Send every joint to center, gripper half open
    Center,
    /// Alternate between two recorded poses
    Cycle {
        /// Seconds between moves
        #[arg(short, long, default_value_t = 15.0)]
        interval: f64,
        #[arg(short, long)]
        verbose: bool,
        /// Stop after this many moves
        #[arg(long)]
        cycles: Option<usize>,
    },
    /// Mirror a leader arm on the follower
    Teleop {
        #[arg(long)]
        leader_port: Option<String>,
        #[arg(long, default_value_t = so101_servo_tools::teleop::DEFAULT_FPS)]
        fps: u32,
    },
    /// Stream present positions through the background control loop
    Watch {
        #[arg(default_values_t = [1, 2, 3, 4, 5, 6])]
        ids: Vec<u8>,
        /// Milliseconds between bus reads
        #[arg(long, default_value_t = 10)]
        period_ms: u64,
        /// Seconds between printed snapshots
        #[arg(long, default_value_t = 1.0)]
        every: f64,
        /// Stop after this many printed snapshots
        #[arg(long)]
        count: Option<usize>,
    },
    /// Serve the browser control panel
    Serve {
        #[arg(long)]
        addr: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => ToolConfig::load_from_file(path)?,
        None => ToolConfig::default(),
    };
    if let Some(port) = &cli.port {
        cfg.port = port.clone();
    }
    if let Some(baudrate) = cli.baudrate {
        cfg.baudrate = baudrate;
    }
    if let Some(calibration) = &cli.calibration {
        cfg.calibration = Some(calibration.clone());
    }

    let tool = Tool { cfg, sim: cli.sim };
    tool.run(cli.command)
}

struct Tool {
    cfg: ToolConfig,
    sim: bool,
}

impl Tool {
    fn open(&self, port: &str) -> Result<DynTransport> {
        if self.sim {
            info!("using simulated SO-101 bus");
            return Ok(Box::new(SimTransport::so101()));
        }
        let transport = FeetechTransport::open(port, self.cfg.baudrate, self.cfg.timeout())
            .with_context(|| format!("failed to open {port}"))?;
        info!(port, baudrate = self.cfg.baudrate, "connected");
        Ok(Box::new(transport))
    }

    fn bus(&self) -> Result<ServoBus<DynTransport>> {
        Ok(ServoBus::new(self.open(&self.cfg.port)?, self.cfg.model))
    }

    fn calibration(&self) -> Result<Option<CalibrationTable>> {
        match &self.cfg.calibration {
            Some(path) => Ok(Some(load_calibration(path)?)),
            None => Ok(None),
        }
    }

    fn arm_on(&self, port: &str, calibration: Option<CalibrationTable>) -> Result<Arm<DynTransport>> {
        let bus = ServoBus::new(self.open(port)?, self.cfg.model);
        let mut arm = Arm::connect(bus, so101_motors(self.cfg.use_degrees), calibration)?;
        arm.configure()?;
        arm.set_torque(true)?;
        Ok(arm)
    }

    fn arm(&self) -> Result<Arm<DynTransport>> {
        self.arm_on(&self.cfg.port, self.calibration()?)
    }

    fn poll_config(&self) -> PollConfig {
        self.cfg.poll.into()
    }

    fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Scan { start, end } => self.scan(start, end),
            Command::Read { id, register } => {
                let mut bus = self.bus()?;
                let id = detect(&mut bus, id);
                let value = bus.read(register, id)?;
                println!("{register}: {value}");
                Ok(())
            }
            Command::Write { id, register, value, force } => {
                let mut bus = self.bus()?;
                let id = detect(&mut bus, id);
                let eeprom = bus.spec(register, id)?.area == MemoryArea::Eeprom;
                if force && eeprom {
                    bus.with_torque_disabled(id, |bus| bus.write(register, id, value))?;
                } else {
                    bus.write(register, id, value)?;
                }
                println!("{register}: {value} (readback {})", bus.read(register, id)?);
                Ok(())
            }
            Command::Params { ids } => {
                let mut bus = self.bus()?;
                for raw in ids {
                    let id = detect(&mut bus, raw);
                    println!("{}", DiagnosticSnapshot::capture(&mut bus, id));
                }
                Ok(())
            }
            Command::Diagnose { ids } => {
                let mut bus = self.bus()?;
                for raw in ids {
                    let id = detect(&mut bus, raw);
                    println!("{}", "=".repeat(70));
                    println!("{}", DiagnosticReport::run(&mut bus, id));
                }
                Ok(())
            }
            Command::Repair { ids, keep_limits } => self.repair(ids, keep_limits),
            Command::Move { id, delta, velocity, acceleration } => {
                let mut bus = self.bus()?;
                let id = detect(&mut bus, id);
                bus.enable_torque(id)?;
                let outcome =
                    move_relative(&mut bus, id, delta, velocity, acceleration, &self.poll_config())?;
                print_outcome(&outcome);
                Ok(())
            }
            Command::VelocityTest { id } => self.velocity_test(id),
            Command::Center => {
                let mut arm = self.arm()?;
                let goals = arm.send_action(&center_pose(arm.motors()))?;
                for (name, raw) in goals {
                    println!("{name:15} -> {raw}");
                }
                Ok(())
            }
            Command::Cycle { interval, verbose, cycles } => self.cycle(interval, verbose, cycles),
            Command::Teleop { leader_port, fps } => self.teleop(leader_port, fps),
            Command::Watch { ids, period_ms, every, count } => {
                self.watch(ids, period_ms, every, count)
            }
            Command::Serve { addr } => self.serve(addr),
        }
    }

    fn scan(&self, start: u8, end: u8) -> Result<()> {
        if start > end {
            bail!("empty ID range {start}..={end}");
        }
        let mut bus = self.bus()?;
        println!("Scanning IDs {start}..={end}...");
        let found = bus.scan(start..=end)?;
        for (id, number) in &found {
            let model = so101_servo_tools::ServoModel::from_model_number(*number)
                .map(|m| m.name())
                .unwrap_or("unknown");
            println!("  ID {id}: model {number} ({model})");
        }
        println!("Found {} motor(s)", found.len());
        Ok(())
    }

    fn repair(&self, ids: Vec<u8>, keep_limits: bool) -> Result<()> {
        if ids.is_empty() {
            bail!("name at least one motor ID to repair");
        }
        let plan = RepairPlan { full_position_range: !keep_limits, ..RepairPlan::default() };
        let mut bus = self.bus()?;
        for raw in ids {
            let id = detect(&mut bus, raw);
            let written = repair(&mut bus, id, &plan)
                .with_context(|| format!("repair of motor {id} failed"))?;
            println!("Motor {id}:");
            for (reg, value) in written {
                println!("  {:30} = {value} (readback {})", reg.name(), bus.read(reg, id)?);
            }
            let report = DiagnosticReport::run(&mut bus, id);
            for finding in &report.findings {
                println!("  {finding}");
            }
        }
        Ok(())
    }

    fn velocity_test(&self, id: u8) -> Result<()> {
        let mut bus = self.bus()?;
        let id = detect(&mut bus, id);
        let report = velocity_test(&mut bus, id, &self.poll_config())?;
        println!("TEST 1: move without Goal_Velocity");
        print_outcome(&report.without_velocity);
        for (velocity, outcome) in &report.with_velocity {
            println!("TEST: move with Goal_Velocity={velocity}");
            print_outcome(outcome);
        }
        println!("CONCLUSION: {}", report.verdict);
        Ok(())
    }

    fn cycle(&self, interval: f64, verbose: bool, cycles: Option<usize>) -> Result<()> {
        let interval = Cycler::interval_from_secs(interval)?;
        let mut arm = self.arm()?;
        let (first, second) = default_poses();
        let cycler = Cycler::new(first, second, interval)
            .verbose(verbose)
            .max_cycles(cycles);
        let stop = cycler.stop_flag();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;

        let count = cycler.run(&mut arm);
        println!("Completed {count} cycles");
        arm.disconnect(true)?;
        Ok(())
    }

    fn teleop(&self, leader_port: Option<String>, fps: u32) -> Result<()> {
        let leader_port = match leader_port.or_else(|| self.cfg.leader_port.clone()) {
            Some(port) => port,
            None if self.sim => String::from("sim"),
            None => bail!("no leader port, pass --leader-port or set leader_port"),
        };
        let calibration = self.calibration()?;
        let follower = self.arm_on(&self.cfg.port, calibration.clone())?;
        let leader = self.arm_on(&leader_port, calibration)?;

        let teleop = Teleop::new(fps);
        let stop = teleop.stop_flag();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
        let iterations = teleop.run(leader, follower)?;
        println!("Disconnected after {iterations} iterations");
        Ok(())
    }

    fn watch(&self, ids: Vec<u8>, period_ms: u64, every: f64, count: Option<usize>) -> Result<()> {
        let every = Duration::try_from_secs_f64(every)
            .with_context(|| format!("invalid snapshot interval {every}"))?;
        let mut bus = self.bus()?;
        let ids: Vec<MotorId> = ids.into_iter().map(|raw| detect(&mut bus, raw)).collect();
        let cfg = ControlLoopConfig {
            read_period: Duration::from_millis(period_ms.max(1)),
            ..ControlLoopConfig::default()
        };
        let handle = start_control_loop(bus, ids.clone(), cfg)?;
        for id in &ids {
            handle.push(MotorCommand::Probe { id: *id })?;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

        let mut printed = 0;
        while !stop.load(Ordering::SeqCst) && count.map_or(true, |max| printed < max) {
            thread::sleep(every);
            match handle.last_snapshot() {
                Ok(snap) => {
                    let line: Vec<String> = snap
                        .ids
                        .iter()
                        .zip(&snap.positions)
                        .map(|(id, pos)| format!("{id}:{pos:5}"))
                        .collect();
                    println!("[{:.3}] {}", snap.timestamp_s, line.join("  "));
                }
                Err(e) => warn!("no snapshot yet: {e}"),
            }
            printed += 1;
        }
        handle.close();
        Ok(())
    }

    fn serve(&self, addr: Option<String>) -> Result<()> {
        let addr = addr.unwrap_or_else(|| self.cfg.web_addr.clone());
        let addr = addr.parse().with_context(|| format!("invalid address {addr}"))?;
        let motors = so101_motors(self.cfg.use_degrees);
        let robot = match self.arm() {
            Ok(arm) => Some(arm),
            Err(e) => {
                error!("error initializing robot: {e:#}");
                None
            }
        };
        let state = AppState::new(&motors, robot);

        let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
        runtime.block_on(async move {
            web::center_on_start(&state).await;
            web::serve(state, addr).await
        })
    }
}

/// Reads the model number so the right control table is used; falls back to
/// the configured model when the motor does not answer.
fn detect(bus: &mut ServoBus<DynTransport>, raw: u8) -> MotorId {
    let id = MotorId(raw);
    if let Err(e) = bus.model_number(id) {
        warn!(id = raw, "could not identify model: {e}");
    }
    id
}

fn print_outcome(outcome: &PollOutcome) {
    for s in &outcome.samples {
        let current = s.current.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "  t={:5.2}s pos={:5} current={current:>4} moving={} status={:#04x}",
            s.at.as_secs_f64(),
            s.position,
            u8::from(s.moving),
            s.status
        );
    }
    println!(
        "  start={} target={} final={} (delta: {}) -> {}",
        outcome.start,
        outcome.target,
        outcome.final_position,
        outcome.delta(),
        if outcome.reached {
            "REACHED"
        } else if outcome.moved {
            "MOVED"
        } else {
            "NO MOVEMENT"
        }
    );
}
