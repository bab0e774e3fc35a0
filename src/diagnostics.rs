//! Parameter dumps, heuristic diagnosis of motors that refuse to move, and
//! the matching repair sequence.

use std::{collections::BTreeMap, fmt};

use tracing::{info, warn};

use crate::{
    bus::ServoBus,
    control_table::{OperatingMode, Register},
    error::MotorError,
    model::{MotorId, ServoModel},
    transport::MotorTransport,
};

/// Registers captured by a full parameter check.
pub const DIAGNOSTIC_REGISTERS: &[Register] = &[
    Register::Lock,
    Register::TorqueEnable,
    Register::TorqueLimit,
    Register::MaxTorqueLimit,
    Register::ProtectionCurrent,
    Register::ProtectiveTorque,
    Register::ProtectionTime,
    Register::OverloadTorque,
    Register::OverCurrentProtectionTime,
    Register::MinPositionLimit,
    Register::MaxPositionLimit,
    Register::PresentPosition,
    Register::GoalPosition,
    Register::PresentCurrent,
    Register::PresentVoltage,
    Register::MinVoltageLimit,
    Register::MaxVoltageLimit,
    Register::PresentTemperature,
    Register::MaxTemperatureLimit,
    Register::PresentLoad,
    Register::Status,
    Register::Moving,
    Register::OperatingMode,
    Register::UnloadingCondition,
    Register::LedAlarmCondition,
    Register::Acceleration,
    Register::GoalVelocity,
    Register::GoalTime,
    Register::PCoefficient,
    Register::DCoefficient,
    Register::ICoefficient,
    Register::MinimumStartupForce,
];

/// Fallback voltage window for a 12 V supply when the limit registers are
/// unreadable or zero.
const UNDERVOLTAGE_V: f64 = 10.0;
const OVERVOLTAGE_V: f64 = 12.6;
const OVERHEAT_C: i32 = 70;
const HIGH_STARTUP_FORCE: i32 = 100;

/// Bits of the `Status` register.
pub const STATUS_BITS: &[(u8, &str)] = &[
    (0x01, "voltage error"),
    (0x02, "position sensor error"),
    (0x04, "temperature error"),
    (0x08, "over-current error"),
    (0x20, "overload error"),
    (0x40, "driver error"),
    (0x80, "EEPROM error"),
];

pub fn describe_status(status: i32) -> Vec<&'static str> {
    STATUS_BITS
        .iter()
        .filter(|(bit, _)| status & i32::from(*bit) != 0)
        .map(|(_, name)| *name)
        .collect()
}

#[derive(Debug, Clone)]
pub struct DiagnosticSnapshot {
    pub id: MotorId,
    pub model: ServoModel,
    pub values: BTreeMap<Register, Result<i32, MotorError>>,
}

impl DiagnosticSnapshot {
    /// Reads every diagnostic register the model has. Read errors are kept
    /// per register.
    pub fn capture<T: MotorTransport>(bus: &mut ServoBus<T>, id: MotorId) -> Self {
        let model = bus.model(id);
        let registers: Vec<Register> = DIAGNOSTIC_REGISTERS
            .iter()
            .copied()
            .filter(|r| model.register(*r).is_some())
            .collect();
        let values = bus.read_many(&registers, id).into_iter().collect();
        Self { id, model, values }
    }

    pub fn get(&self, register: Register) -> Option<i32> {
        self.values.get(&register).and_then(|v| v.as_ref().ok().copied())
    }

    pub fn voltage(&self) -> Option<f64> {
        self.get(Register::PresentVoltage).map(|v| f64::from(v) / 10.0)
    }
}

impl fmt::Display for DiagnosticSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Parameter values for motor {} ({}):", self.id, self.model)?;
        for (reg, value) in &self.values {
            match value {
                Ok(v) => writeln!(f, "  {:30}: {v}", reg.name())?,
                Err(e) => writeln!(f, "  {:30}: ERROR - {e}", reg.name())?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    TorqueDisabled,
    LockEngaged,
    WrongOperatingMode(i32),
    ZeroTorqueLimit(Register),
    NoCurrent,
    StatusErrors(i32),
    Undervoltage { millivolts: i32, limit_mv: i32 },
    Overvoltage { millivolts: i32, limit_mv: i32 },
    Overheating { celsius: i32, limit: i32 },
    ZeroGoalVelocity,
    ZeroAcceleration,
    HighStartupForce(i32),
    CollapsedPositionLimits { min: i32, max: i32 },
    GoalOutsideLimits { goal: i32, min: i32, max: i32 },
    Unreadable(Register),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub severity: Severity,
    pub issue: Issue,
}

impl Finding {
    fn new(severity: Severity, issue: Issue) -> Self {
        Self { severity, issue }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.severity)?;
        match &self.issue {
            Issue::TorqueDisabled => write!(f, "Torque_Enable=0: the motor will neither hold nor move"),
            Issue::LockEngaged => write!(f, "Lock=1: EEPROM is locked, likely prevents movement after parameter changes"),
            Issue::WrongOperatingMode(m) => write!(
                f,
                "Operating_Mode={m} ({}), position commands need mode 0",
                OperatingMode::label(*m)
            ),
            Issue::ZeroTorqueLimit(r) => write!(f, "{r}=0: the motor cannot produce any torque"),
            Issue::NoCurrent => write!(f, "Present_Current=0 with torque on: no power reaches the windings"),
            Issue::StatusErrors(s) => write!(f, "Status={s:#04x}: {}", describe_status(*s).join(", ")),
            Issue::Undervoltage { millivolts, limit_mv } => write!(
                f,
                "UNDERVOLTAGE: {:.1}V below {:.1}V",
                f64::from(*millivolts) / 1000.0,
                f64::from(*limit_mv) / 1000.0
            ),
            Issue::Overvoltage { millivolts, limit_mv } => write!(
                f,
                "OVERVOLTAGE: {:.1}V above {:.1}V",
                f64::from(*millivolts) / 1000.0,
                f64::from(*limit_mv) / 1000.0
            ),
            Issue::Overheating { celsius, limit } => write!(f, "OVERHEATING: {celsius}°C (limit {limit}°C)"),
            Issue::ZeroGoalVelocity => write!(f, "Goal_Velocity=0: no speed set, try writing it before Goal_Position"),
            Issue::ZeroAcceleration => write!(f, "Acceleration=0: no acceleration ramp configured"),
            Issue::HighStartupForce(v) => write!(f, "Minimum_Startup_Force={v} is high and may prevent small moves"),
            Issue::CollapsedPositionLimits { min, max } => {
                write!(f, "Min_Position_Limit={min} >= Max_Position_Limit={max}: no room to move")
            }
            Issue::GoalOutsideLimits { goal, min, max } => {
                write!(f, "Goal_Position={goal} outside limits {min}..={max}")
            }
            Issue::Unreadable(r) => write!(f, "{r} could not be read"),
        }
    }
}

/// Heuristic diagnosis of a captured snapshot, most severe first.
pub fn diagnose(snapshot: &DiagnosticSnapshot) -> Vec<Finding> {
    use Issue::*;
    use Severity::{Error, Info, Warning};

    let get = |r| snapshot.get(r);
    let mut out = Vec::new();

    for (reg, value) in &snapshot.values {
        if value.is_err() {
            out.push(Finding::new(Warning, Unreadable(*reg)));
        }
    }

    let torque_on = get(Register::TorqueEnable) == Some(1);
    if get(Register::TorqueEnable) == Some(0) {
        out.push(Finding::new(Error, TorqueDisabled));
    }
    if get(Register::Lock) == Some(1) {
        out.push(Finding::new(Warning, LockEngaged));
    }
    if let Some(mode) = get(Register::OperatingMode) {
        if mode != OperatingMode::Position as i32 {
            out.push(Finding::new(Error, WrongOperatingMode(mode)));
        }
    }
    for reg in [Register::TorqueLimit, Register::MaxTorqueLimit] {
        if get(reg) == Some(0) {
            out.push(Finding::new(Error, ZeroTorqueLimit(reg)));
        }
    }
    if torque_on && get(Register::PresentCurrent) == Some(0) {
        out.push(Finding::new(Warning, NoCurrent));
    }
    if let Some(status) = get(Register::Status) {
        if status != 0 {
            out.push(Finding::new(Error, StatusErrors(status)));
        }
    }

    if let Some(v) = get(Register::PresentVoltage) {
        let mv = v * 100;
        let min_mv = get(Register::MinVoltageLimit)
            .filter(|l| *l > 0)
            .map(|l| l * 100)
            .unwrap_or((UNDERVOLTAGE_V * 1000.0) as i32);
        let max_mv = get(Register::MaxVoltageLimit)
            .filter(|l| *l > 0)
            .map(|l| l * 100)
            .unwrap_or((OVERVOLTAGE_V * 1000.0) as i32);
        if mv < min_mv {
            out.push(Finding::new(Error, Undervoltage { millivolts: mv, limit_mv: min_mv }));
        } else if mv > max_mv {
            out.push(Finding::new(Error, Overvoltage { millivolts: mv, limit_mv: max_mv }));
        }
    }

    if let Some(t) = get(Register::PresentTemperature) {
        let limit = get(Register::MaxTemperatureLimit)
            .filter(|l| *l > 0)
            .map(|l| l.min(OVERHEAT_C))
            .unwrap_or(OVERHEAT_C);
        if t > limit {
            out.push(Finding::new(Error, Overheating { celsius: t, limit }));
        }
    }

    if get(Register::GoalVelocity) == Some(0) {
        out.push(Finding::new(Info, ZeroGoalVelocity));
    }
    if get(Register::Acceleration) == Some(0) {
        out.push(Finding::new(Info, ZeroAcceleration));
    }
    if let Some(force) = get(Register::MinimumStartupForce) {
        if force > HIGH_STARTUP_FORCE {
            out.push(Finding::new(Warning, HighStartupForce(force)));
        }
    }

    if let (Some(min), Some(max)) = (get(Register::MinPositionLimit), get(Register::MaxPositionLimit)) {
        // 0/0 disables the limits (multi-turn setups).
        if min >= max && !(min == 0 && max == 0) {
            out.push(Finding::new(Warning, CollapsedPositionLimits { min, max }));
        } else if let Some(goal) = get(Register::GoalPosition) {
            if max > min && (goal < min || goal > max) {
                out.push(Finding::new(Warning, GoalOutsideLimits { goal, min, max }));
            }
        }
    }

    out.sort_by(|a, b| b.severity.cmp(&a.severity));
    out
}

#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    pub snapshot: DiagnosticSnapshot,
    pub findings: Vec<Finding>,
}

impl DiagnosticReport {
    pub fn run<T: MotorTransport>(bus: &mut ServoBus<T>, id: MotorId) -> Self {
        let snapshot = DiagnosticSnapshot::capture(bus, id);
        let findings = diagnose(&snapshot);
        Self { snapshot, findings }
    }

    pub fn worst(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    pub fn has(&self, pred: impl Fn(&Issue) -> bool) -> bool {
        self.findings.iter().any(|f| pred(&f.issue))
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.snapshot)?;
        if let Some(v) = self.snapshot.voltage() {
            writeln!(f, "Voltage: {v:.1}V")?;
        }
        if let Some(t) = self.snapshot.get(Register::PresentTemperature) {
            writeln!(f, "Temperature: {t}°C")?;
        }
        writeln!(f, "Analysis:")?;
        if self.findings.is_empty() {
            writeln!(f, "  no issues found")?;
        }
        for finding in &self.findings {
            writeln!(f, "  {finding}")?;
        }
        Ok(())
    }
}

/// EEPROM and RAM values written by [`repair`]. `None` leaves a register
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPlan {
    pub max_torque_limit: Option<i32>,
    pub torque_limit: Option<i32>,
    pub protection_current: Option<i32>,
    pub acceleration: Option<i32>,
    pub operating_mode: Option<OperatingMode>,
    pub full_position_range: bool,
    pub minimum_startup_force: Option<i32>,
}

impl Default for RepairPlan {
    fn default() -> Self {
        Self {
            max_torque_limit: Some(1000),
            torque_limit: Some(1000),
            protection_current: Some(500),
            acceleration: Some(50),
            operating_mode: Some(OperatingMode::Position),
            full_position_range: true,
            minimum_startup_force: Some(0),
        }
    }
}

impl RepairPlan {
    /// Ordered `(register, value)` writes for a motor of `model`.
    pub fn writes(&self, model: ServoModel) -> Vec<(Register, i32)> {
        let mut out = Vec::new();
        if let Some(v) = self.max_torque_limit {
            out.push((Register::MaxTorqueLimit, v));
        }
        if let Some(v) = self.torque_limit {
            out.push((Register::TorqueLimit, v));
        }
        if let Some(v) = self.protection_current {
            out.push((Register::ProtectionCurrent, v));
        }
        if let Some(v) = self.acceleration {
            out.push((Register::Acceleration, v));
        }
        if let Some(mode) = self.operating_mode {
            out.push((Register::OperatingMode, mode as i32));
        }
        if self.full_position_range {
            out.push((Register::MinPositionLimit, 0));
            out.push((Register::MaxPositionLimit, model.resolution() as i32 - 1));
        }
        if let Some(v) = self.minimum_startup_force {
            out.push((Register::MinimumStartupForce, v));
        }
        out
    }
}

/// Applies `plan` with torque disabled, re-enables torque and returns the
/// registers actually written. Registers the model lacks are skipped.
pub fn repair<T: MotorTransport>(
    bus: &mut ServoBus<T>,
    id: MotorId,
    plan: &RepairPlan,
) -> Result<Vec<(Register, i32)>, MotorError> {
    let writes = plan.writes(bus.model(id));
    bus.with_torque_disabled(id, |bus| {
        let mut done = Vec::new();
        for (reg, value) in writes {
            if !bus.supports(reg, id) {
                warn!(id = id.0, %reg, "register not present on this model, skipped");
                continue;
            }
            bus.write(reg, id, value)?;
            info!(id = id.0, %reg, value, "written");
            done.push((reg, value));
        }
        Ok(done)
    })
}
