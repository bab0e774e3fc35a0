//! SO-101 arm: six named joints on one servo bus.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::{
    bus::{MotorProbe, ServoBus},
    control_table::{OperatingMode, Register},
    conversion::{CalibrationTable, MotorCalibration, NormMode},
    error::MotorError,
    model::{MotorId, ServoModel},
    transport::MotorTransport,
};

pub const GRIPPER: &str = "gripper";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmMotor {
    pub name: String,
    pub id: MotorId,
    pub model: ServoModel,
    pub norm: NormMode,
}

impl ArmMotor {
    pub fn new(name: &str, id: u8, model: ServoModel, norm: NormMode) -> Self {
        Self { name: name.to_string(), id: MotorId(id), model, norm }
    }
}

/// The SO-101 joint layout. `use_degrees` selects `Degrees` over
/// `RangeM100To100` for the five arm joints; the gripper is always 0..100.
pub fn so101_motors(use_degrees: bool) -> Vec<ArmMotor> {
    let joint = if use_degrees { NormMode::Degrees } else { NormMode::RangeM100To100 };
    vec![
        ArmMotor::new("shoulder_pan", 1, ServoModel::Sts3215, joint),
        ArmMotor::new("shoulder_lift", 2, ServoModel::Sts3215, joint),
        ArmMotor::new("elbow_flex", 3, ServoModel::Sts3215, joint),
        ArmMotor::new("wrist_flex", 4, ServoModel::Sts3215, joint),
        ArmMotor::new("wrist_roll", 5, ServoModel::Sts3215, joint),
        ArmMotor::new(GRIPPER, 6, ServoModel::Sts3215, NormMode::Range0To100),
    ]
}

/// Joints at 0, gripper half open.
pub fn center_pose(motors: &[ArmMotor]) -> BTreeMap<String, f64> {
    motors
        .iter()
        .map(|m| {
            let value = if m.norm == NormMode::Range0To100 { 50.0 } else { 0.0 };
            (m.name.clone(), value)
        })
        .collect()
}

/// Strips the `.pos` suffix used in action dictionaries.
fn motor_key(key: &str) -> &str {
    key.strip_suffix(".pos").unwrap_or(key)
}

pub struct Arm<T: MotorTransport> {
    bus: ServoBus<T>,
    motors: Vec<ArmMotor>,
    calibration: CalibrationTable,
}

impl<T: MotorTransport> Arm<T> {
    /// Registers the motor models on the bus and checks that every motor
    /// answers. Motors without calibration fall back to the full encoder
    /// range.
    pub fn connect(
        bus: ServoBus<T>,
        motors: Vec<ArmMotor>,
        calibration: Option<CalibrationTable>,
    ) -> Result<Self, MotorError> {
        let mut bus = motors.iter().fold(bus, |bus, m| bus.with_motor(m.id, m.model));
        let ids: Vec<MotorId> = motors.iter().map(|m| m.id).collect();
        let missing = bus.transport_mut().scan_missing_ids(&ids)?;
        if !missing.is_empty() {
            return Err(MotorError::MissingMotors(missing.into_iter().map(|m| m.0).collect()));
        }

        let mut table = calibration.unwrap_or_default();
        for m in &motors {
            match table.get(&m.name) {
                Some(cal) if cal.id != m.id.0 => {
                    return Err(MotorError::Calibration(format!(
                        "{} is calibrated as ID {} but configured as ID {}",
                        m.name, cal.id, m.id
                    )));
                }
                Some(_) => {}
                None => {
                    warn!(motor = %m.name, "no calibration, using the full encoder range");
                    table.insert(m.name.clone(), MotorCalibration::full_range(m.id.0, m.model));
                }
            }
        }
        info!(motors = motors.len(), "arm connected");
        Ok(Self { bus, motors, calibration: table })
    }

    pub fn motors(&self) -> &[ArmMotor] {
        &self.motors
    }

    pub fn motor(&self, name: &str) -> Result<&ArmMotor, MotorError> {
        let name = motor_key(name);
        self.motors
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| MotorError::UnknownMotor(name.to_string()))
    }

    pub fn bus_mut(&mut self) -> &mut ServoBus<T> {
        &mut self.bus
    }

    pub fn calibration(&self, name: &str) -> Result<&MotorCalibration, MotorError> {
        self.calibration
            .get(motor_key(name))
            .ok_or_else(|| MotorError::UnknownMotor(name.to_string()))
    }

    pub fn to_raw(&self, name: &str, value: f64) -> Result<i32, MotorError> {
        let motor = self.motor(name)?;
        self.calibration(&motor.name)?.unnormalize(motor.norm, motor.model, value)
    }

    pub fn from_raw(&self, name: &str, raw: i32) -> Result<f64, MotorError> {
        let motor = self.motor(name)?;
        self.calibration(&motor.name)?.normalize(motor.norm, motor.model, raw)
    }

    /// Position mode with the SO-101 gains. Registers the model lacks are
    /// skipped.
    pub fn configure(&mut self) -> Result<(), MotorError> {
        let motors = self.motors.clone();
        for m in &motors {
            let mut settings = vec![
                (Register::ReturnDelayTime, 0),
                (Register::OperatingMode, OperatingMode::Position as i32),
                (Register::PCoefficient, 16),
                (Register::ICoefficient, 0),
                (Register::DCoefficient, 32),
                (Register::Acceleration, 254),
                (Register::GoalVelocity, 0),
            ];
            if m.name == GRIPPER {
                settings.extend([
                    (Register::MaxTorqueLimit, 500),
                    (Register::ProtectionCurrent, 250),
                    (Register::OverloadTorque, 25),
                ]);
            }
            self.bus.with_torque_disabled(m.id, |bus| {
                for (reg, value) in &settings {
                    if bus.supports(*reg, m.id) {
                        bus.write(*reg, m.id, *value)?;
                    }
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    pub fn set_torque(&mut self, enable: bool) -> Result<(), MotorError> {
        let ids: Vec<MotorId> = self.motors.iter().map(|m| m.id).collect();
        for id in ids {
            if enable {
                self.bus.enable_torque(id)?;
            } else {
                self.bus.disable_torque(id)?;
            }
        }
        Ok(())
    }

    /// Writes Goal_Position for every motor named in `action`. Keys may carry
    /// the `.pos` suffix. Returns the raw goals that were sent.
    pub fn send_action(
        &mut self,
        action: &BTreeMap<String, f64>,
    ) -> Result<BTreeMap<String, i32>, MotorError> {
        let mut goals = BTreeMap::new();
        for (key, value) in action {
            let motor = self.motor(key)?;
            goals.insert(motor.name.clone(), self.to_raw(key, *value)?);
        }
        let mut by_model: BTreeMap<&'static str, Vec<(MotorId, i32)>> = BTreeMap::new();
        for (name, raw) in &goals {
            let motor = self.motor(name)?;
            by_model.entry(motor.model.name()).or_default().push((motor.id, *raw));
        }
        for values in by_model.values() {
            self.bus.sync_write(Register::GoalPosition, values)?;
        }
        Ok(goals)
    }

    /// Present_Position of every motor, normalised.
    pub fn observation(&mut self) -> Result<BTreeMap<String, f64>, MotorError> {
        let ids: Vec<MotorId> = self.motors.iter().map(|m| m.id).collect();
        let raw = self.bus.sync_read(Register::PresentPosition, &ids)?;
        let names: Vec<String> = self.motors.iter().map(|m| m.name.clone()).collect();
        names
            .into_iter()
            .zip(raw)
            .map(|(name, r)| self.from_raw(&name, r).map(|v| (name, v)))
            .collect()
    }

    pub fn probe(&mut self, name: &str) -> Result<MotorProbe, MotorError> {
        let id = self.motor(name)?.id;
        self.bus.probe(id)
    }

    /// Optionally releases torque, then hands the transport back. Every
    /// motor is tried even when one fails; the first failure is returned.
    pub fn disconnect(mut self, disable_torque: bool) -> Result<T, MotorError> {
        if disable_torque {
            let mut first_err = None;
            for id in self.motors.iter().map(|m| m.id).collect::<Vec<_>>() {
                if let Err(e) = self.bus.disable_torque(id) {
                    warn!(id = id.0, "could not disable torque: {e}");
                    first_err.get_or_insert(e);
                }
            }
            if let Some(e) = first_err {
                return Err(e);
            }
        }
        info!("arm disconnected");
        Ok(self.bus.into_transport())
    }
}
