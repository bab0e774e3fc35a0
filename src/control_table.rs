//! Per-model control tables for Feetech STS and SCS series servos.
//!
//! Registers below address 40 live in EEPROM and only accept writes while
//! torque is disabled and `Lock` is 0. Everything from `Torque_Enable` on is
//! RAM and resets on power cycle.

use std::{fmt, str::FromStr};

use crate::{error::MotorError, model::ServoModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    FirmwareMajorVersion,
    FirmwareMinorVersion,
    ModelNumber,
    Id,
    BaudRate,
    ReturnDelayTime,
    ResponseStatusLevel,
    MinPositionLimit,
    MaxPositionLimit,
    MaxTemperatureLimit,
    MaxVoltageLimit,
    MinVoltageLimit,
    MaxTorqueLimit,
    Phase,
    UnloadingCondition,
    LedAlarmCondition,
    PCoefficient,
    DCoefficient,
    ICoefficient,
    MinimumStartupForce,
    CwDeadZone,
    CcwDeadZone,
    ProtectionCurrent,
    AngularResolution,
    HomingOffset,
    OperatingMode,
    ProtectiveTorque,
    ProtectionTime,
    OverloadTorque,
    VelocityLoopP,
    OverCurrentProtectionTime,
    VelocityLoopI,
    TorqueEnable,
    Acceleration,
    GoalPosition,
    GoalTime,
    GoalVelocity,
    TorqueLimit,
    Lock,
    PresentPosition,
    PresentVelocity,
    PresentLoad,
    PresentVoltage,
    PresentTemperature,
    Status,
    Moving,
    PresentCurrent,
}

const NAMES: &[(Register, &str)] = &[
    (Register::FirmwareMajorVersion, "Firmware_Major_Version"),
    (Register::FirmwareMinorVersion, "Firmware_Minor_Version"),
    (Register::ModelNumber, "Model_Number"),
    (Register::Id, "ID"),
    (Register::BaudRate, "Baud_Rate"),
    (Register::ReturnDelayTime, "Return_Delay_Time"),
    (Register::ResponseStatusLevel, "Response_Status_Level"),
    (Register::MinPositionLimit, "Min_Position_Limit"),
    (Register::MaxPositionLimit, "Max_Position_Limit"),
    (Register::MaxTemperatureLimit, "Max_Temperature_Limit"),
    (Register::MaxVoltageLimit, "Max_Voltage_Limit"),
    (Register::MinVoltageLimit, "Min_Voltage_Limit"),
    (Register::MaxTorqueLimit, "Max_Torque_Limit"),
    (Register::Phase, "Phase"),
    (Register::UnloadingCondition, "Unloading_Condition"),
    (Register::LedAlarmCondition, "LED_Alarm_Condition"),
    (Register::PCoefficient, "P_Coefficient"),
    (Register::DCoefficient, "D_Coefficient"),
    (Register::ICoefficient, "I_Coefficient"),
    (Register::MinimumStartupForce, "Minimum_Startup_Force"),
    (Register::CwDeadZone, "CW_Dead_Zone"),
    (Register::CcwDeadZone, "CCW_Dead_Zone"),
    (Register::ProtectionCurrent, "Protection_Current"),
    (Register::AngularResolution, "Angular_Resolution"),
    (Register::HomingOffset, "Homing_Offset"),
    (Register::OperatingMode, "Operating_Mode"),
    (Register::ProtectiveTorque, "Protective_Torque"),
    (Register::ProtectionTime, "Protection_Time"),
    (Register::OverloadTorque, "Overload_Torque"),
    (Register::VelocityLoopP, "Velocity_closed_loop_P_proportional_coefficient"),
    (Register::OverCurrentProtectionTime, "Over_Current_Protection_Time"),
    (Register::VelocityLoopI, "Velocity_closed_loop_I_integral_coefficient"),
    (Register::TorqueEnable, "Torque_Enable"),
    (Register::Acceleration, "Acceleration"),
    (Register::GoalPosition, "Goal_Position"),
    (Register::GoalTime, "Goal_Time"),
    (Register::GoalVelocity, "Goal_Velocity"),
    (Register::TorqueLimit, "Torque_Limit"),
    (Register::Lock, "Lock"),
    (Register::PresentPosition, "Present_Position"),
    (Register::PresentVelocity, "Present_Velocity"),
    (Register::PresentLoad, "Present_Load"),
    (Register::PresentVoltage, "Present_Voltage"),
    (Register::PresentTemperature, "Present_Temperature"),
    (Register::Status, "Status"),
    (Register::Moving, "Moving"),
    (Register::PresentCurrent, "Present_Current"),
];

impl Register {
    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(r, _)| *r == self)
            .map(|(_, n)| *n)
            .unwrap_or("?")
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = MotorError;

    /// Accepts the vendor names case-insensitively; `Running_Time` is the
    /// SCS alias of `Goal_Time`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if wanted.eq_ignore_ascii_case("Running_Time") {
            return Ok(Register::GoalTime);
        }
        NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(wanted))
            .map(|(r, _)| *r)
            .ok_or_else(|| MotorError::UnknownRegister {
                register: wanted.to_string(),
                model: "any".to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryArea {
    Eeprom,
    Ram,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    pub register: Register,
    pub address: u8,
    pub width: u8,
    pub area: MemoryArea,
    /// Bit carrying the sign for sign-magnitude encoded registers.
    pub sign_bit: Option<u8>,
}

impl RegisterSpec {
    const fn new(register: Register, address: u8, width: u8, area: MemoryArea) -> Self {
        Self { register, address, width, area, sign_bit: None }
    }

    const fn signed(self, bit: u8) -> Self {
        Self { sign_bit: Some(bit), ..self }
    }

    pub fn is_eeprom(&self) -> bool {
        self.area == MemoryArea::Eeprom
    }

    /// Largest magnitude the register can hold.
    pub fn max_magnitude(&self) -> u32 {
        match self.sign_bit {
            Some(bit) => (1u32 << bit) - 1,
            None => (1u32 << (8 * u32::from(self.width))) - 1,
        }
    }
}

use MemoryArea::{Eeprom, Ram, ReadOnly};
use Register as R;

const STS_TABLE: &[RegisterSpec] = &[
    RegisterSpec::new(R::FirmwareMajorVersion, 0, 1, ReadOnly),
    RegisterSpec::new(R::FirmwareMinorVersion, 1, 1, ReadOnly),
    RegisterSpec::new(R::ModelNumber, 3, 2, ReadOnly),
    RegisterSpec::new(R::Id, 5, 1, Eeprom),
    RegisterSpec::new(R::BaudRate, 6, 1, Eeprom),
    RegisterSpec::new(R::ReturnDelayTime, 7, 1, Eeprom),
    RegisterSpec::new(R::ResponseStatusLevel, 8, 1, Eeprom),
    RegisterSpec::new(R::MinPositionLimit, 9, 2, Eeprom),
    RegisterSpec::new(R::MaxPositionLimit, 11, 2, Eeprom),
    RegisterSpec::new(R::MaxTemperatureLimit, 13, 1, Eeprom),
    RegisterSpec::new(R::MaxVoltageLimit, 14, 1, Eeprom),
    RegisterSpec::new(R::MinVoltageLimit, 15, 1, Eeprom),
    RegisterSpec::new(R::MaxTorqueLimit, 16, 2, Eeprom),
    RegisterSpec::new(R::Phase, 18, 1, Eeprom),
    RegisterSpec::new(R::UnloadingCondition, 19, 1, Eeprom),
    RegisterSpec::new(R::LedAlarmCondition, 20, 1, Eeprom),
    RegisterSpec::new(R::PCoefficient, 21, 1, Eeprom),
    RegisterSpec::new(R::DCoefficient, 22, 1, Eeprom),
    RegisterSpec::new(R::ICoefficient, 23, 1, Eeprom),
    RegisterSpec::new(R::MinimumStartupForce, 24, 2, Eeprom),
    RegisterSpec::new(R::CwDeadZone, 26, 1, Eeprom),
    RegisterSpec::new(R::CcwDeadZone, 27, 1, Eeprom),
    RegisterSpec::new(R::ProtectionCurrent, 28, 2, Eeprom),
    RegisterSpec::new(R::AngularResolution, 30, 1, Eeprom),
    RegisterSpec::new(R::HomingOffset, 31, 2, Eeprom).signed(11),
    RegisterSpec::new(R::OperatingMode, 33, 1, Eeprom),
    RegisterSpec::new(R::ProtectiveTorque, 34, 1, Eeprom),
    RegisterSpec::new(R::ProtectionTime, 35, 1, Eeprom),
    RegisterSpec::new(R::OverloadTorque, 36, 1, Eeprom),
    RegisterSpec::new(R::VelocityLoopP, 37, 1, Eeprom),
    RegisterSpec::new(R::OverCurrentProtectionTime, 38, 1, Eeprom),
    RegisterSpec::new(R::VelocityLoopI, 39, 1, Eeprom),
    RegisterSpec::new(R::TorqueEnable, 40, 1, Ram),
    RegisterSpec::new(R::Acceleration, 41, 1, Ram),
    RegisterSpec::new(R::GoalPosition, 42, 2, Ram),
    RegisterSpec::new(R::GoalTime, 44, 2, Ram),
    RegisterSpec::new(R::GoalVelocity, 46, 2, Ram).signed(15),
    RegisterSpec::new(R::TorqueLimit, 48, 2, Ram),
    RegisterSpec::new(R::Lock, 55, 1, Ram),
    RegisterSpec::new(R::PresentPosition, 56, 2, ReadOnly),
    RegisterSpec::new(R::PresentVelocity, 58, 2, ReadOnly).signed(15),
    RegisterSpec::new(R::PresentLoad, 60, 2, ReadOnly).signed(10),
    RegisterSpec::new(R::PresentVoltage, 62, 1, ReadOnly),
    RegisterSpec::new(R::PresentTemperature, 63, 1, ReadOnly),
    RegisterSpec::new(R::Status, 65, 1, ReadOnly),
    RegisterSpec::new(R::Moving, 66, 1, ReadOnly),
    RegisterSpec::new(R::PresentCurrent, 69, 2, ReadOnly),
];

const SCS_TABLE: &[RegisterSpec] = &[
    RegisterSpec::new(R::FirmwareMajorVersion, 0, 1, ReadOnly),
    RegisterSpec::new(R::FirmwareMinorVersion, 1, 1, ReadOnly),
    RegisterSpec::new(R::ModelNumber, 3, 2, ReadOnly),
    RegisterSpec::new(R::Id, 5, 1, Eeprom),
    RegisterSpec::new(R::BaudRate, 6, 1, Eeprom),
    RegisterSpec::new(R::ReturnDelayTime, 7, 1, Eeprom),
    RegisterSpec::new(R::ResponseStatusLevel, 8, 1, Eeprom),
    RegisterSpec::new(R::MinPositionLimit, 9, 2, Eeprom),
    RegisterSpec::new(R::MaxPositionLimit, 11, 2, Eeprom),
    RegisterSpec::new(R::MaxTemperatureLimit, 13, 1, Eeprom),
    RegisterSpec::new(R::MaxVoltageLimit, 14, 1, Eeprom),
    RegisterSpec::new(R::MinVoltageLimit, 15, 1, Eeprom),
    RegisterSpec::new(R::MaxTorqueLimit, 16, 2, Eeprom),
    RegisterSpec::new(R::Phase, 18, 1, Eeprom),
    RegisterSpec::new(R::UnloadingCondition, 19, 1, Eeprom),
    RegisterSpec::new(R::LedAlarmCondition, 20, 1, Eeprom),
    RegisterSpec::new(R::PCoefficient, 21, 1, Eeprom),
    RegisterSpec::new(R::DCoefficient, 22, 1, Eeprom),
    RegisterSpec::new(R::ICoefficient, 23, 1, Eeprom),
    RegisterSpec::new(R::MinimumStartupForce, 24, 2, Eeprom),
    RegisterSpec::new(R::CwDeadZone, 26, 1, Eeprom),
    RegisterSpec::new(R::CcwDeadZone, 27, 1, Eeprom),
    RegisterSpec::new(R::ProtectiveTorque, 37, 1, Eeprom),
    RegisterSpec::new(R::ProtectionTime, 38, 1, Eeprom),
    RegisterSpec::new(R::TorqueEnable, 40, 1, Ram),
    RegisterSpec::new(R::Acceleration, 41, 1, Ram),
    RegisterSpec::new(R::GoalPosition, 42, 2, Ram),
    RegisterSpec::new(R::GoalTime, 44, 2, Ram),
    RegisterSpec::new(R::GoalVelocity, 46, 2, Ram).signed(15),
    RegisterSpec::new(R::Lock, 48, 1, Ram),
    RegisterSpec::new(R::PresentPosition, 56, 2, ReadOnly),
    RegisterSpec::new(R::PresentVelocity, 58, 2, ReadOnly).signed(15),
    RegisterSpec::new(R::PresentLoad, 60, 2, ReadOnly).signed(10),
    RegisterSpec::new(R::PresentVoltage, 62, 1, ReadOnly),
    RegisterSpec::new(R::PresentTemperature, 63, 1, ReadOnly),
    RegisterSpec::new(R::Status, 65, 1, ReadOnly),
    RegisterSpec::new(R::Moving, 66, 1, ReadOnly),
];

impl ServoModel {
    pub fn registers(self) -> &'static [RegisterSpec] {
        match self {
            ServoModel::Sts3215 => STS_TABLE,
            ServoModel::Scs0009 => SCS_TABLE,
        }
    }

    pub fn register(self, register: Register) -> Option<RegisterSpec> {
        self.registers().iter().copied().find(|s| s.register == register)
    }

    /// Like [`ServoModel::register`] but fails with `UnknownRegister`.
    pub fn spec(self, register: Register) -> Result<RegisterSpec, MotorError> {
        self.register(register).ok_or_else(|| MotorError::UnknownRegister {
            register: register.name().to_string(),
            model: self.name().to_string(),
        })
    }

    /// Register found at `address`, if any.
    pub fn register_at(self, address: u8) -> Option<RegisterSpec> {
        self.registers().iter().copied().find(|s| s.address == address)
    }
}

/// Values of `Operating_Mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
    Pwm = 2,
    Step = 3,
}

impl OperatingMode {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(OperatingMode::Position),
            1 => Some(OperatingMode::Velocity),
            2 => Some(OperatingMode::Pwm),
            3 => Some(OperatingMode::Step),
            _ => None,
        }
    }

    pub fn label(raw: i32) -> &'static str {
        match Self::from_raw(raw) {
            Some(OperatingMode::Position) => "Position",
            Some(OperatingMode::Velocity) => "Velocity",
            Some(OperatingMode::Pwm) => "PWM",
            Some(OperatingMode::Step) => "Step",
            None => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back() {
        for (reg, name) in NAMES {
            assert_eq!(name.parse::<Register>().unwrap(), *reg);
        }
        assert_eq!("goal_position".parse::<Register>().unwrap(), Register::GoalPosition);
        assert_eq!("Running_Time".parse::<Register>().unwrap(), Register::GoalTime);
        assert!("Warp_Drive".parse::<Register>().is_err());
    }

    #[test]
    fn lock_address_differs_between_series() {
        assert_eq!(ServoModel::Sts3215.register(Register::Lock).unwrap().address, 55);
        assert_eq!(ServoModel::Scs0009.register(Register::Lock).unwrap().address, 48);
        assert!(ServoModel::Scs0009.register(Register::OperatingMode).is_none());
    }

    #[test]
    fn eeprom_area_is_below_torque_enable() {
        for model in [ServoModel::Sts3215, ServoModel::Scs0009] {
            for spec in model.registers() {
                if spec.is_eeprom() {
                    assert!(spec.address < 40, "{} at {}", spec.register, spec.address);
                }
            }
        }
    }

    #[test]
    fn magnitude_limits() {
        let goal_vel = ServoModel::Sts3215.spec(Register::GoalVelocity).unwrap();
        assert_eq!(goal_vel.max_magnitude(), 0x7FFF);
        let lock = ServoModel::Sts3215.spec(Register::Lock).unwrap();
        assert_eq!(lock.max_magnitude(), 255);
        let offset = ServoModel::Sts3215.spec(Register::HomingOffset).unwrap();
        assert_eq!(offset.max_magnitude(), 2047);
    }
}
