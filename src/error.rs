use thiserror::Error;

use crate::control_table::Register;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotorError {
    #[error("serial/bus communication error: {0}")]
    Communication(String),
    #[error("motor {id} did not answer before the timeout")]
    Timeout { id: u8 },
    #[error("no response from motor {0}")]
    NoResponse(u8),
    #[error("missing motors: {0:?}")]
    MissingMotors(Vec<u8>),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("checksum mismatch in reply from motor {id}")]
    Checksum { id: u8 },
    #[error("motor {id} reported status error bits {bits:#04x}")]
    ServoStatus { id: u8, bits: u8 },
    #[error("register {register} does not exist on {model}")]
    UnknownRegister { register: String, model: String },
    #[error("value {value} does not fit register {register}")]
    ValueOutOfRange { register: Register, value: i32 },
    #[error("motor {id}: {register} is in EEPROM and torque is still enabled")]
    TorqueEnabled { id: u8, register: Register },
    #[error("motor {id}: {register} is in EEPROM and Lock is set")]
    EepromLocked { id: u8, register: Register },
    #[error("register {0} is read-only")]
    ReadOnly(Register),
    #[error("register {0} is in EEPROM, write it per motor with torque disabled")]
    NotSyncWritable(Register),
    #[error("unknown motor: {0}")]
    UnknownMotor(String),
    #[error("calibration error: {0}")]
    Calibration(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("operation not supported for these motors")]
    Unsupported,
    #[error("transport closed")]
    Closed,
}

impl From<std::io::Error> for MotorError {
    fn from(e: std::io::Error) -> Self {
        MotorError::Communication(e.to_string())
    }
}

impl From<serialport::Error> for MotorError {
    fn from(e: serialport::Error) -> Self {
        MotorError::Communication(e.to_string())
    }
}
