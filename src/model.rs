use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::MotorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MotorId(pub u8);

impl fmt::Display for MotorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order of the two bytes of a 16-bit register on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServoModel {
    Sts3215,
    Scs0009,
}

impl ServoModel {
    /// Value of the Model_Number register reported by this servo.
    pub fn model_number(self) -> u16 {
        match self {
            ServoModel::Sts3215 => 777,
            ServoModel::Scs0009 => 1284,
        }
    }

    pub fn from_model_number(number: u16) -> Option<Self> {
        match number {
            777 => Some(ServoModel::Sts3215),
            1284 => Some(ServoModel::Scs0009),
            _ => None,
        }
    }

    /// Encoder ticks per revolution.
    pub fn resolution(self) -> u32 {
        match self {
            ServoModel::Sts3215 => 4096,
            ServoModel::Scs0009 => 1024,
        }
    }

    /// STS/SMS servos are little-endian, SCS servos big-endian.
    pub fn byte_order(self) -> ByteOrder {
        match self {
            ServoModel::Sts3215 => ByteOrder::Little,
            ServoModel::Scs0009 => ByteOrder::Big,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ServoModel::Sts3215 => "sts3215",
            ServoModel::Scs0009 => "scs0009",
        }
    }
}

impl fmt::Display for ServoModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ServoModel {
    type Err = MotorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sts3215" | "sts" | "sms_sts" => Ok(ServoModel::Sts3215),
            "scs0009" | "scs" => Ok(ServoModel::Scs0009),
            other => Err(MotorError::Config(format!("unknown servo model '{other}'"))),
        }
    }
}
