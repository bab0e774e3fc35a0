use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    control_table::RegisterSpec,
    error::MotorError,
    model::{ByteOrder, ServoModel},
};

/// Encodes `value` as sign-magnitude with the sign in `sign_bit`.
pub fn encode_sign_magnitude(value: i32, sign_bit: u8) -> Result<u32, MotorError> {
    let max = (1u32 << sign_bit) - 1;
    let magnitude = value.unsigned_abs();
    if magnitude > max {
        return Err(MotorError::InvalidResponse(format!(
            "magnitude {magnitude} exceeds {max} for sign bit {sign_bit}"
        )));
    }
    let sign = if value < 0 { 1u32 << sign_bit } else { 0 };
    Ok(sign | magnitude)
}

pub fn decode_sign_magnitude(raw: u32, sign_bit: u8) -> i32 {
    let magnitude = (raw & ((1u32 << sign_bit) - 1)) as i32;
    if raw & (1u32 << sign_bit) != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Register value to wire bytes, honouring width, sign bit and byte order.
pub fn encode_register(
    model: ServoModel,
    spec: &RegisterSpec,
    value: i32,
) -> Result<Vec<u8>, MotorError> {
    let out_of_range = || MotorError::ValueOutOfRange { register: spec.register, value };
    let raw = match spec.sign_bit {
        Some(bit) => encode_sign_magnitude(value, bit).map_err(|_| out_of_range())?,
        None => {
            if value < 0 || value as u32 > spec.max_magnitude() {
                return Err(out_of_range());
            }
            value as u32
        }
    };
    Ok(match (spec.width, model.byte_order()) {
        (1, _) => vec![raw as u8],
        (_, ByteOrder::Little) => vec![raw as u8, (raw >> 8) as u8],
        (_, ByteOrder::Big) => vec![(raw >> 8) as u8, raw as u8],
    })
}

pub fn decode_register(
    model: ServoModel,
    spec: &RegisterSpec,
    bytes: &[u8],
) -> Result<i32, MotorError> {
    if bytes.len() != spec.width as usize {
        return Err(MotorError::InvalidResponse(format!(
            "{} expects {} bytes, got {}",
            spec.register,
            spec.width,
            bytes.len()
        )));
    }
    let raw = match (spec.width, model.byte_order()) {
        (1, _) => u32::from(bytes[0]),
        (_, ByteOrder::Little) => u32::from(bytes[0]) | (u32::from(bytes[1]) << 8),
        (_, ByteOrder::Big) => (u32::from(bytes[0]) << 8) | u32::from(bytes[1]),
    };
    Ok(match spec.sign_bit {
        Some(bit) => decode_sign_magnitude(raw, bit),
        None => raw as i32,
    })
}

/// How raw positions map to the logical values used in actions and
/// observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormMode {
    Degrees,
    /// -100..100 over the calibrated range.
    RangeM100To100,
    /// 0..100 over the calibrated range.
    Range0To100,
}

/// Per-motor calibration as recorded by the SO-101 calibration procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorCalibration {
    pub id: u8,
    #[serde(default)]
    pub drive_mode: u8,
    #[serde(default)]
    pub homing_offset: i32,
    pub range_min: i32,
    pub range_max: i32,
}

impl MotorCalibration {
    /// Full encoder range, used when no calibration file is available.
    pub fn full_range(id: u8, model: ServoModel) -> Self {
        Self {
            id,
            drive_mode: 0,
            homing_offset: 0,
            range_min: 0,
            range_max: model.resolution() as i32 - 1,
        }
    }

    fn span(&self) -> Result<f64, MotorError> {
        if self.range_max <= self.range_min {
            return Err(MotorError::Calibration(format!(
                "motor {}: range_min {} must be below range_max {}",
                self.id, self.range_min, self.range_max
            )));
        }
        Ok(f64::from(self.range_max - self.range_min))
    }

    fn mid(&self) -> f64 {
        f64::from(self.range_min + self.range_max) / 2.0
    }

    fn inverted(&self) -> bool {
        self.drive_mode != 0
    }

    pub fn normalize(&self, mode: NormMode, model: ServoModel, raw: i32) -> Result<f64, MotorError> {
        let span = self.span()?;
        let bounded = f64::from(raw.clamp(self.range_min, self.range_max));
        let frac = (bounded - f64::from(self.range_min)) / span;
        Ok(match mode {
            NormMode::RangeM100To100 => {
                let v = frac * 200.0 - 100.0;
                if self.inverted() { -v } else { v }
            }
            NormMode::Range0To100 => {
                let v = frac * 100.0;
                if self.inverted() { 100.0 - v } else { v }
            }
            NormMode::Degrees => {
                let max_res = f64::from(model.resolution() - 1);
                (f64::from(raw) - self.mid()) * 360.0 / max_res
            }
        })
    }

    pub fn unnormalize(&self, mode: NormMode, model: ServoModel, value: f64) -> Result<i32, MotorError> {
        let span = self.span()?;
        if !value.is_finite() {
            return Err(MotorError::Calibration(format!(
                "motor {}: cannot command non-finite value",
                self.id
            )));
        }
        let raw = match mode {
            NormMode::RangeM100To100 => {
                let v = if self.inverted() { -value } else { value };
                let bounded = v.clamp(-100.0, 100.0);
                (bounded + 100.0) / 200.0 * span + f64::from(self.range_min)
            }
            NormMode::Range0To100 => {
                let v = if self.inverted() { 100.0 - value } else { value };
                let bounded = v.clamp(0.0, 100.0);
                bounded / 100.0 * span + f64::from(self.range_min)
            }
            NormMode::Degrees => {
                let max_res = f64::from(model.resolution() - 1);
                value * max_res / 360.0 + self.mid()
            }
        };
        Ok(raw.round() as i32)
    }
}

/// Calibration file: motor name to calibration.
pub type CalibrationTable = BTreeMap<String, MotorCalibration>;

pub fn load_calibration(path: &Path) -> Result<CalibrationTable, MotorError> {
    let text = fs::read_to_string(path)
        .map_err(|e| MotorError::Calibration(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| MotorError::Calibration(format!("{}: {e}", path.display())))
}

pub fn save_calibration(path: &Path, table: &CalibrationTable) -> Result<(), MotorError> {
    let text = serde_json::to_string_pretty(table)
        .map_err(|e| MotorError::Calibration(e.to_string()))?;
    fs::write(path, text).map_err(|e| MotorError::Calibration(format!("{}: {e}", path.display())))
}
