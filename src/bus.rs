//! Named register access on top of a [`MotorTransport`].

use std::{collections::BTreeMap, ops::RangeInclusive};

use tracing::{debug, info, warn};

use crate::{
    control_table::{MemoryArea, Register, RegisterSpec},
    conversion::{decode_register, encode_register},
    error::MotorError,
    model::{MotorId, ServoModel},
    transport::MotorTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorProbe {
    pub id: MotorId,
    pub goal_position: i32,
    pub present_position: i32,
    pub goal_velocity: i32,
    pub lock: i32,
    pub status: i32,
    pub moving: bool,
}

impl std::fmt::Display for MotorProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GoalPos={} | PresentPos={} | GoalVel={} | Lock={} | Status={:#04x} | Moving={}",
            self.goal_position,
            self.present_position,
            self.goal_velocity,
            self.lock,
            self.status,
            u8::from(self.moving)
        )
    }
}

/// Bus adapter: reads and writes registers by name and motor ID.
///
/// Every motor has a model, which selects its control table and byte order.
/// IDs that were never registered use the default model.
pub struct ServoBus<T: MotorTransport> {
    transport: T,
    default_model: ServoModel,
    models: BTreeMap<MotorId, ServoModel>,
    eeprom_guard: bool,
}

impl<T: MotorTransport> ServoBus<T> {
    pub fn new(transport: T, default_model: ServoModel) -> Self {
        Self { transport, default_model, models: BTreeMap::new(), eeprom_guard: true }
    }

    pub fn with_motor(mut self, id: MotorId, model: ServoModel) -> Self {
        self.models.insert(id, model);
        self
    }

    /// Disabling the guard sends EEPROM writes without checking torque and
    /// Lock first, the servo then silently drops them.
    pub fn with_eeprom_guard(mut self, enabled: bool) -> Self {
        self.eeprom_guard = enabled;
        self
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn model(&self, id: MotorId) -> ServoModel {
        self.models.get(&id).copied().unwrap_or(self.default_model)
    }

    pub fn spec(&self, register: Register, id: MotorId) -> Result<RegisterSpec, MotorError> {
        self.model(id).spec(register)
    }

    pub fn supports(&self, register: Register, id: MotorId) -> bool {
        self.model(id).register(register).is_some()
    }

    pub fn ping(&mut self, id: MotorId) -> Result<bool, MotorError> {
        self.transport.ping(id)
    }

    /// Reads Model_Number and records the model when it is known.
    pub fn model_number(&mut self, id: MotorId) -> Result<u16, MotorError> {
        if !self.transport.ping(id)? {
            return Err(MotorError::NoResponse(id.0));
        }
        // Model_Number sits at the same address on every series; read the
        // two bytes raw and try both byte orders.
        let spec = ServoModel::Sts3215.spec(Register::ModelNumber)?;
        let bytes = self.transport.read(id, spec.address, spec.width)?;
        let [b0, b1] = bytes[..] else {
            return Err(MotorError::InvalidResponse(format!("Model_Number: {bytes:02x?}")));
        };
        let little = u16::from_le_bytes([b0, b1]);
        let big = u16::from_be_bytes([b0, b1]);
        let number = if ServoModel::from_model_number(little).is_some() { little } else { big };
        if let Some(model) = ServoModel::from_model_number(number) {
            self.models.insert(id, model);
        }
        Ok(number)
    }

    /// Pings every ID in `ids` and returns `(id, model_number)` for those
    /// that answered.
    pub fn scan(&mut self, ids: RangeInclusive<u8>) -> Result<Vec<(MotorId, u16)>, MotorError> {
        let mut found = Vec::new();
        for raw in ids {
            let id = MotorId(raw);
            match self.model_number(id) {
                Ok(number) => {
                    info!(id = raw, model = number, "motor found");
                    found.push((id, number));
                }
                Err(MotorError::NoResponse(_)) | Err(MotorError::Timeout { .. }) => {}
                Err(e) => warn!(id = raw, "scan error: {e}"),
            }
        }
        Ok(found)
    }

    pub fn read(&mut self, register: Register, id: MotorId) -> Result<i32, MotorError> {
        let model = self.model(id);
        let spec = model.spec(register)?;
        let bytes = self.transport.read(id, spec.address, spec.width)?;
        decode_register(model, &spec, &bytes)
    }

    /// Reads each register independently; a failing register does not stop
    /// the others.
    pub fn read_many(
        &mut self,
        registers: &[Register],
        id: MotorId,
    ) -> Vec<(Register, Result<i32, MotorError>)> {
        registers.iter().map(|r| (*r, self.read(*r, id))).collect()
    }

    pub fn write(&mut self, register: Register, id: MotorId, value: i32) -> Result<(), MotorError> {
        let model = self.model(id);
        let spec = model.spec(register)?;
        match spec.area {
            MemoryArea::ReadOnly => return Err(MotorError::ReadOnly(register)),
            MemoryArea::Eeprom if self.eeprom_guard => self.check_eeprom_writable(register, id)?,
            _ => {}
        }
        let bytes = encode_register(model, &spec, value)?;
        debug!(id = id.0, %register, value, "write");
        self.transport.write(id, spec.address, &bytes)
    }

    fn check_eeprom_writable(&mut self, register: Register, id: MotorId) -> Result<(), MotorError> {
        if self.read(Register::TorqueEnable, id)? != 0 {
            return Err(MotorError::TorqueEnabled { id: id.0, register });
        }
        if self.read(Register::Lock, id)? != 0 {
            return Err(MotorError::EepromLocked { id: id.0, register });
        }
        Ok(())
    }

    /// Writes the same register on several motors in one broadcast packet.
    /// All motors must share a model.
    pub fn sync_write(&mut self, register: Register, values: &[(MotorId, i32)]) -> Result<(), MotorError> {
        let Some((first, _)) = values.first() else {
            return Ok(());
        };
        let model = self.model(*first);
        if values.iter().any(|(id, _)| self.model(*id) != model) {
            return Err(MotorError::Unsupported);
        }
        let spec = model.spec(register)?;
        match spec.area {
            MemoryArea::Ram => {}
            MemoryArea::Eeprom => return Err(MotorError::NotSyncWritable(register)),
            MemoryArea::ReadOnly => return Err(MotorError::ReadOnly(register)),
        }
        let entries = values
            .iter()
            .map(|(id, v)| encode_register(model, &spec, *v).map(|b| (*id, b)))
            .collect::<Result<Vec<_>, _>>()?;
        self.transport.sync_write(spec.address, &entries)
    }

    pub fn sync_read(&mut self, register: Register, ids: &[MotorId]) -> Result<Vec<i32>, MotorError> {
        let Some(first) = ids.first() else {
            return Ok(Vec::new());
        };
        let model = self.model(*first);
        if ids.iter().any(|id| self.model(*id) != model) {
            return ids.iter().map(|id| self.read(register, *id)).collect();
        }
        let spec = model.spec(register)?;
        self.transport
            .sync_read(ids, spec.address, spec.width)?
            .iter()
            .map(|bytes| decode_register(model, &spec, bytes))
            .collect()
    }

    /// Reads back what a motor is doing right after a command.
    pub fn probe(&mut self, id: MotorId) -> Result<MotorProbe, MotorError> {
        let velocity = if self.supports(Register::GoalVelocity, id) {
            self.read(Register::GoalVelocity, id)?
        } else {
            0
        };
        Ok(MotorProbe {
            id,
            goal_position: self.read(Register::GoalPosition, id)?,
            present_position: self.read(Register::PresentPosition, id)?,
            goal_velocity: velocity,
            lock: self.read(Register::Lock, id)?,
            status: self.read(Register::Status, id)?,
            moving: self.read(Register::Moving, id)? != 0,
        })
    }

    /// Torque_Enable=0 then Lock=0, which opens EEPROM for writing.
    pub fn disable_torque(&mut self, id: MotorId) -> Result<(), MotorError> {
        self.write(Register::TorqueEnable, id, 0)?;
        self.write(Register::Lock, id, 0)
    }

    /// Torque_Enable=1 then Lock=1.
    pub fn enable_torque(&mut self, id: MotorId) -> Result<(), MotorError> {
        self.write(Register::TorqueEnable, id, 1)?;
        self.write(Register::Lock, id, 1)
    }

    /// Runs `f` with torque disabled and EEPROM unlocked, then re-enables
    /// torque whether or not `f` succeeded.
    pub fn with_torque_disabled<R>(
        &mut self,
        id: MotorId,
        f: impl FnOnce(&mut Self) -> Result<R, MotorError>,
    ) -> Result<R, MotorError> {
        self.disable_torque(id)?;
        let result = f(self);
        let restored = self.enable_torque(id);
        match (result, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), restored) => {
                if let Err(r) = restored {
                    warn!(id = id.0, "could not re-enable torque: {r}");
                }
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e),
        }
    }
}
