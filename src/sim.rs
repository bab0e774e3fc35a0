//! In-memory servo bus.
//!
//! Each simulated servo owns a 256-byte control table initialised to STS3215
//! / SCS0009 factory values. Writes obey the same rules as the hardware:
//! EEPROM writes are dropped while torque is on or `Lock` is set, read-only
//! registers ignore writes. Every read that covers `Present_Position` advances
//! the motor one step towards `Goal_Position`.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    control_table::{MemoryArea, Register},
    conversion::{decode_register, encode_register},
    error::MotorError,
    model::{MotorId, ServoModel},
    transport::MotorTransport,
};

/// Ticks moved per step when `Goal_Velocity` is 0 (full speed).
const FULL_SPEED_STEP: i32 = 200;

#[derive(Debug, Clone)]
struct SimServo {
    model: ServoModel,
    mem: [u8; 256],
    stalled: bool,
    needs_velocity: bool,
}

impl SimServo {
    fn new(id: u8, model: ServoModel) -> Self {
        let mut servo = Self { model, mem: [0; 256], stalled: false, needs_velocity: false };
        let max = model.resolution() as i32 - 1;
        let mid = model.resolution() as i32 / 2;
        let defaults = [
            (Register::FirmwareMajorVersion, 3),
            (Register::FirmwareMinorVersion, 10),
            (Register::ModelNumber, i32::from(model.model_number())),
            (Register::Id, i32::from(id)),
            (Register::ResponseStatusLevel, 1),
            (Register::MinPositionLimit, 0),
            (Register::MaxPositionLimit, max),
            (Register::MaxTemperatureLimit, 70),
            (Register::MaxVoltageLimit, 140),
            (Register::MinVoltageLimit, 40),
            (Register::MaxTorqueLimit, 1000),
            (Register::UnloadingCondition, 44),
            (Register::LedAlarmCondition, 47),
            (Register::PCoefficient, 32),
            (Register::DCoefficient, 32),
            (Register::MinimumStartupForce, 16),
            (Register::ProtectionCurrent, 500),
            (Register::AngularResolution, 1),
            (Register::ProtectiveTorque, 20),
            (Register::ProtectionTime, 200),
            (Register::OverloadTorque, 80),
            (Register::GoalPosition, mid),
            (Register::TorqueLimit, 1000),
            (Register::PresentPosition, mid),
            (Register::PresentVoltage, 120),
            (Register::PresentTemperature, 30),
        ];
        for (reg, value) in defaults {
            servo.poke(reg, value);
        }
        servo
    }

    fn poke(&mut self, reg: Register, value: i32) {
        if let Some(spec) = self.model.register(reg) {
            if let Ok(bytes) = encode_register(self.model, &spec, value) {
                let at = spec.address as usize;
                self.mem[at..at + bytes.len()].copy_from_slice(&bytes);
            }
        }
    }

    fn peek(&self, reg: Register) -> Option<i32> {
        let spec = self.model.register(reg)?;
        let at = spec.address as usize;
        decode_register(self.model, &spec, &self.mem[at..at + spec.width as usize]).ok()
    }

    fn get(&self, reg: Register) -> i32 {
        self.peek(reg).unwrap_or(0)
    }

    fn area_of(&self, address: u8) -> MemoryArea {
        self.model
            .registers()
            .iter()
            .find(|s| address >= s.address && address < s.address + s.width)
            .map(|s| s.area)
            .unwrap_or(MemoryArea::Ram)
    }

    fn eeprom_writable(&self) -> bool {
        self.get(Register::TorqueEnable) == 0 && self.peek(Register::Lock).unwrap_or(0) == 0
    }

    fn write(&mut self, address: u8, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            let addr = address.wrapping_add(offset as u8);
            match self.area_of(addr) {
                MemoryArea::ReadOnly => {}
                MemoryArea::Eeprom if !self.eeprom_writable() => {}
                _ => self.mem[addr as usize] = *byte,
            }
        }
    }

    fn can_move(&self) -> bool {
        let mode_ok = self.peek(Register::OperatingMode).unwrap_or(0) == 0;
        let torque_ok = self.peek(Register::TorqueLimit).unwrap_or(1) > 0
            && self.get(Register::MaxTorqueLimit) > 0;
        let velocity_ok = !self.needs_velocity || self.get(Register::GoalVelocity) != 0;
        !self.stalled
            && self.get(Register::TorqueEnable) == 1
            && mode_ok
            && torque_ok
            && velocity_ok
    }

    fn step(&mut self) {
        let present = self.get(Register::PresentPosition);
        let min = self.get(Register::MinPositionLimit);
        let max = self.get(Register::MaxPositionLimit);
        let mut goal = self.get(Register::GoalPosition);
        if max > min {
            goal = goal.clamp(min, max);
        }
        let torque_on = self.get(Register::TorqueEnable) == 1;

        if !self.can_move() || goal == present {
            self.poke(Register::Moving, 0);
            self.poke(Register::PresentVelocity, 0);
            self.poke(Register::PresentCurrent, if torque_on { 4 } else { 0 });
            return;
        }

        let velocity = self.get(Register::GoalVelocity).abs();
        let step = if velocity == 0 { FULL_SPEED_STEP } else { (velocity / 10).max(1) };
        let delta = (goal - present).clamp(-step, step);
        self.poke(Register::PresentPosition, present + delta);
        self.poke(Register::PresentVelocity, delta);
        self.poke(Register::PresentCurrent, 60);
        self.poke(Register::Moving, i32::from(present + delta != goal));
    }
}

#[derive(Debug, Default)]
struct SimBus {
    servos: BTreeMap<u8, SimServo>,
    writes: Vec<(u8, u8, Vec<u8>)>,
}

/// Cloneable handle to a simulated bus; clones share state so a test can
/// keep one to inspect what the code under test did.
#[derive(Debug, Clone, Default)]
pub struct SimTransport {
    inner: Arc<Mutex<SimBus>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Six STS3215 servos with IDs 1..=6, as on the SO-101.
    pub fn so101() -> Self {
        (1..=6).fold(Self::new(), |sim, id| sim.with_servo(id, ServoModel::Sts3215))
    }

    pub fn with_servo(self, id: u8, model: ServoModel) -> Self {
        self.lock().servos.insert(id, SimServo::new(id, model));
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimBus> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn with<R>(&self, id: u8, f: impl FnOnce(&mut SimServo) -> R) -> Option<R> {
        self.lock().servos.get_mut(&id).map(f)
    }

    /// Sets a register directly, bypassing EEPROM and read-only rules.
    pub fn set_register(&self, id: u8, reg: Register, value: i32) {
        self.with(id, |s| s.poke(reg, value));
    }

    pub fn register(&self, id: u8, reg: Register) -> Option<i32> {
        self.with(id, |s| s.peek(reg)).flatten()
    }

    /// A stalled motor accepts commands but never moves.
    pub fn set_stalled(&self, id: u8, stalled: bool) {
        self.with(id, |s| s.stalled = stalled);
    }

    /// Only move while `Goal_Velocity` is non-zero.
    pub fn set_needs_velocity(&self, id: u8, needs: bool) {
        self.with(id, |s| s.needs_velocity = needs);
    }

    pub fn remove_servo(&self, id: u8) {
        self.lock().servos.remove(&id);
    }

    /// Every accepted write instruction as `(id, address, data)`, in order.
    pub fn write_log(&self) -> Vec<(u8, u8, Vec<u8>)> {
        self.lock().writes.clone()
    }

    pub fn clear_write_log(&self) {
        self.lock().writes.clear();
    }
}

impl MotorTransport for SimTransport {
    fn ping(&mut self, id: MotorId) -> Result<bool, MotorError> {
        Ok(self.lock().servos.contains_key(&id.0))
    }

    fn read(&mut self, id: MotorId, address: u8, length: u8) -> Result<Vec<u8>, MotorError> {
        let mut bus = self.lock();
        let servo = bus.servos.get_mut(&id.0).ok_or(MotorError::Timeout { id: id.0 })?;
        let end = address as usize + length as usize;
        if end > servo.mem.len() {
            return Err(MotorError::InvalidResponse(format!("read past end of table at {address}")));
        }
        let present = servo
            .model
            .register(Register::PresentPosition)
            .map(|s| s.address as usize);
        if present.is_some_and(|p| (address as usize..end).contains(&p)) {
            servo.step();
        }
        Ok(servo.mem[address as usize..end].to_vec())
    }

    fn write(&mut self, id: MotorId, address: u8, data: &[u8]) -> Result<(), MotorError> {
        let mut bus = self.lock();
        let servo = bus.servos.get_mut(&id.0).ok_or(MotorError::Timeout { id: id.0 })?;
        servo.write(address, data);

        let id_address = servo.model.register(Register::Id).map(|s| s.address);
        let new_id = servo.peek(Register::Id).unwrap_or(i32::from(id.0)) as u8;
        if id_address == Some(address) && new_id != id.0 {
            if let Some(moved) = bus.servos.remove(&id.0) {
                bus.servos.insert(new_id, moved);
            }
        }
        bus.writes.push((id.0, address, data.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eeprom_write_dropped_while_torque_on() {
        let mut sim = SimTransport::so101();
        let mode = ServoModel::Sts3215.spec(Register::OperatingMode).unwrap().address;
        let torque = ServoModel::Sts3215.spec(Register::TorqueEnable).unwrap().address;

        sim.write(MotorId(1), torque, &[1]).unwrap();
        sim.write(MotorId(1), mode, &[1]).unwrap();
        assert_eq!(sim.register(1, Register::OperatingMode), Some(0));

        sim.write(MotorId(1), torque, &[0]).unwrap();
        sim.write(MotorId(1), mode, &[1]).unwrap();
        assert_eq!(sim.register(1, Register::OperatingMode), Some(1));
    }

    #[test]
    fn motion_needs_torque() {
        let mut sim = SimTransport::so101();
        sim.set_register(2, Register::GoalPosition, 2448);
        let pos = ServoModel::Sts3215.spec(Register::PresentPosition).unwrap().address;
        sim.read(MotorId(2), pos, 2).unwrap();
        assert_eq!(sim.register(2, Register::PresentPosition), Some(2048));

        sim.set_register(2, Register::TorqueEnable, 1);
        sim.read(MotorId(2), pos, 2).unwrap();
        sim.read(MotorId(2), pos, 2).unwrap();
        assert_eq!(sim.register(2, Register::PresentPosition), Some(2448));
    }

    #[test]
    fn id_change_rekeys_servo() {
        let mut sim = SimTransport::new().with_servo(1, ServoModel::Sts3215);
        let id_addr = ServoModel::Sts3215.spec(Register::Id).unwrap().address;
        sim.write(MotorId(1), id_addr, &[9]).unwrap();
        assert!(!sim.ping(MotorId(1)).unwrap());
        assert!(sim.ping(MotorId(9)).unwrap());
    }
}
