use crate::{error::MotorError, model::MotorId};

/// Raw register access to a bus of Feetech servos.
///
/// Addresses and lengths are the control-table ones; interpretation of the
/// bytes is left to [`crate::bus::ServoBus`].
pub trait MotorTransport: Send + 'static {
    /// `Ok(false)` when nothing answered; other failures are errors.
    fn ping(&mut self, id: MotorId) -> Result<bool, MotorError>;

    fn read(&mut self, id: MotorId, address: u8, length: u8) -> Result<Vec<u8>, MotorError>;

    fn write(&mut self, id: MotorId, address: u8, data: &[u8]) -> Result<(), MotorError>;

    fn sync_read(
        &mut self,
        ids: &[MotorId],
        address: u8,
        length: u8,
    ) -> Result<Vec<Vec<u8>>, MotorError> {
        ids.iter().map(|id| self.read(*id, address, length)).collect()
    }

    fn sync_write(&mut self, address: u8, entries: &[(MotorId, Vec<u8>)]) -> Result<(), MotorError> {
        for (id, data) in entries {
            self.write(*id, address, data)?;
        }
        Ok(())
    }

    fn scan_missing_ids(&mut self, all_ids: &[MotorId]) -> Result<Vec<MotorId>, MotorError> {
        let mut missing = Vec::new();
        for id in all_ids {
            if !self.ping(*id)? {
                missing.push(*id);
            }
        }
        Ok(missing)
    }
}

impl<T: MotorTransport + ?Sized> MotorTransport for Box<T> {
    fn ping(&mut self, id: MotorId) -> Result<bool, MotorError> {
        (**self).ping(id)
    }

    fn read(&mut self, id: MotorId, address: u8, length: u8) -> Result<Vec<u8>, MotorError> {
        (**self).read(id, address, length)
    }

    fn write(&mut self, id: MotorId, address: u8, data: &[u8]) -> Result<(), MotorError> {
        (**self).write(id, address, data)
    }

    fn sync_read(
        &mut self,
        ids: &[MotorId],
        address: u8,
        length: u8,
    ) -> Result<Vec<Vec<u8>>, MotorError> {
        (**self).sync_read(ids, address, length)
    }

    fn sync_write(&mut self, address: u8, entries: &[(MotorId, Vec<u8>)]) -> Result<(), MotorError> {
        (**self).sync_write(address, entries)
    }

    fn scan_missing_ids(&mut self, all_ids: &[MotorId]) -> Result<Vec<MotorId>, MotorError> {
        (**self).scan_missing_ids(all_ids)
    }
}
