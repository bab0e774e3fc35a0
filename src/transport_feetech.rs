use std::{error::Error, io::ErrorKind, time::Duration};

use rustypot::{CommunicationErrorKind, DynamixelProtocolHandler, StatusError};
use serialport::SerialPort;
use tracing::{debug, warn};

use crate::{error::MotorError, model::MotorId, transport::MotorTransport};

/// Sync instructions go to the broadcast ID; their failures are reported
/// against it.
pub const BROADCAST_ID: u8 = 0xFE;

/// Serial transport for Feetech STS/SMS and SCS servos. Feetech speaks
/// Dynamixel protocol 1 framing, so the packets go through rustypot's v1
/// handler.
pub struct FeetechTransport {
    port: Box<dyn SerialPort>,
    dph: DynamixelProtocolHandler,
    strict_status: bool,
}

/// Maps a rustypot failure while talking to `id`.
fn bus_error(id: u8, e: Box<dyn Error>) -> MotorError {
    if let Some(kind) = e.downcast_ref::<CommunicationErrorKind>() {
        return match kind {
            CommunicationErrorKind::TimeoutError => MotorError::Timeout { id },
            CommunicationErrorKind::ChecksumError => MotorError::Checksum { id },
            CommunicationErrorKind::ParsingError => {
                MotorError::InvalidResponse(format!("unparseable status packet from motor {id}"))
            }
            CommunicationErrorKind::IncorrectId(sent, got) => {
                MotorError::InvalidResponse(format!("expected reply from {sent}, got {got}"))
            }
            CommunicationErrorKind::Unsupported => MotorError::Unsupported,
        };
    }
    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        return match io.kind() {
            ErrorKind::TimedOut | ErrorKind::UnexpectedEof => MotorError::Timeout { id },
            _ => MotorError::Communication(io.to_string()),
        };
    }
    MotorError::Communication(e.to_string())
}

impl FeetechTransport {
    pub fn open(serial_port: &str, baudrate: u32, timeout: Duration) -> Result<Self, MotorError> {
        let io = serialport::new(serial_port, baudrate)
            .timeout(timeout)
            .open()
            .map_err(|e| MotorError::Communication(format!("{serial_port}: {e}")))?;
        debug!(port = serial_port, baudrate, "serial port opened");
        Ok(Self::from_port(io))
    }

    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self { port, dph: DynamixelProtocolHandler::v1(), strict_status: false }
    }

    /// Turn error bits in status packets into `MotorError::ServoStatus`
    /// instead of logging them.
    pub fn with_strict_status(mut self, strict: bool) -> Self {
        self.strict_status = strict;
        self
    }

    fn check_status(&self, id: u8, status: StatusError) -> Result<(), MotorError> {
        if status.is_ok() {
            return Ok(());
        }
        if self.strict_status {
            return Err(MotorError::ServoStatus { id, bits: status.byte() });
        }
        warn!(id, bits = %format!("{:#04x}", status.byte()), "servo reported error bits");
        Ok(())
    }

    fn check_length(id: u8, data: &[u8], length: u8) -> Result<(), MotorError> {
        if data.len() != length as usize {
            return Err(MotorError::InvalidResponse(format!(
                "motor {id} returned {} bytes, asked for {length}",
                data.len()
            )));
        }
        Ok(())
    }
}

impl MotorTransport for FeetechTransport {
    fn ping(&mut self, id: MotorId) -> Result<bool, MotorError> {
        self.dph.ping(self.port.as_mut(), id.0).map_err(|e| bus_error(id.0, e))
    }

    fn read(&mut self, id: MotorId, address: u8, length: u8) -> Result<Vec<u8>, MotorError> {
        let (data, status) = self
            .dph
            .read_with_error(self.port.as_mut(), id.0, address, length)
            .map_err(|e| bus_error(id.0, e))?;
        debug!(id = id.0, address, rx = ?data, "read");
        self.check_status(id.0, status)?;
        Self::check_length(id.0, &data, length)?;
        Ok(data)
    }

    fn write(&mut self, id: MotorId, address: u8, data: &[u8]) -> Result<(), MotorError> {
        debug!(id = id.0, address, tx = ?data, "write");
        let status = self
            .dph
            .write_with_error(self.port.as_mut(), id.0, address, data)
            .map_err(|e| bus_error(id.0, e))?;
        self.check_status(id.0, status)
    }

    fn sync_read(
        &mut self,
        ids: &[MotorId],
        address: u8,
        length: u8,
    ) -> Result<Vec<Vec<u8>>, MotorError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<u8> = ids.iter().map(|x| x.0).collect();
        let replies = self
            .dph
            .sync_read_with_error(self.port.as_mut(), &raw, address, length)
            .map_err(|e| bus_error(BROADCAST_ID, e))?;

        raw.iter()
            .zip(replies)
            .map(|(id, (data, status))| {
                self.check_status(*id, status)?;
                Self::check_length(*id, &data, length)?;
                Ok(data)
            })
            .collect()
    }

    fn sync_write(&mut self, address: u8, entries: &[(MotorId, Vec<u8>)]) -> Result<(), MotorError> {
        if entries.is_empty() {
            return Ok(());
        }
        let ids: Vec<u8> = entries.iter().map(|(id, _)| id.0).collect();
        let data: Vec<Vec<u8>> = entries.iter().map(|(_, d)| d.clone()).collect();
        if data.iter().any(|d| d.len() != data[0].len()) {
            return Err(MotorError::InvalidResponse("sync write entries differ in length".into()));
        }
        debug!(address, ?ids, "sync write");
        self.dph
            .sync_write(self.port.as_mut(), &ids, address, &data)
            .map_err(|e| bus_error(BROADCAST_ID, e))
    }
}
