use std::time::Duration;

use hidapi::{HidApi, HidDevice};

use super::{Packet, Transport, PACKET_SIZE};
use crate::errors::{CosignError, Result};

/// HID transport used by Ledger, Trezor One and KeepKey (legacy firmware)
pub struct HidTransport {
    device: HidDevice,
}

impl HidTransport {
    pub fn open_path(api: &HidApi, path: &std::ffi::CStr) -> Result<Self> {
        let device = api.open_path(path)?;
        device.set_blocking_mode(true)?;
        log::debug!("🔌 Opened HID device at {:?}", path);
        Ok(Self { device })
    }
}

impl Transport for HidTransport {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        // Report id 0 goes in front of every HID write
        let mut report = [0u8; PACKET_SIZE + 1];
        report[1..].copy_from_slice(packet);
        let written = self.device.write(&report)?;
        if written < PACKET_SIZE {
            return Err(CosignError::Protocol(format!(
                "Short HID write: {} bytes",
                written
            )));
        }
        Ok(())
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<Packet> {
        let mut packet = [0u8; PACKET_SIZE];
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let read = self.device.read_timeout(&mut packet, millis)?;
        if read == 0 {
            return Err(CosignError::Timeout);
        }
        Ok(packet)
    }
}
