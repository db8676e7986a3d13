use std::time::Duration;

use rusb::{Device, DeviceHandle, GlobalContext};

use super::{Packet, Transport, PACKET_SIZE};
use crate::errors::{CosignError, Result};

const INTERFACE: u8 = 0;
const ENDPOINT_IN: u8 = 0x81;
const ENDPOINT_OUT: u8 = 0x01;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// WebUSB (vendor interface) transport used by Trezor T / newer Trezor One
/// firmware and KeepKey firmware 7+
pub struct WebUsbTransport {
    handle: DeviceHandle<GlobalContext>,
}

impl WebUsbTransport {
    pub fn open(device: &Device<GlobalContext>) -> Result<Self> {
        let mut handle = device.open()?;

        // If the kernel holds the interface we need to detach it first
        if let Ok(true) = handle.kernel_driver_active(INTERFACE) {
            log::debug!("Detaching kernel driver from interface {}", INTERFACE);
            handle.detach_kernel_driver(INTERFACE)?;
        }
        handle.claim_interface(INTERFACE)?;

        log::debug!(
            "🔌 Opened WebUSB device on bus {} address {}",
            device.bus_number(),
            device.address()
        );
        Ok(Self { handle })
    }
}

impl Drop for WebUsbTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(INTERFACE);
    }
}

impl Transport for WebUsbTransport {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let written = self
            .handle
            .write_interrupt(ENDPOINT_OUT, packet, WRITE_TIMEOUT)?;
        if written < PACKET_SIZE {
            return Err(CosignError::Protocol(format!(
                "Short USB write: {} bytes",
                written
            )));
        }
        Ok(())
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<Packet> {
        let mut packet = [0u8; PACKET_SIZE];
        match self.handle.read_interrupt(ENDPOINT_IN, &mut packet, timeout) {
            Ok(_) => Ok(packet),
            Err(rusb::Error::Timeout) => Err(CosignError::Timeout),
            Err(e) => Err(e.into()),
        }
    }
}
