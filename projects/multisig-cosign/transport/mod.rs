//! Packet transports for USB signing devices
//!
//! Both device families exchange fixed 64-byte packets; the framing on top
//! lives in `crate::protocol`.

use std::time::Duration;

use crate::errors::Result;

pub mod hid;
pub mod webusb;

pub use hid::HidTransport;
pub use webusb::WebUsbTransport;

pub const PACKET_SIZE: usize = 64;

pub type Packet = [u8; PACKET_SIZE];

/// A bidirectional channel of 64-byte packets
pub trait Transport: Send {
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Block until one packet arrives or `timeout` elapses
    fn read_packet(&mut self, timeout: Duration) -> Result<Packet>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        (**self).write_packet(packet)
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<Packet> {
        (**self).read_packet(timeout)
    }
}
