//! Ledger APDU commands and their HID framing
//!
//! Each HID packet starts with the channel id (`0x0101`), the APDU tag
//! (`0x05`) and a big-endian sequence number. The first packet of an exchange
//! also carries the total APDU length.

use std::time::Duration;

use crate::errors::{CosignError, Result};
use crate::transport::{Packet, Transport, PACKET_SIZE};

const CHANNEL: u16 = 0x0101;
const TAG_APDU: u8 = 0x05;

pub const SW_OK: u16 = 0x9000;

/// A command APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl Apdu {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.data.len() > u8::MAX as usize {
            return Err(CosignError::InvalidInput(format!(
                "APDU payload too long: {} bytes",
                self.data.len()
            )));
        }
        let mut out = Vec::with_capacity(5 + self.data.len());
        out.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2, self.data.len() as u8]);
        out.extend_from_slice(&self.data);
        Ok(out)
    }
}

/// Response payload with the status word split off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub status: u16,
}

impl ApduResponse {
    pub fn from_raw(mut raw: Vec<u8>) -> Result<Self> {
        if raw.len() < 2 {
            return Err(CosignError::Protocol(
                "Ledger response shorter than status word".to_string(),
            ));
        }
        let sw = raw.split_off(raw.len() - 2);
        Ok(Self {
            data: raw,
            status: u16::from_be_bytes([sw[0], sw[1]]),
        })
    }

    /// Map a non-success status word to an error
    pub fn into_result(self) -> Result<Vec<u8>> {
        match self.status {
            SW_OK => Ok(self.data),
            0x6985 => Err(CosignError::UserCancelled),
            status => Err(CosignError::LedgerStatus {
                status,
                reason: status_reason(status),
            }),
        }
    }
}

pub fn status_reason(status: u16) -> &'static str {
    match status {
        0x6a80 => "invalid data; enable contract data / blind signing in the Ethereum app settings",
        0x6a15 | 0x6d00 | 0x6e00 | 0x6511 => "Ethereum app is not open",
        0x5515 | 0x6b0c => "device is locked",
        0x6b00 => "invalid parameter",
        0x6700 => "wrong length",
        0x6982 => "security status not satisfied",
        _ => "unknown status",
    }
}

/// Frame a serialized APDU into HID packets
pub fn wrap_command(apdu: &[u8]) -> Vec<Packet> {
    let mut stream = Vec::with_capacity(apdu.len() + 2);
    stream.extend_from_slice(&(apdu.len() as u16).to_be_bytes());
    stream.extend_from_slice(apdu);

    stream
        .chunks(PACKET_SIZE - 5)
        .enumerate()
        .map(|(sequence, chunk)| {
            let mut packet = [0u8; PACKET_SIZE];
            packet[..2].copy_from_slice(&CHANNEL.to_be_bytes());
            packet[2] = TAG_APDU;
            packet[3..5].copy_from_slice(&(sequence as u16).to_be_bytes());
            packet[5..5 + chunk.len()].copy_from_slice(chunk);
            packet
        })
        .collect()
}

/// Reassemble a response from HID packets
pub fn read_response<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
) -> Result<ApduResponse> {
    let mut expected_len: Option<usize> = None;
    let mut raw = Vec::new();
    let mut sequence: u16 = 0;

    loop {
        let packet = transport.read_packet(timeout)?;
        let channel = u16::from_be_bytes([packet[0], packet[1]]);
        let seq = u16::from_be_bytes([packet[3], packet[4]]);
        if channel != CHANNEL || packet[2] != TAG_APDU || seq != sequence {
            return Err(CosignError::Protocol(format!(
                "Unexpected Ledger packet header (channel {:#06x}, tag {:#04x}, seq {})",
                channel, packet[2], seq
            )));
        }

        let payload = if sequence == 0 {
            expected_len = Some(u16::from_be_bytes([packet[5], packet[6]]) as usize);
            &packet[7..]
        } else {
            &packet[5..]
        };
        raw.extend_from_slice(payload);
        sequence = sequence.wrapping_add(1);

        if let Some(len) = expected_len {
            if raw.len() >= len {
                raw.truncate(len);
                return ApduResponse::from_raw(raw);
            }
        }
    }
}

/// Send one APDU and wait for its response
pub fn exchange<T: Transport + ?Sized>(
    transport: &mut T,
    apdu: &Apdu,
    timeout: Duration,
) -> Result<ApduResponse> {
    log::debug!(
        "➡️  APDU ins={:#04x} p1={:#04x} len={}",
        apdu.ins,
        apdu.p1,
        apdu.data.len()
    );
    for packet in wrap_command(&apdu.serialize()?) {
        transport.write_packet(&packet)?;
    }
    let response = read_response(transport, timeout)?;
    log::debug!("⬅️  status={:#06x} len={}", response.status, response.data.len());
    Ok(response)
}
