//! Trezor wire protocol v1 framing
//!
//! First packet:
//!
//! ```text
//! +-----+---------------------+----------------------+-------------------+
//! | ?## | message type (u16)  | payload length (u32) | payload + padding |
//! +-----+---------------------+----------------------+-------------------+
//! ```
//!
//! Continuation packets carry `?` followed by 63 bytes of payload.

use std::time::Duration;

use crate::errors::{CosignError, Result};
use crate::messages::Message;
use crate::transport::{Packet, Transport, PACKET_SIZE};

const HEADER_LEN: usize = 9;

/// Largest message body accepted from a device
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Split a message body into wire packets
pub fn encode_packets(message_type: u16, body: &[u8]) -> Vec<Packet> {
    let mut stream = Vec::with_capacity(body.len() + 8);
    stream.extend_from_slice(b"##");
    stream.extend_from_slice(&message_type.to_be_bytes());
    stream.extend_from_slice(&(body.len() as u32).to_be_bytes());
    stream.extend_from_slice(body);

    stream
        .chunks(PACKET_SIZE - 1)
        .map(|chunk| {
            let mut packet = [0u8; PACKET_SIZE];
            packet[0] = b'?';
            packet[1..=chunk.len()].copy_from_slice(chunk);
            packet
        })
        .collect()
}

/// Write one raw message body to the transport
pub fn write_raw<T: Transport + ?Sized>(
    transport: &mut T,
    message_type: u16,
    body: &[u8],
) -> Result<()> {
    for packet in encode_packets(message_type, body) {
        transport.write_packet(&packet)?;
    }
    Ok(())
}

/// Read one complete message (type and body) from the transport
pub fn read_raw<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
) -> Result<(u16, Vec<u8>)> {
    let first = transport.read_packet(timeout)?;
    if &first[..3] != b"?##" {
        return Err(CosignError::Protocol(
            "Unexpected wire response from device".to_string(),
        ));
    }

    let message_type = u16::from_be_bytes([first[3], first[4]]);
    let length = u32::from_be_bytes([first[5], first[6], first[7], first[8]]) as usize;
    if length > MAX_MESSAGE_LEN {
        return Err(CosignError::Protocol(format!(
            "Device announced a {} byte message (max {})",
            length, MAX_MESSAGE_LEN
        )));
    }

    let mut body = Vec::with_capacity(length);
    body.extend_from_slice(&first[HEADER_LEN..]);
    while body.len() < length {
        let packet = transport.read_packet(timeout)?;
        if packet[0] != b'?' {
            return Err(CosignError::Protocol(
                "Malformed continuation packet".to_string(),
            ));
        }
        body.extend_from_slice(&packet[1..]);
    }
    body.truncate(length);

    Ok((message_type, body))
}

pub fn write_message<T: Transport + ?Sized>(transport: &mut T, message: &Message) -> Result<()> {
    log::debug!("➡️  {} ({})", message.name(), message.message_type());
    write_raw(transport, message.message_type(), &message.encode_body())
}

pub fn read_message<T: Transport + ?Sized>(transport: &mut T, timeout: Duration) -> Result<Message> {
    let (message_type, body) = read_raw(transport, timeout)?;
    let message = Message::decode(message_type, &body)?;
    log::debug!("⬅️  {} ({})", message.name(), message_type);
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{EthereumTxAck, Failure};
    use crate::transport::mock::MockTransport;

    #[test]
    fn test_small_message_fits_one_packet() {
        let packets = encode_packets(27, &[]);
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..9], b"?##\x00\x1b\x00\x00\x00\x00");
        assert!(packets[0][9..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_large_message_spans_packets() {
        let body: Vec<u8> = (0..200u8).collect();
        let packets = encode_packets(60, &body);
        // 8 header bytes + 200 body bytes over 63-byte payloads
        assert_eq!(packets.len(), 4);
        assert!(packets.iter().all(|p| p[0] == b'?'));
        assert_eq!(packets[0][9], 0);
        assert_eq!(packets[1][1], 55);
    }

    #[test]
    fn test_write_then_read_message() {
        let ack = Message::EthereumTxAck(EthereumTxAck {
            data_chunk: Some(vec![0xab; 300]),
        });
        let mut writer = MockTransport::default();
        write_message(&mut writer, &ack).unwrap();

        let mut reader = MockTransport::with_reads(writer.written.clone());
        let decoded = read_message(&mut reader, Duration::from_secs(1)).unwrap();
        assert_eq!(decoded, ack);
        assert!(reader.to_read.is_empty());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut packet = encode_packets(3, &[])[0];
        packet[1] = b'x';
        let mut reader = MockTransport::with_reads(vec![packet]);
        assert!(matches!(
            read_raw(&mut reader, Duration::from_secs(1)),
            Err(CosignError::Protocol(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_length() {
        let mut packet = encode_packets(3, &[])[0];
        packet[5..9].copy_from_slice(&u32::MAX.to_be_bytes());
        let mut reader = MockTransport::with_reads(vec![packet]);
        assert!(matches!(
            read_raw(&mut reader, Duration::from_secs(1)),
            Err(CosignError::Protocol(_))
        ));
    }

    #[test]
    fn test_decodes_failure_body() {
        let failure = Message::Failure(Failure {
            code: Some(4),
            message: Some("Action cancelled by user".to_string()),
        });
        let mut reader = MockTransport::with_reads(encode_packets(3, &failure.encode_body()));
        assert_eq!(read_message(&mut reader, Duration::from_secs(1)).unwrap(), failure);
    }
}
