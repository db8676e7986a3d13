//! Ledger Ethereum app signer (APDU over HID)

use std::time::Duration;

use ethereum_types::{Address, U256};
use ethers_core::types::Signature;
use ethers_core::utils::rlp;

use crate::chains::ethereum::transaction::ledger_v;
use crate::chains::ethereum::{parse_address, DerivationPath, UnsignedTransaction};
use crate::errors::{CosignError, Result};
use crate::features::{DeviceFeatures, DeviceKind};
use crate::protocol::ledger_apdu::{exchange, Apdu};
use crate::transport::Transport;

use super::HardwareSigner;

const CLA: u8 = 0xe0;
const INS_GET_ADDRESS: u8 = 0x02;
const INS_SIGN: u8 = 0x04;
const INS_GET_APP_CONFIGURATION: u8 = 0x06;

const P1_FIRST_CHUNK: u8 = 0x00;
const P1_MORE_CHUNKS: u8 = 0x80;

/// Bytes of APDU data per signing chunk
pub const SIGN_CHUNK_SIZE: usize = 150;

/// Ethereum app configuration flags
const FLAG_CONTRACT_DATA: u8 = 0x01;

pub struct LedgerDevice<T: Transport> {
    transport: T,
    timeout: Duration,
}

/// What `GET_APP_CONFIGURATION` reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfiguration {
    pub contract_data_enabled: bool,
    pub version: String,
}

impl<T: Transport> LedgerDevice<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    fn send(&mut self, apdu: &Apdu) -> Result<Vec<u8>> {
        exchange(&mut self.transport, apdu, self.timeout)?.into_result()
    }

    pub fn app_configuration(&mut self) -> Result<AppConfiguration> {
        let response = self.send(&Apdu {
            cla: CLA,
            ins: INS_GET_APP_CONFIGURATION,
            p1: 0,
            p2: 0,
            data: vec![],
        })?;
        if response.len() < 4 {
            return Err(CosignError::Protocol(format!(
                "App configuration is {} bytes",
                response.len()
            )));
        }
        Ok(AppConfiguration {
            contract_data_enabled: response[0] & FLAG_CONTRACT_DATA != 0,
            version: format!("{}.{}.{}", response[1], response[2], response[3]),
        })
    }
}

impl<T: Transport> HardwareSigner for LedgerDevice<T> {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Ledger
    }

    fn get_address(&mut self, path: &DerivationPath, display: bool) -> Result<Address> {
        let response = self.send(&Apdu {
            cla: CLA,
            ins: INS_GET_ADDRESS,
            p1: u8::from(display),
            p2: 0,
            data: path.to_ledger_bytes(),
        })?;
        parse_address_response(&response)
    }

    fn sign_transaction(
        &mut self,
        path: &DerivationPath,
        transaction: &UnsignedTransaction,
    ) -> Result<Signature> {
        let payload = transaction.rlp_unsigned();
        let tail_len = eip155_tail_len(transaction.chain_id);
        let apdus = sign_apdus(path, &payload, tail_len);
        log::debug!("✍️  Sending {} signing chunk(s)", apdus.len());
        log::info!("✍️  Review and approve the transaction on the Ledger");

        let mut response = Vec::new();
        for apdu in &apdus {
            response = self.send(apdu)?;
        }
        if response.len() < 65 {
            return Err(CosignError::Protocol(format!(
                "Signature response is {} bytes",
                response.len()
            )));
        }

        Ok(Signature {
            v: ledger_v(response[0], transaction.chain_id)?,
            r: U256::from_big_endian(&response[1..33]),
            s: U256::from_big_endian(&response[33..65]),
        })
    }

    fn features(&mut self) -> Result<DeviceFeatures> {
        let config = self.app_configuration()?;
        Ok(DeviceFeatures {
            vendor: Some("Ledger".to_string()),
            version: config.version,
            initialized: true,
            contract_data_enabled: Some(config.contract_data_enabled),
            ..Default::default()
        })
    }
}

/// Length of the RLP-encoded `[chain_id, 0, 0]` that ends the signing payload
pub fn eip155_tail_len(chain_id: u64) -> usize {
    rlp::encode(&chain_id).len() + 2
}

/// Split a signing payload into `SIGN` APDUs. The first chunk starts with the
/// derivation path and the trailing `tail_len` bytes always travel together.
pub fn sign_apdus(path: &DerivationPath, payload: &[u8], tail_len: usize) -> Vec<Apdu> {
    let tail_start = payload.len().saturating_sub(tail_len);
    let mut apdus = Vec::new();
    let mut offset = 0;

    while offset < payload.len() || apdus.is_empty() {
        let first = apdus.is_empty();
        let mut data = if first { path.to_ledger_bytes() } else { Vec::new() };

        let mut end = (offset + SIGN_CHUNK_SIZE - data.len()).min(payload.len());
        if end < payload.len() && end > tail_start && tail_start > offset {
            end = tail_start;
        }
        data.extend_from_slice(&payload[offset..end]);

        apdus.push(Apdu {
            cla: CLA,
            ins: INS_SIGN,
            p1: if first { P1_FIRST_CHUNK } else { P1_MORE_CHUNKS },
            p2: 0,
            data,
        });
        offset = end;
    }
    apdus
}

/// `pk_len | pubkey | addr_len | ascii hex address`
fn parse_address_response(response: &[u8]) -> Result<Address> {
    let short = || CosignError::Protocol("Truncated address response".to_string());

    let pk_len = *response.first().ok_or_else(short)? as usize;
    let addr_len = *response.get(1 + pk_len).ok_or_else(short)? as usize;
    let start = 2 + pk_len;
    let ascii = response.get(start..start + addr_len).ok_or_else(short)?;
    let text = std::str::from_utf8(ascii)
        .map_err(|_| CosignError::Protocol("Address is not ASCII".to_string()))?;
    parse_address(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ledger_apdu::{read_response, wrap_command};
    use crate::transport::mock::MockTransport;

    fn device(responses: Vec<Vec<u8>>) -> LedgerDevice<MockTransport> {
        let packets = responses.iter().flat_map(|r| wrap_command(r)).collect();
        LedgerDevice::new(MockTransport::with_reads(packets), Duration::from_secs(1))
    }

    fn ok(mut data: Vec<u8>) -> Vec<u8> {
        data.extend_from_slice(&[0x90, 0x00]);
        data
    }

    fn transaction(chain_id: u64) -> UnsignedTransaction {
        UnsignedTransaction {
            nonce: U256::from(1),
            gas_price: U256::from(1_000_000_000u64),
            gas_limit: U256::from(200_000),
            to: "0x16A0772b17AE004E6645E0e95BF50aD69498a34e".parse().unwrap(),
            value: U256::zero(),
            data: hex::decode(
                "c01a8c84000000000000000000000000000000000000000000000000000000000000006a",
            )
            .unwrap(),
            chain_id,
        }
    }

    #[test]
    fn test_short_payload_single_apdu() {
        let path = DerivationPath::default();
        let apdus = sign_apdus(&path, &[0xaa; 80], 3);
        assert_eq!(apdus.len(), 1);
        assert_eq!(apdus[0].p1, P1_FIRST_CHUNK);
        assert_eq!(&apdus[0].data[..21], path.to_ledger_bytes().as_slice());
        assert_eq!(apdus[0].data.len(), 101);
    }

    #[test]
    fn test_long_payload_is_chunked() {
        let path = DerivationPath::default();
        let payload: Vec<u8> = (0..400u32).map(|i| i as u8).collect();
        let apdus = sign_apdus(&path, &payload, 3);
        assert_eq!(apdus.len(), 3);
        assert_eq!(apdus[0].data.len(), SIGN_CHUNK_SIZE);
        assert!(apdus[1..].iter().all(|a| a.p1 == P1_MORE_CHUNKS));
        let rejoined: Vec<u8> = apdus
            .iter()
            .enumerate()
            .flat_map(|(i, a)| if i == 0 { a.data[21..].to_vec() } else { a.data.clone() })
            .collect();
        assert_eq!(rejoined, payload);
    }

    #[test]
    fn test_chain_id_tail_not_split() {
        let path = DerivationPath::default();
        // 129 bytes fit next to the path; the 3-byte tail starts at 127
        let apdus = sign_apdus(&path, &[0x01; 130], 3);
        assert_eq!(apdus.len(), 2);
        assert_eq!(apdus[0].data.len(), 21 + 127);
        assert_eq!(apdus[1].data.len(), 3);
    }

    #[test]
    fn test_tail_len() {
        assert_eq!(eip155_tail_len(1), 3);
        assert_eq!(eip155_tail_len(137), 4);
        assert_eq!(eip155_tail_len(11155111), 6);
    }

    #[test]
    fn test_get_address() {
        let mut response = vec![65];
        response.extend_from_slice(&[0x04; 65]);
        response.push(40);
        response.extend_from_slice(b"16A0772b17AE004E6645E0e95BF50aD69498a34e");
        let mut ledger = device(vec![ok(response)]);

        let address = ledger.get_address(&DerivationPath::default(), true).unwrap();
        assert_eq!(
            address,
            "0x16A0772b17AE004E6645E0e95BF50aD69498a34e".parse::<Address>().unwrap()
        );

        let mut written = MockTransport::with_reads(ledger.transport.written.clone());
        let command = read_response(&mut written, Duration::from_secs(1)).unwrap();
        // Commands reuse the response framing; the "status" is the last path bytes
        assert_eq!(command.data[..4], [CLA, INS_GET_ADDRESS, 0x01, 0x00]);
    }

    #[test]
    fn test_sign_recovers_truncated_v() {
        let mut signature = vec![54];
        signature.extend_from_slice(&[0x11; 32]);
        signature.extend_from_slice(&[0x22; 32]);
        let mut ledger = device(vec![ok(signature)]);

        let result = ledger
            .sign_transaction(&DerivationPath::default(), &transaction(137))
            .unwrap();
        assert_eq!(result.v, 310);
        assert_eq!(result.r, U256::from_big_endian(&[0x11; 32]));
    }

    #[test]
    fn test_rejected_on_device() {
        let mut ledger = device(vec![vec![0x69, 0x85]]);
        let result = ledger.sign_transaction(&DerivationPath::default(), &transaction(1));
        assert!(matches!(result, Err(CosignError::UserCancelled)));
    }

    #[test]
    fn test_app_configuration() {
        let mut ledger = device(vec![ok(vec![0x01, 1, 10, 3])]);
        let features = ledger.features().unwrap();
        assert_eq!(features.version, "1.10.3");
        assert_eq!(features.contract_data_enabled, Some(true));

        let mut disabled = device(vec![ok(vec![0x00, 1, 9, 0])]);
        assert!(!disabled.app_configuration().unwrap().contract_data_enabled);
    }
}
