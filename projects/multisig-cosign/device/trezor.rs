//! Trezor and KeepKey signers (protobuf wire protocol)

use std::time::Duration;

use ethereum_types::{Address, U256};
use ethers_core::types::Signature;
use ethers_core::utils::to_checksum;
use prost::Message as _;

use crate::chains::ethereum::transaction::{normalize_v, u256_to_be_vec};
use crate::chains::ethereum::{parse_address, DerivationPath, UnsignedTransaction};
use crate::errors::{CosignError, Result};
use crate::features::{convert_features_to_device_features, DeviceFeatures, DeviceKind};
use crate::messages::{
    ButtonAck, Cancel, EthereumAddress, EthereumGetAddress, EthereumSignTx, EthereumTxAck,
    Failure, GetFeatures, Initialize, KeepKeyEthereumSignTx, Message, PassphraseAck, PinMatrixAck,
    FAILURE_ACTION_CANCELLED, FAILURE_PIN_CANCELLED, KEEPKEY_ETHEREUM_SIGN_TX,
};
use crate::prompt::Prompt;
use crate::protocol::trezor_wire::{read_message, write_message, write_raw};
use crate::transport::Transport;

use super::HardwareSigner;

/// Calldata bytes carried by `EthereumSignTx` itself; the rest is streamed
/// on request
pub const INITIAL_DATA_CHUNK: usize = 1024;

pub struct TrezorDevice<T: Transport> {
    transport: T,
    kind: DeviceKind,
    prompt: Box<dyn Prompt>,
    timeout: Duration,
}

impl<T: Transport> TrezorDevice<T> {
    pub fn new(transport: T, kind: DeviceKind, prompt: Box<dyn Prompt>, timeout: Duration) -> Self {
        Self {
            transport,
            kind,
            prompt,
            timeout,
        }
    }

    /// Start a fresh session and read the device features
    pub fn initialize(&mut self) -> Result<DeviceFeatures> {
        let response = self.call(Message::Initialize(Initialize::default()))?;
        let features = expect_features(response)?;
        log::info!(
            "📱 {} firmware {} (label: {})",
            self.kind,
            features.version,
            features.label.as_deref().unwrap_or("-")
        );
        Ok(features)
    }

    fn call(&mut self, message: Message) -> Result<Message> {
        log::debug!("➡️  {}", message.name());
        self.call_raw(message.message_type(), message.encode_body())
    }

    /// Send one request and answer every interactive message the device
    /// interjects until it sends a real response
    fn call_raw(&mut self, message_type: u16, body: Vec<u8>) -> Result<Message> {
        write_raw(&mut self.transport, message_type, &body)?;

        loop {
            let next = match read_message(&mut self.transport, self.timeout)? {
                Message::ButtonRequest(request) => {
                    log::info!("👆 Confirm on the {} (button request {})", self.kind, request.code());
                    Message::ButtonAck(ButtonAck::default())
                }
                Message::PinMatrixRequest(_) => match self.prompt.ask_pin() {
                    Ok(pin) => Message::PinMatrixAck(PinMatrixAck { pin: Some(pin) }),
                    Err(e) => return Err(self.cancel(e)),
                },
                Message::PassphraseRequest(request) => {
                    if request.on_device() {
                        log::info!("⌨️  Enter the passphrase on the {}", self.kind);
                        Message::PassphraseAck(PassphraseAck::default())
                    } else {
                        match self.prompt.ask_secret("Passphrase") {
                            Ok(passphrase) => Message::PassphraseAck(PassphraseAck {
                                passphrase: Some(passphrase),
                                on_device: None,
                            }),
                            Err(e) => return Err(self.cancel(e)),
                        }
                    }
                }
                Message::Failure(failure) => return Err(failure_error(failure)),
                response => return Ok(response),
            };
            write_message(&mut self.transport, &next)?;
        }
    }

    /// Abort the pending request after a local error. The device answers
    /// `Cancel` with a `Failure`, which is read here so it cannot leak into
    /// the next call.
    fn cancel(&mut self, error: CosignError) -> CosignError {
        if let Err(e) = write_message(&mut self.transport, &Message::Cancel(Cancel::default())) {
            log::warn!("Failed to cancel pending device request: {}", e);
            return error;
        }
        match read_message(&mut self.transport, self.timeout) {
            Ok(reply) => log::debug!("Device answered cancel with {}", reply.name()),
            Err(e) => log::debug!("No reply to cancel: {}", e),
        }
        error
    }
}

impl<T: Transport> HardwareSigner for TrezorDevice<T> {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn get_address(&mut self, path: &DerivationPath, display: bool) -> Result<Address> {
        let response = self.call(Message::EthereumGetAddress(EthereumGetAddress {
            address_n: path.components().to_vec(),
            show_display: Some(display),
        }))?;
        match response {
            Message::EthereumAddress(address) => device_address(&address),
            other => Err(unexpected(other, "EthereumAddress")),
        }
    }

    fn sign_transaction(
        &mut self,
        path: &DerivationPath,
        transaction: &UnsignedTransaction,
    ) -> Result<Signature> {
        let body = encode_sign_request(self.kind, path, transaction)?;
        let initial = transaction.data.len().min(INITIAL_DATA_CHUNK);
        let mut remaining = &transaction.data[initial..];

        log::info!("✍️  Review and approve the transaction on the {}", self.kind);
        let mut response = self.call_raw(KEEPKEY_ETHEREUM_SIGN_TX, body)?;
        loop {
            let request = match response {
                Message::EthereumTxRequest(request) => request,
                other => return Err(unexpected(other, "EthereumTxRequest")),
            };

            if let (Some(r), Some(s)) = (&request.signature_r, &request.signature_s) {
                return Ok(Signature {
                    r: word(r)?,
                    s: word(s)?,
                    v: normalize_v(request.signature_v() as u64, transaction.chain_id)?,
                });
            }

            let requested = request.data_length() as usize;
            if requested == 0 || requested > remaining.len() {
                return Err(CosignError::Protocol(format!(
                    "Device requested {} data bytes, {} left",
                    requested,
                    remaining.len()
                )));
            }
            let (chunk, rest) = remaining.split_at(requested);
            remaining = rest;
            response = self.call(Message::EthereumTxAck(EthereumTxAck {
                data_chunk: Some(chunk.to_vec()),
            }))?;
        }
    }

    fn features(&mut self) -> Result<DeviceFeatures> {
        let response = self.call(Message::GetFeatures(GetFeatures::default()))?;
        expect_features(response)
    }
}

/// `EthereumSignTx` body in the vendor's field layout. Both vendors use
/// message type 58.
pub fn encode_sign_request(
    kind: DeviceKind,
    path: &DerivationPath,
    transaction: &UnsignedTransaction,
) -> Result<Vec<u8>> {
    let initial = transaction.data.len().min(INITIAL_DATA_CHUNK);
    let data_length = u32::try_from(transaction.data.len())
        .map_err(|_| CosignError::InvalidInput("Calldata too large".to_string()))?;

    let body = match kind {
        DeviceKind::KeepKey => {
            let chain_id = u32::try_from(transaction.chain_id).map_err(|_| {
                CosignError::InvalidInput(format!(
                    "KeepKey cannot sign for chain id {}",
                    transaction.chain_id
                ))
            })?;
            KeepKeyEthereumSignTx {
                address_n: path.components().to_vec(),
                nonce: Some(u256_to_be_vec(&transaction.nonce)),
                gas_price: Some(u256_to_be_vec(&transaction.gas_price)),
                gas_limit: Some(u256_to_be_vec(&transaction.gas_limit)),
                to: Some(transaction.to.as_bytes().to_vec()),
                value: Some(u256_to_be_vec(&transaction.value)),
                data_initial_chunk: Some(transaction.data[..initial].to_vec()),
                data_length: Some(data_length),
                chain_id: Some(chain_id),
            }
            .encode_to_vec()
        }
        DeviceKind::Trezor => EthereumSignTx {
            address_n: path.components().to_vec(),
            nonce: Some(u256_to_be_vec(&transaction.nonce)),
            gas_price: Some(u256_to_be_vec(&transaction.gas_price)),
            gas_limit: Some(u256_to_be_vec(&transaction.gas_limit)),
            value: Some(u256_to_be_vec(&transaction.value)),
            data_initial_chunk: Some(transaction.data[..initial].to_vec()),
            data_length: Some(data_length),
            chain_id: Some(transaction.chain_id),
            to: Some(to_checksum(&transaction.to, None)),
        }
        .encode_to_vec(),
        DeviceKind::Ledger => {
            return Err(CosignError::InvalidInput(
                "Ledger does not speak the Trezor wire protocol".to_string(),
            ))
        }
    };
    Ok(body)
}

fn expect_features(response: Message) -> Result<DeviceFeatures> {
    match response {
        Message::Features(features) => Ok(convert_features_to_device_features(features)),
        other => Err(unexpected(other, "Features")),
    }
}

/// Trezor reports a hex string, KeepKey 20 raw bytes
fn device_address(address: &EthereumAddress) -> Result<Address> {
    match (&address.address, &address.address_bytes) {
        (Some(text), _) if !text.is_empty() => parse_address(text),
        (_, Some(bytes)) if bytes.len() == 20 => Ok(Address::from_slice(bytes)),
        _ => Err(CosignError::Protocol(
            "Device returned an empty address".to_string(),
        )),
    }
}

fn failure_error(failure: Failure) -> CosignError {
    match failure.code() {
        FAILURE_ACTION_CANCELLED | FAILURE_PIN_CANCELLED => CosignError::UserCancelled,
        code => CosignError::DeviceFailure {
            code,
            message: failure.message().to_string(),
        },
    }
}

fn unexpected(message: Message, expected: &str) -> CosignError {
    CosignError::Protocol(format!("Expected {}, device sent {}", expected, message.name()))
}

fn word(bytes: &[u8]) -> Result<U256> {
    if bytes.len() > 32 {
        return Err(CosignError::Protocol(format!(
            "Signature component is {} bytes",
            bytes.len()
        )));
    }
    Ok(U256::from_big_endian(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;
    use crate::messages::{ButtonRequest, EthereumTxRequest, Features, PassphraseRequest, PinMatrixRequest};
    use crate::prompt::ScriptedPrompt;
    use crate::protocol::trezor_wire::{encode_packets, read_raw};
    use crate::transport::mock::MockTransport;
    use crate::transport::Packet;

    fn reply(message: Message) -> Vec<Packet> {
        encode_packets(message.message_type(), &message.encode_body())
    }

    fn device(kind: DeviceKind, replies: Vec<Message>, answers: Vec<&str>) -> TrezorDevice<MockTransport> {
        let packets = replies.into_iter().flat_map(reply).collect();
        TrezorDevice::new(
            MockTransport::with_reads(packets),
            kind,
            Box::new(ScriptedPrompt::new(answers)),
            Duration::from_secs(1),
        )
    }

    /// Messages the host wrote, as (type, body)
    fn sent(device: &TrezorDevice<MockTransport>) -> Vec<(u16, Vec<u8>)> {
        let mut replay = MockTransport::with_reads(device.transport.written.clone());
        let mut out = Vec::new();
        while !replay.to_read.is_empty() {
            out.push(read_raw(&mut replay, Duration::from_secs(1)).unwrap());
        }
        out
    }

    fn signature_reply() -> Message {
        Message::EthereumTxRequest(EthereumTxRequest {
            data_length: None,
            signature_v: Some(38),
            signature_r: Some(vec![0x11; 32]),
            signature_s: Some(vec![0x22; 32]),
        })
    }

    fn transaction(data_len: usize) -> UnsignedTransaction {
        UnsignedTransaction {
            nonce: U256::from(3),
            gas_price: U256::from(20_000_000_000u64),
            gas_limit: U256::from(200_000),
            to: "0x16A0772b17AE004E6645E0e95BF50aD69498a34e".parse().unwrap(),
            value: U256::zero(),
            data: vec![0xab; data_len],
            chain_id: 1,
        }
    }

    #[test]
    fn test_initialize_reads_features() {
        let mut trezor = device(
            DeviceKind::Trezor,
            vec![Message::Features(Features {
                major_version: Some(1),
                minor_version: Some(12),
                patch_version: Some(1),
                ..Default::default()
            })],
            vec![],
        );
        assert_eq!(trezor.initialize().unwrap().version, "1.12.1");
        assert_eq!(sent(&trezor)[0].0, 0);
    }

    #[test]
    fn test_get_address_string_and_bytes() {
        let expected: Address = "0x16A0772b17AE004E6645E0e95BF50aD69498a34e".parse().unwrap();
        let mut trezor = device(
            DeviceKind::Trezor,
            vec![Message::EthereumAddress(EthereumAddress {
                address_bytes: None,
                address: Some("0x16A0772b17AE004E6645E0e95BF50aD69498a34e".to_string()),
            })],
            vec![],
        );
        assert_eq!(trezor.get_address(&DerivationPath::default(), false).unwrap(), expected);

        let mut keepkey = device(
            DeviceKind::KeepKey,
            vec![Message::EthereumAddress(EthereumAddress {
                address_bytes: Some(expected.as_bytes().to_vec()),
                address: None,
            })],
            vec![],
        );
        assert_eq!(keepkey.get_address(&DerivationPath::default(), true).unwrap(), expected);
        let (message_type, body) = &sent(&keepkey)[0];
        assert_eq!(*message_type, 56);
        let request = EthereumGetAddress::decode(body.as_slice()).unwrap();
        assert_eq!(request.show_display, Some(true));
        assert_eq!(request.address_n, DerivationPath::default().components());
    }

    #[test]
    fn test_trezor_sign_with_button_request() {
        let mut trezor = device(
            DeviceKind::Trezor,
            vec![
                Message::ButtonRequest(ButtonRequest { code: Some(1) }),
                signature_reply(),
            ],
            vec![],
        );
        let tx = transaction(36);
        let signature = trezor.sign_transaction(&DerivationPath::default(), &tx).unwrap();
        assert_eq!(signature.v, 38);
        assert_eq!(signature.r, U256::from_big_endian(&[0x11; 32]));
        assert_eq!(signature.s, U256::from_big_endian(&[0x22; 32]));

        let sent = sent(&trezor);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, 58);
        assert_eq!(sent[1].0, 27);
        let request = EthereumSignTx::decode(sent[0].1.as_slice()).unwrap();
        assert_eq!(request.to.as_deref(), Some("0x16A0772b17AE004E6645E0e95BF50aD69498a34e"));
        assert_eq!(request.chain_id, Some(1));
        assert_eq!(request.nonce, Some(vec![3]));
        assert_eq!(request.value, Some(vec![]));
        assert_eq!(request.data_length, Some(36));
    }

    #[test]
    fn test_keepkey_layout_and_data_streaming() {
        let mut keepkey = device(
            DeviceKind::KeepKey,
            vec![
                Message::EthereumTxRequest(EthereumTxRequest {
                    data_length: Some(476),
                    ..Default::default()
                }),
                signature_reply(),
            ],
            vec![],
        );
        let tx = transaction(1500);
        keepkey.sign_transaction(&DerivationPath::default(), &tx).unwrap();

        let sent = sent(&keepkey);
        let request = KeepKeyEthereumSignTx::decode(sent[0].1.as_slice()).unwrap();
        assert_eq!(request.to, Some(tx.to.as_bytes().to_vec()));
        assert_eq!(request.chain_id, Some(1));
        assert_eq!(request.data_initial_chunk.as_ref().map(Vec::len), Some(1024));
        assert_eq!(request.data_length, Some(1500));

        assert_eq!(sent[1].0, 60);
        let ack = EthereumTxAck::decode(sent[1].1.as_slice()).unwrap();
        assert_eq!(ack.data_chunk.map(|c| c.len()), Some(476));
    }

    #[test]
    fn test_device_asking_for_too_much_data_is_error() {
        let mut trezor = device(
            DeviceKind::Trezor,
            vec![Message::EthereumTxRequest(EthereumTxRequest {
                data_length: Some(64),
                ..Default::default()
            })],
            vec![],
        );
        let result = trezor.sign_transaction(&DerivationPath::default(), &transaction(36));
        assert!(matches!(result, Err(CosignError::Protocol(_))));
    }

    #[test]
    fn test_pin_request_prompts_operator() {
        let mut trezor = device(
            DeviceKind::Trezor,
            vec![
                Message::PinMatrixRequest(PinMatrixRequest { r#type: Some(1) }),
                signature_reply(),
            ],
            vec!["7913"],
        );
        trezor
            .sign_transaction(&DerivationPath::default(), &transaction(4))
            .unwrap();
        let sent = sent(&trezor);
        assert_eq!(sent[1].0, 19);
        let ack = PinMatrixAck::decode(sent[1].1.as_slice()).unwrap();
        assert_eq!(ack.pin.as_deref(), Some("7913"));
    }

    #[test]
    fn test_passphrase_request_prompts_operator() {
        let mut trezor = device(
            DeviceKind::Trezor,
            vec![
                Message::PassphraseRequest(PassphraseRequest { on_device: Some(false) }),
                signature_reply(),
            ],
            vec!["correct horse"],
        );
        trezor
            .sign_transaction(&DerivationPath::default(), &transaction(4))
            .unwrap();
        let sent = sent(&trezor);
        assert_eq!(sent[1].0, 42);
        let ack = PassphraseAck::decode(sent[1].1.as_slice()).unwrap();
        assert_eq!(ack.passphrase.as_deref(), Some("correct horse"));

        let mut keepkey = device(
            DeviceKind::KeepKey,
            vec![
                Message::PassphraseRequest(PassphraseRequest { on_device: Some(true) }),
                signature_reply(),
            ],
            vec![],
        );
        keepkey
            .sign_transaction(&DerivationPath::default(), &transaction(4))
            .unwrap();
        let sent = self::sent(&keepkey);
        assert_eq!(sent[1].0, 42);
        let ack = PassphraseAck::decode(sent[1].1.as_slice()).unwrap();
        assert_eq!(ack.passphrase, None);
    }

    #[test]
    fn test_prompt_failure_cancels_request() {
        let mut trezor = device(
            DeviceKind::Trezor,
            vec![
                Message::PassphraseRequest(PassphraseRequest { on_device: Some(false) }),
                Message::Failure(Failure {
                    code: Some(FAILURE_ACTION_CANCELLED),
                    message: Some("Cancelled".to_string()),
                }),
            ],
            vec![],
        );
        let result = trezor.sign_transaction(&DerivationPath::default(), &transaction(4));
        assert!(matches!(result, Err(CosignError::InvalidInput(_))));

        let sent = sent(&trezor);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].0, 20);
        // the device's reply to Cancel was consumed
        assert!(trezor.transport.to_read.is_empty());
    }

    #[test]
    fn test_cancelled_on_device() {
        let mut trezor = device(
            DeviceKind::Trezor,
            vec![Message::Failure(Failure {
                code: Some(FAILURE_ACTION_CANCELLED),
                message: Some("Signing cancelled".to_string()),
            })],
            vec![],
        );
        let result = trezor.sign_transaction(&DerivationPath::default(), &transaction(36));
        assert!(matches!(result, Err(CosignError::UserCancelled)));
    }

    #[test]
    fn test_other_failure_keeps_code() {
        let mut trezor = device(
            DeviceKind::Trezor,
            vec![Message::Failure(Failure {
                code: Some(99),
                message: Some("Firmware error".to_string()),
            })],
            vec![],
        );
        match trezor.get_address(&DerivationPath::default(), false) {
            Err(CosignError::DeviceFailure { code, message }) => {
                assert_eq!(code, 99);
                assert_eq!(message, "Firmware error");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_keepkey_rejects_wide_chain_id() {
        let mut tx = transaction(0);
        tx.chain_id = u64::from(u32::MAX) + 1;
        assert!(encode_sign_request(DeviceKind::KeepKey, &DerivationPath::default(), &tx).is_err());
        assert!(encode_sign_request(DeviceKind::Trezor, &DerivationPath::default(), &tx).is_ok());
    }
}
