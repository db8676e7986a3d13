//! Legacy (pre-EIP-2718) Ethereum transactions with EIP-155 replay protection

use ethereum_types::{Address, H256, U256};
use ethers_core::types::{RecoveryMessage, Signature};
use ethers_core::utils::{keccak256, rlp::RlpStream};
use serde::Serialize;

use crate::errors::{CosignError, Result};

/// Unsigned legacy transaction as handed to the signing device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub to: Address,
    pub value: U256,
    #[serde(serialize_with = "serialize_hex")]
    pub data: Vec<u8>,
    pub chain_id: u64,
}

fn serialize_hex<S: serde::Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
}

impl UnsignedTransaction {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data);
    }

    /// EIP-155 signing payload: `[nonce, gasPrice, gas, to, value, data, chainId, 0, 0]`
    pub fn rlp_unsigned(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        stream.out().to_vec()
    }

    /// Digest the device signs
    pub fn sighash(&self) -> H256 {
        H256::from(keccak256(self.rlp_unsigned()))
    }

    /// Signed wire encoding: `[nonce, gasPrice, gas, to, value, data, v, r, s]`
    pub fn rlp_signed(&self, signature: &Signature) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&signature.v);
        stream.append(&signature.r);
        stream.append(&signature.s);
        stream.out().to_vec()
    }

    /// Assemble the broadcastable transaction, checking that the signature
    /// was produced by `expected_signer`
    pub fn into_signed(self, signature: Signature, expected_signer: Address) -> Result<SignedTransaction> {
        let recovered = signature
            .recover(RecoveryMessage::Hash(self.sighash()))
            .map_err(|e| CosignError::Protocol(format!("Unrecoverable signature: {}", e)))?;
        if recovered != expected_signer {
            return Err(CosignError::SignatureMismatch {
                expected: expected_signer,
                recovered,
            });
        }

        let raw = self.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        Ok(SignedTransaction {
            unsigned: self,
            signature,
            raw,
            hash,
        })
    }
}

/// A device-signed transaction ready for `eth_sendRawTransaction`
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub unsigned: UnsignedTransaction,
    pub signature: Signature,
    pub raw: Vec<u8>,
    pub hash: H256,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

/// Largest chain id whose EIP-155 `v` values (`chain_id * 2 + 35 + parity`) fit in a u64
pub const MAX_CHAIN_ID: u64 = (u64::MAX - 36) / 2;

pub fn check_chain_id(chain_id: u64) -> Result<u64> {
    if chain_id > MAX_CHAIN_ID {
        return Err(CosignError::InvalidInput(format!(
            "Chain id {} is too large for EIP-155 (max {})",
            chain_id, MAX_CHAIN_ID
        )));
    }
    Ok(chain_id)
}

/// First EIP-155 `v` value for this chain (parity 0)
pub fn eip155_base(chain_id: u64) -> Result<u64> {
    Ok(check_chain_id(chain_id)? * 2 + 35)
}

/// Convert whatever `v` a device reports into the EIP-155 value.
///
/// Devices report either the bare recovery id (0/1), the pre-EIP-155 value
/// (27/28) or the final EIP-155 value.
pub fn normalize_v(v: u64, chain_id: u64) -> Result<u64> {
    let base = eip155_base(chain_id)?;
    match v {
        0 | 1 => Ok(base + v),
        27 | 28 => Ok(base + v - 27),
        v if v == base || v == base + 1 => Ok(v),
        v => Err(CosignError::Protocol(format!(
            "Signature v={} does not match chain id {}",
            v, chain_id
        ))),
    }
}

/// The Ledger Ethereum app only returns the low byte of the EIP-155 `v`.
/// The parity is the difference from the low byte of the chain's base value.
pub fn ledger_v(v_byte: u8, chain_id: u64) -> Result<u64> {
    let base = eip155_base(chain_id)?;
    let parity = v_byte.wrapping_sub((base % 256) as u8) & 1;
    Ok(base + parity as u64)
}

/// Big-endian bytes without leading zeros; zero encodes as empty
pub fn u256_to_be_vec(value: &U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    buf.iter().skip_while(|b| **b == 0).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::k256::ecdsa::SigningKey;
    use ethers_core::types::{Transaction, TransactionRequest};
    use ethers_core::utils::{rlp, secret_key_to_address};

    fn sample() -> UnsignedTransaction {
        UnsignedTransaction {
            nonce: U256::from(7),
            gas_price: U256::from(30_000_000_000u64),
            gas_limit: U256::from(200_000),
            to: "0x16A0772b17AE004E6645E0e95BF50aD69498a34e".parse().unwrap(),
            value: U256::zero(),
            data: hex::decode(
                "c01a8c84000000000000000000000000000000000000000000000000000000000000006a",
            )
            .unwrap(),
            chain_id: 1,
        }
    }

    fn sign(tx: &UnsignedTransaction, key: &SigningKey) -> Signature {
        let (sig, recovery) = key
            .sign_prehash_recoverable(tx.sighash().as_bytes())
            .unwrap();
        let bytes = sig.to_bytes();
        Signature {
            r: U256::from_big_endian(&bytes[..32]),
            s: U256::from_big_endian(&bytes[32..]),
            v: normalize_v(recovery.to_byte() as u64, tx.chain_id).unwrap(),
        }
    }

    fn request(tx: &UnsignedTransaction) -> TransactionRequest {
        TransactionRequest::new()
            .nonce(tx.nonce)
            .gas_price(tx.gas_price)
            .gas(tx.gas_limit)
            .to(tx.to)
            .value(tx.value)
            .data(tx.data.clone())
            .chain_id(tx.chain_id)
    }

    #[test]
    fn test_sighash_matches_reference_encoding() {
        let tx = sample();
        assert_eq!(tx.sighash(), request(&tx).sighash());
    }

    #[test]
    fn test_signed_encoding_matches_reference() {
        let tx = sample();
        let key = SigningKey::from_slice(&[0x11; 32]).unwrap();
        let signature = sign(&tx, &key);
        assert_eq!(
            tx.rlp_signed(&signature),
            request(&tx).rlp_signed(&signature).to_vec()
        );
    }

    #[test]
    fn test_into_signed_recovers_signer() {
        let tx = sample();
        let key = SigningKey::from_slice(&[0x22; 32]).unwrap();
        let signer = secret_key_to_address(&key);
        let signed = tx.clone().into_signed(sign(&tx, &key), signer).unwrap();

        let decoded: Transaction = rlp::decode(&signed.raw).unwrap();
        assert_eq!(decoded.recover_from().unwrap(), signer);
        assert_eq!(decoded.nonce, tx.nonce);
        assert_eq!(decoded.to, Some(tx.to));
        assert_eq!(decoded.input.to_vec(), tx.data);
        assert_eq!(decoded.hash, signed.hash);
        assert!(signed.raw_hex().starts_with("0xf8"));
    }

    #[test]
    fn test_into_signed_rejects_wrong_signer() {
        let tx = sample();
        let key = SigningKey::from_slice(&[0x33; 32]).unwrap();
        let other = SigningKey::from_slice(&[0x44; 32]).unwrap();
        let result = tx.clone().into_signed(sign(&tx, &key), secret_key_to_address(&other));
        assert!(matches!(result, Err(CosignError::SignatureMismatch { .. })));
    }

    #[test]
    fn test_normalize_v() {
        assert_eq!(normalize_v(0, 1).unwrap(), 37);
        assert_eq!(normalize_v(1, 1).unwrap(), 38);
        assert_eq!(normalize_v(28, 1).unwrap(), 38);
        assert_eq!(normalize_v(38, 1).unwrap(), 38);
        assert_eq!(normalize_v(310, 137).unwrap(), 310);
        assert!(normalize_v(37, 5).is_err());
    }

    #[test]
    fn test_ledger_v_small_chain() {
        assert_eq!(ledger_v(37, 1).unwrap(), 37);
        assert_eq!(ledger_v(38, 1).unwrap(), 38);
    }

    #[test]
    fn test_ledger_v_truncated_chain_id() {
        // 137 * 2 + 35 = 309, low byte 53
        assert_eq!(ledger_v(53, 137).unwrap(), 309);
        assert_eq!(ledger_v(54, 137).unwrap(), 310);
        // base low byte 0xff wraps to 0 for parity 1: 110 * 2 + 35 = 255
        assert_eq!(ledger_v(0xff, 110).unwrap(), 255);
        assert_eq!(ledger_v(0x00, 110).unwrap(), 256);
    }

    #[test]
    fn test_chain_id_bound_for_v() {
        assert_eq!(eip155_base(MAX_CHAIN_ID).unwrap(), u64::MAX - 2);
        assert_eq!(ledger_v(0xfe, MAX_CHAIN_ID).unwrap(), u64::MAX - 1);
        assert_eq!(normalize_v(1, MAX_CHAIN_ID).unwrap(), u64::MAX - 1);
        assert!(matches!(
            eip155_base(MAX_CHAIN_ID + 1),
            Err(CosignError::InvalidInput(_))
        ));
        assert!(ledger_v(0, u64::MAX / 2).is_err());
        assert!(normalize_v(0, u64::MAX).is_err());
    }

    #[test]
    fn test_u256_to_be_vec() {
        assert!(u256_to_be_vec(&U256::zero()).is_empty());
        assert_eq!(u256_to_be_vec(&U256::from(200_000)), vec![0x03, 0x0d, 0x40]);
    }
}
