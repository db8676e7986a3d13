//! Gnosis-style `MultiSigWallet` contract access
//!
//! Owner actions (confirm / revoke / execute) become unsigned contract-call
//! transactions; the read-only views used to validate them go through
//! `eth_call`.

use std::fmt;

use ethereum_types::{Address, U256};
use serde::Serialize;

pub mod contract;

pub use contract::MultisigContract;

/// Gas limit used for owner calls unless overridden
pub const DEFAULT_GAS_LIMIT: u64 = 200_000;

/// Owner call to send for a pending multisig transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MultisigAction {
    Confirm,
    Revoke,
    Execute,
}

impl MultisigAction {
    pub fn function_name(&self) -> &'static str {
        match self {
            MultisigAction::Confirm => "confirmTransaction",
            MultisigAction::Revoke => "revokeConfirmation",
            MultisigAction::Execute => "executeTransaction",
        }
    }
}

impl fmt::Display for MultisigAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultisigAction::Confirm => write!(f, "confirm"),
            MultisigAction::Revoke => write!(f, "revoke"),
            MultisigAction::Execute => write!(f, "execute"),
        }
    }
}

/// Envelope fields of the outer transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxParams {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub chain_id: u64,
}

/// Entry of the contract's `transactions` mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub destination: Address,
    pub value: U256,
    #[serde(serialize_with = "serialize_hex")]
    pub data: Vec<u8>,
    pub executed: bool,
}

fn serialize_hex<S: serde::Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
}
