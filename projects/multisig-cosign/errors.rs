use ethereum_types::{Address, U256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CosignError {
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("ABI error: {0}")]
    Abi(#[from] ethers_core::abi::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Device protocol error: {0}")]
    Protocol(String),

    #[error("No supported signing device found{0}")]
    DeviceNotFound(String),

    #[error("Device timed out waiting for a response")]
    Timeout,

    #[error("Operation cancelled on the device")]
    UserCancelled,

    #[error("Device failure (code {code}): {message}")]
    DeviceFailure { code: u32, message: String },

    #[error("Ledger returned status 0x{status:04x}: {reason}")]
    LedgerStatus { status: u16, reason: &'static str },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0:?} is not an owner of the multisig")]
    NotOwner(Address),

    #[error("Multisig transaction {0} does not exist")]
    UnknownTransaction(U256),

    #[error("Multisig transaction {0} was already executed")]
    AlreadyExecuted(U256),

    #[error("Multisig transaction {id} is already confirmed by {owner:?}")]
    AlreadyConfirmed { id: U256, owner: Address },

    #[error("Multisig transaction {0} is not confirmed")]
    NotConfirmed(U256),

    #[error("Signature recovers to {recovered:?}, device reported {expected:?}")]
    SignatureMismatch { expected: Address, recovered: Address },

    #[error("Aborted by operator")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, CosignError>;
