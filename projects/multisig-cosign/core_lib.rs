//! Co-sign pending `MultiSigWallet` transactions with hardware wallets.
//!
//! The crate talks to an Ethereum node over JSON-RPC, builds the owner call
//! (`confirmTransaction`, `revokeConfirmation`, `executeTransaction`) as a
//! legacy EIP-155 transaction, has a Ledger, Trezor or KeepKey sign it, and
//! assembles the raw transaction for printing or broadcast.

pub mod chains;
pub mod config;
pub mod cosign;
pub mod device;
pub mod device_check;
pub mod errors;
pub mod features;
pub mod messages;
pub mod multisig;
pub mod prompt;
pub mod protocol;
pub mod rpc;
pub mod transport;

pub use chains::ethereum::{DerivationPath, SignedTransaction, UnsignedTransaction};
pub use cosign::{prepare, sign_plan, submit, CosignPlan, TxOverrides};
pub use device::{open_signer, HardwareSigner};
pub use errors::{CosignError, Result};
pub use features::{list_connected_devices, DeviceKind};
pub use multisig::{MultisigAction, MultisigContract};
pub use rpc::{EthClient, EthRpc, HttpRpc};
