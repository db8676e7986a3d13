//! Ethereum support for hardware co-signing
//!
//! Provides:
//! - BIP-32 derivation paths
//! - Address retrieval
//! - Legacy EIP-155 transaction encoding and signature assembly

use ethereum_types::Address;

pub mod address;
pub mod path;
pub mod transaction;

pub use address::{get_ethereum_address, parse_address};
pub use path::DerivationPath;
pub use transaction::{SignedTransaction, UnsignedTransaction};

use crate::device::HardwareSigner;
use crate::errors::Result;

/// Main Ethereum support structure
pub struct EthereumSupport;

impl EthereumSupport {
    /// Get an Ethereum address for the given path
    pub fn get_address(
        signer: &mut dyn HardwareSigner,
        path: &DerivationPath,
        display: bool,
    ) -> Result<Address> {
        address::get_ethereum_address(signer, path, display)
    }

    /// Sign a legacy transaction on the device and assemble it
    pub fn sign_transaction(
        signer: &mut dyn HardwareSigner,
        path: &DerivationPath,
        transaction: UnsignedTransaction,
        expected_signer: Address,
    ) -> Result<SignedTransaction> {
        let signature = signer.sign_transaction(path, &transaction)?;
        transaction.into_signed(signature, expected_signer)
    }
}
