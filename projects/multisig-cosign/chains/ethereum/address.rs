//! Ethereum address retrieval

use ethereum_types::Address;
use ethers_core::utils::to_checksum;

use super::path::DerivationPath;
use crate::device::HardwareSigner;
use crate::errors::{CosignError, Result};

/// Get an Ethereum address from the device
pub fn get_ethereum_address(
    signer: &mut dyn HardwareSigner,
    path: &DerivationPath,
    display: bool,
) -> Result<Address> {
    if display {
        log::info!("👀 Confirm the address on the {} screen", signer.kind());
    }
    let address = signer.get_address(path, display)?;
    log::info!("🔑 {} address at {}: {}", signer.kind(), path, to_checksum(&address, None));
    Ok(address)
}

/// Parse a `0x`-prefixed hex address, accepting any letter case
pub fn parse_address(input: &str) -> Result<Address> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let bytes = hex::decode(digits)
        .map_err(|_| CosignError::InvalidInput(format!("Invalid address: {}", input)))?;
    if bytes.len() != 20 {
        return Err(CosignError::InvalidInput(format!(
            "Invalid address length: {} bytes",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}
