//! Configuration file and setting resolution
//!
//! Precedence: command line (including `HTTP_RPC_URL` from the environment) >
//! `~/.multisig-cosign/config.json` > built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ethereum_types::Address;
use serde::{Deserialize, Serialize};

use crate::chains::ethereum::{parse_address, DerivationPath};
use crate::device::DEFAULT_TIMEOUT;
use crate::errors::{CosignError, Result};
use crate::features::DeviceKind;
use crate::multisig::DEFAULT_GAS_LIMIT;

/// Contents of the optional config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CosignConfig {
    pub rpc_url: Option<String>,
    pub multisig: Option<String>,
    pub chain_id: Option<u64>,
    pub derivation_path: Option<String>,
    pub gas_limit: Option<u64>,
    pub device: Option<DeviceKind>,
    pub abi_path: Option<PathBuf>,
    pub device_timeout_secs: Option<u64>,
}

/// Get the default config path
pub fn get_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".multisig-cosign")
        .join("config.json")
}

/// Read the config file; a missing file means defaults
pub fn load_config(path: &Path) -> Result<CosignConfig> {
    if !path.exists() {
        log::debug!("No config file at {}, using defaults", path.display());
        return Ok(CosignConfig::default());
    }
    let text = std::fs::read_to_string(path)?;
    let config = serde_json::from_str(&text)
        .map_err(|e| CosignError::Config(format!("{}: {}", path.display(), e)))?;
    log::debug!("📄 Loaded config from {}", path.display());
    Ok(config)
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub rpc_url: Option<String>,
    pub multisig: Option<String>,
    pub chain_id: Option<u64>,
    pub derivation_path: Option<String>,
    pub gas_limit: Option<u64>,
    pub device: Option<DeviceKind>,
    pub abi_path: Option<PathBuf>,
}

/// Effective settings after merging every source
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub rpc_url: Option<String>,
    pub multisig: Option<Address>,
    pub chain_id: Option<u64>,
    pub derivation_path: DerivationPath,
    pub gas_limit: u64,
    pub device: Option<DeviceKind>,
    pub abi_path: Option<PathBuf>,
    pub device_timeout: Duration,
}

impl Settings {
    pub fn resolve(overrides: Overrides, file: CosignConfig) -> Result<Self> {
        let multisig = overrides
            .multisig
            .or(file.multisig)
            .map(|text| parse_address(&text))
            .transpose()?;
        let derivation_path = match overrides.derivation_path.or(file.derivation_path) {
            Some(text) => text.parse()?,
            None => DerivationPath::default(),
        };
        let gas_limit = overrides
            .gas_limit
            .or(file.gas_limit)
            .unwrap_or(DEFAULT_GAS_LIMIT);
        if gas_limit == 0 {
            return Err(CosignError::Config("Gas limit must be positive".to_string()));
        }

        Ok(Self {
            rpc_url: overrides.rpc_url.or(file.rpc_url).filter(|url| !url.is_empty()),
            multisig,
            chain_id: overrides.chain_id.or(file.chain_id),
            derivation_path,
            gas_limit,
            device: overrides.device.or(file.device),
            abi_path: overrides.abi_path.or(file.abi_path),
            device_timeout: file
                .device_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
        })
    }

    pub fn rpc_url(&self) -> Result<&str> {
        self.rpc_url.as_deref().ok_or_else(|| {
            CosignError::Config(
                "No RPC endpoint: pass --rpc-url, set HTTP_RPC_URL or add rpcUrl to the config file"
                    .to_string(),
            )
        })
    }
}
