use serde::{Deserialize, Serialize};

use crate::features::{DeviceFeatures, DeviceKind};

/// Firmware / app compatibility result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityCheck {
    pub needs_update: bool,
    pub current_version: String,
    pub minimum_version: String,
    pub bootloader_mode: bool,
    pub contract_data_enabled: Option<bool>,
}

impl CompatibilityCheck {
    /// Whether a contract call with calldata can be signed right now
    pub fn can_sign_contract_calls(&self) -> bool {
        !self.bootloader_mode && self.contract_data_enabled != Some(false)
    }
}

/// Version comparison result
#[derive(Debug, Clone, PartialEq)]
pub enum VersionComparison {
    Less,
    Equal,
    Greater,
}

/// Oldest firmware / Ethereum app version known to sign EIP-155 contract calls
/// the way this tool sends them
pub fn minimum_version(kind: DeviceKind, model: Option<&str>) -> &'static str {
    match (kind, model) {
        (DeviceKind::Ledger, _) => "1.9.0",
        (DeviceKind::Trezor, Some("T")) | (DeviceKind::Trezor, Some("Safe 3")) => "2.4.0",
        (DeviceKind::Trezor, _) => "1.10.0",
        (DeviceKind::KeepKey, _) => "7.0.0",
    }
}

/// Check reported features against the minimum supported version
pub fn check_compatibility(kind: DeviceKind, features: &DeviceFeatures) -> CompatibilityCheck {
    let minimum = minimum_version(kind, features.model.as_deref());
    let needs_update = compare_versions(&features.version, minimum) == VersionComparison::Less;

    CompatibilityCheck {
        needs_update,
        current_version: features.version.clone(),
        minimum_version: minimum.to_string(),
        bootloader_mode: features.bootloader_mode,
        contract_data_enabled: features.contract_data_enabled,
    }
}

/// Compare two dotted version strings
pub fn compare_versions(version1: &str, version2: &str) -> VersionComparison {
    let v1_parts: Vec<u32> = version1
        .split('.')
        .filter_map(|s| s.parse().ok())
        .collect();
    let v2_parts: Vec<u32> = version2
        .split('.')
        .filter_map(|s| s.parse().ok())
        .collect();

    // Pad with zeros if needed
    let max_len = v1_parts.len().max(v2_parts.len());
    let mut v1_padded = v1_parts;
    let mut v2_padded = v2_parts;
    v1_padded.resize(max_len, 0);
    v2_padded.resize(max_len, 0);

    for (a, b) in v1_padded.iter().zip(v2_padded.iter()) {
        if a < b {
            return VersionComparison::Less;
        } else if a > b {
            return VersionComparison::Greater;
        }
    }

    VersionComparison::Equal
}
