//! BIP-32 derivation paths

use std::fmt;
use std::str::FromStr;

use crate::errors::{CosignError, Result};

pub const HARDENED: u32 = 0x8000_0000;

/// Both device families refuse paths deeper than this
pub const MAX_DEPTH: usize = 10;

/// A parsed BIP-32 path such as `m/44'/60'/0'/0/0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    pub fn new(components: Vec<u32>) -> Result<Self> {
        if components.is_empty() {
            return Err(CosignError::InvalidInput("Derivation path is empty".to_string()));
        }
        if components.len() > MAX_DEPTH {
            return Err(CosignError::InvalidInput(format!(
                "Derivation path has {} components, at most {} are supported",
                components.len(),
                MAX_DEPTH
            )));
        }
        Ok(Self(components))
    }

    /// Standard Ethereum account path `m/44'/60'/0'/0/{index}`
    pub fn bip44(index: u32) -> Self {
        Self(vec![44 | HARDENED, 60 | HARDENED, HARDENED, 0, index])
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Ledger encoding: component count followed by big-endian u32s
    pub fn to_ledger_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.0.len() * 4);
        out.push(self.0.len() as u8);
        for component in &self.0 {
            out.extend_from_slice(&component.to_be_bytes());
        }
        out
    }
}

impl Default for DerivationPath {
    fn default() -> Self {
        Self::bip44(0)
    }
}

impl FromStr for DerivationPath {
    type Err = CosignError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("m/")
            .or_else(|| trimmed.strip_prefix("M/"))
            .unwrap_or(trimmed);

        let components = body
            .split('/')
            .map(|part| {
                let (digits, hardened) = match part.strip_suffix(&['\'', 'h', 'H'][..]) {
                    Some(digits) => (digits, true),
                    None => (part, false),
                };
                let index: u32 = digits.parse().map_err(|_| {
                    CosignError::InvalidInput(format!("Invalid path component '{}' in {}", part, s))
                })?;
                if index >= HARDENED {
                    return Err(CosignError::InvalidInput(format!(
                        "Path component {} out of range in {}",
                        index, s
                    )));
                }
                Ok(if hardened { index | HARDENED } else { index })
            })
            .collect::<Result<Vec<u32>>>()?;

        Self::new(components)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for component in &self.0 {
            if component & HARDENED != 0 {
                write!(f, "/{}'", component & !HARDENED)?;
            } else {
                write!(f, "/{}", component)?;
            }
        }
        Ok(())
    }
}
