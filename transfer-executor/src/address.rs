//! EVM account addresses

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// A 20-byte account address, stored as lowercase `0x`-prefixed hex
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalize an address.
    ///
    /// Surrounding whitespace is ignored. Mixed-case input must carry a
    /// valid EIP-55 checksum; all-lowercase and all-uppercase input is
    /// accepted as is.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| Error::InvalidAddress(format!("{:?}: missing 0x prefix", trimmed)))?;

        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidAddress(format!(
                "{:?}: expected 40 hex digits",
                trimmed
            )));
        }

        let lower = hex.to_ascii_lowercase();
        let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && checksum_hex(&lower) != hex {
            return Err(Error::InvalidAddress(format!("{:?}: bad checksum", trimmed)));
        }

        Ok(Self(format!("0x{}", lower)))
    }

    /// Lowercase hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// EIP-55 mixed-case form
    pub fn to_checksum(&self) -> String {
        format!("0x{}", checksum_hex(&self.0[2..]))
    }

    /// 32-byte ABI word holding this address
    pub(crate) fn abi_word(&self) -> String {
        format!("{:0>64}", &self.0[2..])
    }
}

fn checksum_hex(lower: &str) -> String {
    let hash = Keccak256::digest(lower.as_bytes());
    lower
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let byte = hash[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect()
}

/// Validate a destination address
pub fn validate(input: &str) -> Result<Address> {
    Address::parse(input)
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
