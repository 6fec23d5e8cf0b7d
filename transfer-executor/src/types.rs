//! Channel and transfer types

use crate::address::Address;
use crate::error::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Largest decimal precision a channel may declare
pub const MAX_DECIMALS: u32 = 18;

/// What a channel pays out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AssetKind {
    /// The chain's native coin
    Native,
    /// An ERC-20 token
    Token {
        /// Token contract
        contract: Address,
    },
}

/// A payout channel: one asset on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Channel identifier
    pub id: String,

    /// Name shown to participants
    pub display_name: String,

    /// Asset symbol
    pub symbol: String,

    /// Asset paid out
    pub asset: AssetKind,

    /// Fixed payout per claim, in whole units
    pub payout: Decimal,

    /// Decimal places of the asset
    pub decimals: u32,

    /// Distributing account
    pub sender: Address,

    /// Prefix of transaction links (hash is appended)
    pub explorer_tx_url: String,
}

impl ChannelSpec {
    /// Payout in base units
    pub fn payout_units(&self) -> Result<u128> {
        to_units(self.payout, self.decimals)
    }

    /// Explorer link of a transaction
    pub fn explorer_url(&self, reference: &str) -> String {
        format!("{}{}", self.explorer_tx_url, reference)
    }
}

/// Convert a whole-unit amount to base units
pub fn to_units(amount: Decimal, decimals: u32) -> Result<u128> {
    if decimals > MAX_DECIMALS {
        return Err(Error::InvalidAmount(format!(
            "{} decimals exceeds {}",
            decimals, MAX_DECIMALS
        )));
    }
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(format!("{} is not positive", amount)));
    }

    let amount = amount.normalize();
    if amount.scale() > decimals {
        return Err(Error::InvalidAmount(format!(
            "{} has more than {} decimal places",
            amount, decimals
        )));
    }

    let mantissa = u128::try_from(amount.mantissa())
        .map_err(|_| Error::InvalidAmount(amount.to_string()))?;
    10u128
        .checked_pow(decimals - amount.scale())
        .and_then(|factor| mantissa.checked_mul(factor))
        .ok_or_else(|| Error::InvalidAmount(format!("{} overflows", amount)))
}

/// Convert base units to a whole-unit amount
pub fn format_units(units: u128, decimals: u32) -> Result<Decimal> {
    let mantissa =
        i128::try_from(units).map_err(|_| Error::InvalidAmount(format!("{} overflows", units)))?;
    Decimal::try_from_i128_with_scale(mantissa, decimals)
        .map(|d| d.normalize())
        .map_err(|e| Error::InvalidAmount(e.to_string()))
}

/// A transfer to broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInstruction {
    /// Distributing account
    pub from: Address,
    /// Destination
    pub to: Address,
    /// Asset moved
    pub asset: AssetKind,
    /// Amount in base units
    pub amount: u128,
}

/// Receipt of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReceipt {
    /// Block that included the transaction
    pub block_height: u64,
    /// Execution status
    pub success: bool,
}

/// A confirmed payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Transaction hash
    pub reference: String,
    /// Block that included the transfer
    pub block_height: u64,
    /// Amount paid, in whole units
    pub amount: Decimal,
}

/// Whether an address is a plain key-controlled account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    /// No code at the address
    KeyControlled,
    /// A contract; payouts are refused
    Contract,
}

/// Balances of the distributing account, in whole units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributorBalances {
    /// Native coin (gas)
    pub native: Decimal,
    /// Token balance, for token channels
    pub token: Option<Decimal>,
}
