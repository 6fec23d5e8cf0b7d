//! Error types for transfer execution

use rust_decimal::Decimal;
use thiserror::Error;

/// Transfer error
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed destination address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Amount not representable in the channel's base units
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Distributing account cannot cover the payout
    #[error("Insufficient {asset} funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Asset that is short (symbol or "gas")
        asset: String,
        /// Amount needed
        required: Decimal,
        /// Amount held
        available: Decimal,
    },

    /// Transaction rejected before broadcast
    #[error("Submission failed: {0}")]
    Submission(String),

    /// Broadcast request failed in a way that leaves open whether the
    /// transaction went out (timeout, dropped connection, garbled reply)
    #[error("Broadcast outcome unknown: {0}")]
    BroadcastUnknown(String),

    /// Transaction mined but failed
    #[error("Transfer {reference} reverted")]
    Reverted {
        /// Transaction hash
        reference: String,
    },

    /// No receipt observed within the confirmation timeout
    #[error("Confirmation of {reference} unknown")]
    ConfirmationUnknown {
        /// Transaction hash
        reference: String,
    },

    /// JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// Error code
        code: i64,
        /// Error message
        message: String,
    },

    /// Transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected response shape
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
