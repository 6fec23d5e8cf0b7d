//! Claim outcomes that are not a payout

use claim_policy::PolicyRejection;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, ClaimError>;

/// Request refused before any policy or ledger work
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Address is not `0x` + 40 hex digits (or fails its checksum)
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// No executor is configured for the channel
    #[error("Unsupported network: {0}")]
    UnsupportedChannel(String),

    /// Destination holds code
    #[error("Address is a contract. Use a wallet (EOA) address.")]
    ContractAddress,

    /// Caller lacks the role required to claim
    #[error("You need the faucet role to claim.")]
    MissingRole,
}

/// Why a claim did not pay out
#[derive(Debug, Error)]
pub enum ClaimError {
    /// Malformed request
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Refused by policy
    #[error(transparent)]
    Rejected(#[from] PolicyRejection),

    /// Ledger lock contention
    #[error("Ledger busy: lock not acquired within {0:?}")]
    LockTimeout(Duration),

    /// Distributing account underfunded
    #[error("Insufficient {asset} funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Asset that is short
        asset: String,
        /// Amount needed
        required: Decimal,
        /// Amount held
        available: Decimal,
    },

    /// Broadcast refused, transfer reverted or chain unreachable during send
    #[error("Transfer failed: {0}")]
    TransferFailed(#[source] transfer_executor::Error),

    /// Transfer broadcast but its outcome was not observed in time
    #[error("Confirmation unknown for {reference}")]
    ConfirmationUnknown {
        /// Transaction hash
        reference: String,
    },

    /// Broadcast may have gone out but no reference came back
    #[error("Broadcast outcome unknown: {reason}")]
    BroadcastUnknown {
        /// Transport failure text
        reason: String,
    },

    /// Chain query failed before the transfer
    #[error("Chain query failed: {0}")]
    Chain(#[source] transfer_executor::Error),

    /// Ledger storage failure
    #[error("Ledger error: {0}")]
    Ledger(#[source] claim_ledger::Error),

    /// Policy storage failure
    #[error("Policy store error: {0}")]
    PolicyStore(#[from] claim_policy::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClaimError {
    /// Worth retrying as is
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClaimError::LockTimeout(_) | ClaimError::ConfirmationUnknown { .. }
        )
    }

    /// Text shown to the participant. Never exposes balances or internals.
    pub fn user_message(&self) -> String {
        match self {
            ClaimError::Validation(e) => e.to_string(),
            ClaimError::Rejected(r) => r.to_string(),
            ClaimError::LockTimeout(_) => {
                "The faucet is busy right now. Please try again in a moment.".to_string()
            }
            ClaimError::ConfirmationUnknown { .. } => {
                "Your transfer was sent but is not confirmed yet. It will be settled automatically."
                    .to_string()
            }
            ClaimError::BroadcastUnknown { .. } => {
                "Your transfer may have been sent. It is being checked; please do not claim again."
                    .to_string()
            }
            _ => "Claim failed. Please try again later.".to_string(),
        }
    }

    /// Short machine-readable outcome label
    pub fn label(&self) -> &'static str {
        match self {
            ClaimError::Validation(_) => "invalid",
            ClaimError::Rejected(r) => r.label(),
            ClaimError::LockTimeout(_) => "lock_timeout",
            ClaimError::InsufficientFunds { .. } => "insufficient_funds",
            ClaimError::TransferFailed(_) => "transfer_failed",
            ClaimError::ConfirmationUnknown { .. } => "confirmation_unknown",
            ClaimError::BroadcastUnknown { .. } => "broadcast_unknown",
            ClaimError::Chain(_) => "chain_error",
            ClaimError::Ledger(_) | ClaimError::PolicyStore(_) | ClaimError::Config(_) => "error",
        }
    }
}

impl From<claim_ledger::Error> for ClaimError {
    fn from(err: claim_ledger::Error) -> Self {
        match err {
            claim_ledger::Error::LockTimeout(waited) => ClaimError::LockTimeout(waited),
            other => ClaimError::Ledger(other),
        }
    }
}

impl From<transfer_executor::Error> for ClaimError {
    fn from(err: transfer_executor::Error) -> Self {
        use transfer_executor::Error as TransferError;

        match err {
            TransferError::InsufficientFunds {
                asset,
                required,
                available,
            } => ClaimError::InsufficientFunds {
                asset,
                required,
                available,
            },
            TransferError::ConfirmationUnknown { reference } => {
                ClaimError::ConfirmationUnknown { reference }
            }
            TransferError::BroadcastUnknown(reason) => ClaimError::BroadcastUnknown { reason },
            TransferError::InvalidAddress(msg) => {
                ClaimError::Validation(ValidationError::InvalidAddress(msg))
            }
            other => ClaimError::TransferFailed(other),
        }
    }
}
