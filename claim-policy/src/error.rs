//! Error types for claim policy

use chrono::Duration;
use thiserror::Error;

/// Policy store error
#[derive(Debug, Error)]
pub enum Error {
    /// Value outside the accepted range
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Policy document could not be parsed
    #[error("Corrupt policy file {path}: {reason}")]
    Corrupt {
        /// File that failed to parse
        path: String,
        /// Parser message
        reason: String,
    },

    /// Policy document still holds `giveaway` settings or legacy cap keys
    #[error("Policy file {path} holds legacy settings; migrate it before use")]
    LegacyUnmigrated {
        /// File to migrate
        path: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Reason a claim is refused by policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyRejection {
    /// Channel is paused
    #[error("Giveaway is paused for this network.")]
    Paused,

    /// Channel reached its cap
    #[error("Cap reached for this network.")]
    CapReached {
        /// Cap in force
        cap: u64,
    },

    /// Participant is on a community or global blacklist
    #[error("You are not allowed to claim.")]
    Blacklisted,

    /// A whitelist exists and the participant is not on it
    #[error("You are not whitelisted to claim.")]
    NotWhitelisted,

    /// Participant has a transfer awaiting confirmation
    #[error("A previous claim is still awaiting confirmation.")]
    AlreadyPending,

    /// Participant claimed within the cooldown window
    #[error("Cooldown active. Try again in {} minute(s).", remaining_minutes(.remaining))]
    Cooldown {
        /// Time left until the next claim is allowed
        remaining: Duration,
    },
}

/// Whole minutes, rounded up
fn remaining_minutes(remaining: &Duration) -> i64 {
    let millis = remaining.num_milliseconds().max(0);
    (millis + 59_999) / 60_000
}

impl PolicyRejection {
    /// Short machine-readable label
    pub fn label(&self) -> &'static str {
        match self {
            PolicyRejection::Paused => "paused",
            PolicyRejection::CapReached { .. } => "cap_reached",
            PolicyRejection::Blacklisted => "blacklisted",
            PolicyRejection::NotWhitelisted => "not_whitelisted",
            PolicyRejection::AlreadyPending => "pending",
            PolicyRejection::Cooldown { .. } => "cooldown",
        }
    }
}
