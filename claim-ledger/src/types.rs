//! Core types for the claim ledger
//!
//! The persisted shape is JSON with camelCase keys and millisecond
//! timestamps. Every struct uses `#[serde(default)]` so that files written
//! by older versions (missing `txs`, `pending`, ...) normalize on read.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum number of attempt entries kept per channel
pub const MAX_ATTEMPTS: usize = 2000;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create new identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get as string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Distribution channel identifier (e.g. `base-usdt`)
    ChannelId
);
string_id!(
    /// Chat-platform user identifier
    ParticipantId
);
string_id!(
    /// Chat-platform community (guild) identifier
    CommunityId
);

/// Latest successful claim of one participant on one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Destination address
    pub address: String,

    /// Settlement reference (transaction hash)
    #[serde(rename = "txHash")]
    pub reference: String,

    /// Block that included the transfer
    #[serde(rename = "blockNumber", default)]
    pub block_height: Option<u64>,

    /// Time of the successful claim
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// One row of the success history (`txs`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    /// Participant that claimed
    #[serde(rename = "userId")]
    pub participant: ParticipantId,

    /// Destination address
    pub address: String,

    /// Settlement reference (transaction hash)
    #[serde(rename = "txHash")]
    pub reference: String,

    /// Block that included the transfer
    #[serde(rename = "blockNumber", default)]
    pub block_height: Option<u64>,

    /// Time of the successful claim
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a claim attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AttemptOutcome {
    /// Payout sent and confirmed
    Success {
        /// Settlement reference
        #[serde(rename = "txHash")]
        reference: String,
    },
    /// Rejected or failed
    Failure {
        /// Human-readable reason
        reason: String,
    },
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptEntry {
    /// Participant that attempted the claim
    #[serde(rename = "userId")]
    pub participant: ParticipantId,

    /// Address as submitted
    pub address: String,

    /// Time of the attempt
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Outcome
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl AttemptEntry {
    /// Successful attempt
    pub fn success(
        participant: ParticipantId,
        address: impl Into<String>,
        reference: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            participant,
            address: address.into(),
            timestamp,
            outcome: AttemptOutcome::Success {
                reference: reference.into(),
            },
        }
    }

    /// Rejected or failed attempt
    pub fn failure(
        participant: ParticipantId,
        address: impl Into<String>,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            participant,
            address: address.into(),
            timestamp,
            outcome: AttemptOutcome::Failure {
                reason: reason.into(),
            },
        }
    }

    /// Whether this attempt paid out
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }
}

/// A transfer that may have gone out but was not seen confirmed.
///
/// The participant is blocked and the cap slot is held until the
/// reconciliation sweep resolves it, or, without a reference, until an
/// operator clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClaim {
    /// Destination address
    pub address: String,

    /// Settlement reference; `None` when the broadcast reply was lost
    #[serde(rename = "txHash", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// When the transfer was broadcast
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub since: DateTime<Utc>,
}

/// Ledger state of one channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelState {
    /// Number of successful claims
    pub total: u64,

    /// Claims are refused while paused
    pub paused: bool,

    /// Latest successful claim per participant
    pub users: BTreeMap<ParticipantId, ClaimRecord>,

    /// Success history, oldest first
    #[serde(rename = "txs")]
    pub claims: Vec<ClaimReceipt>,

    /// Bounded audit log, oldest first
    pub attempts: Vec<AttemptEntry>,

    /// Transfers awaiting confirmation
    pub pending: BTreeMap<ParticipantId, PendingClaim>,
}

impl ChannelState {
    /// Record a confirmed payout. Returns the claim index (new total).
    pub fn record_success(&mut self, participant: ParticipantId, record: ClaimRecord) -> u64 {
        self.total += 1;
        self.pending.remove(&participant);
        self.claims.push(ClaimReceipt {
            participant: participant.clone(),
            address: record.address.clone(),
            reference: record.reference.clone(),
            block_height: record.block_height,
            timestamp: record.timestamp,
        });
        self.users.insert(participant, record);
        self.total
    }

    /// Append to the attempt log, evicting the oldest entries past [`MAX_ATTEMPTS`]
    pub fn push_attempt(&mut self, entry: AttemptEntry) {
        self.attempts.push(entry);
        if self.attempts.len() > MAX_ATTEMPTS {
            let excess = self.attempts.len() - MAX_ATTEMPTS;
            self.attempts.drain(..excess);
        }
    }

    /// Latest successful claim of a participant
    pub fn last_claim(&self, participant: &ParticipantId) -> Option<&ClaimRecord> {
        self.users.get(participant)
    }

    /// Claims that occupy a cap slot: confirmed plus awaiting confirmation
    pub fn slots_used(&self) -> u64 {
        self.total + self.pending.len() as u64
    }

    /// Remaining slots under a cap
    pub fn remaining(&self, cap: u64) -> u64 {
        cap.saturating_sub(self.slots_used())
    }

    /// Most recent `n` success receipts, oldest first
    pub fn recent(&self, n: usize) -> &[ClaimReceipt] {
        let start = self.claims.len().saturating_sub(n);
        &self.claims[start..]
    }

    fn check_invariants(&self, channel: &ChannelId) -> Result<()> {
        if self.total != self.claims.len() as u64 {
            return Err(Error::InvariantViolation(format!(
                "channel {}: total {} != {} receipts",
                channel,
                self.total,
                self.claims.len()
            )));
        }

        for (participant, record) in &self.users {
            let backed = self
                .claims
                .iter()
                .any(|c| &c.participant == participant && c.reference == record.reference);
            if !backed {
                return Err(Error::InvariantViolation(format!(
                    "channel {}: record of {} ({}) has no receipt",
                    channel, participant, record.reference
                )));
            }
        }

        if self.attempts.len() > MAX_ATTEMPTS {
            return Err(Error::InvariantViolation(format!(
                "channel {}: {} attempts exceed bound {}",
                channel,
                self.attempts.len(),
                MAX_ATTEMPTS
            )));
        }

        Ok(())
    }
}

/// Full ledger: one [`ChannelState`] per channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerState {
    /// Per-channel state
    pub channels: BTreeMap<ChannelId, ChannelState>,
}

impl LedgerState {
    /// Empty defaults for the given channels
    pub fn with_channels<'a>(channels: impl IntoIterator<Item = &'a ChannelId>) -> Self {
        let mut state = Self::default();
        for id in channels {
            state.ensure_channel(id);
        }
        state
    }

    /// Insert empty defaults for a missing channel
    pub fn ensure_channel(&mut self, id: &ChannelId) {
        self.channels.entry(id.clone()).or_default();
    }

    /// Channel state, if present
    pub fn channel(&self, id: &ChannelId) -> Option<&ChannelState> {
        self.channels.get(id)
    }

    /// Mutable channel state, created with defaults if absent
    pub fn channel_mut(&mut self, id: &ChannelId) -> &mut ChannelState {
        self.channels.entry(id.clone()).or_default()
    }

    /// Verify the bookkeeping invariants of every channel
    pub fn check_invariants(&self) -> Result<()> {
        for (id, channel) in &self.channels {
            channel.check_invariants(id)?;
        }
        Ok(())
    }
}
