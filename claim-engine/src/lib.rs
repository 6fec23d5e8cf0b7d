//! Claim Engine
//!
//! Faucet claims end to end: validation, policy, the ledger lock, the
//! on-chain transfer and the ledger commit.
//!
//! # Architecture
//!
//! - [`ClaimEngine`] owns injected seams: a [`claim_ledger::LedgerStore`],
//!   a [`claim_ledger::LockCoordinator`], a [`claim_policy::PolicyStore`]
//!   and one [`transfer_executor::TransferExecutor`] per channel
//! - One lock serializes every ledger mutation across all channels
//! - Transfers whose confirmation times out are held as pending and
//!   settled by [`ClaimEngine::reconcile_pending`]
//! - Broadcasts whose reply was lost are held as pending without a hash
//!   until [`ClaimEngine::clear_pending`]

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod admin;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod reconcile;

// Re-exports
pub use admin::{ChannelSelector, ChannelStatus, PENDING_CLEARED_REASON, RECENT_CLAIMS};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChannelConfig, Config};
pub use engine::{
    ClaimEngine, ClaimRequest, ClaimSuccess, BROADCAST_UNKNOWN_REASON, CONFIRMATION_UNKNOWN_REASON,
};
pub use error::{ClaimError, Result, ValidationError};
pub use metrics::Metrics;
pub use reconcile::{ReconcileReport, ResolvedClaim};
