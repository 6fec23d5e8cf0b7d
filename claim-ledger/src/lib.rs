//! Claim Ledger
//!
//! Durable record of faucet payouts: per-channel totals, per-participant
//! claim history, pause flags and a bounded attempt log.
//!
//! # Architecture
//!
//! - **Fresh reads**: every mutating operation loads the ledger from the
//!   store; nothing is cached across operations
//! - **Atomic commits**: the file store writes to a temporary file and
//!   renames it over the previous state
//! - **Single writer**: mutations happen only while a [`LockGuard`] is held
//!
//! # Invariants
//!
//! - `total` equals the number of success receipts of a channel
//! - Every per-participant record is backed by a success receipt
//! - The attempt log never exceeds [`MAX_ATTEMPTS`] entries

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod error;
pub mod export;
pub mod lock;
pub mod storage;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use export::{export_rows, to_csv, ExportRow};
pub use lock::{FileLock, InProcessLock, LockCoordinator, LockGuard, LockSettings};
pub use storage::{JsonFileStore, LedgerStore, MemoryStore};
pub use types::{
    AttemptEntry, AttemptOutcome, ChannelId, ChannelState, ClaimReceipt, ClaimRecord,
    CommunityId, LedgerState, ParticipantId, PendingClaim, MAX_ATTEMPTS,
};
