//! Claim policy for the faucet
//!
//! Per-community caps, cooldown and allow/deny lists, plus a global
//! allow/deny scope that unions with every community.
//!
//! The engine only reads policy through [`PolicyStore`]; mutations are
//! the admin surface.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod rules;
pub mod store;
pub mod types;

pub use error::{Error, PolicyRejection, Result};
pub use rules::EffectivePolicy;
pub use store::{JsonPolicyStore, MemoryPolicyStore, MigrationReport, PolicyStore};
pub use types::*;
