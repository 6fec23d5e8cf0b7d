//! Transfer execution for faucet payouts
//!
//! Pays a fixed amount of a native coin or an ERC-20 token from a
//! distributing account on an EVM chain:
//!
//! - [`address`]: destination address validation
//! - [`client`]: the [`ChainClient`] seam, with a JSON-RPC implementation
//!   ([`EvmRpcClient`]) and an in-memory one ([`MockChainClient`])
//! - [`executor`]: balance pre-flight, broadcast and bounded confirmation
//!   wait
//!
//! Signing is not done here: the RPC endpoint must hold the sender
//! account (`eth_sendTransaction`).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod client;
pub mod error;
pub mod evm;
pub mod executor;
pub mod mock;
pub mod types;

pub use address::Address;
pub use client::ChainClient;
pub use error::{Error, Result};
pub use evm::EvmRpcClient;
pub use executor::{ConfirmationSettings, ConfirmationStatus, TransferExecutor};
pub use mock::MockChainClient;
pub use types::*;
