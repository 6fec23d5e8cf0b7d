//! Chain access seam

use crate::address::Address;
use crate::error::Result;
use crate::types::{ChainReceipt, TransferInstruction};
use async_trait::async_trait;

/// Queries and broadcast against one settlement network
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Deployed code at an address (empty for key-controlled accounts)
    async fn code_at(&self, address: &Address) -> Result<Vec<u8>>;

    /// Native balance in base units
    async fn native_balance(&self, address: &Address) -> Result<u128>;

    /// ERC-20 balance in base units
    async fn token_balance(&self, contract: &Address, holder: &Address) -> Result<u128>;

    /// Broadcast a transfer; returns the transaction hash.
    ///
    /// Fails with [`crate::Error::Submission`] only when the transfer
    /// certainly did not go out, and with [`crate::Error::BroadcastUnknown`]
    /// when it may have.
    async fn submit(&self, instruction: &TransferInstruction) -> Result<String>;

    /// Receipt of a transaction, `None` while not mined
    async fn receipt(&self, reference: &str) -> Result<Option<ChainReceipt>>;
}
