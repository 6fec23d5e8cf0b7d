//! Payout execution for one channel
//!
//! # Flow
//!
//! 1. Pre-flight: the distributing account must hold the payout (and gas
//!    for token channels), otherwise [`Error::InsufficientFunds`]
//! 2. Broadcast through the [`ChainClient`]
//! 3. Poll for the receipt until the confirmation timeout; a missing
//!    receipt ends in [`Error::ConfirmationUnknown`], never in a guess

use crate::address::Address;
use crate::client::ChainClient;
use crate::error::{Error, Result};
use crate::types::{
    format_units, AccountKind, AssetKind, ChannelSpec, DistributorBalances, TransferInstruction,
    TransferReceipt,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Decimals of the native coin on EVM chains
const NATIVE_DECIMALS: u32 = 18;

/// Bounds of the confirmation wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationSettings {
    /// Give up waiting after this long
    pub timeout: Duration,
    /// Delay between receipt polls
    pub poll_interval: Duration,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Single-shot status of a broadcast transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// Mined and succeeded
    Confirmed {
        /// Block that included it
        block_height: u64,
    },
    /// Mined and failed
    Reverted,
    /// No receipt (yet)
    Unknown,
}

/// Sends the fixed payout of one channel
pub struct TransferExecutor {
    spec: ChannelSpec,
    payout_units: u128,
    client: Arc<dyn ChainClient>,
    settings: ConfirmationSettings,
}

impl std::fmt::Debug for TransferExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferExecutor")
            .field("channel", &self.spec.id)
            .field("payout_units", &self.payout_units)
            .field("settings", &self.settings)
            .finish()
    }
}

impl TransferExecutor {
    /// Executor for `spec`. Fails if the payout does not fit the
    /// channel's precision.
    pub fn new(
        spec: ChannelSpec,
        client: Arc<dyn ChainClient>,
        settings: ConfirmationSettings,
    ) -> Result<Self> {
        let payout_units = spec.payout_units()?;
        Ok(Self {
            spec,
            payout_units,
            client,
            settings,
        })
    }

    /// Channel served by this executor
    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    /// Whether `address` holds code
    pub async fn account_kind(&self, address: &Address) -> Result<AccountKind> {
        let code = self.client.code_at(address).await?;
        Ok(if code.is_empty() {
            AccountKind::KeyControlled
        } else {
            AccountKind::Contract
        })
    }

    /// Current balances of the distributing account
    pub async fn balances(&self) -> Result<DistributorBalances> {
        let native = format_units(
            self.client.native_balance(&self.spec.sender).await?,
            NATIVE_DECIMALS,
        )?;
        let token = match &self.spec.asset {
            AssetKind::Native => None,
            AssetKind::Token { contract } => Some(format_units(
                self.client.token_balance(contract, &self.spec.sender).await?,
                self.spec.decimals,
            )?),
        };
        Ok(DistributorBalances { native, token })
    }

    /// Check that one payout can be funded
    pub async fn preflight(&self) -> Result<()> {
        let native = self.client.native_balance(&self.spec.sender).await?;

        match &self.spec.asset {
            AssetKind::Native => {
                if native < self.payout_units {
                    return Err(Error::InsufficientFunds {
                        asset: self.spec.symbol.clone(),
                        required: self.spec.payout,
                        available: format_units(native, NATIVE_DECIMALS)?,
                    });
                }
            }
            AssetKind::Token { contract } => {
                let token = self.client.token_balance(contract, &self.spec.sender).await?;
                if token < self.payout_units {
                    return Err(Error::InsufficientFunds {
                        asset: self.spec.symbol.clone(),
                        required: self.spec.payout,
                        available: format_units(token, self.spec.decimals)?,
                    });
                }
                if native == 0 {
                    return Err(Error::InsufficientFunds {
                        asset: "gas".to_string(),
                        required: format_units(1, NATIVE_DECIMALS)?,
                        available: Decimal::ZERO,
                    });
                }
            }
        }

        Ok(())
    }

    /// Pay `to` and wait for confirmation
    pub async fn send(&self, to: &Address) -> Result<TransferReceipt> {
        self.preflight().await?;

        let instruction = TransferInstruction {
            from: self.spec.sender.clone(),
            to: to.clone(),
            asset: self.spec.asset.clone(),
            amount: self.payout_units,
        };
        let reference = self.client.submit(&instruction).await?;

        tracing::info!(
            channel = %self.spec.id,
            to = %to,
            reference = %reference,
            "Transfer broadcast"
        );

        let block_height = self.wait_for_receipt(&reference).await?;

        tracing::info!(
            channel = %self.spec.id,
            reference = %reference,
            block_height,
            "Transfer confirmed"
        );

        Ok(TransferReceipt {
            reference,
            block_height,
            amount: self.spec.payout,
        })
    }

    /// Ask once for the outcome of a broadcast transfer
    pub async fn confirmation(&self, reference: &str) -> Result<ConfirmationStatus> {
        Ok(match self.client.receipt(reference).await? {
            Some(receipt) if receipt.success => ConfirmationStatus::Confirmed {
                block_height: receipt.block_height,
            },
            Some(_) => ConfirmationStatus::Reverted,
            None => ConfirmationStatus::Unknown,
        })
    }

    async fn wait_for_receipt(&self, reference: &str) -> Result<u64> {
        let deadline = Instant::now() + self.settings.timeout;

        loop {
            match self.confirmation(reference).await {
                Ok(ConfirmationStatus::Confirmed { block_height }) => return Ok(block_height),
                Ok(ConfirmationStatus::Reverted) => {
                    return Err(Error::Reverted {
                        reference: reference.to_string(),
                    })
                }
                Ok(ConfirmationStatus::Unknown) => {}
                Err(e) => {
                    tracing::warn!(reference = %reference, error = %e, "Receipt query failed");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ConfirmationUnknown {
                    reference: reference.to_string(),
                });
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }
}
