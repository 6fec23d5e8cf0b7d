//! In-memory chain for tests and dry runs

use crate::address::Address;
use crate::client::ChainClient;
use crate::error::{Error, Result};
use crate::types::{AssetKind, ChainReceipt, TransferInstruction};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    native: HashMap<Address, u128>,
    tokens: HashMap<(Address, Address), u128>,
    contracts: HashSet<Address>,
    receipts: HashMap<String, ChainReceipt>,
    withheld: HashMap<String, ChainReceipt>,
    block_height: u64,
    nonce: u64,
    fail_submit: Option<String>,
    revert_next: bool,
    never_confirm: bool,
    lose_submit_response: bool,
}

/// Scriptable in-memory chain.
///
/// Transfers move balances immediately and are mined in a new block.
#[derive(Debug, Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
    latency: Option<Duration>,
    submits: AtomicUsize,
    queries: AtomicUsize,
}

impl MockChainClient {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain that sleeps before answering every call
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Set a native balance (base units)
    pub fn set_native_balance(&self, address: &Address, units: u128) {
        self.state.lock().native.insert(address.clone(), units);
    }

    /// Set a token balance (base units)
    pub fn set_token_balance(&self, contract: &Address, holder: &Address, units: u128) {
        self.state
            .lock()
            .tokens
            .insert((contract.clone(), holder.clone()), units);
    }

    /// Deploy code at an address
    pub fn add_contract(&self, address: &Address) {
        self.state.lock().contracts.insert(address.clone());
    }

    /// Refuse every broadcast with `reason`; `None` clears it
    pub fn fail_submit(&self, reason: Option<&str>) {
        self.state.lock().fail_submit = reason.map(str::to_string);
    }

    /// Mine the next transfer as reverted
    pub fn revert_next(&self) {
        self.state.lock().revert_next = true;
    }

    /// Apply every broadcast but answer it with
    /// [`Error::BroadcastUnknown`], as when the reply is lost in transit
    pub fn lose_submit_response(&self, enabled: bool) {
        self.state.lock().lose_submit_response = enabled;
    }

    /// Hold back receipts of new transfers until [`Self::release_receipts`]
    pub fn never_confirm(&self, enabled: bool) {
        self.state.lock().never_confirm = enabled;
    }

    /// Publish every withheld receipt
    pub fn release_receipts(&self) {
        let mut state = self.state.lock();
        let withheld: Vec<_> = state.withheld.drain().collect();
        state.receipts.extend(withheld);
    }

    /// Native balance (base units)
    pub fn native_of(&self, address: &Address) -> u128 {
        self.state.lock().native.get(address).copied().unwrap_or(0)
    }

    /// Token balance (base units)
    pub fn token_of(&self, contract: &Address, holder: &Address) -> u128 {
        self.state
            .lock()
            .tokens
            .get(&(contract.clone(), holder.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Broadcasts attempted so far
    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    /// Read calls (code, balances, receipts) so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn code_at(&self, address: &Address) -> Result<Vec<u8>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.state.lock().contracts.contains(address) {
            Ok(vec![0x60, 0x80, 0x60, 0x40])
        } else {
            Ok(Vec::new())
        }
    }

    async fn native_balance(&self, address: &Address) -> Result<u128> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(self.native_of(address))
    }

    async fn token_balance(&self, contract: &Address, holder: &Address) -> Result<u128> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(self.token_of(contract, holder))
    }

    async fn submit(&self, instruction: &TransferInstruction) -> Result<String> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let mut state = self.state.lock();
        if let Some(reason) = &state.fail_submit {
            return Err(Error::Submission(reason.clone()));
        }

        state.nonce += 1;
        state.block_height += 1;
        let reference = format!("0x{:064x}", state.nonce);
        let success = !std::mem::take(&mut state.revert_next);

        if success {
            let ledger_key = match &instruction.asset {
                AssetKind::Native => None,
                AssetKind::Token { contract } => Some(contract.clone()),
            };
            let balance = match &ledger_key {
                None => state.native.entry(instruction.from.clone()).or_default(),
                Some(contract) => state
                    .tokens
                    .entry((contract.clone(), instruction.from.clone()))
                    .or_default(),
            };
            if *balance < instruction.amount {
                return Err(Error::Submission("transfer amount exceeds balance".to_string()));
            }
            *balance -= instruction.amount;

            let credited = match ledger_key {
                None => state.native.entry(instruction.to.clone()).or_default(),
                Some(contract) => state
                    .tokens
                    .entry((contract, instruction.to.clone()))
                    .or_default(),
            };
            *credited += instruction.amount;
        }

        let receipt = ChainReceipt {
            block_height: state.block_height,
            success,
        };
        if state.never_confirm {
            state.withheld.insert(reference.clone(), receipt);
        } else {
            state.receipts.insert(reference.clone(), receipt);
        }

        if state.lose_submit_response {
            return Err(Error::BroadcastUnknown("connection reset by peer".to_string()));
        }
        Ok(reference)
    }

    async fn receipt(&self, reference: &str) -> Result<Option<ChainReceipt>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(self.state.lock().receipts.get(reference).copied())
    }
}
