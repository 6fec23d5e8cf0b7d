//! Shared harness: two channels over a scriptable in-memory chain

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use claim_engine::{ClaimEngine, ClaimRequest, ManualClock};
use claim_ledger::{ChannelId, CommunityId, InProcessLock, LedgerStore, LockCoordinator, MemoryStore, ParticipantId};
use claim_policy::{MemoryPolicyStore, PolicyStore};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use transfer_executor::{
    Address, AssetKind, ChannelSpec, ConfirmationSettings, MockChainClient, TransferExecutor,
};

pub const SENDER: &str = "0x00000000000000000000000000000000000000bb";
pub const TOKEN: &str = "0x00000000000000000000000000000000000000cc";
pub const NATIVE: &str = "sepolia-eth";
pub const USDT: &str = "base-usdt";

/// 1 ETH in wei
pub const ONE_ETH: u128 = 1_000_000_000_000_000_000;

pub struct Harness {
    pub engine: ClaimEngine,
    pub store: Arc<dyn LedgerStore>,
    pub chain: Arc<MockChainClient>,
    pub clock: Arc<ManualClock>,
}

pub fn start() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
}

pub fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

/// Distinct wallet per participant number
pub fn wallet(n: u8) -> String {
    format!("0x{:040x}", 0x1000 + n as u32)
}

pub fn native_spec() -> ChannelSpec {
    ChannelSpec {
        id: NATIVE.to_string(),
        display_name: "Sepolia ETH".to_string(),
        symbol: "ETH".to_string(),
        asset: AssetKind::Native,
        payout: Decimal::new(5, 3),
        decimals: 18,
        sender: addr(SENDER),
        explorer_tx_url: "https://sepolia.etherscan.io/tx/".to_string(),
    }
}

pub fn token_spec() -> ChannelSpec {
    ChannelSpec {
        id: USDT.to_string(),
        display_name: "USDT (Base)".to_string(),
        symbol: "USDT".to_string(),
        asset: AssetKind::Token {
            contract: addr(TOKEN),
        },
        payout: Decimal::from(10),
        decimals: 6,
        sender: addr(SENDER),
        explorer_tx_url: "https://basescan.org/tx/".to_string(),
    }
}

pub fn confirmation() -> ConfirmationSettings {
    ConfirmationSettings {
        timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(5),
    }
}

/// Engine over the given seams, funded for 100 payouts on each channel
pub fn harness_with(
    store: Arc<dyn LedgerStore>,
    lock: Arc<dyn LockCoordinator>,
    policies: Arc<dyn PolicyStore>,
    chain: Arc<MockChainClient>,
) -> Harness {
    chain.set_native_balance(&addr(SENDER), ONE_ETH);
    chain.set_token_balance(&addr(TOKEN), &addr(SENDER), 1_000_000_000);

    let clock = Arc::new(ManualClock::new(start()));
    let engine = ClaimEngine::new(store.clone(), lock, policies)
        .with_executor(TransferExecutor::new(native_spec(), chain.clone(), confirmation()).unwrap())
        .with_executor(TransferExecutor::new(token_spec(), chain.clone(), confirmation()).unwrap())
        .with_clock(clock.clone())
        .require_role(true);

    Harness {
        engine,
        store,
        chain,
        clock,
    }
}

pub fn harness() -> Harness {
    let channels = [ChannelId::new(NATIVE), ChannelId::new(USDT)];
    harness_with(
        Arc::new(MemoryStore::new(&channels)),
        Arc::new(InProcessLock::default()),
        Arc::new(MemoryPolicyStore::new()),
        Arc::new(MockChainClient::new()),
    )
}

pub fn request(channel: &str, participant: &str, address: &str) -> ClaimRequest {
    ClaimRequest {
        channel: ChannelId::new(channel),
        address: address.to_string(),
        participant: ParticipantId::new(participant),
        community: guild(),
        has_required_role: true,
    }
}

pub fn guild() -> CommunityId {
    CommunityId::new("guild")
}
