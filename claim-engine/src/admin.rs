//! Operator surface: pause, policy edits, pending claims, export, status
//!
//! Status and export read a snapshot without the lock.

use crate::engine::ClaimEngine;
use crate::error::{Result, ValidationError};
use claim_ledger::{
    export_rows, to_csv, AttemptEntry, ChannelId, ClaimReceipt, CommunityId, ExportRow,
    ParticipantId, PendingClaim,
};
use claim_policy::{ListKind, Scope};
use transfer_executor::DistributorBalances;

/// Attempt-log reason of a pending claim removed by an operator
pub const PENDING_CLEARED_REASON: &str = "pending claim cleared by operator";

/// Number of recent claims shown per channel
pub const RECENT_CLAIMS: usize = 5;

/// Channels an admin operation applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSelector {
    /// Every channel in the ledger
    All,
    /// One channel
    One(ChannelId),
}

impl std::str::FromStr for ChannelSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("all") {
            ChannelSelector::All
        } else {
            ChannelSelector::One(ChannelId::new(s))
        })
    }
}

/// Display snapshot of one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Channel
    pub channel: ChannelId,
    /// Successful claims
    pub total: u64,
    /// Cap in force for the community
    pub cap: u64,
    /// Slots left (pending claims hold a slot)
    pub remaining: u64,
    /// Claims refused while set
    pub paused: bool,
    /// Transfers awaiting confirmation
    pub pending: usize,
    /// Latest successful claims, oldest first
    pub recent: Vec<ClaimReceipt>,
    /// Distributor balances, `None` when unavailable
    pub balances: Option<DistributorBalances>,
}

impl ClaimEngine {
    /// Pause or resume channels. Returns the channels changed.
    pub async fn set_paused(
        &self,
        selector: &ChannelSelector,
        paused: bool,
    ) -> Result<Vec<ChannelId>> {
        let _guard = self.lock.acquire().await?;
        let mut state = self.store.load()?;

        let targets: Vec<ChannelId> = match selector {
            ChannelSelector::All => state.channels.keys().cloned().collect(),
            ChannelSelector::One(id) => {
                if state.channel(id).is_none() && !self.executors.contains_key(id) {
                    return Err(ValidationError::UnsupportedChannel(id.to_string()).into());
                }
                vec![id.clone()]
            }
        };

        for id in &targets {
            state.channel_mut(id).paused = paused;
        }
        self.store.commit(&state)?;

        tracing::info!(channels = ?targets, paused, "Pause flag updated");
        Ok(targets)
    }

    /// Drop a participant's pending claim once its transfer has been
    /// checked by hand. The participant may claim again afterwards.
    pub async fn clear_pending(
        &self,
        channel: &ChannelId,
        participant: &ParticipantId,
    ) -> Result<Option<PendingClaim>> {
        let _guard = self.lock.acquire().await?;
        let mut state = self.store.load()?;

        let channel_state = state.channel_mut(channel);
        let Some(cleared) = channel_state.pending.remove(participant) else {
            return Ok(None);
        };
        channel_state.push_attempt(AttemptEntry::failure(
            participant.clone(),
            cleared.address.clone(),
            PENDING_CLEARED_REASON,
            self.clock.now(),
        ));
        self.store.commit(&state)?;

        tracing::warn!(
            channel = %channel,
            participant = %participant,
            address = %cleared.address,
            reference = ?cleared.reference,
            "Pending claim cleared"
        );
        Ok(Some(cleared))
    }

    /// Set a community's cap for a channel
    pub fn set_cap(&self, community: &CommunityId, channel: &ChannelId, cap: u64) -> Result<()> {
        if !self.executors.contains_key(channel) && self.store.snapshot()?.channel(channel).is_none() {
            return Err(ValidationError::UnsupportedChannel(channel.to_string()).into());
        }
        self.policies.set_cap(community, channel, cap)?;
        Ok(())
    }

    /// Set a community's cooldown
    pub fn set_cooldown_hours(&self, community: &CommunityId, hours: u64) -> Result<()> {
        self.policies.set_cooldown_hours(community, hours)?;
        Ok(())
    }

    /// Add to or remove from an allow/deny list. Returns whether it changed.
    pub fn update_list(
        &self,
        scope: &Scope,
        kind: ListKind,
        participant: &ParticipantId,
        add: bool,
    ) -> Result<bool> {
        Ok(self.policies.update_list(scope, kind, participant, add)?)
    }

    /// Successful claims as rows
    pub fn export(&self, channel: Option<&ChannelId>) -> Result<Vec<ExportRow>> {
        let state = self.store.snapshot()?;
        Ok(export_rows(&state, channel))
    }

    /// Successful claims as CSV
    pub fn export_csv(&self, channel: Option<&ChannelId>) -> Result<String> {
        Ok(to_csv(&self.export(channel)?)?)
    }

    /// Per-channel snapshot for a community. Reads without the lock.
    pub async fn status(&self, community: &CommunityId) -> Result<Vec<ChannelStatus>> {
        let state = self.store.snapshot()?;
        let policy = self.policy_for(community)?;

        let mut statuses = Vec::with_capacity(state.channels.len());
        for (id, channel) in &state.channels {
            let cap = policy.cap_for(id);
            let balances = match self.executors.get(id) {
                Some(executor) => match executor.balances().await {
                    Ok(balances) => Some(balances),
                    Err(e) => {
                        tracing::warn!(channel = %id, error = %e, "Balance lookup failed");
                        None
                    }
                },
                None => None,
            };

            statuses.push(ChannelStatus {
                channel: id.clone(),
                total: channel.total,
                cap,
                remaining: channel.remaining(cap),
                paused: channel.paused,
                pending: channel.pending.len(),
                recent: channel.recent(RECENT_CLAIMS).to_vec(),
                balances,
            });
        }

        Ok(statuses)
    }
}
