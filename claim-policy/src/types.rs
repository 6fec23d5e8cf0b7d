//! Policy types

use claim_ledger::{ChannelId, CommunityId, ParticipantId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Longest cooldown an admin may configure (one week)
pub const MAX_COOLDOWN_HOURS: u64 = 168;

/// Faucet settings of one community
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommunityPolicy {
    /// Cap per channel; channels without an entry use the default cap
    pub caps: BTreeMap<ChannelId, u64>,

    /// Hours between two claims of one participant (`None` uses the default)
    pub cooldown_hours: Option<u64>,

    /// Participants allowed to claim (empty: everyone, unless the global list is set)
    pub whitelist: BTreeSet<ParticipantId>,

    /// Participants refused
    pub blacklist: BTreeSet<ParticipantId>,
}

/// Allow/deny lists applying to every community
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalLists {
    /// Participants allowed everywhere
    pub whitelist: BTreeSet<ParticipantId>,

    /// Participants refused everywhere
    pub blacklist: BTreeSet<ParticipantId>,
}

/// Fallbacks used when a community has not configured a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefaults {
    /// Default cap per channel
    pub caps: BTreeMap<ChannelId, u64>,

    /// Cap for channels missing from `caps`
    pub fallback_cap: u64,

    /// Default cooldown
    pub cooldown_hours: u64,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            caps: BTreeMap::new(),
            fallback_cap: 10,
            cooldown_hours: 24,
        }
    }
}

impl PolicyDefaults {
    /// Default cap of a channel
    pub fn cap_for(&self, channel: &ChannelId) -> u64 {
        self.caps.get(channel).copied().unwrap_or(self.fallback_cap)
    }
}

/// Which allow/deny list an admin operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    /// Allow list
    Whitelist,
    /// Deny list
    Blacklist,
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKind::Whitelist => write!(f, "whitelist"),
            ListKind::Blacklist => write!(f, "blacklist"),
        }
    }
}

/// Scope of a list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// One community
    Community(CommunityId),
    /// Every community
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Community(id) => write!(f, "community {}", id),
            Scope::Global => write!(f, "global"),
        }
    }
}

impl CommunityPolicy {
    /// Mutable list of a kind
    pub fn list_mut(&mut self, kind: ListKind) -> &mut BTreeSet<ParticipantId> {
        match kind {
            ListKind::Whitelist => &mut self.whitelist,
            ListKind::Blacklist => &mut self.blacklist,
        }
    }
}

impl GlobalLists {
    /// Mutable list of a kind
    pub fn list_mut(&mut self, kind: ListKind) -> &mut BTreeSet<ParticipantId> {
        match kind {
            ListKind::Whitelist => &mut self.whitelist,
            ListKind::Blacklist => &mut self.blacklist,
        }
    }
}
