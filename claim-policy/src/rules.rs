//! Policy evaluation
//!
//! [`EffectivePolicy`] merges community settings, global lists and
//! defaults into the values one claim is judged against.

use crate::{
    error::PolicyRejection,
    types::{CommunityPolicy, GlobalLists, PolicyDefaults, MAX_COOLDOWN_HOURS},
};
use chrono::{DateTime, Duration, Utc};
use claim_ledger::{ChannelId, ChannelState, ParticipantId};
use std::collections::{BTreeMap, BTreeSet};

/// Resolved policy for one community
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePolicy {
    caps: BTreeMap<ChannelId, u64>,
    fallback_cap: u64,
    cooldown_hours: u64,
    whitelist: BTreeSet<ParticipantId>,
    blacklist: BTreeSet<ParticipantId>,
}

impl EffectivePolicy {
    /// Merge community settings over defaults and union the lists
    pub fn resolve(
        community: &CommunityPolicy,
        global: &GlobalLists,
        defaults: &PolicyDefaults,
    ) -> Self {
        let mut caps = defaults.caps.clone();
        for (channel, cap) in &community.caps {
            // Zero is not a valid cap; treat it as unset
            if *cap > 0 {
                caps.insert(channel.clone(), *cap);
            }
        }

        let configured = community
            .cooldown_hours
            .filter(|hours| *hours > 0)
            .unwrap_or(defaults.cooldown_hours);
        let cooldown_hours = configured.clamp(1, MAX_COOLDOWN_HOURS);
        if cooldown_hours != configured {
            tracing::warn!(
                configured,
                applied = cooldown_hours,
                "Cooldown outside 1..={} hours, clamped",
                MAX_COOLDOWN_HOURS
            );
        }

        Self {
            caps,
            fallback_cap: defaults.fallback_cap,
            cooldown_hours,
            whitelist: community.whitelist.union(&global.whitelist).cloned().collect(),
            blacklist: community.blacklist.union(&global.blacklist).cloned().collect(),
        }
    }

    /// Cap of a channel
    pub fn cap_for(&self, channel: &ChannelId) -> u64 {
        self.caps.get(channel).copied().unwrap_or(self.fallback_cap)
    }

    /// Minimum time between two claims of one participant
    pub fn cooldown(&self) -> Duration {
        // Bounded by MAX_COOLDOWN_HOURS in `resolve`
        Duration::hours(self.cooldown_hours as i64)
    }

    /// Cooldown in hours
    pub fn cooldown_hours(&self) -> u64 {
        self.cooldown_hours
    }

    /// On the community or the global blacklist
    pub fn is_blacklisted(&self, participant: &ParticipantId) -> bool {
        self.blacklist.contains(participant)
    }

    /// Either whitelist is non-empty
    pub fn whitelist_required(&self) -> bool {
        !self.whitelist.is_empty()
    }

    /// On the community or the global whitelist
    pub fn is_whitelisted(&self, participant: &ParticipantId) -> bool {
        self.whitelist.contains(participant)
    }

    /// List checks that need no ledger state (blacklist, then whitelist)
    pub fn screen(&self, participant: &ParticipantId) -> Result<(), PolicyRejection> {
        if self.is_blacklisted(participant) {
            return Err(PolicyRejection::Blacklisted);
        }
        if self.whitelist_required() && !self.is_whitelisted(participant) {
            return Err(PolicyRejection::NotWhitelisted);
        }
        Ok(())
    }

    /// Full check against freshly loaded channel state.
    ///
    /// Order: paused, cap, blacklist, whitelist, pending, cooldown.
    pub fn evaluate(
        &self,
        state: &ChannelState,
        channel: &ChannelId,
        participant: &ParticipantId,
        now: DateTime<Utc>,
    ) -> Result<(), PolicyRejection> {
        if state.paused {
            return Err(PolicyRejection::Paused);
        }

        let cap = self.cap_for(channel);
        if state.slots_used() >= cap {
            return Err(PolicyRejection::CapReached { cap });
        }

        self.screen(participant)?;

        if state.pending.contains_key(participant) {
            return Err(PolicyRejection::AlreadyPending);
        }

        if let Some(last) = state.last_claim(participant) {
            let cooldown = self.cooldown();
            match last.timestamp.checked_add_signed(cooldown) {
                Some(next_allowed) if now >= next_allowed => {}
                Some(next_allowed) => {
                    return Err(PolicyRejection::Cooldown {
                        remaining: next_allowed - now,
                    })
                }
                None => return Err(PolicyRejection::Cooldown { remaining: cooldown }),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim_ledger::{ClaimRecord, PendingClaim};

    fn base() -> ChannelId {
        ChannelId::new("base-usdt")
    }

    fn record(at: DateTime<Utc>) -> ClaimRecord {
        ClaimRecord {
            address: "0xaa".to_string(),
            reference: "0x01".to_string(),
            block_height: Some(1),
            timestamp: at,
        }
    }

    #[test]
    fn test_resolve_falls_back_to_defaults() {
        let mut community = CommunityPolicy::default();
        community.caps.insert(base(), 0);
        community.cooldown_hours = Some(0);

        let mut defaults = PolicyDefaults::default();
        defaults.caps.insert(base(), 50);

        let policy = EffectivePolicy::resolve(&community, &GlobalLists::default(), &defaults);
        assert_eq!(policy.cap_for(&base()), 50);
        assert_eq!(policy.cap_for(&ChannelId::new("sepolia-eth")), 10);
        assert_eq!(policy.cooldown(), Duration::hours(24));
    }

    #[test]
    fn test_lists_are_unioned() {
        let mut community = CommunityPolicy::default();
        community.whitelist.insert(ParticipantId::new("a"));
        let mut global = GlobalLists::default();
        global.whitelist.insert(ParticipantId::new("b"));
        global.blacklist.insert(ParticipantId::new("c"));

        let policy = EffectivePolicy::resolve(&community, &global, &PolicyDefaults::default());
        assert!(policy.whitelist_required());
        assert!(policy.screen(&ParticipantId::new("a")).is_ok());
        assert!(policy.screen(&ParticipantId::new("b")).is_ok());
        assert_eq!(
            policy.screen(&ParticipantId::new("c")),
            Err(PolicyRejection::Blacklisted)
        );
        assert_eq!(
            policy.screen(&ParticipantId::new("d")),
            Err(PolicyRejection::NotWhitelisted)
        );
    }

    #[test]
    fn test_global_whitelist_alone_requires_membership() {
        let mut global = GlobalLists::default();
        global.whitelist.insert(ParticipantId::new("vip"));
        let policy =
            EffectivePolicy::resolve(&CommunityPolicy::default(), &global, &PolicyDefaults::default());
        assert_eq!(
            policy.screen(&ParticipantId::new("someone")),
            Err(PolicyRejection::NotWhitelisted)
        );
    }

    #[test]
    fn test_cooldown_boundary() {
        let policy = EffectivePolicy::resolve(
            &CommunityPolicy::default(),
            &GlobalLists::default(),
            &PolicyDefaults::default(),
        );
        let alice = ParticipantId::new("alice");
        let t0 = Utc::now();
        let mut state = ChannelState::default();
        state.record_success(alice.clone(), record(t0));

        let early = t0 + Duration::hours(23) + Duration::minutes(59);
        match policy.evaluate(&state, &base(), &alice, early) {
            Err(rejection @ PolicyRejection::Cooldown { .. }) => {
                assert_eq!(rejection.to_string(), "Cooldown active. Try again in 1 minute(s).");
            }
            other => panic!("expected cooldown, got {:?}", other),
        }

        assert!(policy
            .evaluate(&state, &base(), &alice, t0 + Duration::hours(24))
            .is_ok());
    }

    #[test]
    fn test_out_of_range_cooldown_is_clamped() {
        let mut community = CommunityPolicy::default();
        community.cooldown_hours = Some(1_000_000_000_000);
        let policy =
            EffectivePolicy::resolve(&community, &GlobalLists::default(), &PolicyDefaults::default());
        assert_eq!(policy.cooldown_hours(), MAX_COOLDOWN_HOURS);

        let alice = ParticipantId::new("alice");
        let t0 = Utc::now();
        let mut state = ChannelState::default();
        state.record_success(alice.clone(), record(t0));
        assert!(matches!(
            policy.evaluate(&state, &base(), &alice, t0 + Duration::hours(24)),
            Err(PolicyRejection::Cooldown { .. })
        ));
        assert!(policy
            .evaluate(&state, &base(), &alice, t0 + Duration::hours(168))
            .is_ok());

        let defaults = PolicyDefaults {
            cooldown_hours: u64::MAX,
            ..PolicyDefaults::default()
        };
        let policy =
            EffectivePolicy::resolve(&CommunityPolicy::default(), &GlobalLists::default(), &defaults);
        assert_eq!(policy.cooldown(), Duration::hours(168));
    }

    #[test]
    fn test_cooldown_near_the_end_of_time_does_not_overflow() {
        let policy = EffectivePolicy::resolve(
            &CommunityPolicy::default(),
            &GlobalLists::default(),
            &PolicyDefaults::default(),
        );
        let alice = ParticipantId::new("alice");
        let mut state = ChannelState::default();
        state.record_success(alice.clone(), record(DateTime::<Utc>::MAX_UTC));

        assert!(matches!(
            policy.evaluate(&state, &base(), &alice, Utc::now()),
            Err(PolicyRejection::Cooldown { .. })
        ));
    }

    #[test]
    fn test_pending_blocks_and_counts_toward_cap() {
        let mut community = CommunityPolicy::default();
        community.caps.insert(base(), 2);
        let policy =
            EffectivePolicy::resolve(&community, &GlobalLists::default(), &PolicyDefaults::default());

        let mut state = ChannelState::default();
        state.pending.insert(
            ParticipantId::new("bob"),
            PendingClaim {
                address: "0xbb".to_string(),
                reference: Some("0x02".to_string()),
                since: Utc::now(),
            },
        );

        assert_eq!(
            policy.evaluate(&state, &base(), &ParticipantId::new("bob"), Utc::now()),
            Err(PolicyRejection::AlreadyPending)
        );

        state.record_success(ParticipantId::new("carol"), record(Utc::now()));
        assert_eq!(
            policy.evaluate(&state, &base(), &ParticipantId::new("dave"), Utc::now()),
            Err(PolicyRejection::CapReached { cap: 2 })
        );
    }
}
