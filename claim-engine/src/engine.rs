//! The claim state machine
//!
//! # Flow
//!
//! ```text
//! Received -> Validated -> LockAcquired -> PolicyApproved -> Transferred -> Committed -> Released
//! ```
//!
//! Cheap checks (channel, role, address syntax, allow/deny lists, account
//! code) run before the lock. Everything that depends on ledger state is
//! decided again after the lock, against a fresh load. The transfer runs
//! while the lock is held, so two claims can never both observe a free
//! slot or an expired cooldown.
//!
//! Rejections after address validation are appended to the attempt log.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{ClaimError, Result, ValidationError};
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use claim_ledger::{
    AttemptEntry, ChannelId, ClaimRecord, CommunityId, FileLock, JsonFileStore, LedgerState,
    LedgerStore, LockCoordinator, ParticipantId, PendingClaim,
};
use claim_policy::{EffectivePolicy, JsonPolicyStore, PolicyDefaults, PolicyStore};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use transfer_executor::{AccountKind, Address, EvmRpcClient, TransferExecutor};

/// Attempt-log reason of a broadcast whose outcome is not known yet
pub const CONFIRMATION_UNKNOWN_REASON: &str = "confirmation unknown";

/// Attempt-log reason of a broadcast whose reply was lost
pub const BROADCAST_UNKNOWN_REASON: &str = "broadcast outcome unknown";

/// A participant's request for one payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Channel to pay through
    pub channel: ChannelId,

    /// Destination address as typed by the participant
    pub address: String,

    /// Who is claiming
    pub participant: ParticipantId,

    /// Community the request came from
    pub community: CommunityId,

    /// Whether the participant holds the faucet role
    pub has_required_role: bool,
}

/// A confirmed and recorded payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSuccess {
    /// Channel paid through
    pub channel: ChannelId,

    /// Normalized destination
    pub address: Address,

    /// Transaction hash
    pub reference: String,

    /// Block that included the transfer
    pub block_height: u64,

    /// Sequence number of this claim on the channel
    pub index: u64,

    /// Amount paid
    pub amount: Decimal,

    /// Asset symbol
    pub symbol: String,

    /// Explorer link
    pub explorer_url: String,
}

/// Orchestrates claims over the ledger, lock, policy and executors
pub struct ClaimEngine {
    pub(crate) store: Arc<dyn LedgerStore>,
    pub(crate) lock: Arc<dyn LockCoordinator>,
    pub(crate) policies: Arc<dyn PolicyStore>,
    pub(crate) executors: BTreeMap<ChannelId, Arc<TransferExecutor>>,
    pub(crate) defaults: PolicyDefaults,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Metrics,
    require_role: bool,
}

impl std::fmt::Debug for ClaimEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimEngine")
            .field("channels", &self.executors.keys().collect::<Vec<_>>())
            .field("defaults", &self.defaults)
            .field("require_role", &self.require_role)
            .finish_non_exhaustive()
    }
}

impl ClaimEngine {
    /// Engine over injected ledger, lock and policy stores. Channels are
    /// added with [`Self::with_executor`].
    pub fn new(
        store: Arc<dyn LedgerStore>,
        lock: Arc<dyn LockCoordinator>,
        policies: Arc<dyn PolicyStore>,
    ) -> Self {
        Self {
            store,
            lock,
            policies,
            executors: BTreeMap::new(),
            defaults: PolicyDefaults::default(),
            clock: Arc::new(SystemClock),
            metrics: Metrics::default(),
            require_role: false,
        }
    }

    /// Serve a channel
    pub fn with_executor(mut self, executor: TransferExecutor) -> Self {
        let id = ChannelId::new(executor.spec().id.clone());
        self.executors.insert(id, Arc::new(executor));
        self
    }

    /// Policy fallbacks
    pub fn with_defaults(mut self, defaults: PolicyDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Metrics collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Require the faucet role on every claim
    pub fn require_role(mut self, required: bool) -> Self {
        self.require_role = required;
        self
    }

    /// File-backed engine talking JSON-RPC to every channel with a sender
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = JsonFileStore::new(config.ledger_path(), config.channel_ids())?;
        let lock = FileLock::new(config.lock_path(), config.lock_settings());
        let policies = JsonPolicyStore::new(config.policy_path(), config.global_policy_path());
        let migrated = policies.migrate_legacy()?;
        if !migrated.is_empty() {
            tracing::warn!(
                communities = migrated.communities.len(),
                global = migrated.global,
                "Legacy policy settings migrated at startup"
            );
        }

        let mut engine = Self::new(Arc::new(store), Arc::new(lock), Arc::new(policies))
            .with_defaults(config.policy_defaults())
            .require_role(config.require_role);

        let rpc_timeout = Duration::from_secs(config.confirmation.rpc_timeout_secs);
        for channel in &config.channels {
            let Some(spec) = channel.spec() else {
                tracing::warn!(channel = %channel.id, "Channel disabled: no sender configured");
                continue;
            };
            let client = EvmRpcClient::new(channel.rpc_url.clone(), rpc_timeout)
                .map_err(|e| ClaimError::Config(format!("channel {}: {}", channel.id, e)))?;
            let executor =
                TransferExecutor::new(spec, Arc::new(client), config.confirmation_settings())
                    .map_err(|e| ClaimError::Config(format!("channel {}: {}", channel.id, e)))?;
            engine = engine.with_executor(executor);
        }

        tracing::info!(
            channels = engine.executors.len(),
            data_dir = %config.data_dir.display(),
            "Claim engine ready"
        );

        Ok(engine)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Channels with an executor
    pub fn channels(&self) -> impl Iterator<Item = &ChannelId> {
        self.executors.keys()
    }

    pub(crate) fn policy_for(&self, community: &CommunityId) -> Result<EffectivePolicy> {
        let community = self.policies.community(community)?;
        let global = self.policies.global()?;
        Ok(EffectivePolicy::resolve(&community, &global, &self.defaults))
    }

    /// Run one claim to a terminal state
    pub async fn claim(&self, request: ClaimRequest) -> Result<ClaimSuccess> {
        let outcome = self.process(&request).await;
        match &outcome {
            Ok(_) => self.metrics.record_claim("success"),
            Err(e) => self.metrics.record_claim(e.label()),
        }
        outcome
    }

    async fn process(&self, request: &ClaimRequest) -> Result<ClaimSuccess> {
        let channel = &request.channel;
        let participant = &request.participant;

        // Received -> Rejected
        let executor = self.executors.get(channel).ok_or_else(|| {
            ValidationError::UnsupportedChannel(channel.to_string())
        })?;
        if self.require_role && !request.has_required_role {
            tracing::warn!(channel = %channel, participant = %participant, "Claim rejected: missing role");
            return Err(ValidationError::MissingRole.into());
        }
        let address = Address::parse(&request.address)
            .map_err(|_| ValidationError::InvalidAddress(request.address.trim().to_string()))?;

        let policy = self.policy_for(&request.community)?;
        if let Err(rejection) = policy.screen(participant) {
            tracing::warn!(
                channel = %channel,
                participant = %participant,
                reason = rejection.label(),
                "Claim rejected before lock"
            );
            self.audit_rejection(request, &address, &rejection.to_string())
                .await;
            return Err(rejection.into());
        }

        if executor
            .account_kind(&address)
            .await
            .map_err(ClaimError::Chain)?
            == AccountKind::Contract
        {
            let err = ValidationError::ContractAddress;
            tracing::warn!(channel = %channel, participant = %participant, address = %address, "Claim rejected: contract address");
            self.audit_rejection(request, &address, &err.to_string()).await;
            return Err(err.into());
        }

        tracing::debug!(channel = %channel, participant = %participant, "Claim validated");

        // Validated -> LockAcquired
        let guard = self.lock.acquire().await?;
        self.metrics.record_lock_wait(guard.waited());
        tracing::debug!(channel = %channel, waited = ?guard.waited(), "Ledger lock acquired");

        let mut state = self.store.load()?;
        let now = self.clock.now();

        // LockAcquired -> PolicyApproved | Rejected
        if let Err(rejection) = policy.evaluate(state.channel_mut(channel), channel, participant, now)
        {
            state.channel_mut(channel).push_attempt(AttemptEntry::failure(
                participant.clone(),
                address.as_str(),
                rejection.to_string(),
                now,
            ));
            self.store.commit(&state)?;
            tracing::warn!(
                channel = %channel,
                participant = %participant,
                reason = rejection.label(),
                "Claim rejected"
            );
            return Err(rejection.into());
        }

        // PolicyApproved -> Transferred | Failed
        let started = Instant::now();
        let sent = executor.send(&address).await;
        self.metrics.record_transfer(started.elapsed());
        let at = self.clock.now();

        let receipt = match sent {
            Ok(receipt) => receipt,
            Err(transfer_executor::Error::ConfirmationUnknown { reference }) => {
                self.hold_pending(&mut state, request, &address, Some(reference.clone()), at)?;
                return Err(ClaimError::ConfirmationUnknown { reference });
            }
            Err(transfer_executor::Error::BroadcastUnknown(reason)) => {
                self.hold_pending(&mut state, request, &address, None, at)?;
                return Err(ClaimError::BroadcastUnknown { reason });
            }
            Err(e) => {
                let err = ClaimError::from(e);
                tracing::error!(
                    channel = %channel,
                    participant = %participant,
                    error = %err,
                    "Claim transfer failed"
                );
                state.channel_mut(channel).push_attempt(AttemptEntry::failure(
                    participant.clone(),
                    address.as_str(),
                    err.to_string(),
                    at,
                ));
                self.store.commit(&state)?;
                return Err(err);
            }
        };

        // Transferred -> Committed
        let channel_state = state.channel_mut(channel);
        let index = channel_state.record_success(
            participant.clone(),
            ClaimRecord {
                address: address.as_str().to_string(),
                reference: receipt.reference.clone(),
                block_height: Some(receipt.block_height),
                timestamp: at,
            },
        );
        channel_state.push_attempt(AttemptEntry::success(
            participant.clone(),
            address.as_str(),
            receipt.reference.clone(),
            at,
        ));

        if let Err(e) = self.store.commit(&state) {
            tracing::error!(
                channel = %channel,
                participant = %participant,
                reference = %receipt.reference,
                error = %e,
                "PAYOUT SENT BUT NOT RECORDED: ledger commit failed after a confirmed transfer"
            );
            return Err(e.into());
        }

        tracing::info!(
            channel = %channel,
            participant = %participant,
            reference = %receipt.reference,
            block_height = receipt.block_height,
            index,
            "Claim committed"
        );

        drop(guard);

        let spec = executor.spec();
        Ok(ClaimSuccess {
            channel: channel.clone(),
            address,
            explorer_url: spec.explorer_url(&receipt.reference),
            reference: receipt.reference,
            block_height: receipt.block_height,
            index,
            amount: receipt.amount,
            symbol: spec.symbol.clone(),
        })
    }

    /// Record a transfer that may have gone out. Blocks the participant and
    /// holds a cap slot until it is resolved.
    fn hold_pending(
        &self,
        state: &mut LedgerState,
        request: &ClaimRequest,
        address: &Address,
        reference: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let channel = &request.channel;
        let participant = &request.participant;
        let reason = match reference {
            Some(_) => CONFIRMATION_UNKNOWN_REASON,
            None => BROADCAST_UNKNOWN_REASON,
        };

        let channel_state = state.channel_mut(channel);
        channel_state.pending.insert(
            participant.clone(),
            PendingClaim {
                address: address.as_str().to_string(),
                reference: reference.clone(),
                since: at,
            },
        );
        channel_state.push_attempt(AttemptEntry::failure(
            participant.clone(),
            address.as_str(),
            reason,
            at,
        ));

        if let Err(e) = self.store.commit(state) {
            tracing::error!(
                channel = %channel,
                participant = %participant,
                reference = ?reference,
                error = %e,
                "UNRECORDED BROADCAST: pending transfer could not be written to the ledger"
            );
            return Err(e.into());
        }

        match &reference {
            Some(reference) => tracing::warn!(
                channel = %channel,
                participant = %participant,
                reference = %reference,
                "Transfer outcome unknown, held as pending"
            ),
            None => tracing::error!(
                channel = %channel,
                participant = %participant,
                address = %address,
                "Broadcast reply lost, participant blocked until an operator clears the pending claim"
            ),
        }
        Ok(())
    }

    /// Append a pre-lock rejection to the attempt log. The rejection stands
    /// even if this fails.
    async fn audit_rejection(&self, request: &ClaimRequest, address: &Address, reason: &str) {
        let recorded: Result<()> = async {
            let _guard = self.lock.acquire().await?;
            let mut state = self.store.load()?;
            state.channel_mut(&request.channel).push_attempt(AttemptEntry::failure(
                request.participant.clone(),
                address.as_str(),
                reason,
                self.clock.now(),
            ));
            self.store.commit(&state)?;
            Ok::<(), ClaimError>(())
        }
        .await;

        if let Err(e) = recorded {
            tracing::warn!(
                channel = %request.channel,
                participant = %request.participant,
                error = %e,
                "Rejection not recorded in attempt log"
            );
        }
    }
}
