//! Settlement of claims whose confirmation was not observed in time
//!
//! Receipts are queried against a snapshot without the ledger lock. The
//! lock is taken only to apply results, and a result is applied only if
//! the same pending claim is still in the ledger.

use crate::engine::ClaimEngine;
use crate::error::Result;
use claim_ledger::{AttemptEntry, ChannelId, ClaimRecord, ParticipantId, PendingClaim};
use transfer_executor::ConfirmationStatus;

/// A pending claim that reached a final state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClaim {
    /// Channel
    pub channel: ChannelId,
    /// Participant
    pub participant: ParticipantId,
    /// Transaction hash
    pub reference: String,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Mined and recorded as successes
    pub confirmed: Vec<ResolvedClaim>,
    /// Mined and failed; slot released
    pub reverted: Vec<ResolvedClaim>,
    /// Still without a receipt, or without a hash to look one up
    pub still_pending: usize,
}

struct Settled {
    channel: ChannelId,
    participant: ParticipantId,
    claim: PendingClaim,
    reference: String,
    status: ConfirmationStatus,
}

impl ClaimEngine {
    /// Resolve every pending claim that has a receipt by now
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        let snapshot = self.store.snapshot()?;
        let mut report = ReconcileReport::default();
        let mut settled = Vec::new();

        for (channel, channel_state) in &snapshot.channels {
            for (participant, claim) in &channel_state.pending {
                let Some(reference) = claim.reference.clone() else {
                    tracing::warn!(
                        channel = %channel,
                        participant = %participant,
                        address = %claim.address,
                        "Pending claim has no transaction hash, awaiting operator"
                    );
                    report.still_pending += 1;
                    continue;
                };
                let Some(executor) = self.executors.get(channel) else {
                    tracing::warn!(channel = %channel, reference = %reference, "No executor for pending claim");
                    report.still_pending += 1;
                    continue;
                };

                let status = match executor.confirmation(&reference).await {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::warn!(
                            channel = %channel,
                            reference = %reference,
                            error = %e,
                            "Receipt query failed during reconciliation"
                        );
                        ConfirmationStatus::Unknown
                    }
                };
                if status == ConfirmationStatus::Unknown {
                    report.still_pending += 1;
                    continue;
                }

                settled.push(Settled {
                    channel: channel.clone(),
                    participant: participant.clone(),
                    claim: claim.clone(),
                    reference,
                    status,
                });
            }
        }

        if !settled.is_empty() {
            let _guard = self.lock.acquire().await?;
            let mut state = self.store.load()?;
            let now = self.clock.now();

            for Settled {
                channel,
                participant,
                claim,
                reference,
                status,
            } in settled
            {
                let channel_state = state.channel_mut(&channel);
                if channel_state.pending.get(&participant) != Some(&claim) {
                    tracing::debug!(channel = %channel, reference = %reference, "Pending claim changed during reconciliation");
                    continue;
                }
                let resolved = ResolvedClaim {
                    channel: channel.clone(),
                    participant: participant.clone(),
                    reference: reference.clone(),
                };

                match status {
                    ConfirmationStatus::Confirmed { block_height } => {
                        // The claim counts from its broadcast time
                        channel_state.record_success(
                            participant.clone(),
                            ClaimRecord {
                                address: claim.address.clone(),
                                reference: reference.clone(),
                                block_height: Some(block_height),
                                timestamp: claim.since,
                            },
                        );
                        channel_state.push_attempt(AttemptEntry::success(
                            participant,
                            claim.address,
                            reference,
                            now,
                        ));
                        tracing::info!(channel = %channel, reference = %resolved.reference, block_height, "Pending claim confirmed");
                        self.metrics.record_resolution("confirmed");
                        report.confirmed.push(resolved);
                    }
                    ConfirmationStatus::Reverted => {
                        channel_state.pending.remove(&participant);
                        channel_state.push_attempt(AttemptEntry::failure(
                            participant,
                            claim.address,
                            format!("Transfer {} reverted", reference),
                            now,
                        ));
                        tracing::warn!(channel = %channel, reference = %resolved.reference, "Pending claim reverted");
                        self.metrics.record_resolution("reverted");
                        report.reverted.push(resolved);
                    }
                    ConfirmationStatus::Unknown => {}
                }
            }

            if !report.confirmed.is_empty() || !report.reverted.is_empty() {
                self.store.commit(&state)?;
            }
        }

        tracing::info!(
            confirmed = report.confirmed.len(),
            reverted = report.reverted.len(),
            still_pending = report.still_pending,
            "Reconciliation finished"
        );

        Ok(report)
    }
}
