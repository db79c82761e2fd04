//! Attestation consensus per batch
//!
//! # State machine
//!
//! ```text
//! Open ──(count(hash) ≥ quorum)──────────────▶ Finalized
//!   │
//!   └──(window elapsed, force complete)──┬───▶ FallbackFinalized   (unique leader, or claim tied for lead)
//!                                        └───▶ Open + resubmission  (no attestations, or tie without the claim)
//! ```
//!
//! A batch leaves `Open` at most once. Attestations arriving after that are
//! rejected so a finalized snapshot can never change.
//!
//! # Divergence
//!
//! The leading hash only moves when another hash gets strictly more votes.
//! Divergent validators are recomputed against the leader on every attestation
//! and against the winner at finalization; each of them is reported as
//! invalidated, in attestation order.

use crate::batch::BatchRegistry;
use crate::epoch::EpochLedger;
use crate::error::MarketError;
use crate::events::Event;
use crate::types::{Address, CallContext, EpochId, Hash, SnapshotState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub validator: Address,
    pub root_hash: Hash,
    pub timestamp: u64,
    pub block_number: u64,
    pub delayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub root_hash: Hash,
    pub state: SnapshotState,
    pub finalized_at: u64,
}

/// Attestations received for one batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttestationTally {
    /// In arrival order
    attestations: Vec<Attestation>,
    counts: HashMap<Hash, u64>,
    leader: Option<Hash>,
    divergent: Vec<Address>,
    outcome: Option<Outcome>,
    resubmission_requested: bool,
}

impl AttestationTally {
    pub fn count(&self, hash: &Hash) -> u64 {
        self.counts.get(hash).copied().unwrap_or(0)
    }

    /// Leading hash and its count
    pub fn leader(&self) -> Option<(Hash, u64)> {
        self.leader.map(|h| (h, self.count(&h)))
    }

    pub fn has_attested(&self, validator: &Address) -> bool {
        self.attestations.iter().any(|a| &a.validator == validator)
    }

    pub fn attestations(&self) -> &[Attestation] {
        &self.attestations
    }

    pub fn divergent(&self) -> &[Address] {
        &self.divergent
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn resubmission_requested(&self) -> bool {
        self.resubmission_requested
    }

    fn record(&mut self, attestation: Attestation) {
        let hash = attestation.root_hash;
        let count = {
            let c = self.counts.entry(hash).or_insert(0);
            *c += 1;
            *c
        };
        self.attestations.push(attestation);

        let leader_count = self.leader.map(|h| self.count(&h)).unwrap_or(0);
        if self.leader.is_none() || count > leader_count {
            self.leader = Some(hash);
        }
        if let Some(reference) = self.leader {
            self.recompute_divergent(&reference);
        }
    }

    fn recompute_divergent(&mut self, reference: &Hash) {
        self.divergent = self
            .attestations
            .iter()
            .filter(|a| &a.root_hash != reference)
            .map(|a| a.validator)
            .collect();
    }

    /// Hash a stalled batch can settle on: the most-attested one, with ties
    /// broken in favour of the sequencer's claim
    fn fallback_winner(&self, claimed: &Hash) -> Option<Hash> {
        let top = self.counts.values().copied().max()?;
        if self.count(claimed) == top {
            return Some(*claimed);
        }
        let mut leaders = self.counts.iter().filter(|(_, c)| **c == top);
        let (hash, _) = leaders.next()?;
        if leaders.next().is_some() { None } else { Some(*hash) }
    }
}

/// Per-market tuning the engine reads on each call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusParams {
    pub min_attestations: u64,
    pub attestation_window: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsensusEngine {
    tallies: HashMap<String, AttestationTally>,
    /// Latest finalized epoch per project
    last_finalized_epoch: HashMap<String, EpochId>,
}

impl ConsensusEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a validator's attestation; finalizes the batch when quorum is reached
    #[allow(clippy::too_many_arguments)]
    pub fn submit_attestation(
        &mut self,
        batches: &mut BatchRegistry,
        epochs: &EpochLedger,
        batch_cid: &str,
        epoch_id: EpochId,
        root_hash: Hash,
        params: &ConsensusParams,
        ctx: &CallContext,
    ) -> Result<Vec<Event>, MarketError> {
        let submitted_block = batches.require_in_epoch(batch_cid, epoch_id)?.submitted_block;
        let epoch_end = epochs.require(epoch_id)?.end;

        if let Some(tally) = self.tallies.get(batch_cid) {
            if tally.is_finalized() {
                return Err(MarketError::BatchAlreadyFinalized(batch_cid.to_string()));
            }
            if tally.has_attested(&ctx.caller) {
                return Err(MarketError::AlreadyAttested {
                    batch: batch_cid.to_string(),
                    validator: ctx.caller,
                });
            }
        }

        let delayed = ctx.block_number > submitted_block.saturating_add(params.attestation_window);
        let tally = self.tallies.entry(batch_cid.to_string()).or_default();
        tally.record(Attestation {
            validator: ctx.caller,
            root_hash,
            timestamp: ctx.timestamp,
            block_number: ctx.block_number,
            delayed,
        });

        let mut events = Vec::new();
        if delayed {
            warn!("Delayed attestation from {} for batch {}", ctx.caller, batch_cid);
            events.push(Event::DelayedAttestationSubmitted {
                batch_cid: batch_cid.to_string(),
                epoch_id,
                validator: ctx.caller,
                timestamp: ctx.timestamp,
            });
        } else {
            debug!("Attestation from {} for batch {}", ctx.caller, batch_cid);
            events.push(Event::SnapshotBatchAttestationSubmitted {
                batch_cid: batch_cid.to_string(),
                epoch_id,
                validator: ctx.caller,
                timestamp: ctx.timestamp,
            });
        }

        if tally.count(&root_hash) >= params.min_attestations {
            events.extend(Self::finalize(
                tally,
                &mut self.last_finalized_epoch,
                batches,
                batch_cid,
                epoch_id,
                epoch_end,
                root_hash,
                SnapshotState::Finalized,
                ctx,
            ));
        }

        Ok(events)
    }

    /// True once the attestation window after epoch release has elapsed
    /// without the batch reaching consensus
    pub fn check_dynamic(
        &self,
        batches: &BatchRegistry,
        epochs: &EpochLedger,
        batch_cid: &str,
        epoch_id: EpochId,
        attestation_window: u64,
        ctx: &CallContext,
    ) -> bool {
        if batches.require_in_epoch(batch_cid, epoch_id).is_err() {
            return false;
        }
        let Some(epoch) = epochs.get(epoch_id) else {
            return false;
        };
        let elapsed = ctx.block_number > epoch.released_block.saturating_add(attestation_window);
        let finalized = self.tallies.get(batch_cid).is_some_and(AttestationTally::is_finalized);
        elapsed && !finalized
    }

    /// Settle a stalled batch on its leading hash, or ask for resubmission
    #[allow(clippy::too_many_arguments)]
    pub fn force_complete(
        &mut self,
        batches: &mut BatchRegistry,
        epochs: &EpochLedger,
        batch_cid: &str,
        epoch_id: EpochId,
        attestation_window: u64,
        ctx: &CallContext,
    ) -> Result<Vec<Event>, MarketError> {
        let claimed = batches.require_in_epoch(batch_cid, epoch_id)?.sequencer_root_hash;
        if !self.check_dynamic(batches, epochs, batch_cid, epoch_id, attestation_window, ctx) {
            return Err(MarketError::ConsensusNotStalled(batch_cid.to_string()));
        }
        let epoch_end = epochs.require(epoch_id)?.end;

        let tally = self.tallies.entry(batch_cid.to_string()).or_default();
        match tally.fallback_winner(&claimed) {
            Some(winner) => Ok(Self::finalize(
                tally,
                &mut self.last_finalized_epoch,
                batches,
                batch_cid,
                epoch_id,
                epoch_end,
                winner,
                SnapshotState::FallbackFinalized,
                ctx,
            )),
            None => {
                tally.resubmission_requested = true;
                warn!(
                    "No consensus for batch {} ({} attestations), resubmission requested",
                    batch_cid,
                    tally.attestations.len()
                );
                Ok(vec![Event::TriggerBatchResubmission {
                    epoch_id,
                    batch_cid: batch_cid.to_string(),
                    timestamp: ctx.timestamp,
                }])
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finalize(
        tally: &mut AttestationTally,
        last_finalized_epoch: &mut HashMap<String, EpochId>,
        batches: &mut BatchRegistry,
        batch_cid: &str,
        epoch_id: EpochId,
        epoch_end: u64,
        winner: Hash,
        state: SnapshotState,
        ctx: &CallContext,
    ) -> Vec<Event> {
        let mut events = Vec::new();

        for (project_id, snapshot_cid) in batches.finalize_snapshots(batch_cid, state) {
            let last = last_finalized_epoch.entry(project_id.clone()).or_insert(epoch_id);
            *last = (*last).max(epoch_id);
            events.push(Event::SnapshotFinalized {
                epoch_id,
                epoch_end,
                project_id,
                snapshot_cid,
                timestamp: ctx.timestamp,
            });
        }

        tally.outcome = Some(Outcome { root_hash: winner, state, finalized_at: ctx.timestamp });
        tally.resubmission_requested = false;
        tally.leader = Some(winner);
        tally.recompute_divergent(&winner);

        info!(
            "Batch {} finalized ({}) for epoch {} with {} attestations",
            batch_cid,
            state,
            epoch_id,
            tally.count(&winner)
        );
        events.push(Event::SnapshotBatchFinalized {
            epoch_id,
            batch_cid: batch_cid.to_string(),
            root_hash: winner,
            fallback: state == SnapshotState::FallbackFinalized,
            timestamp: ctx.timestamp,
        });

        for validator in &tally.divergent {
            warn!("Invalidating attestation of {} for batch {}", validator, batch_cid);
            events.push(Event::ValidatorAttestationsInvalidated {
                epoch_id,
                batch_cid: batch_cid.to_string(),
                validator: *validator,
                timestamp: ctx.timestamp,
            });
        }

        events
    }

    /// Drop a batch's attestations after its content was resubmitted
    pub(crate) fn reopen(&mut self, batch_cid: &str) {
        self.tallies.remove(batch_cid);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn tally(&self, batch_cid: &str) -> Option<&AttestationTally> {
        self.tallies.get(batch_cid)
    }

    pub fn resubmission_pending(&self, batch_cid: &str) -> bool {
        self.tallies.get(batch_cid).is_some_and(AttestationTally::resubmission_requested)
    }

    pub fn is_finalized(&self, batch_cid: &str) -> bool {
        self.tallies.get(batch_cid).is_some_and(AttestationTally::is_finalized)
    }

    pub fn last_finalized_epoch(&self, project_id: &str) -> Option<EpochId> {
        self.last_finalized_epoch.get(project_id).copied()
    }
}
