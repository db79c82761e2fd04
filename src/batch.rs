//! Batch registry: sequencer-submitted project snapshots per epoch

use crate::epoch::EpochLedger;
use crate::error::{ensure_same_len, MarketError};
use crate::events::Event;
use crate::types::{CallContext, EpochId, Hash, SnapshotState};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// A submitted batch. Content is fixed unless consensus asks for a resubmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub cid: String,
    pub epoch_id: EpochId,
    pub project_ids: Vec<String>,
    /// Parallel to `project_ids`
    pub snapshot_cids: Vec<String>,
    /// Root hash the sequencer claims for this batch
    pub sequencer_root_hash: Hash,
    pub submitted_at: u64,
    /// Attestation window starts here
    pub submitted_block: u64,
    pub delayed: bool,
    /// Times the content was resubmitted after a resubmission trigger
    pub resubmissions: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStatus {
    pub state: SnapshotState,
    pub snapshot_cid: String,
    pub submitted_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchRegistry {
    batches: HashMap<String, Batch>,
    /// (project, epoch) -> status
    snapshots: HashMap<(String, EpochId), SnapshotStatus>,
    /// Batch cids per epoch, in submission order
    epoch_batches: HashMap<EpochId, Vec<String>>,
    project_first_epoch: HashMap<String, EpochId>,
    /// Latest epoch a sequencer submitted each project for
    last_sequencer_epoch: HashMap<String, EpochId>,
    completed_epochs: HashSet<EpochId>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a batch for a released epoch.
    ///
    /// `reopen` admits an already-known batch cid when consensus has asked for
    /// its content to be resubmitted; the project list must match exactly.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &mut self,
        batch_cid: &str,
        epochs: &EpochLedger,
        epoch_id: EpochId,
        project_ids: &[String],
        snapshot_cids: &[String],
        root_hash: Hash,
        batch_window: u64,
        reopen: bool,
        ctx: &CallContext,
    ) -> Result<Vec<Event>, MarketError> {
        ensure_same_len(project_ids.len(), snapshot_cids.len())?;
        if project_ids.is_empty() {
            return Err(MarketError::EmptyBatch);
        }
        let epoch = epochs.require(epoch_id)?;

        let delayed = ctx.block_number > epoch.released_block.saturating_add(batch_window);

        if reopen {
            if let Some(existing) = self.batches.get(batch_cid) {
                if existing.epoch_id == epoch.id && existing.project_ids == project_ids {
                    return Ok(self.resubmit(batch_cid, snapshot_cids, root_hash, delayed, ctx));
                }
            }
        }

        let mut seen = HashSet::with_capacity(project_ids.len());
        for project in project_ids {
            if !seen.insert(project.as_str())
                || self.snapshots.contains_key(&(project.clone(), epoch.id))
            {
                return Err(MarketError::DuplicateSnapshot { project: project.clone(), epoch: epoch.id });
            }
        }
        if self.batches.contains_key(batch_cid) {
            return Err(MarketError::DuplicateBatch(batch_cid.to_string()));
        }

        // All checks passed; mutate
        for (project, cid) in project_ids.iter().zip(snapshot_cids) {
            self.snapshots.insert(
                (project.clone(), epoch.id),
                SnapshotStatus {
                    state: SnapshotState::Pending,
                    snapshot_cid: cid.clone(),
                    submitted_at: ctx.timestamp,
                },
            );
            self.project_first_epoch.entry(project.clone()).or_insert(epoch.id);
            let last = self.last_sequencer_epoch.entry(project.clone()).or_insert(epoch.id);
            *last = (*last).max(epoch.id);
        }

        self.batches.insert(
            batch_cid.to_string(),
            Batch {
                cid: batch_cid.to_string(),
                epoch_id: epoch.id,
                project_ids: project_ids.to_vec(),
                snapshot_cids: snapshot_cids.to_vec(),
                sequencer_root_hash: root_hash,
                submitted_at: ctx.timestamp,
                submitted_block: ctx.block_number,
                delayed,
                resubmissions: 0,
            },
        );
        self.epoch_batches.entry(epoch.id).or_default().push(batch_cid.to_string());

        Ok(vec![Self::submitted_event(batch_cid, epoch.id, delayed, ctx)])
    }

    fn resubmit(
        &mut self,
        batch_cid: &str,
        snapshot_cids: &[String],
        root_hash: Hash,
        delayed: bool,
        ctx: &CallContext,
    ) -> Vec<Event> {
        let Some(batch) = self.batches.get_mut(batch_cid) else {
            return Vec::new();
        };
        batch.snapshot_cids = snapshot_cids.to_vec();
        batch.sequencer_root_hash = root_hash;
        batch.submitted_at = ctx.timestamp;
        batch.submitted_block = ctx.block_number;
        batch.delayed = delayed;
        batch.resubmissions = batch.resubmissions.saturating_add(1);

        for (project, cid) in batch.project_ids.iter().zip(snapshot_cids) {
            if let Some(status) = self.snapshots.get_mut(&(project.clone(), batch.epoch_id)) {
                status.snapshot_cid = cid.clone();
                status.submitted_at = ctx.timestamp;
            }
        }

        info!("Batch {} resubmitted ({} times)", batch_cid, batch.resubmissions);
        vec![Self::submitted_event(batch_cid, batch.epoch_id, delayed, ctx)]
    }

    fn submitted_event(batch_cid: &str, epoch_id: EpochId, delayed: bool, ctx: &CallContext) -> Event {
        if delayed {
            warn!("Delayed batch {} for epoch {}", batch_cid, epoch_id);
            Event::DelayedBatchSubmitted {
                batch_cid: batch_cid.to_string(),
                epoch_id,
                timestamp: ctx.timestamp,
            }
        } else {
            info!("Batch {} submitted for epoch {}", batch_cid, epoch_id);
            Event::SnapshotBatchSubmitted {
                batch_cid: batch_cid.to_string(),
                epoch_id,
                timestamp: ctx.timestamp,
            }
        }
    }

    /// Mark an epoch's batch submissions complete. Fails on the second call.
    pub fn end_submissions(&mut self, epoch_id: EpochId, ctx: &CallContext) -> Result<Vec<Event>, MarketError> {
        if !self.completed_epochs.insert(epoch_id) {
            return Err(MarketError::AlreadyCompleted(epoch_id));
        }
        Ok(vec![Event::BatchSubmissionsCompleted { epoch_id, timestamp: ctx.timestamp }])
    }

    /// Transition every project of a batch out of Pending.
    /// Returns (project, snapshot cid) pairs in batch order.
    pub(crate) fn finalize_snapshots(&mut self, batch_cid: &str, state: SnapshotState) -> Vec<(String, String)> {
        let Some(batch) = self.batches.get(batch_cid) else {
            return Vec::new();
        };
        let mut finalized = Vec::with_capacity(batch.project_ids.len());
        for project in &batch.project_ids {
            if let Some(status) = self.snapshots.get_mut(&(project.clone(), batch.epoch_id)) {
                if status.state == SnapshotState::Pending {
                    status.state = state;
                    finalized.push((project.clone(), status.snapshot_cid.clone()));
                }
            }
        }
        finalized
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get(&self, batch_cid: &str) -> Option<&Batch> {
        self.batches.get(batch_cid)
    }

    /// The batch, if it was submitted for `epoch_id`
    pub fn require_in_epoch(&self, batch_cid: &str, epoch_id: EpochId) -> Result<&Batch, MarketError> {
        match self.batches.get(batch_cid) {
            Some(batch) if batch.epoch_id == epoch_id => Ok(batch),
            _ => Err(MarketError::BatchEpochMismatch { batch: batch_cid.to_string(), epoch: epoch_id }),
        }
    }

    pub fn snapshot_status(&self, project_id: &str, epoch_id: EpochId) -> Option<&SnapshotStatus> {
        self.snapshots.get(&(project_id.to_string(), epoch_id))
    }

    pub fn epoch_batch_cids(&self, epoch_id: EpochId) -> &[String] {
        self.epoch_batches.get(&epoch_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn batch_projects(&self, batch_cid: &str) -> &[String] {
        self.batches.get(batch_cid).map(|b| b.project_ids.as_slice()).unwrap_or(&[])
    }

    pub fn project_first_epoch(&self, project_id: &str) -> Option<EpochId> {
        self.project_first_epoch.get(project_id).copied()
    }

    pub fn last_sequencer_epoch(&self, project_id: &str) -> Option<EpochId> {
        self.last_sequencer_epoch.get(project_id).copied()
    }

    pub fn submissions_completed(&self, epoch_id: EpochId) -> bool {
        self.completed_epochs.contains(&epoch_id)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
