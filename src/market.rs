//! Data market partition
//!
//! One market owns its roles, epochs, batches, consensus tallies and reward
//! ledger. Every entry point checks, in order: the market is active (where it
//! applies), the caller holds the required capability, then the operation's
//! own preconditions. Nothing is mutated until all of them pass.

use crate::batch::BatchRegistry;
use crate::consensus::{ConsensusEngine, ConsensusParams};
use crate::epoch::{Epoch, EpochLedger, EpochSchedule};
use crate::error::{ensure_same_len, MarketError};
use crate::events::Event;
use crate::nodes::NodeRegistry;
use crate::rewards::{RewardParams, RewardsLedger};
use crate::roles::{Role, RoleStore};
use crate::types::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Immutable identity of a market plus its enabled flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub id: MarketId,
    /// Handle derived from the factory address and id
    pub address: Address,
    pub owner: Address,
    pub epoch_size: u64,
    pub source_chain_id: u64,
    /// Source-chain block time in the same unit as `day_size`
    pub source_block_time: u64,
    pub use_external_counter: bool,
    pub enabled: bool,
    pub created_at: u64,
    pub created_block: u64,
}

/// Owner-tunable market parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub snapshot_submission_window: u64,
    pub batch_submission_window: u64,
    pub attestation_submission_window: u64,
    pub min_attestations_for_consensus: u64,
    pub daily_snapshot_quota: u64,
    pub reward_pool_size: Amount,
    pub day_size: u64,
    pub rewards_enabled: bool,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            snapshot_submission_window: DEFAULT_SNAPSHOT_SUBMISSION_WINDOW,
            batch_submission_window: DEFAULT_BATCH_SUBMISSION_WINDOW,
            attestation_submission_window: DEFAULT_ATTESTATION_SUBMISSION_WINDOW,
            min_attestations_for_consensus: DEFAULT_MIN_ATTESTATIONS,
            daily_snapshot_quota: DEFAULT_DAILY_SNAPSHOT_QUOTA,
            reward_pool_size: DEFAULT_REWARD_POOL_SIZE,
            day_size: DEFAULT_DAY_SIZE,
            rewards_enabled: true,
        }
    }
}

/// One owner-tunable parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    SnapshotSubmissionWindow(u64),
    BatchSubmissionWindow(u64),
    AttestationSubmissionWindow(u64),
    MinAttestationsForConsensus(u64),
    DailySnapshotQuota(u64),
    RewardPoolSize(Amount),
    DaySize(u64),
}

impl Setting {
    pub fn name(&self) -> &'static str {
        match self {
            Setting::SnapshotSubmissionWindow(_) => "snapshot_submission_window",
            Setting::BatchSubmissionWindow(_) => "batch_submission_window",
            Setting::AttestationSubmissionWindow(_) => "attestation_submission_window",
            Setting::MinAttestationsForConsensus(_) => "min_attestations_for_consensus",
            Setting::DailySnapshotQuota(_) => "daily_snapshot_quota",
            Setting::RewardPoolSize(_) => "reward_pool_size",
            Setting::DaySize(_) => "day_size",
        }
    }

    fn value(&self) -> String {
        match self {
            Setting::SnapshotSubmissionWindow(v)
            | Setting::BatchSubmissionWindow(v)
            | Setting::AttestationSubmissionWindow(v)
            | Setting::MinAttestationsForConsensus(v)
            | Setting::DailySnapshotQuota(v)
            | Setting::DaySize(v) => v.to_string(),
            Setting::RewardPoolSize(v) => v.to_string(),
        }
    }

    fn validate(&self) -> Result<(), MarketError> {
        match self {
            Setting::MinAttestationsForConsensus(0) => {
                Err(MarketError::InvalidSetting("min attestations must be at least 1"))
            }
            Setting::DaySize(0) => Err(MarketError::InvalidSetting("day size must be positive")),
            _ => Ok(()),
        }
    }

    /// Build a setting from its name and decimal value
    pub fn parse(name: &str, value: &str) -> Result<Self, MarketError> {
        if name == "reward_pool_size" {
            let v = value.parse().map_err(|_| MarketError::InvalidSetting("value is not a number"))?;
            return Ok(Setting::RewardPoolSize(v));
        }
        let v: u64 = value.parse().map_err(|_| MarketError::InvalidSetting("value is not a number"))?;
        match name {
            "snapshot_submission_window" => Ok(Setting::SnapshotSubmissionWindow(v)),
            "batch_submission_window" => Ok(Setting::BatchSubmissionWindow(v)),
            "attestation_submission_window" => Ok(Setting::AttestationSubmissionWindow(v)),
            "min_attestations_for_consensus" => Ok(Setting::MinAttestationsForConsensus(v)),
            "daily_snapshot_quota" => Ok(Setting::DailySnapshotQuota(v)),
            "day_size" => Ok(Setting::DaySize(v)),
            _ => Err(MarketError::InvalidSetting("unknown setting")),
        }
    }

    fn apply(&self, settings: &mut MarketSettings) {
        match *self {
            Setting::SnapshotSubmissionWindow(v) => settings.snapshot_submission_window = v,
            Setting::BatchSubmissionWindow(v) => settings.batch_submission_window = v,
            Setting::AttestationSubmissionWindow(v) => settings.attestation_submission_window = v,
            Setting::MinAttestationsForConsensus(v) => settings.min_attestations_for_consensus = v,
            Setting::DailySnapshotQuota(v) => settings.daily_snapshot_quota = v,
            Setting::RewardPoolSize(v) => settings.reward_pool_size = v,
            Setting::DaySize(v) => settings.day_size = v,
        }
    }
}

/// Per-slot view combining node registry and reward state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub slot_id: SlotId,
    pub snapshotter: Option<Address>,
    pub current_day_snapshot_count: u64,
    pub reward_points: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMarket {
    record: MarketRecord,
    settings: MarketSettings,
    roles: RoleStore,
    epoch_manager: Option<Address>,
    sequencer_id: String,
    epochs: EpochLedger,
    batches: BatchRegistry,
    consensus: ConsensusEngine,
    rewards: RewardsLedger,
}

impl DataMarket {
    pub fn new(record: MarketRecord) -> Self {
        Self::with_settings(record, MarketSettings::default())
    }

    pub fn with_settings(record: MarketRecord, settings: MarketSettings) -> Self {
        Self {
            record,
            settings,
            roles: RoleStore::new(),
            epoch_manager: None,
            sequencer_id: String::new(),
            epochs: EpochLedger::new(),
            batches: BatchRegistry::new(),
            consensus: ConsensusEngine::new(),
            rewards: RewardsLedger::new(),
        }
    }

    // =========================================================================
    // Capability checks
    // =========================================================================

    fn ensure_active(&self) -> Result<(), MarketError> {
        if self.record.enabled { Ok(()) } else { Err(MarketError::MarketNotActive(self.record.id)) }
    }

    fn ensure_owner(&self, caller: &Address) -> Result<(), MarketError> {
        if caller == &self.record.owner { Ok(()) } else { Err(MarketError::OnlyOwner(*caller)) }
    }

    fn ensure_epoch_manager(&self, caller: &Address) -> Result<(), MarketError> {
        match self.epoch_manager {
            Some(manager) if &manager == caller => Ok(()),
            _ => Err(MarketError::OnlyEpochAuthority(*caller)),
        }
    }

    fn schedule(&self) -> EpochSchedule {
        EpochSchedule {
            epoch_size: self.record.epoch_size,
            use_external_counter: self.record.use_external_counter,
            source_block_time: self.record.source_block_time,
            day_size: self.settings.day_size,
        }
    }

    fn consensus_params(&self) -> ConsensusParams {
        ConsensusParams {
            min_attestations: self.settings.min_attestations_for_consensus,
            attestation_window: self.settings.attestation_submission_window,
        }
    }

    fn reward_params(&self) -> RewardParams {
        RewardParams {
            pool_size: self.settings.reward_pool_size,
            daily_quota: self.settings.daily_snapshot_quota,
            enabled: self.settings.rewards_enabled,
        }
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.record.enabled = enabled;
    }

    // =========================================================================
    // Owner administration
    // =========================================================================

    /// Bulk add/remove for one role. Only effective changes are reported.
    pub fn update_addresses(
        &mut self,
        ctx: &CallContext,
        role: Role,
        principals: &[Address],
        allowed: &[bool],
    ) -> Result<Vec<Event>, MarketError> {
        self.ensure_owner(&ctx.caller)?;
        ensure_same_len(principals.len(), allowed.len())?;
        if principals.iter().any(Address::is_zero) {
            return Err(MarketError::ZeroAddress);
        }

        let mut events = Vec::new();
        for (principal, flag) in principals.iter().zip(allowed) {
            if self.roles.update(role, *principal, *flag) {
                info!("Market {}: {} {} {}", self.record.id, role, principal, if *flag { "added" } else { "removed" });
                events.push(role.event(*principal, *flag));
            }
        }
        Ok(events)
    }

    pub fn update_epoch_manager(&mut self, ctx: &CallContext, manager: Address) -> Result<Vec<Event>, MarketError> {
        self.ensure_owner(&ctx.caller)?;
        if manager.is_zero() {
            return Err(MarketError::ZeroAddress);
        }
        self.epoch_manager = Some(manager);
        Ok(vec![Event::EpochManagerUpdated { epoch_manager: manager }])
    }

    pub fn update_setting(&mut self, ctx: &CallContext, setting: Setting) -> Result<Vec<Event>, MarketError> {
        self.ensure_owner(&ctx.caller)?;
        setting.validate()?;
        setting.apply(&mut self.settings);
        Ok(vec![Event::SettingUpdated { setting: setting.name().to_string(), value: setting.value() }])
    }

    pub fn toggle_rewards(&mut self, ctx: &CallContext) -> Result<Vec<Event>, MarketError> {
        self.ensure_owner(&ctx.caller)?;
        self.settings.rewards_enabled = !self.settings.rewards_enabled;
        Ok(vec![Event::RewardsToggled { enabled: self.settings.rewards_enabled }])
    }

    pub fn set_sequencer_id(&mut self, ctx: &CallContext, sequencer_id: &str) -> Result<Vec<Event>, MarketError> {
        self.roles.require(Role::Admin, &ctx.caller)?;
        self.sequencer_id = sequencer_id.to_string();
        Ok(vec![Event::SequencerIdUpdated { sequencer_id: self.sequencer_id.clone() }])
    }

    pub fn load_slot_submissions(
        &mut self,
        ctx: &CallContext,
        slot: SlotId,
        day: u64,
        count: u64,
    ) -> Result<Vec<Event>, MarketError> {
        self.ensure_owner(&ctx.caller)?;
        self.rewards.load_slot_submissions(slot, day, count);
        Ok(Vec::new())
    }

    pub fn load_current_day(&mut self, ctx: &CallContext, day: u64) -> Result<Vec<Event>, MarketError> {
        self.ensure_owner(&ctx.caller)?;
        self.epochs.load_current_day(day);
        Ok(Vec::new())
    }

    // =========================================================================
    // Epochs
    // =========================================================================

    pub fn release_epoch(&mut self, ctx: &CallContext, begin: u64, end: u64) -> Result<Vec<Event>, MarketError> {
        self.ensure_active()?;
        self.ensure_epoch_manager(&ctx.caller)?;
        let schedule = self.schedule();
        self.epochs.release(begin, end, &schedule, ctx)
    }

    pub fn force_skip_epoch(&mut self, ctx: &CallContext, begin: u64, end: u64) -> Result<Vec<Event>, MarketError> {
        self.ensure_active()?;
        self.ensure_owner(&ctx.caller)?;
        let schedule = self.schedule();
        let events = self.epochs.force_skip(begin, end, &schedule, ctx)?;
        info!("Market {}: forced epoch [{}, {}]", self.record.id, begin, end);
        Ok(events)
    }

    // =========================================================================
    // Batches
    // =========================================================================

    pub fn submit_batch(
        &mut self,
        ctx: &CallContext,
        batch_cid: &str,
        epoch_id: EpochId,
        project_ids: &[String],
        snapshot_cids: &[String],
        root_hash: Hash,
    ) -> Result<Vec<Event>, MarketError> {
        self.ensure_active()?;
        self.roles.require(Role::Sequencer, &ctx.caller)?;

        let reopen = self.consensus.resubmission_pending(batch_cid);
        let events = self.batches.submit(
            batch_cid,
            &self.epochs,
            epoch_id,
            project_ids,
            snapshot_cids,
            root_hash,
            self.settings.batch_submission_window,
            reopen,
            ctx,
        )?;
        if reopen {
            self.consensus.reopen(batch_cid);
        }
        Ok(events)
    }

    pub fn end_batch_submissions(&mut self, ctx: &CallContext, epoch_id: EpochId) -> Result<Vec<Event>, MarketError> {
        self.ensure_active()?;
        self.roles.require(Role::Sequencer, &ctx.caller)?;
        self.epochs.require(epoch_id)?;
        self.batches.end_submissions(epoch_id, ctx)
    }

    // =========================================================================
    // Consensus
    // =========================================================================

    pub fn submit_attestation(
        &mut self,
        ctx: &CallContext,
        batch_cid: &str,
        epoch_id: EpochId,
        root_hash: Hash,
    ) -> Result<Vec<Event>, MarketError> {
        self.ensure_active()?;
        self.roles.require(Role::Validator, &ctx.caller)?;
        let params = self.consensus_params();
        self.consensus.submit_attestation(&mut self.batches, &self.epochs, batch_cid, epoch_id, root_hash, &params, ctx)
    }

    pub fn check_dynamic_consensus(&self, ctx: &CallContext, batch_cid: &str, epoch_id: EpochId) -> bool {
        self.consensus.check_dynamic(
            &self.batches,
            &self.epochs,
            batch_cid,
            epoch_id,
            self.settings.attestation_submission_window,
            ctx,
        )
    }

    pub fn force_complete_consensus(
        &mut self,
        ctx: &CallContext,
        batch_cid: &str,
        epoch_id: EpochId,
    ) -> Result<Vec<Event>, MarketError> {
        self.ensure_active()?;
        self.ensure_owner(&ctx.caller)?;
        let window = self.settings.attestation_submission_window;
        self.consensus.force_complete(&mut self.batches, &self.epochs, batch_cid, epoch_id, window, ctx)
    }

    // =========================================================================
    // Rewards
    // =========================================================================

    pub fn update_rewards(
        &mut self,
        ctx: &CallContext,
        slot_ids: &[SlotId],
        submission_counts: &[u64],
        day: u64,
        eligible_nodes: u64,
        nodes: &dyn NodeRegistry,
    ) -> Result<Vec<Event>, MarketError> {
        self.ensure_active()?;
        self.roles.require(Role::Sequencer, &ctx.caller)?;
        let params = self.reward_params();
        self.rewards.update_rewards(slot_ids, submission_counts, day, eligible_nodes, &params, nodes, ctx)
    }

    pub fn update_eligible_nodes(&mut self, ctx: &CallContext, day: u64, count: u64) -> Result<Vec<Event>, MarketError> {
        self.roles.require(Role::Sequencer, &ctx.caller)?;
        Ok(self.rewards.update_eligible_nodes(day, count))
    }

    pub(crate) fn rewards_mut(&mut self) -> &mut RewardsLedger {
        &mut self.rewards
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn record(&self) -> &MarketRecord {
        &self.record
    }

    pub fn id(&self) -> MarketId {
        self.record.id
    }

    pub fn is_enabled(&self) -> bool {
        self.record.enabled
    }

    pub fn settings(&self) -> &MarketSettings {
        &self.settings
    }

    pub fn roles(&self) -> &RoleStore {
        &self.roles
    }

    pub fn epoch_manager(&self) -> Option<Address> {
        self.epoch_manager
    }

    pub fn sequencer_id(&self) -> &str {
        &self.sequencer_id
    }

    pub fn epochs(&self) -> &EpochLedger {
        &self.epochs
    }

    pub fn current_epoch(&self) -> Option<&Epoch> {
        self.epochs.current()
    }

    pub fn day_counter(&self) -> u64 {
        self.epochs.day_counter()
    }

    pub fn epochs_in_a_day(&self) -> u64 {
        self.schedule().epochs_in_a_day()
    }

    pub fn batches(&self) -> &BatchRegistry {
        &self.batches
    }

    pub fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }

    pub fn rewards(&self) -> &RewardsLedger {
        &self.rewards
    }

    /// Finalized snapshot cid for a project in an epoch
    pub fn finalized_snapshot_cid(&self, project_id: &str, epoch_id: EpochId) -> Option<&str> {
        self.batches
            .snapshot_status(project_id, epoch_id)
            .filter(|s| s.state.is_final())
            .map(|s| s.snapshot_cid.as_str())
    }

    pub fn slot_info(&self, slot: SlotId, nodes: &dyn NodeRegistry) -> SlotInfo {
        SlotInfo {
            slot_id: slot,
            snapshotter: nodes.slot_snapshotter(slot),
            current_day_snapshot_count: self.rewards.submission_count(slot, self.day_counter()),
            reward_points: self.rewards.slot_points(slot),
        }
    }
}
