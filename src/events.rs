//! Notifications emitted by successful operations

use crate::types::{amount_str, hex_hash, Address, Amount, EpochId, Hash, MarketId, SlotId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    // Registry
    MarketCreated {
        market_id: MarketId,
        address: Address,
        owner: Address,
        epoch_size: u64,
        source_chain_id: u64,
        source_block_time: u64,
        use_external_counter: bool,
        timestamp: u64,
    },
    MarketToggled { enabled: bool, timestamp: u64 },
    FactoryUpdated { address: Address },
    NodeRegistryUpdated { address: Address },

    // Roles and settings
    ValidatorsUpdated { validator: Address, allowed: bool },
    SequencersUpdated { sequencer: Address, allowed: bool },
    AdminsUpdated { admin: Address, allowed: bool },
    EpochManagerUpdated { epoch_manager: Address },
    SettingUpdated { setting: String, value: String },
    SequencerIdUpdated { sequencer_id: String },

    // Epochs
    EpochReleased { epoch_id: EpochId, begin: u64, end: u64, timestamp: u64 },
    DayStarted { day: u64, timestamp: u64 },

    // Batches
    SnapshotBatchSubmitted { batch_cid: String, epoch_id: EpochId, timestamp: u64 },
    DelayedBatchSubmitted { batch_cid: String, epoch_id: EpochId, timestamp: u64 },
    BatchSubmissionsCompleted { epoch_id: EpochId, timestamp: u64 },

    // Consensus
    SnapshotBatchAttestationSubmitted {
        batch_cid: String,
        epoch_id: EpochId,
        validator: Address,
        timestamp: u64,
    },
    DelayedAttestationSubmitted {
        batch_cid: String,
        epoch_id: EpochId,
        validator: Address,
        timestamp: u64,
    },
    SnapshotFinalized {
        epoch_id: EpochId,
        epoch_end: u64,
        project_id: String,
        snapshot_cid: String,
        timestamp: u64,
    },
    SnapshotBatchFinalized {
        epoch_id: EpochId,
        batch_cid: String,
        #[serde(with = "hex_hash")]
        root_hash: Hash,
        fallback: bool,
        timestamp: u64,
    },
    ValidatorAttestationsInvalidated {
        epoch_id: EpochId,
        batch_cid: String,
        validator: Address,
        timestamp: u64,
    },
    TriggerBatchResubmission { epoch_id: EpochId, batch_cid: String, timestamp: u64 },

    // Rewards
    #[serde(rename = "RewardsDistributedEvent")]
    RewardsDistributed {
        snapshotter: Address,
        slot_id: SlotId,
        day: u64,
        #[serde(with = "amount_str")]
        points: Amount,
        timestamp: u64,
    },
    #[serde(rename = "DailyTaskCompletedEvent")]
    DailyTaskCompleted { snapshotter: Address, slot_id: SlotId, day: u64, timestamp: u64 },
    EligibleNodesUpdated { day: u64, count: u64 },
    RewardsToggled { enabled: bool },
    RewardsClaimed {
        user: Address,
        #[serde(with = "amount_str")]
        total: Amount,
        timestamp: u64,
    },
    Deposited {
        from: Address,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
    EmergencyWithdrawn {
        to: Address,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
}

impl Event {
    /// Variant name, for logs
    pub fn name(&self) -> &'static str {
        match self {
            Event::MarketCreated { .. } => "MarketCreated",
            Event::MarketToggled { .. } => "MarketToggled",
            Event::FactoryUpdated { .. } => "FactoryUpdated",
            Event::NodeRegistryUpdated { .. } => "NodeRegistryUpdated",
            Event::ValidatorsUpdated { .. } => "ValidatorsUpdated",
            Event::SequencersUpdated { .. } => "SequencersUpdated",
            Event::AdminsUpdated { .. } => "AdminsUpdated",
            Event::EpochManagerUpdated { .. } => "EpochManagerUpdated",
            Event::SettingUpdated { .. } => "SettingUpdated",
            Event::SequencerIdUpdated { .. } => "SequencerIdUpdated",
            Event::EpochReleased { .. } => "EpochReleased",
            Event::DayStarted { .. } => "DayStarted",
            Event::SnapshotBatchSubmitted { .. } => "SnapshotBatchSubmitted",
            Event::DelayedBatchSubmitted { .. } => "DelayedBatchSubmitted",
            Event::BatchSubmissionsCompleted { .. } => "BatchSubmissionsCompleted",
            Event::SnapshotBatchAttestationSubmitted { .. } => "SnapshotBatchAttestationSubmitted",
            Event::DelayedAttestationSubmitted { .. } => "DelayedAttestationSubmitted",
            Event::SnapshotFinalized { .. } => "SnapshotFinalized",
            Event::SnapshotBatchFinalized { .. } => "SnapshotBatchFinalized",
            Event::ValidatorAttestationsInvalidated { .. } => "ValidatorAttestationsInvalidated",
            Event::TriggerBatchResubmission { .. } => "TriggerBatchResubmission",
            Event::RewardsDistributed { .. } => "RewardsDistributedEvent",
            Event::DailyTaskCompleted { .. } => "DailyTaskCompletedEvent",
            Event::EligibleNodesUpdated { .. } => "EligibleNodesUpdated",
            Event::RewardsToggled { .. } => "RewardsToggled",
            Event::RewardsClaimed { .. } => "RewardsClaimed",
            Event::Deposited { .. } => "Deposited",
            Event::EmergencyWithdrawn { .. } => "EmergencyWithdrawn",
        }
    }
}

/// An event tagged with the market it concerns (`None` for registry-wide events)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub market: Option<MarketId>,
    #[serde(flatten)]
    pub event: Event,
}

/// Names of a notification list, in emission order
pub fn event_names(notifications: &[Notification]) -> Vec<&'static str> {
    notifications.iter().map(|n| n.event.name()).collect()
}
