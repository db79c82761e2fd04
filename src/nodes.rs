//! Node registry boundary
//!
//! Slot ownership and snapshotter assignment live outside the engine. The
//! engine only reads them: who owns a slot, who runs it, and node counts.

use crate::types::{Address, SlotId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Read access to slot ownership
pub trait NodeRegistry {
    fn slot_owner(&self, slot: SlotId) -> Option<Address>;

    /// Address submitting snapshots for the slot
    fn slot_snapshotter(&self, slot: SlotId) -> Option<Address>;

    /// Slots currently held by `owner`, ascending
    fn owned_slots(&self, owner: &Address) -> Vec<SlotId>;

    fn enabled_node_count(&self) -> u64;

    fn total_node_count(&self) -> u64;

    /// Distinct snapshotter addresses across all slots
    fn total_snapshotter_count(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub owner: Address,
    pub snapshotter: Address,
    pub enabled: bool,
}

/// Node registry kept alongside engine state (CLI and tests)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryNodeRegistry {
    nodes: BTreeMap<SlotId, NodeInfo>,
}

impl InMemoryNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign (or reassign) a slot; new slots start enabled
    pub fn assign_slot(&mut self, slot: SlotId, owner: Address, snapshotter: Address) {
        let enabled = self.nodes.get(&slot).is_none_or(|n| n.enabled);
        self.nodes.insert(slot, NodeInfo { owner, snapshotter, enabled });
    }

    /// Returns false for an unknown slot
    pub fn set_enabled(&mut self, slot: SlotId, enabled: bool) -> bool {
        match self.nodes.get_mut(&slot) {
            Some(node) => {
                node.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn node(&self, slot: SlotId) -> Option<&NodeInfo> {
        self.nodes.get(&slot)
    }
}

impl NodeRegistry for InMemoryNodeRegistry {
    fn slot_owner(&self, slot: SlotId) -> Option<Address> {
        self.nodes.get(&slot).map(|n| n.owner)
    }

    fn slot_snapshotter(&self, slot: SlotId) -> Option<Address> {
        self.nodes.get(&slot).map(|n| n.snapshotter)
    }

    fn owned_slots(&self, owner: &Address) -> Vec<SlotId> {
        self.nodes
            .iter()
            .filter(|(_, n)| &n.owner == owner)
            .map(|(slot, _)| *slot)
            .collect()
    }

    fn enabled_node_count(&self) -> u64 {
        self.nodes.values().filter(|n| n.enabled).count() as u64
    }

    fn total_node_count(&self) -> u64 {
        self.nodes.len() as u64
    }

    fn total_snapshotter_count(&self) -> u64 {
        self.nodes.values().map(|n| n.snapshotter).collect::<BTreeSet<_>>().len() as u64
    }
}
