//! Market registry: multi-tenant front door
//!
//! Holds the arena of market partitions and the shared reward vault. Every
//! market operation is resolved to its partition here and forwarded; the
//! registry itself never reaches into a market's maps. Successful operations
//! are tagged with their market and appended to the notification journal.

use crate::crypto::derive_market_address;
use crate::error::MarketError;
use crate::events::{Event, Notification};
use crate::market::{DataMarket, MarketRecord, MarketSettings, Setting, SlotInfo};
use crate::nodes::NodeRegistry;
use crate::roles::Role;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Arguments for creating a market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketParams {
    pub owner: Address,
    pub epoch_size: u64,
    pub source_chain_id: u64,
    pub source_block_time: u64,
    pub use_external_counter: bool,
}

/// Node registry totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub total: u64,
    pub enabled: u64,
    pub snapshotters: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRegistry {
    owner: Address,
    /// Salt for market handle derivation
    factory: Address,
    node_registry: Address,
    /// Index = market id - 1
    markets: Vec<DataMarket>,
    by_address: HashMap<Address, MarketId>,
    vault_balance: Amount,
    total_claimed: Amount,
    /// Notifications since the last drain; persisted separately
    #[serde(skip)]
    journal: Vec<Notification>,
}

impl MarketRegistry {
    pub fn new(owner: Address, factory: Address) -> Self {
        Self {
            owner,
            factory,
            node_registry: Address::ZERO,
            markets: Vec::new(),
            by_address: HashMap::new(),
            vault_balance: 0,
            total_claimed: 0,
            journal: Vec::new(),
        }
    }

    fn ensure_owner(&self, caller: &Address) -> Result<(), MarketError> {
        if caller == &self.owner { Ok(()) } else { Err(MarketError::OnlyRegistryOwner(*caller)) }
    }

    fn market_mut(&mut self, id: MarketId) -> Result<&mut DataMarket, MarketError> {
        id.checked_sub(1)
            .and_then(|idx| self.markets.get_mut(idx as usize))
            .ok_or(MarketError::UnknownMarket(id))
    }

    fn commit(&mut self, market: Option<MarketId>, events: Vec<Event>) -> Vec<Notification> {
        let notifications: Vec<Notification> = events
            .into_iter()
            .map(|event| Notification { market, event })
            .collect();
        for n in &notifications {
            debug!("Notification {} market={:?}", n.event.name(), n.market);
        }
        self.journal.extend(notifications.iter().cloned());
        notifications
    }

    /// Run a market operation and journal its events
    fn with_market<F>(&mut self, id: MarketId, op: &'static str, f: F) -> Result<Vec<Notification>, MarketError>
    where
        F: FnOnce(&mut DataMarket) -> Result<Vec<Event>, MarketError>,
    {
        let market = self.market_mut(id)?;
        match f(market) {
            Ok(events) => Ok(self.commit(Some(id), events)),
            Err(e) => {
                debug!("Market {} {} rejected: {} ({})", id, op, e, e.code());
                Err(e)
            }
        }
    }

    // =========================================================================
    // Registry owner
    // =========================================================================

    pub fn create_market(
        &mut self,
        ctx: &CallContext,
        params: MarketParams,
    ) -> Result<(MarketId, Vec<Notification>), MarketError> {
        self.create_market_with_settings(ctx, params, MarketSettings::default())
    }

    pub fn create_market_with_settings(
        &mut self,
        ctx: &CallContext,
        params: MarketParams,
        settings: MarketSettings,
    ) -> Result<(MarketId, Vec<Notification>), MarketError> {
        self.ensure_owner(&ctx.caller)?;
        if params.owner.is_zero() {
            return Err(MarketError::ZeroAddress);
        }
        if params.epoch_size == 0 {
            return Err(MarketError::InvalidSetting("epoch size must be positive"));
        }
        if params.source_block_time == 0 {
            return Err(MarketError::InvalidSetting("source block time must be positive"));
        }
        if settings.min_attestations_for_consensus == 0 || settings.day_size == 0 {
            return Err(MarketError::InvalidSetting("min attestations and day size must be positive"));
        }

        let id = self.markets.len() as MarketId + 1;
        let address = derive_market_address(&self.factory, id);
        let record = MarketRecord {
            id,
            address,
            owner: params.owner,
            epoch_size: params.epoch_size,
            source_chain_id: params.source_chain_id,
            source_block_time: params.source_block_time,
            use_external_counter: params.use_external_counter,
            enabled: true,
            created_at: ctx.timestamp,
            created_block: ctx.block_number,
        };
        self.markets.push(DataMarket::with_settings(record, settings));
        self.by_address.insert(address, id);

        info!("Market {} created at {} (owner {}, epoch size {})", id, address, params.owner, params.epoch_size);
        let events = vec![Event::MarketCreated {
            market_id: id,
            address,
            owner: params.owner,
            epoch_size: params.epoch_size,
            source_chain_id: params.source_chain_id,
            source_block_time: params.source_block_time,
            use_external_counter: params.use_external_counter,
            timestamp: ctx.timestamp,
        }];
        Ok((id, self.commit(Some(id), events)))
    }

    pub fn toggle_market(&mut self, ctx: &CallContext, id: MarketId, enabled: bool) -> Result<Vec<Notification>, MarketError> {
        self.ensure_owner(&ctx.caller)?;
        let market = self.market_mut(id)?;
        market.set_enabled(enabled);
        info!("Market {} {}", id, if enabled { "enabled" } else { "disabled" });
        Ok(self.commit(Some(id), vec![Event::MarketToggled { enabled, timestamp: ctx.timestamp }]))
    }

    pub fn update_factory(&mut self, ctx: &CallContext, factory: Address) -> Result<Vec<Notification>, MarketError> {
        self.ensure_owner(&ctx.caller)?;
        if factory.is_zero() {
            return Err(MarketError::ZeroAddress);
        }
        self.factory = factory;
        Ok(self.commit(None, vec![Event::FactoryUpdated { address: factory }]))
    }

    pub fn update_node_registry(&mut self, ctx: &CallContext, registry: Address) -> Result<Vec<Notification>, MarketError> {
        self.ensure_owner(&ctx.caller)?;
        if registry.is_zero() {
            return Err(MarketError::ZeroAddress);
        }
        self.node_registry = registry;
        Ok(self.commit(None, vec![Event::NodeRegistryUpdated { address: registry }]))
    }

    /// Drain the vault to the registry owner
    pub fn emergency_withdraw(&mut self, ctx: &CallContext) -> Result<Vec<Notification>, MarketError> {
        self.ensure_owner(&ctx.caller)?;
        let amount = std::mem::take(&mut self.vault_balance);
        warn!("Emergency withdrawal of {} to {}", amount, self.owner);
        Ok(self.commit(None, vec![Event::EmergencyWithdrawn { to: self.owner, amount }]))
    }

    // =========================================================================
    // Vault
    // =========================================================================

    pub fn deposit(&mut self, ctx: &CallContext, amount: Amount) -> Result<Vec<Notification>, MarketError> {
        self.vault_balance = self.vault_balance.checked_add(amount).ok_or(MarketError::Overflow)?;
        Ok(self.commit(None, vec![Event::Deposited { from: ctx.caller, amount }]))
    }

    /// Pay out every point held by `user`'s slots across all markets.
    ///
    /// Points are zeroed before the transfer is recorded, so a repeated claim
    /// yields zero.
    pub fn claim_rewards(
        &mut self,
        ctx: &CallContext,
        user: Address,
        nodes: &dyn NodeRegistry,
    ) -> Result<Vec<Notification>, MarketError> {
        if ctx.caller != user {
            return Err(MarketError::NotClaimant { caller: ctx.caller, claimant: user });
        }

        let slots = nodes.owned_slots(&user);
        let total = self
            .markets
            .iter()
            .try_fold(0 as Amount, |acc, m| acc.checked_add(m.rewards().pending_points(&slots)))
            .ok_or(MarketError::Overflow)?;
        if total > self.vault_balance {
            return Err(MarketError::InsufficientFunds { available: self.vault_balance, required: total });
        }

        for market in &mut self.markets {
            market.rewards_mut().take_points(&slots);
        }
        self.vault_balance -= total;
        self.total_claimed = self.total_claimed.saturating_add(total);

        info!("{} claimed {} across {} slots", user, total, slots.len());
        Ok(self.commit(None, vec![Event::RewardsClaimed { user, total, timestamp: ctx.timestamp }]))
    }

    // =========================================================================
    // Forwarded market operations
    // =========================================================================

    pub fn update_addresses(
        &mut self,
        ctx: &CallContext,
        id: MarketId,
        role: Role,
        principals: &[Address],
        allowed: &[bool],
    ) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "update_addresses", |m| m.update_addresses(ctx, role, principals, allowed))
    }

    /// Same as [`update_addresses`](Self::update_addresses) with a raw role tag
    pub fn update_addresses_by_tag(
        &mut self,
        ctx: &CallContext,
        id: MarketId,
        role_tag: u8,
        principals: &[Address],
        allowed: &[bool],
    ) -> Result<Vec<Notification>, MarketError> {
        let role = Role::try_from(role_tag)?;
        self.update_addresses(ctx, id, role, principals, allowed)
    }

    pub fn update_epoch_manager(&mut self, ctx: &CallContext, id: MarketId, manager: Address) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "update_epoch_manager", |m| m.update_epoch_manager(ctx, manager))
    }

    pub fn update_setting(&mut self, ctx: &CallContext, id: MarketId, setting: Setting) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "update_setting", |m| m.update_setting(ctx, setting))
    }

    pub fn toggle_rewards(&mut self, ctx: &CallContext, id: MarketId) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "toggle_rewards", |m| m.toggle_rewards(ctx))
    }

    pub fn set_sequencer_id(&mut self, ctx: &CallContext, id: MarketId, sequencer_id: &str) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "set_sequencer_id", |m| m.set_sequencer_id(ctx, sequencer_id))
    }

    pub fn load_slot_submissions(
        &mut self,
        ctx: &CallContext,
        id: MarketId,
        slot: SlotId,
        day: u64,
        count: u64,
    ) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "load_slot_submissions", |m| m.load_slot_submissions(ctx, slot, day, count))
    }

    pub fn load_current_day(&mut self, ctx: &CallContext, id: MarketId, day: u64) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "load_current_day", |m| m.load_current_day(ctx, day))
    }

    pub fn release_epoch(&mut self, ctx: &CallContext, id: MarketId, begin: u64, end: u64) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "release_epoch", |m| m.release_epoch(ctx, begin, end))
    }

    pub fn force_skip_epoch(&mut self, ctx: &CallContext, id: MarketId, begin: u64, end: u64) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "force_skip_epoch", |m| m.force_skip_epoch(ctx, begin, end))
    }

    pub fn submit_batch(
        &mut self,
        ctx: &CallContext,
        id: MarketId,
        batch_cid: &str,
        epoch_id: EpochId,
        project_ids: &[String],
        snapshot_cids: &[String],
        root_hash: Hash,
    ) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "submit_batch", |m| {
            m.submit_batch(ctx, batch_cid, epoch_id, project_ids, snapshot_cids, root_hash)
        })
    }

    pub fn end_batch_submissions(&mut self, ctx: &CallContext, id: MarketId, epoch_id: EpochId) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "end_batch_submissions", |m| m.end_batch_submissions(ctx, epoch_id))
    }

    pub fn submit_attestation(
        &mut self,
        ctx: &CallContext,
        id: MarketId,
        batch_cid: &str,
        epoch_id: EpochId,
        root_hash: Hash,
    ) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "submit_attestation", |m| m.submit_attestation(ctx, batch_cid, epoch_id, root_hash))
    }

    pub fn check_dynamic_consensus(
        &self,
        ctx: &CallContext,
        id: MarketId,
        batch_cid: &str,
        epoch_id: EpochId,
    ) -> Result<bool, MarketError> {
        Ok(self.require_market(id)?.check_dynamic_consensus(ctx, batch_cid, epoch_id))
    }

    pub fn force_complete_consensus(
        &mut self,
        ctx: &CallContext,
        id: MarketId,
        batch_cid: &str,
        epoch_id: EpochId,
    ) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "force_complete_consensus", |m| m.force_complete_consensus(ctx, batch_cid, epoch_id))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_rewards(
        &mut self,
        ctx: &CallContext,
        id: MarketId,
        slot_ids: &[SlotId],
        submission_counts: &[u64],
        day: u64,
        eligible_nodes: u64,
        nodes: &dyn NodeRegistry,
    ) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "update_rewards", |m| {
            m.update_rewards(ctx, slot_ids, submission_counts, day, eligible_nodes, nodes)
        })
    }

    pub fn update_eligible_nodes(&mut self, ctx: &CallContext, id: MarketId, day: u64, count: u64) -> Result<Vec<Notification>, MarketError> {
        self.with_market(id, "update_eligible_nodes", |m| m.update_eligible_nodes(ctx, day, count))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn factory(&self) -> Address {
        self.factory
    }

    pub fn node_registry(&self) -> Address {
        self.node_registry
    }

    pub fn market(&self, id: MarketId) -> Option<&DataMarket> {
        id.checked_sub(1).and_then(|idx| self.markets.get(idx as usize))
    }

    pub fn require_market(&self, id: MarketId) -> Result<&DataMarket, MarketError> {
        self.market(id).ok_or(MarketError::UnknownMarket(id))
    }

    /// Market id for a market handle
    pub fn resolve(&self, address: &Address) -> Result<MarketId, MarketError> {
        self.by_address.get(address).copied().ok_or(MarketError::UnknownMarketAddress(*address))
    }

    pub fn markets(&self) -> &[DataMarket] {
        &self.markets
    }

    pub fn market_count(&self) -> usize {
        self.markets.len()
    }

    /// Unclaimed points of one slot summed over every market
    pub fn slot_rewards(&self, slot: SlotId) -> Amount {
        self.markets.iter().fold(0, |acc: Amount, m| acc.saturating_add(m.rewards().slot_points(slot)))
    }

    /// What `user` would receive from a claim now
    pub fn pending_rewards(&self, user: &Address, nodes: &dyn NodeRegistry) -> Amount {
        let slots = nodes.owned_slots(user);
        self.markets.iter().fold(0, |acc: Amount, m| acc.saturating_add(m.rewards().pending_points(&slots)))
    }

    pub fn slot_info(&self, id: MarketId, slot: SlotId, nodes: &dyn NodeRegistry) -> Result<SlotInfo, MarketError> {
        Ok(self.require_market(id)?.slot_info(slot, nodes))
    }

    pub fn node_counts(&self, nodes: &dyn NodeRegistry) -> NodeCounts {
        NodeCounts {
            total: nodes.total_node_count(),
            enabled: nodes.enabled_node_count(),
            snapshotters: nodes.total_snapshotter_count(),
        }
    }

    pub fn vault_balance(&self) -> Amount {
        self.vault_balance
    }

    pub fn total_claimed(&self) -> Amount {
        self.total_claimed
    }

    pub fn journal(&self) -> &[Notification] {
        &self.journal
    }

    /// Hand over journaled notifications (for persistence)
    pub fn take_journal(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.journal)
    }
}
