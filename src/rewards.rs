//! Rewards ledger: per-slot daily submission counts and reward points
//!
//! Each reward day the pool is split evenly across the day's eligible nodes:
//!
//! ```text
//! points_per_slot = reward_pool_size / eligible_nodes_for_day   (rounded down)
//! ```
//!
//! A slot earns once per day, and only after meeting the daily quota. The
//! rounding remainder is not distributed. The first credit of a day fixes its
//! pool size and eligible count; later updates for that day pay the same share
//! and are capped by the same count, so the day's payout stays within the pool.

use crate::error::{ensure_same_len, MarketError};
use crate::events::Event;
use crate::nodes::NodeRegistry;
use crate::types::{Address, Amount, CallContext, SlotId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotRewardState {
    /// Unclaimed points
    pub reward_points: Amount,
    /// day -> submissions reported for that day
    submissions: HashMap<u64, u64>,
    /// Days this slot has been rewarded for
    rewarded_days: HashSet<u64>,
}

impl SlotRewardState {
    pub fn submissions(&self, day: u64) -> u64 {
        self.submissions.get(&day).copied().unwrap_or(0)
    }

    pub fn rewarded(&self, day: u64) -> bool {
        self.rewarded_days.contains(&day)
    }
}

/// Reward settings read on each update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardParams {
    pub pool_size: Amount,
    pub daily_quota: u64,
    pub enabled: bool,
}

/// Pool size and eligible count a day's points were first credited with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRate {
    pub pool_size: Amount,
    pub eligible: u64,
}

impl DayRate {
    pub fn share(&self) -> Amount {
        self.pool_size / Amount::from(self.eligible.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewardsLedger {
    slots: HashMap<SlotId, SlotRewardState>,
    eligible_nodes_for_day: HashMap<u64, u64>,
    /// day -> number of slots rewarded
    rewarded_slots: HashMap<u64, u64>,
    /// day -> points credited
    points_by_day: HashMap<u64, Amount>,
    /// day -> rate fixed by its first credit
    day_rates: HashMap<u64, DayRate>,
}

impl RewardsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record daily submission counts and credit slots that met the quota.
    ///
    /// Counts replace earlier reports for the same day. With zero eligible
    /// nodes, or rewards disabled, counts are recorded but nothing is credited.
    #[allow(clippy::too_many_arguments)]
    pub fn update_rewards(
        &mut self,
        slot_ids: &[SlotId],
        submission_counts: &[u64],
        day: u64,
        eligible_nodes: u64,
        params: &RewardParams,
        nodes: &dyn NodeRegistry,
        ctx: &CallContext,
    ) -> Result<Vec<Event>, MarketError> {
        ensure_same_len(slot_ids.len(), submission_counts.len())?;

        let distribute = params.enabled && eligible_nodes > 0;
        let rate = match self.day_rates.get(&day) {
            Some(fixed) => {
                if fixed.eligible != eligible_nodes || fixed.pool_size != params.pool_size {
                    warn!(
                        "Day {}: keeping rate of {} eligible / pool {} (reported {} / {})",
                        day, fixed.eligible, fixed.pool_size, eligible_nodes, params.pool_size
                    );
                }
                *fixed
            }
            None => DayRate { pool_size: params.pool_size, eligible: eligible_nodes },
        };
        let points = if distribute { rate.share() } else { 0 };

        // Stage the slots to credit before touching state
        let mut staged = HashSet::new();
        let mut credited = Vec::new();
        if distribute {
            for (slot, count) in slot_ids.iter().zip(submission_counts) {
                if *count >= params.daily_quota
                    && !self.slots.get(slot).is_some_and(|s| s.rewarded(day))
                    && staged.insert(*slot)
                {
                    credited.push(*slot);
                }
            }
            let already = self.rewarded_slots(day);
            let requested = already + credited.len() as u64;
            if requested > rate.eligible {
                return Err(MarketError::RewardCapExceeded { day, requested, eligible: rate.eligible });
            }
        }

        self.eligible_nodes_for_day.insert(day, eligible_nodes);
        for (slot, count) in slot_ids.iter().zip(submission_counts) {
            self.slots.entry(*slot).or_default().submissions.insert(day, *count);
        }

        let mut events = Vec::with_capacity(credited.len() * 2);
        for slot in &credited {
            let state = self.slots.entry(*slot).or_default();
            state.reward_points = state.reward_points.saturating_add(points);
            state.rewarded_days.insert(day);

            let snapshotter = nodes.slot_snapshotter(*slot).unwrap_or(Address::ZERO);
            events.push(Event::RewardsDistributed {
                snapshotter,
                slot_id: *slot,
                day,
                points,
                timestamp: ctx.timestamp,
            });
            events.push(Event::DailyTaskCompleted {
                snapshotter,
                slot_id: *slot,
                day,
                timestamp: ctx.timestamp,
            });
        }

        if !credited.is_empty() {
            self.day_rates.entry(day).or_insert(rate);
            let n = credited.len() as u64;
            *self.rewarded_slots.entry(day).or_insert(0) += n;
            let total = points.saturating_mul(Amount::from(n));
            let day_points = self.points_by_day.entry(day).or_insert(0);
            *day_points = day_points.saturating_add(total);
            info!("Day {}: credited {} points to {} slots", day, total, n);
        } else {
            debug!("Day {}: {} counts recorded, nothing credited", day, slot_ids.len());
        }

        Ok(events)
    }

    pub fn update_eligible_nodes(&mut self, day: u64, count: u64) -> Vec<Event> {
        self.eligible_nodes_for_day.insert(day, count);
        vec![Event::EligibleNodesUpdated { day, count }]
    }

    /// Migration hook: set a slot's count for a day without crediting
    pub fn load_slot_submissions(&mut self, slot: SlotId, day: u64, count: u64) {
        self.slots.entry(slot).or_default().submissions.insert(day, count);
    }

    /// Unclaimed points across `slots`
    pub fn pending_points(&self, slots: &[SlotId]) -> Amount {
        slots
            .iter()
            .filter_map(|s| self.slots.get(s))
            .fold(0, |acc: Amount, s| acc.saturating_add(s.reward_points))
    }

    /// Zero the points of `slots`, returning what they held
    pub(crate) fn take_points(&mut self, slots: &[SlotId]) -> Amount {
        let mut total: Amount = 0;
        for slot in slots {
            if let Some(state) = self.slots.get_mut(slot) {
                total = total.saturating_add(state.reward_points);
                state.reward_points = 0;
            }
        }
        total
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn slot(&self, slot: SlotId) -> Option<&SlotRewardState> {
        self.slots.get(&slot)
    }

    pub fn slot_points(&self, slot: SlotId) -> Amount {
        self.slots.get(&slot).map(|s| s.reward_points).unwrap_or(0)
    }

    pub fn submission_count(&self, slot: SlotId, day: u64) -> u64 {
        self.slots.get(&slot).map(|s| s.submissions(day)).unwrap_or(0)
    }

    pub fn task_completed(&self, slot: SlotId, day: u64) -> bool {
        self.slots.get(&slot).is_some_and(|s| s.rewarded(day))
    }

    pub fn eligible_nodes(&self, day: u64) -> u64 {
        self.eligible_nodes_for_day.get(&day).copied().unwrap_or(0)
    }

    pub fn day_rate(&self, day: u64) -> Option<DayRate> {
        self.day_rates.get(&day).copied()
    }

    pub fn rewarded_slots(&self, day: u64) -> u64 {
        self.rewarded_slots.get(&day).copied().unwrap_or(0)
    }

    pub fn points_distributed(&self, day: u64) -> Amount {
        self.points_by_day.get(&day).copied().unwrap_or(0)
    }
}
