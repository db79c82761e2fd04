//! Epoch ledger: continuous epoch numbering and day rollover
//!
//! Epochs cover contiguous ranges of an external counter (usually source-chain
//! block numbers). Each market numbers its epochs either sequentially from 1 or
//! by the counter value itself when every epoch spans a single position.
//!
//! Reward days are counted in epochs:
//!
//! ```text
//! epochs_in_a_day = day_size / (source_block_time × epoch_size)
//! ```
//!
//! A new day starts when a released epoch id lands in a later day bucket than
//! the previous one. The `DayStarted` event is emitted before `EpochReleased`.

use crate::error::MarketError;
use crate::events::Event;
use crate::types::{CallContext, EpochId, FIRST_DAY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// A released epoch. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub id: EpochId,
    pub begin: u64,
    pub end: u64,
    /// Timestamp of the release call
    pub released_at: u64,
    /// Ledger height of the release call; submission windows start here
    pub released_block: u64,
    /// Released via force skip
    pub skipped: bool,
}

/// Market parameters that govern epoch numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochSchedule {
    pub epoch_size: u64,
    pub use_external_counter: bool,
    pub source_block_time: u64,
    pub day_size: u64,
}

impl EpochSchedule {
    /// Counter positions per epoch (always 1 for externally numbered markets)
    pub fn effective_size(&self) -> u64 {
        if self.use_external_counter { 1 } else { self.epoch_size.max(1) }
    }

    pub fn epochs_in_a_day(&self) -> u64 {
        let per_epoch = self.source_block_time.saturating_mul(self.effective_size()).max(1);
        (self.day_size / per_epoch).max(1)
    }

    fn day_bucket(&self, id: EpochId) -> u64 {
        id.saturating_sub(1) / self.epochs_in_a_day()
    }

    /// Range and size preconditions shared by release and force skip
    fn check_range(&self, begin: u64, end: u64) -> Result<(), MarketError> {
        if end < begin {
            return Err(MarketError::EpochRangeInvalid { begin, end });
        }
        let expected = self.effective_size();
        // None when the range spans the whole counter
        let span = (end - begin).checked_add(1);
        if span != Some(expected) {
            return Err(MarketError::EpochSizeMismatch { expected, got: span.unwrap_or(u64::MAX) });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochLedger {
    epochs: HashMap<EpochId, Epoch>,
    current: Option<EpochId>,
    day_counter: u64,
}

impl Default for EpochLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl EpochLedger {
    pub fn new() -> Self {
        Self {
            epochs: HashMap::new(),
            current: None,
            day_counter: FIRST_DAY,
        }
    }

    pub fn current(&self) -> Option<&Epoch> {
        self.current.and_then(|id| self.epochs.get(&id))
    }

    pub fn get(&self, id: EpochId) -> Option<&Epoch> {
        self.epochs.get(&id)
    }

    pub fn require(&self, id: EpochId) -> Result<&Epoch, MarketError> {
        self.epochs.get(&id).ok_or(MarketError::UnknownEpoch(id))
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn day_counter(&self) -> u64 {
        self.day_counter
    }

    /// Migration hook: overwrite the day counter
    pub fn load_current_day(&mut self, day: u64) {
        self.day_counter = day;
    }

    /// Release the next contiguous epoch
    pub fn release(
        &mut self,
        begin: u64,
        end: u64,
        schedule: &EpochSchedule,
        ctx: &CallContext,
    ) -> Result<Vec<Event>, MarketError> {
        schedule.check_range(begin, end)?;

        let id = match self.current() {
            Some(prev) => {
                if prev.end.checked_add(1) != Some(begin) {
                    return Err(MarketError::EpochNotContinuous { begin, previous_end: prev.end });
                }
                if schedule.use_external_counter {
                    end
                } else {
                    prev.id.checked_add(1).ok_or(MarketError::Overflow)?
                }
            }
            None => {
                if schedule.use_external_counter { end } else { 1 }
            }
        };

        Ok(self.record(id, begin, end, false, schedule, ctx))
    }

    /// Release an epoch after a gap, numbering it as if the skipped epochs existed
    pub fn force_skip(
        &mut self,
        begin: u64,
        end: u64,
        schedule: &EpochSchedule,
        ctx: &CallContext,
    ) -> Result<Vec<Event>, MarketError> {
        schedule.check_range(begin, end)?;

        let id = match self.current() {
            Some(prev) => {
                if begin <= prev.end {
                    return Err(MarketError::EpochNotAhead { begin, previous_end: prev.end });
                }
                if schedule.use_external_counter {
                    end
                } else {
                    let skipped = (begin - prev.end - 1) / schedule.effective_size();
                    prev.id
                        .checked_add(skipped)
                        .and_then(|id| id.checked_add(1))
                        .ok_or(MarketError::Overflow)?
                }
            }
            None => {
                if schedule.use_external_counter {
                    end
                } else {
                    begin.saturating_sub(1) / schedule.effective_size() + 1
                }
            }
        };

        Ok(self.record(id, begin, end, true, schedule, ctx))
    }

    fn record(
        &mut self,
        id: EpochId,
        begin: u64,
        end: u64,
        skipped: bool,
        schedule: &EpochSchedule,
        ctx: &CallContext,
    ) -> Vec<Event> {
        let mut events = Vec::with_capacity(2);

        if let Some(prev) = self.current {
            let crossed = schedule.day_bucket(id).saturating_sub(schedule.day_bucket(prev));
            if crossed > 0 {
                self.day_counter = self.day_counter.saturating_add(crossed);
                info!("Day {} started at epoch {}", self.day_counter, id);
                events.push(Event::DayStarted { day: self.day_counter, timestamp: ctx.timestamp });
            }
        }

        self.epochs.insert(
            id,
            Epoch {
                id,
                begin,
                end,
                released_at: ctx.timestamp,
                released_block: ctx.block_number,
                skipped,
            },
        );
        self.current = Some(id);

        debug!("Epoch {} released [{}, {}] skipped={}", id, begin, end, skipped);
        events.push(Event::EpochReleased { epoch_id: id, begin, end, timestamp: ctx.timestamp });
        events
    }
}
