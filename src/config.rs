//! Deployment configuration (JSON)
//!
//! Describes one market: chain parameters, role holders and tunables. Applying
//! it goes through the same role-gated registry operations as any other call.

use crate::error::MarketError;
use crate::events::Notification;
use crate::market::MarketSettings;
use crate::registry::{MarketParams, MarketRegistry};
use crate::roles::Role;
use crate::types::{Address, CallContext, MarketId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub owner: Address,
    pub epoch_size: u64,
    pub source_chain_id: u64,
    pub source_block_time: u64,
    #[serde(default)]
    pub use_external_counter: bool,
    #[serde(default)]
    pub epoch_manager: Option<Address>,
    #[serde(default)]
    pub sequencers: Vec<Address>,
    #[serde(default)]
    pub validators: Vec<Address>,
    #[serde(default)]
    pub admins: Vec<Address>,
    #[serde(default)]
    pub settings: MarketSettings,
}

impl DeployConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: DeployConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.is_zero() {
            return Err(ConfigError::Invalid("owner must be set"));
        }
        if self.epoch_size == 0 {
            return Err(ConfigError::Invalid("epoch_size must be positive"));
        }
        if self.source_block_time == 0 {
            return Err(ConfigError::Invalid("source_block_time must be positive"));
        }
        if self.settings.min_attestations_for_consensus == 0 {
            return Err(ConfigError::Invalid("min_attestations_for_consensus must be at least 1"));
        }
        if self.settings.day_size == 0 {
            return Err(ConfigError::Invalid("day_size must be positive"));
        }
        if self.role_holders().any(Address::is_zero) {
            return Err(ConfigError::Invalid("role holders must be non-zero addresses"));
        }
        Ok(())
    }

    pub fn market_params(&self) -> MarketParams {
        MarketParams {
            owner: self.owner,
            epoch_size: self.epoch_size,
            source_chain_id: self.source_chain_id,
            source_block_time: self.source_block_time,
            use_external_counter: self.use_external_counter,
        }
    }

    fn role_holders(&self) -> impl Iterator<Item = &Address> {
        self.epoch_manager
            .iter()
            .chain(&self.sequencers)
            .chain(&self.validators)
            .chain(&self.admins)
    }

    fn assigns_roles(&self) -> bool {
        self.role_holders().next().is_some()
    }

    /// Create the market and hand out its roles.
    ///
    /// The caller must own the registry, and must also be the configured
    /// market owner when the config assigns any role. Every check runs before
    /// the market is created, so a failed deploy leaves the registry as it was.
    pub fn deploy(
        &self,
        registry: &mut MarketRegistry,
        ctx: &CallContext,
    ) -> Result<(MarketId, Vec<Notification>), MarketError> {
        if ctx.caller != registry.owner() {
            return Err(MarketError::OnlyRegistryOwner(ctx.caller));
        }
        if self.assigns_roles() && ctx.caller != self.owner {
            return Err(MarketError::OnlyOwner(ctx.caller));
        }
        if self.role_holders().any(Address::is_zero) {
            return Err(MarketError::ZeroAddress);
        }

        let (id, mut out) = registry.create_market_with_settings(ctx, self.market_params(), self.settings.clone())?;

        for (role, members) in [
            (Role::Sequencer, &self.sequencers),
            (Role::Validator, &self.validators),
            (Role::Admin, &self.admins),
        ] {
            if members.is_empty() {
                continue;
            }
            let flags = vec![true; members.len()];
            out.extend(registry.update_addresses(ctx, id, role, members, &flags)?);
        }
        if let Some(manager) = self.epoch_manager {
            out.extend(registry.update_epoch_manager(ctx, id, manager)?);
        }

        info!(
            "Deployed market {} ({} sequencers, {} validators)",
            id,
            self.sequencers.len(),
            self.validators.len()
        );
        Ok((id, out))
    }
}
