pub mod batch;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod db;
pub mod epoch;
pub mod error;
pub mod events;
pub mod market;
pub mod nodes;
pub mod registry;
pub mod rewards;
pub mod roles;
pub mod types;

pub use batch::{Batch, BatchRegistry, SnapshotStatus};
pub use config::{ConfigError, DeployConfig};
pub use consensus::{Attestation, AttestationTally, ConsensusEngine, ConsensusParams, Outcome};
pub use crypto::{batch_root_hash, derive_market_address, merkle_root, sha3, sha3_concat};
pub use db::{Storage, StorageError};
pub use epoch::{Epoch, EpochLedger, EpochSchedule};
pub use error::{ErrorKind, MarketError};
pub use events::{event_names, Event, Notification};
pub use market::{DataMarket, MarketRecord, MarketSettings, Setting, SlotInfo};
pub use nodes::{InMemoryNodeRegistry, NodeInfo, NodeRegistry};
pub use registry::{MarketParams, MarketRegistry, NodeCounts};
pub use rewards::{DayRate, RewardParams, RewardsLedger, SlotRewardState};
pub use roles::{Role, RoleSet, RoleStore};
pub use types::*;
