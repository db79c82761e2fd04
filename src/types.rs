//! Core types and protocol constants

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

pub type Hash = [u8; 32];
pub type MarketId = u64;
pub type EpochId = u64;
pub type SlotId = u64;

/// Ledger value unit (rewards, vault balance)
pub type Amount = u128;

/// 20-byte principal identifier supplied by the host ledger
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Deterministic address for a human-readable name (test fixtures, CLI aliases)
    pub fn from_label(label: &str) -> Self {
        let digest = crate::crypto::sha3(label.as_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("expected 20 bytes, got {0}")]
    Length(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| AddressParseError::Hex(e.to_string()))?;
        if bytes.len() != 20 {
            return Err(AddressParseError::Length(bytes.len()));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Hex (de)serialization for 32-byte hashes in events and config files
pub mod hex_hash {
    use super::Hash;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse(s: &str) -> Result<Hash, String> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| e.to_string())?;
        if bytes.len() != 32 {
            return Err(format!("expected 32 bytes, got {}", bytes.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}

/// Decimal-string (de)serialization for amounts in JSON output
pub mod amount_str {
    use super::Amount;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// CALL CONTEXT
// =============================================================================

/// Trusted inputs the host ledger supplies with every operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub caller: Address,
    /// Seconds since Unix epoch
    pub timestamp: u64,
    /// Ledger height; submission windows are measured in these units
    pub block_number: u64,
}

impl CallContext {
    pub fn new(caller: Address, timestamp: u64, block_number: u64) -> Self {
        Self { caller, timestamp, block_number }
    }

    /// Same moment, different caller
    pub fn with_caller(&self, caller: Address) -> Self {
        Self { caller, ..*self }
    }
}

// =============================================================================
// SNAPSHOT STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapshotState {
    Pending,
    Finalized,
    FallbackFinalized,
}

impl SnapshotState {
    pub fn is_final(&self) -> bool {
        !matches!(self, SnapshotState::Pending)
    }
}

impl fmt::Display for SnapshotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotState::Pending => write!(f, "pending"),
            SnapshotState::Finalized => write!(f, "finalized"),
            SnapshotState::FallbackFinalized => write!(f, "fallback-finalized"),
        }
    }
}

// =============================================================================
// CONSTANTS
// =============================================================================

/// Length of a reward day in source-chain block-time units
pub const DEFAULT_DAY_SIZE: u64 = 864_000_000;

/// Blocks after epoch release during which snapshots are expected
pub const DEFAULT_SNAPSHOT_SUBMISSION_WINDOW: u64 = 10;

/// Blocks after epoch release during which batches are on time
pub const DEFAULT_BATCH_SUBMISSION_WINDOW: u64 = 20;

/// Blocks after batch submission during which attestations are on time
pub const DEFAULT_ATTESTATION_SUBMISSION_WINDOW: u64 = 100;

/// Identical-hash attestations needed for organic finalization
pub const DEFAULT_MIN_ATTESTATIONS: u64 = 2;

/// Submissions a slot needs in one day to earn that day's reward
pub const DEFAULT_DAILY_SNAPSHOT_QUOTA: u64 = 10;

/// Points shared between eligible nodes each day (1e18 = one whole token)
pub const DEFAULT_REWARD_POOL_SIZE: Amount = 1_000_000_000_000_000_000;

/// Reward days are numbered from one
pub const FIRST_DAY: u64 = 1;
