//! Persistent storage (sled)
//!
//! Single keyspace with prefixed keys so that one call's state and events are
//! written with one atomic batch:
//!
//! ```text
//! state/registry      bincode(Versioned<MarketRegistry>)
//! state/nodes         bincode(Versioned<InMemoryNodeRegistry>)
//! meta/height         u64 BE, ledger height handed out per call
//! meta/event_seq      u64 BE, next event sequence number
//! event/<u64 BE>      JSON notification
//! ```

use crate::events::Notification;
use crate::nodes::InMemoryNodeRegistry;
use crate::registry::MarketRegistry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Bump when the persisted layout changes
pub const STATE_VERSION: u32 = 1;

const KEY_REGISTRY: &[u8] = b"state/registry";
const KEY_NODES: &[u8] = b"state/nodes";
const KEY_HEIGHT: &[u8] = b"meta/height";
const KEY_EVENT_SEQ: &[u8] = b"meta/event_seq";
const EVENT_PREFIX: &[u8] = b"event/";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("state encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("event encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("state version {found} unsupported (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("corrupt value under {0}")]
    Corrupt(String),
}

#[derive(Serialize, Deserialize)]
struct Versioned<T> {
    version: u32,
    state: T,
}

pub struct Storage {
    db: sled::Db,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory database removed on drop
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn load_versioned<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StorageError> {
        let Some(bytes) = self.db.get(key)? else {
            return Ok(None);
        };
        let versioned: Versioned<T> = bincode::deserialize(&bytes)?;
        if versioned.version != STATE_VERSION {
            return Err(StorageError::Version { found: versioned.version, expected: STATE_VERSION });
        }
        Ok(Some(versioned.state))
    }

    fn encode_versioned<T: Serialize>(state: &T) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(&Versioned { version: STATE_VERSION, state })?)
    }

    fn read_u64(&self, key: &[u8]) -> Result<u64, StorageError> {
        match self.db.get(key)? {
            Some(bytes) => decode_u64(&bytes).ok_or_else(|| StorageError::Corrupt(String::from_utf8_lossy(key).into())),
            None => Ok(0),
        }
    }

    pub fn load_registry(&self) -> Result<Option<MarketRegistry>, StorageError> {
        self.load_versioned(KEY_REGISTRY)
    }

    pub fn load_nodes(&self) -> Result<InMemoryNodeRegistry, StorageError> {
        Ok(self.load_versioned(KEY_NODES)?.unwrap_or_default())
    }

    /// Advance and return the ledger height for the next call
    pub fn next_block(&self) -> Result<u64, StorageError> {
        let updated = self.db.update_and_fetch(KEY_HEIGHT, |old| {
            let height = old.and_then(decode_u64).unwrap_or(0);
            Some(height.saturating_add(1).to_be_bytes().to_vec())
        })?;
        updated
            .as_deref()
            .and_then(decode_u64)
            .ok_or_else(|| StorageError::Corrupt("meta/height".into()))
    }

    pub fn height(&self) -> Result<u64, StorageError> {
        self.read_u64(KEY_HEIGHT)
    }

    /// Persist state and drain the registry journal in one atomic batch.
    /// Returns the notifications written.
    pub fn commit(
        &self,
        registry: &mut MarketRegistry,
        nodes: &InMemoryNodeRegistry,
    ) -> Result<Vec<Notification>, StorageError> {
        let notifications = registry.take_journal();
        let mut seq = self.read_u64(KEY_EVENT_SEQ)?;

        let mut batch = sled::Batch::default();
        batch.insert(KEY_REGISTRY, Self::encode_versioned(&*registry)?);
        batch.insert(KEY_NODES, Self::encode_versioned(nodes)?);
        for n in &notifications {
            batch.insert(event_key(seq), serde_json::to_vec(n)?);
            seq += 1;
        }
        batch.insert(KEY_EVENT_SEQ, seq.to_be_bytes().to_vec());

        self.db.apply_batch(batch)?;
        self.db.flush()?;
        debug!("Committed state with {} notifications (seq {})", notifications.len(), seq);
        Ok(notifications)
    }

    /// All notifications from sequence `from` on
    pub fn events_since(&self, from: u64) -> Result<Vec<Notification>, StorageError> {
        let mut out = Vec::new();
        for entry in self.db.range(event_key(from)..) {
            let (key, value) = entry?;
            if !key.starts_with(EVENT_PREFIX) {
                break;
            }
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn event_count(&self) -> Result<u64, StorageError> {
        self.read_u64(KEY_EVENT_SEQ)
    }
}

fn event_key(seq: u64) -> Vec<u8> {
    let mut key = EVENT_PREFIX.to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}
