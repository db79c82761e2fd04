//! Hashing helpers: SHA3-256, batch Merkle roots, market address derivation

use crate::types::{Address, Hash, MarketId};
use sha3::{Digest, Sha3_256};

pub fn sha3(data: &[u8]) -> Hash {
    Sha3_256::digest(data).into()
}

pub fn sha3_concat(a: &[u8], b: &[u8]) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

/// Binary Merkle root; an odd node at any level is paired with itself
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    if leaves.len() == 1 {
        return leaves[0];
    }

    let mut level: Vec<Hash> = leaves.to_vec();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for chunk in level.chunks(2) {
            if chunk.len() == 2 {
                next.push(sha3_concat(&chunk[0], &chunk[1]));
            } else {
                next.push(sha3_concat(&chunk[0], &chunk[0]));
            }
        }
        level = next;
    }

    level[0]
}

/// Root hash over a batch's snapshot CIDs, in submission order.
///
/// Sequencers publish this as the claimed root; validators recompute it from
/// the CIDs they fetched and attest the result.
pub fn batch_root_hash<S: AsRef<str>>(snapshot_cids: &[S]) -> Hash {
    let leaves: Vec<Hash> = snapshot_cids.iter().map(|cid| sha3(cid.as_ref().as_bytes())).collect();
    merkle_root(&leaves)
}

/// Market handle: last 20 bytes of SHA3-256(factory ‖ market_id)
pub fn derive_market_address(factory: &Address, market_id: MarketId) -> Address {
    let digest = sha3_concat(&factory.0, &market_id.to_be_bytes());
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merkle_root_odd_leaf_duplicated() {
        let a = sha3(b"a");
        let b = sha3(b"b");
        let c = sha3(b"c");

        let left = sha3_concat(&a, &b);
        let right = sha3_concat(&c, &c);
        assert_eq!(merkle_root(&[a, b, c]), sha3_concat(&left, &right));
        assert_eq!(merkle_root(&[a]), a);
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn test_batch_root_is_order_sensitive() {
        let forward = batch_root_hash(&["c1", "c2"]);
        let reverse = batch_root_hash(&["c2", "c1"]);
        assert_ne!(forward, reverse);
        assert_eq!(forward, batch_root_hash(&vec!["c1".to_string(), "c2".to_string()]));
    }

    #[test]
    fn test_market_address_depends_on_factory_and_id() {
        let factory = Address::from_label("factory");
        let other = Address::from_label("other-factory");
        assert_ne!(derive_market_address(&factory, 1), derive_market_address(&factory, 2));
        assert_ne!(derive_market_address(&factory, 1), derive_market_address(&other, 1));
    }
}
