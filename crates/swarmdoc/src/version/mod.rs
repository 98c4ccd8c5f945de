//! # Versioning
//!
//! Every document stored in the DHT is addressed by three slot coordinates
//! plus a fourth, per-write [`VersionKey`]. A version records the key of the
//! version it supersedes (its *based-on* key), so the set of
//! `(version → based_on)` edges forms a DAG per slot:
//!
//! - a **leaf** is a version no other version is based on — the current tip;
//! - in the conflict-free steady state there is exactly one leaf;
//! - two leaves at once means two peers wrote against the same predecessor:
//!   a **fork**, which is detected and surfaced, never merged;
//! - a digest that shows a successor for the payload we just fetched means
//!   the store has not converged yet: a **delay**, resolved by retrying.
//!
//! The [`Digest`] is the cheap structural query driving those checks — it
//! carries keys and edges but no payload.

mod document;
mod key;

pub mod cache;
pub mod codec;
pub mod manager;

use std::collections::{BTreeMap, BTreeSet};

pub use cache::VersionCache;
pub use codec::{Codec, CodecError, PlainCodec, SecretCodec};
pub use document::{VersionedDocument, DEFAULT_TTL_SECS};
pub use key::{VersionKey, VERSION_HASH_SIZE};
pub use manager::{GetError, PutError, VersionConfig, VersionManager};

/// Structure of a slot's version DAG: each key maps to the set of keys it is
/// based on (empty for an initial version).
pub type Digest = BTreeMap<VersionKey, BTreeSet<VersionKey>>;

/// Compute the leaf set of a version DAG.
///
/// Starts from every key and removes all ancestors with an explicit
/// worklist, so arbitrarily long chains cannot blow the stack. Keys
/// referenced as based-on but absent from the digest are ignored — an
/// eventually-consistent store may serve partial digests.
pub fn leaves(digest: &Digest) -> BTreeSet<VersionKey> {
    let mut leaves: BTreeSet<VersionKey> = digest.keys().copied().collect();
    let mut worklist: Vec<VersionKey> = digest.values().flatten().copied().collect();

    while let Some(key) = worklist.pop() {
        // Only descend the first time we drop a key
        if leaves.remove(&key) {
            if let Some(parents) = digest.get(&key) {
                worklist.extend(parents.iter().copied());
            }
        }
    }

    leaves
}

/// Whether `key` has a successor anywhere in the digest, i.e. some other
/// version is based on it. A fetched "latest" payload with a successor is a
/// stale read.
pub fn has_successor(digest: &Digest, key: &VersionKey) -> bool {
    digest.values().any(|parents| parents.contains(key))
}

/// Merge `incoming` digest entries into `base`, unioning based-on sets.
pub fn merge_digest(base: &mut Digest, incoming: &Digest) {
    for (key, parents) in incoming {
        base.entry(*key).or_default().extend(parents.iter().copied());
    }
}
