use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Size of the content-hash component of a version key
pub const VERSION_HASH_SIZE: usize = 32;

/// Per-write version identifier, and the DHT's fourth addressing coordinate.
///
/// Combines a wall-clock timestamp with a BLAKE3 hash of the encoded payload.
/// Ordering is timestamp-major, hash-minor, so version keys sort by creation
/// time; two keys with the same timestamp but different hashes are distinct
/// versions created concurrently and order deterministically by hash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct VersionKey {
    timestamp_ms: u64,
    hash: [u8; VERSION_HASH_SIZE],
}

impl VersionKey {
    /// Create a version key for `payload` stamped with the current wall
    /// clock. Stamps are strictly monotonic within a process, so two writes
    /// inside the same millisecond still order by creation.
    pub fn now(payload: &[u8]) -> Self {
        Self {
            timestamp_ms: next_timestamp_ms(),
            hash: blake3::hash(payload).into(),
        }
    }

    /// Create a version key from raw parts
    pub fn from_parts(timestamp_ms: u64, hash: [u8; VERSION_HASH_SIZE]) -> Self {
        Self { timestamp_ms, hash }
    }

    /// Timestamp component, in milliseconds since the unix epoch
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Content-hash component
    pub fn hash(&self) -> &[u8; VERSION_HASH_SIZE] {
        &self.hash
    }
}

/// Wall-clock milliseconds, bumped past the previous stamp when the clock
/// has not moved yet
fn next_timestamp_ms() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64;
    let mut prev = LAST.load(Ordering::Relaxed);
    loop {
        let next = wall.max(prev + 1);
        match LAST.compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp_ms, hex::encode(&self.hash[..4]))
    }
}
