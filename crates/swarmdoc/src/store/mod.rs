//! # Store seam
//!
//! The DHT the sync protocol runs over is an external collaborator; this
//! module defines the seam. Entries are addressed by a [`Slot`] — three
//! 32-byte coordinates `(location, domain, content)` — plus a
//! [`VersionKey`](crate::version::VersionKey) as the fourth coordinate.
//!
//! Writes and removals can be gated by a content-protection keypair: the
//! first protected put registers the public key on the slot's version chain,
//! and every later put, remove or re-gating must prove possession of the
//! matching private key by signing the request. Reads are never gated.
//!
//! A protection mismatch is a deterministic rejection
//! ([`PutStatus::Denied`]) and must never be retried; transport failures
//! ([`StoreError::Network`]) are transient and retried by the version
//! manager, not here.

pub mod memory;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::SecretKey;
use crate::version::{Digest, VersionKey};

pub use memory::MemoryStore;

/// Size of a slot coordinate in bytes
pub const KEY_SIZE: usize = 32;

/// A fixed-width slot coordinate, derived from a label by hashing
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    /// Derive a coordinate from an arbitrary label
    pub fn from_label(label: &str) -> Self {
        Self(blake3::hash(label.as_bytes()).into())
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// The three fixed coordinates of a document's slot in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot {
    location: Key,
    domain: Key,
    content: Key,
}

impl Slot {
    pub fn new(location: Key, domain: Key, content: Key) -> Self {
        Self {
            location,
            domain,
            content,
        }
    }

    /// Convenience constructor hashing three labels
    pub fn from_labels(location: &str, domain: &str, content: &str) -> Self {
        Self {
            location: Key::from_label(location),
            domain: Key::from_label(domain),
            content: Key::from_label(content),
        }
    }

    pub fn location(&self) -> &Key {
        &self.location
    }

    pub fn domain(&self) -> &Key {
        &self.domain
    }

    pub fn content(&self) -> &Key {
        &self.content
    }

    /// Canonical byte encoding, used as the signing challenge for payloadless
    /// operations (remove, re-gating).
    pub fn challenge_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_SIZE * 3);
        out.extend_from_slice(self.location.as_bytes());
        out.extend_from_slice(self.domain.as_bytes());
        out.extend_from_slice(self.content.as_bytes());
        out
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.location, self.domain, self.content)
    }
}

/// A versioned write request
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub slot: Slot,
    pub version: VersionKey,
    pub based_on: Option<VersionKey>,
    pub payload: Bytes,
    pub ttl_secs: u64,
    /// When set, the store must verify that the slot's current tip equals
    /// `based_on` and answer [`PutStatus::VersionFork`] otherwise.
    pub prepare: bool,
    /// Key to sign the request with. Required once the slot is gated; on an
    /// ungated slot it registers the protection key.
    pub protection: Option<SecretKey>,
}

/// Outcome of a versioned write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    /// The write landed on the tip it was based on
    Ok,
    /// The prepare check failed: someone else superseded `based_on` first
    VersionFork,
    /// Protection check failed: no key or the wrong key was presented.
    /// Deterministic — never retried.
    Denied,
}

/// A stored version as returned by reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVersion {
    pub version: VersionKey,
    pub based_on: Option<VersionKey>,
    pub payload: Bytes,
    pub ttl_secs: u64,
}

/// Errors raised by store implementations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
    /// Transient transport failure; the caller retries with backoff
    #[error("network error: {0}")]
    Network(String),
}

/// The DHT put/get/remove/digest contract the version protocol runs over.
///
/// All operations are potentially blocking network round-trips.
/// Implementations enforce protection and the prepare check atomically with
/// respect to their own writes; cross-peer races still surface as forks.
#[async_trait]
pub trait ProtectedStore: Send + Sync + Clone + 'static {
    /// Store a new version.
    async fn put(&self, request: PutRequest) -> Result<PutStatus, StoreError>;

    /// Fetch the newest version of a slot, `None` if the slot is empty.
    async fn get_latest(&self, slot: &Slot) -> Result<Option<StoredVersion>, StoreError>;

    /// Fetch an exact version, `None` if absent.
    async fn get_version(
        &self,
        slot: &Slot,
        version: &VersionKey,
    ) -> Result<Option<StoredVersion>, StoreError>;

    /// Remove one version, or the whole chain when `version` is `None`.
    ///
    /// Requires the protection key if the slot is gated. Returns whether
    /// anything was removed.
    async fn remove(
        &self,
        slot: &Slot,
        version: Option<&VersionKey>,
        protection: Option<&SecretKey>,
    ) -> Result<bool, StoreError>;

    /// Cheap structural query: version keys and based-on edges, no payload.
    async fn digest(&self, slot: &Slot) -> Result<Digest, StoreError>;

    /// Re-gate a slot to a new protection key without resending payloads.
    ///
    /// Requires proof of the old key. Answers [`PutStatus::Denied`] on a
    /// mismatch and [`PutStatus::Ok`] on success.
    async fn change_protection_key(
        &self,
        slot: &Slot,
        old: &SecretKey,
        new: &crate::crypto::PublicKey,
    ) -> Result<PutStatus, StoreError>;
}

/// Build a single-version digest entry; helper for implementations.
pub(crate) fn digest_entry(based_on: Option<&VersionKey>) -> BTreeSet<VersionKey> {
    based_on.into_iter().copied().collect()
}
