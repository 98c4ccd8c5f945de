//! In-memory [`ProtectedStore`] implementation.
//!
//! Stands in for the DHT in local runs and tests. Protection and prepare
//! checks are enforced under one lock, so within this process the put is
//! atomic; that is the same guarantee the real vDHT gives per replica.
//!
//! Expired entries (past their TTL) are invisible to reads and swept on the
//! next write to the same slot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::crypto::{PublicKey, SecretKey};
use crate::version::{self, Digest, VersionKey};

use super::{digest_entry, ProtectedStore, PutRequest, PutStatus, Slot, StoreError, StoredVersion};

/// In-memory protected store backed by a slot map
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<Slot, Chain>>>,
}

#[derive(Debug, Default)]
struct Chain {
    /// Registered content-protection key, if the slot is gated
    protection: Option<PublicKey>,
    entries: BTreeMap<VersionKey, StoredEntry>,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    payload: Bytes,
    based_on: Option<VersionKey>,
    ttl_secs: u64,
    stored_at_secs: u64,
}

impl StoredEntry {
    fn expired(&self, now_secs: u64) -> bool {
        now_secs.saturating_sub(self.stored_at_secs) > self.ttl_secs
    }
}

impl Chain {
    fn sweep_expired(&mut self, now_secs: u64) {
        self.entries.retain(|_, entry| !entry.expired(now_secs));
    }

    fn live(&self, now_secs: u64) -> impl DoubleEndedIterator<Item = (&VersionKey, &StoredEntry)> {
        self.entries
            .iter()
            .filter(move |(_, entry)| !entry.expired(now_secs))
    }

    fn digest(&self, now_secs: u64) -> Digest {
        self.live(now_secs)
            .map(|(version, entry)| (*version, digest_entry(entry.based_on.as_ref())))
            .collect()
    }

    /// Check a signed challenge against the registered protection key.
    /// An ungated chain accepts any caller.
    fn protection_ok(&self, message: &[u8], key: Option<&SecretKey>) -> bool {
        match &self.protection {
            None => true,
            Some(registered) => match key {
                None => false,
                Some(key) => {
                    let signature = key.sign(message);
                    registered.verify(message, &signature).is_ok()
                }
            },
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live versions currently held for a slot
    pub fn version_count(&self, slot: &Slot) -> usize {
        let now = now_secs();
        self.inner
            .read()
            .get(slot)
            .map(|chain| chain.live(now).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ProtectedStore for MemoryStore {
    async fn put(&self, request: PutRequest) -> Result<PutStatus, StoreError> {
        let now = now_secs();
        let mut inner = self.inner.write();
        let chain = inner.entry(request.slot).or_default();
        chain.sweep_expired(now);

        if !chain.protection_ok(&request.payload, request.protection.as_ref()) {
            debug!("put denied on slot {}: protection mismatch", request.slot);
            return Ok(PutStatus::Denied);
        }

        if request.prepare {
            let leaves = version::leaves(&chain.digest(now));
            let tip_matches = match request.based_on {
                None => leaves.is_empty(),
                Some(based_on) => leaves.len() == 1 && leaves.contains(&based_on),
            };
            if !tip_matches {
                debug!(
                    "put forked on slot {}: based_on {:?} vs leaves {:?}",
                    request.slot,
                    request.based_on.map(|k| k.to_string()),
                    leaves.iter().map(|k| k.to_string()).collect::<Vec<_>>()
                );
                return Ok(PutStatus::VersionFork);
            }
        }

        chain.entries.insert(
            request.version,
            StoredEntry {
                payload: request.payload,
                based_on: request.based_on,
                ttl_secs: request.ttl_secs,
                stored_at_secs: now,
            },
        );

        // First protected put gates the chain
        if chain.protection.is_none() {
            chain.protection = request.protection.as_ref().map(|key| key.public());
        }

        Ok(PutStatus::Ok)
    }

    async fn get_latest(&self, slot: &Slot) -> Result<Option<StoredVersion>, StoreError> {
        let now = now_secs();
        let inner = self.inner.read();
        let Some(chain) = inner.get(slot) else {
            return Ok(None);
        };
        let latest = chain.live(now).next_back().map(|(version, entry)| {
            StoredVersion {
                version: *version,
                based_on: entry.based_on,
                payload: entry.payload.clone(),
                ttl_secs: entry.ttl_secs,
            }
        });
        Ok(latest)
    }

    async fn get_version(
        &self,
        slot: &Slot,
        version: &VersionKey,
    ) -> Result<Option<StoredVersion>, StoreError> {
        let now = now_secs();
        let inner = self.inner.read();
        let entry = inner
            .get(slot)
            .and_then(|chain| chain.entries.get(version))
            .filter(|entry| !entry.expired(now));
        Ok(entry.map(|entry| StoredVersion {
            version: *version,
            based_on: entry.based_on,
            payload: entry.payload.clone(),
            ttl_secs: entry.ttl_secs,
        }))
    }

    async fn remove(
        &self,
        slot: &Slot,
        version: Option<&VersionKey>,
        protection: Option<&SecretKey>,
    ) -> Result<bool, StoreError> {
        let now = now_secs();
        let mut inner = self.inner.write();
        let Some(chain) = inner.get_mut(slot) else {
            return Ok(false);
        };
        chain.sweep_expired(now);

        if !chain.protection_ok(&slot.challenge_bytes(), protection) {
            debug!("remove denied on slot {}: protection mismatch", slot);
            return Ok(false);
        }

        match version {
            Some(version) => Ok(chain.entries.remove(version).is_some()),
            None => {
                let existed = !chain.entries.is_empty();
                inner.remove(slot);
                Ok(existed)
            }
        }
    }

    async fn digest(&self, slot: &Slot) -> Result<Digest, StoreError> {
        let now = now_secs();
        let inner = self.inner.read();
        Ok(inner
            .get(slot)
            .map(|chain| chain.digest(now))
            .unwrap_or_default())
    }

    async fn change_protection_key(
        &self,
        slot: &Slot,
        old: &SecretKey,
        new: &PublicKey,
    ) -> Result<PutStatus, StoreError> {
        let mut inner = self.inner.write();
        let Some(chain) = inner.get_mut(slot) else {
            return Ok(PutStatus::Denied);
        };
        if !chain.protection_ok(&slot.challenge_bytes(), Some(old)) {
            debug!("re-gating denied on slot {}: protection mismatch", slot);
            return Ok(PutStatus::Denied);
        }
        chain.protection = Some(*new);
        Ok(PutStatus::Ok)
    }
}
