//! The optimistic versioning protocol.
//!
//! [`VersionManager`] is the get/put primitive everything above it builds
//! on: readers converge on a single leaf of the version DAG (retrying
//! through stale reads and transient forks), and writers either land cleanly
//! on the tip they read or are told explicitly that another peer won the
//! race.
//!
//! The manager owns its caches and is not internally synchronized; callers
//! must not share an instance across tasks without external serialization.
//! [`ProfileManager`](crate::profile::ProfileManager) provides exactly that
//! for the profile document.

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::crypto::SecretKey;
use crate::store::{ProtectedStore, PutRequest, PutStatus, Slot, StoreError, StoredVersion};

use super::cache::{VersionCache, DEFAULT_RETENTION_WINDOW};
use super::codec::{Codec, CodecError};
use super::document::VersionedDocument;
use super::key::VersionKey;
use super::{leaves, Digest};

/// Tuning knobs for the get/put state machine.
///
/// The retry limits are deliberately small: the protocol fails fast and
/// leaves resubmission to the enclosing process.
#[derive(Debug, Clone)]
pub struct VersionConfig {
    /// Transient-failure retries per digest/payload fetch
    pub get_failed_limit: u32,
    /// Transient-failure retries per put
    pub put_failed_limit: u32,
    /// Stale-read retries before giving up
    pub delay_limit: u32,
    /// Fork re-read retries before giving up
    pub fork_after_get_limit: u32,
    /// Base for exponential backoff; each sleep adds up to one base of jitter
    pub backoff_base: Duration,
    /// Local cache retention window
    pub retention_window: Duration,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            get_failed_limit: 2,
            put_failed_limit: 2,
            delay_limit: 2,
            fork_after_get_limit: 2,
            backoff_base: Duration::from_secs(1),
            retention_window: DEFAULT_RETENTION_WINDOW,
        }
    }
}

impl VersionConfig {
    /// Config with a short backoff, for tests and local stores
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }
}

/// Errors surfaced by [`VersionManager::get`]
#[derive(Debug, thiserror::Error)]
pub enum GetError {
    #[error("no data found")]
    NotFound,
    #[error("version fork unresolved after {0} retries")]
    Fork(u32),
    #[error("stale reads unresolved after {0} retries")]
    Delayed(u32),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors surfaced by [`VersionManager::put`]
#[derive(Debug, thiserror::Error)]
pub enum PutError {
    /// The optimistic concurrency check lost the race. The caller must
    /// re-`get()` and recompute its mutation against the new tip; this is
    /// not retried internally because the mutation's intent may no longer
    /// apply.
    #[error("version fork: another writer superseded the tip")]
    Fork,
    #[error("write denied: content-protection key mismatch")]
    Denied,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Internal outcome of one read pass over the slot
enum ReadPass<T> {
    Ready(VersionedDocument<T>),
    Delayed,
    Forked,
}

/// Versioned get/put over one slot of the store.
///
/// Generic over the payload type `T`, the [`Codec`] capability `C` (plain or
/// encrypting), and the store implementation `S`.
pub struct VersionManager<T, C, S> {
    slot: Slot,
    store: S,
    codec: C,
    config: VersionConfig,
    cache: VersionCache<VersionedDocument<T>>,
    digest_cache: VersionCache<BTreeSet<VersionKey>>,
}

impl<T, C, S> VersionManager<T, C, S>
where
    T: Serialize + DeserializeOwned + Clone,
    C: Codec<T>,
    S: ProtectedStore,
{
    pub fn new(store: S, slot: Slot, codec: C) -> Self {
        Self::with_config(store, slot, codec, VersionConfig::default())
    }

    pub fn with_config(store: S, slot: Slot, codec: C, config: VersionConfig) -> Self {
        let window = config.retention_window;
        Self {
            slot,
            store,
            codec,
            config,
            cache: VersionCache::new(window),
            digest_cache: VersionCache::new(window),
        }
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch the current single-leaf document.
    ///
    /// Converges through stale reads (delays) and transient forks with
    /// exponential backoff; if the digest's tip is already cached the call
    /// performs no payload fetch at all.
    ///
    /// # Errors
    ///
    /// [`GetError::NotFound`] if the slot is empty, [`GetError::Fork`] /
    /// [`GetError::Delayed`] when the retry budgets run out, and store or
    /// codec errors otherwise. Decryption failure surfaces as a codec error,
    /// never as not-found.
    pub async fn get(&mut self) -> Result<VersionedDocument<T>, GetError> {
        let mut delays = 0u32;
        let mut forks = 0u32;
        loop {
            match self.read_pass().await? {
                ReadPass::Ready(doc) => return Ok(doc),
                ReadPass::Delayed => {
                    if delays >= self.config.delay_limit {
                        warn!("slot {}: stale reads persisted, giving up", self.slot);
                        return Err(GetError::Delayed(delays));
                    }
                    delays += 1;
                    debug!("slot {}: stale read, retry {}", self.slot, delays);
                    self.backoff(delays).await;
                }
                ReadPass::Forked => {
                    if forks >= self.config.fork_after_get_limit {
                        warn!("slot {}: version fork did not resolve, giving up", self.slot);
                        return Err(GetError::Fork(forks));
                    }
                    forks += 1;
                    debug!("slot {}: forked digest, retry {}", self.slot, forks);
                    self.backoff(forks).await;
                }
            }
        }
    }

    /// Store a new version superseding the document's current one.
    ///
    /// On success the document is advanced in place: its old version becomes
    /// the based-on of the freshly stamped one. On [`PutError::Fork`] the
    /// just-written version is removed best-effort and the document is left
    /// untouched.
    pub async fn put(
        &mut self,
        doc: &mut VersionedDocument<T>,
        protection: Option<&SecretKey>,
    ) -> Result<(), PutError> {
        let payload = Bytes::from(self.codec.encode(doc.content())?);
        let version = VersionKey::now(&payload);
        let based_on = doc.version().copied();

        let request = PutRequest {
            slot: self.slot,
            version,
            based_on,
            payload,
            ttl_secs: doc.ttl_secs(),
            prepare: true,
            protection: protection.cloned(),
        };

        let mut attempt = 0u32;
        let status = loop {
            match self.store.put(request.clone()).await {
                Ok(status) => break status,
                Err(err) => {
                    if attempt >= self.config.put_failed_limit {
                        return Err(err.into());
                    }
                    attempt += 1;
                    warn!("slot {}: put failed ({}), retry {}", self.slot, err, attempt);
                    self.backoff(attempt).await;
                }
            }
        };

        match status {
            PutStatus::Ok => {
                doc.advance(version);
                self.cache.put(version, doc.clone());
                self.digest_cache
                    .put(version, based_on.into_iter().collect());
                debug!("slot {}: stored version {}", self.slot, version);
                Ok(())
            }
            PutStatus::VersionFork => {
                // Best-effort cleanup of whatever the losing write left behind
                self.store
                    .remove(&self.slot, Some(&version), protection)
                    .await
                    .ok();
                debug!("slot {}: put lost the race at version {}", self.slot, version);
                Err(PutError::Fork)
            }
            PutStatus::Denied => Err(PutError::Denied),
        }
    }

    /// One full read attempt: digest, leaf computation, payload fetch.
    async fn read_pass(&mut self) -> Result<ReadPass<T>, GetError> {
        let digest = self.fetch_digest().await?;
        if digest.is_empty() {
            return Err(GetError::NotFound);
        }
        let digest = self.merge_digest_cache(digest);

        let leaf_set = leaves(&digest);
        if leaf_set.len() > 1 {
            return Ok(ReadPass::Forked);
        }
        let Some(tip) = leaf_set.into_iter().next() else {
            // Structurally impossible for a DAG; treat a degenerate digest
            // as a stale read and retry
            return Ok(ReadPass::Delayed);
        };

        // Cache-hit short-circuit: the digest's tip is already local
        if let Some(doc) = self.cache.get(&tip) {
            debug!("slot {}: cache hit at {}", self.slot, tip);
            return Ok(ReadPass::Ready(doc.clone()));
        }

        // A latest payload that lags the digest's tip (or is missing
        // entirely) is a read the store has not converged on yet
        let Some(stored) = self.fetch_latest().await? else {
            return Ok(ReadPass::Delayed);
        };
        if stored.version != tip {
            return Ok(ReadPass::Delayed);
        }

        let content = self.codec.decode(&stored.payload)?;
        let doc =
            VersionedDocument::at_version(content, stored.version, stored.based_on, stored.ttl_secs);
        self.cache.put(tip, doc.clone());
        Ok(ReadPass::Ready(doc))
    }

    async fn fetch_digest(&mut self) -> Result<Digest, GetError> {
        let mut attempt = 0u32;
        loop {
            match self.store.digest(&self.slot).await {
                Ok(digest) => return Ok(digest),
                Err(err) => {
                    if attempt >= self.config.get_failed_limit {
                        return Err(err.into());
                    }
                    attempt += 1;
                    warn!(
                        "slot {}: digest failed ({}), retry {}",
                        self.slot, err, attempt
                    );
                    self.backoff(attempt).await;
                }
            }
        }
    }

    async fn fetch_latest(&mut self) -> Result<Option<StoredVersion>, GetError> {
        let mut attempt = 0u32;
        loop {
            match self.store.get_latest(&self.slot).await {
                Ok(latest) => return Ok(latest),
                Err(err) => {
                    if attempt >= self.config.get_failed_limit {
                        return Err(err.into());
                    }
                    attempt += 1;
                    warn!(
                        "slot {}: payload fetch failed ({}), retry {}",
                        self.slot, err, attempt
                    );
                    self.backoff(attempt).await;
                }
            }
        }
    }

    /// Merge a fresh digest into the windowed digest cache and return the
    /// merged view, unioning based-on sets for keys seen before.
    fn merge_digest_cache(&mut self, mut incoming: Digest) -> Digest {
        for (key, parents) in incoming.iter_mut() {
            if let Some(known) = self.digest_cache.get(key) {
                parents.extend(known.iter().copied());
            }
        }
        self.digest_cache.put_all(incoming);
        self.digest_cache
            .iter()
            .map(|(key, parents)| (*key, parents.clone()))
            .collect()
    }

    /// Exponential backoff with one base of random jitter
    async fn backoff(&self, attempt: u32) {
        let base = self.config.backoff_base.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(6));
        let jitter = rand::thread_rng().gen_range(0..=base.max(1));
        tokio::time::sleep(Duration::from_millis(exp + jitter)).await;
    }
}
