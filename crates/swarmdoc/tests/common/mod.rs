//! Shared test utilities: instrumented store wrappers
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use swarmdoc::crypto::{PublicKey, SecretKey};
use swarmdoc::store::{
    MemoryStore, ProtectedStore, PutRequest, PutStatus, Slot, StoreError, StoredVersion,
};
use swarmdoc::version::{Digest, VersionKey};

/// Send test logs to stderr, honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Layer};

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry()
        .with(stderr_layer)
        .try_init()
        .ok();
}

/// Counts payload fetches, for asserting the cache short-circuit
#[derive(Debug, Clone)]
pub struct CountingStore {
    inner: MemoryStore,
    payload_fetches: Arc<AtomicUsize>,
    digest_queries: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            payload_fetches: Arc::new(AtomicUsize::new(0)),
            digest_queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn payload_fetches(&self) -> usize {
        self.payload_fetches.load(Ordering::SeqCst)
    }

    pub fn digest_queries(&self) -> usize {
        self.digest_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtectedStore for CountingStore {
    async fn put(&self, request: PutRequest) -> Result<PutStatus, StoreError> {
        self.inner.put(request).await
    }

    async fn get_latest(&self, slot: &Slot) -> Result<Option<StoredVersion>, StoreError> {
        self.payload_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.get_latest(slot).await
    }

    async fn get_version(
        &self,
        slot: &Slot,
        version: &VersionKey,
    ) -> Result<Option<StoredVersion>, StoreError> {
        self.payload_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.get_version(slot, version).await
    }

    async fn remove(
        &self,
        slot: &Slot,
        version: Option<&VersionKey>,
        protection: Option<&SecretKey>,
    ) -> Result<bool, StoreError> {
        self.inner.remove(slot, version, protection).await
    }

    async fn digest(&self, slot: &Slot) -> Result<Digest, StoreError> {
        self.digest_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.digest(slot).await
    }

    async fn change_protection_key(
        &self,
        slot: &Slot,
        old: &SecretKey,
        new: &PublicKey,
    ) -> Result<PutStatus, StoreError> {
        self.inner.change_protection_key(slot, old, new).await
    }
}

/// Serves stale `get_latest` answers for the first N calls while the digest
/// stays truthful — models a DHT that has not converged yet
#[derive(Debug, Clone)]
pub struct LaggingStore {
    inner: MemoryStore,
    stale_reads_left: Arc<AtomicUsize>,
}

impl LaggingStore {
    pub fn new(inner: MemoryStore, stale_reads: usize) -> Self {
        Self {
            inner,
            stale_reads_left: Arc::new(AtomicUsize::new(stale_reads)),
        }
    }

    fn take_stale(&self) -> bool {
        self.stale_reads_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ProtectedStore for LaggingStore {
    async fn put(&self, request: PutRequest) -> Result<PutStatus, StoreError> {
        self.inner.put(request).await
    }

    async fn get_latest(&self, slot: &Slot) -> Result<Option<StoredVersion>, StoreError> {
        if self.take_stale() {
            // Answer with the oldest live version instead of the tip
            let digest = self.inner.digest(slot).await?;
            if let Some(oldest) = digest.keys().next() {
                return self.inner.get_version(slot, oldest).await;
            }
        }
        self.inner.get_latest(slot).await
    }

    async fn get_version(
        &self,
        slot: &Slot,
        version: &VersionKey,
    ) -> Result<Option<StoredVersion>, StoreError> {
        self.inner.get_version(slot, version).await
    }

    async fn remove(
        &self,
        slot: &Slot,
        version: Option<&VersionKey>,
        protection: Option<&SecretKey>,
    ) -> Result<bool, StoreError> {
        self.inner.remove(slot, version, protection).await
    }

    async fn digest(&self, slot: &Slot) -> Result<Digest, StoreError> {
        self.inner.digest(slot).await
    }

    async fn change_protection_key(
        &self,
        slot: &Slot,
        old: &SecretKey,
        new: &PublicKey,
    ) -> Result<PutStatus, StoreError> {
        self.inner.change_protection_key(slot, old, new).await
    }
}

/// Fails the first N operations with a network error, then recovers
#[derive(Debug, Clone)]
pub struct FlakyStore {
    inner: MemoryStore,
    failures_left: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore, failures: usize) -> Self {
        Self {
            inner,
            failures_left: Arc::new(AtomicUsize::new(failures)),
        }
    }

    fn maybe_fail(&self) -> Result<(), StoreError> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StoreError::Network("injected timeout".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProtectedStore for FlakyStore {
    async fn put(&self, request: PutRequest) -> Result<PutStatus, StoreError> {
        self.maybe_fail()?;
        self.inner.put(request).await
    }

    async fn get_latest(&self, slot: &Slot) -> Result<Option<StoredVersion>, StoreError> {
        self.maybe_fail()?;
        self.inner.get_latest(slot).await
    }

    async fn get_version(
        &self,
        slot: &Slot,
        version: &VersionKey,
    ) -> Result<Option<StoredVersion>, StoreError> {
        self.maybe_fail()?;
        self.inner.get_version(slot, version).await
    }

    async fn remove(
        &self,
        slot: &Slot,
        version: Option<&VersionKey>,
        protection: Option<&SecretKey>,
    ) -> Result<bool, StoreError> {
        self.maybe_fail()?;
        self.inner.remove(slot, version, protection).await
    }

    async fn digest(&self, slot: &Slot) -> Result<Digest, StoreError> {
        self.maybe_fail()?;
        self.inner.digest(slot).await
    }

    async fn change_protection_key(
        &self,
        slot: &Slot,
        old: &SecretKey,
        new: &PublicKey,
    ) -> Result<PutStatus, StoreError> {
        self.maybe_fail()?;
        self.inner.change_protection_key(slot, old, new).await
    }
}
