//! End-to-end tests of the optimistic versioning protocol

mod common;

use std::time::Duration;

use common::{CountingStore, FlakyStore, LaggingStore};
use swarmdoc::crypto::{Secret, SecretKey};
use swarmdoc::store::{MemoryStore, ProtectedStore, Slot};
use swarmdoc::version::{
    GetError, PlainCodec, PutError, SecretCodec, VersionConfig, VersionManager, VersionedDocument,
};

fn fast_config() -> VersionConfig {
    VersionConfig::default().with_backoff_base(Duration::from_millis(1))
}

fn slot() -> Slot {
    Slot::from_labels("alice", "meta", "peer-list")
}

fn plain_manager<S: ProtectedStore>(store: S) -> VersionManager<Vec<String>, PlainCodec, S> {
    VersionManager::with_config(store, slot(), PlainCodec::new(), fast_config())
}

#[tokio::test]
async fn test_single_leaf_convergence() {
    common::init_tracing();
    let store = MemoryStore::new();
    let mut vm = plain_manager(store);

    let mut doc = VersionedDocument::new(vec!["v0".to_string()]);
    vm.put(&mut doc, None).await.unwrap();

    for step in 1..=5u32 {
        doc.content_mut().push(format!("v{}", step));
        vm.put(&mut doc, None).await.unwrap();

        let read = vm.get().await.unwrap();
        assert_eq!(read.version(), doc.version());
        assert_eq!(read.content(), doc.content());
    }
}

#[tokio::test]
async fn test_cache_short_circuit_skips_payload_fetch() {
    let store = CountingStore::new(MemoryStore::new());
    let mut vm = plain_manager(store.clone());

    let mut doc = VersionedDocument::new(vec!["v0".to_string()]);
    vm.put(&mut doc, None).await.unwrap();

    // The put primed the cache, so neither get needs a payload fetch
    let before = store.payload_fetches();
    vm.get().await.unwrap();
    vm.get().await.unwrap();
    assert_eq!(store.payload_fetches(), before);
    // ...but each get still issued its digest query
    assert!(store.digest_queries() >= 2);

    // A manager with a cold cache fetches the payload exactly once, then
    // short-circuits as well
    let mut cold = plain_manager(store.clone());
    cold.get().await.unwrap();
    cold.get().await.unwrap();
    assert_eq!(store.payload_fetches(), before + 1);
}

#[tokio::test]
async fn test_fork_scenario_read_modify_retry() {
    // Writer A and writer B read v0; A commits v1; B's commit forks, B
    // re-reads and retries against v1
    let store = MemoryStore::new();
    let mut a = plain_manager(store.clone());
    let mut b = plain_manager(store.clone());

    let mut seed = VersionedDocument::new(vec!["v0".to_string()]);
    a.put(&mut seed, None).await.unwrap();
    let v0 = *seed.version().unwrap();

    let mut doc_a = a.get().await.unwrap();
    let mut doc_b = b.get().await.unwrap();
    assert_eq!(doc_a.version(), Some(&v0));
    assert_eq!(doc_b.version(), Some(&v0));

    doc_a.content_mut().push("from-a".to_string());
    a.put(&mut doc_a, None).await.unwrap();
    let v1 = *doc_a.version().unwrap();

    doc_b.content_mut().push("from-b".to_string());
    assert!(matches!(b.put(&mut doc_b, None).await, Err(PutError::Fork)));

    // Re-read sees the winner; the retried mutation lands on top of it
    let mut fresh = b.get().await.unwrap();
    assert_eq!(fresh.version(), Some(&v1));
    fresh.content_mut().push("from-b".to_string());
    b.put(&mut fresh, None).await.unwrap();
    assert_eq!(fresh.based_on(), Some(&v1));

    let final_read = a.get().await.unwrap();
    assert_eq!(
        final_read.content(),
        &vec!["v0".to_string(), "from-a".to_string(), "from-b".to_string()]
    );
}

#[tokio::test]
async fn test_stale_reads_are_retried_then_resolve() {
    let seed_store = MemoryStore::new();
    let mut seeder = plain_manager(seed_store.clone());
    let mut doc = VersionedDocument::new(vec!["v0".to_string()]);
    seeder.put(&mut doc, None).await.unwrap();
    doc.content_mut().push("v1".to_string());
    seeder.put(&mut doc, None).await.unwrap();

    // One stale answer: the reader backs off once and converges
    let lagging = LaggingStore::new(seed_store.clone(), 1);
    let mut vm = plain_manager(lagging);
    let read = vm.get().await.unwrap();
    assert_eq!(read.version(), doc.version());
}

#[tokio::test]
async fn test_stale_reads_exhaust_delay_budget() {
    let seed_store = MemoryStore::new();
    let mut seeder = plain_manager(seed_store.clone());
    let mut doc = VersionedDocument::new(vec!["v0".to_string()]);
    seeder.put(&mut doc, None).await.unwrap();
    doc.content_mut().push("v1".to_string());
    seeder.put(&mut doc, None).await.unwrap();

    // More stale answers than the delay budget allows
    let lagging = LaggingStore::new(seed_store.clone(), 10);
    let mut vm = plain_manager(lagging);
    assert!(matches!(vm.get().await, Err(GetError::Delayed(_))));
}

#[tokio::test]
async fn test_transient_network_errors_are_retried() {
    let seed_store = MemoryStore::new();
    let mut seeder = plain_manager(seed_store.clone());
    let mut doc = VersionedDocument::new(vec!["v0".to_string()]);
    seeder.put(&mut doc, None).await.unwrap();

    // Two failures fit inside the retry budget
    let flaky = FlakyStore::new(seed_store.clone(), 2);
    let mut vm = plain_manager(flaky);
    let read = vm.get().await.unwrap();
    assert_eq!(read.version(), doc.version());

    // A long outage exhausts it
    let dead = FlakyStore::new(seed_store, 50);
    let mut vm = plain_manager(dead);
    assert!(matches!(vm.get().await, Err(GetError::Store(_))));
}

#[tokio::test]
async fn test_encrypted_documents_round_trip() {
    let store = MemoryStore::new();
    let secret = Secret::derive("hunter2", b"alice");

    let mut writer: VersionManager<Vec<String>, SecretCodec, _> = VersionManager::with_config(
        store.clone(),
        slot(),
        SecretCodec::new(secret.clone()),
        fast_config(),
    );
    let mut doc = VersionedDocument::new(vec!["private".to_string()]);
    writer.put(&mut doc, None).await.unwrap();

    // Same password-derived secret decrypts from a different manager
    let mut reader: VersionManager<Vec<String>, SecretCodec, _> =
        VersionManager::with_config(store.clone(), slot(), SecretCodec::new(secret), fast_config());
    let read = reader.get().await.unwrap();
    assert_eq!(read.content(), doc.content());

    // The wrong secret is a codec error, not a not-found
    let mut wrong: VersionManager<Vec<String>, SecretCodec, _> = VersionManager::with_config(
        store,
        slot(),
        SecretCodec::new(Secret::derive("wrong", b"alice")),
        fast_config(),
    );
    assert!(matches!(wrong.get().await, Err(GetError::Codec(_))));
}

#[tokio::test]
async fn test_protection_enforced_across_managers() {
    let store = MemoryStore::new();
    let owner = SecretKey::generate();

    let mut vm = plain_manager(store.clone());
    let mut doc = VersionedDocument::new(vec!["v0".to_string()]);
    vm.put(&mut doc, Some(&owner)).await.unwrap();

    // Reads are never gated
    let mut other = plain_manager(store.clone());
    let mut stolen = other.get().await.unwrap();

    // Writes without the key (or with a wrong one) change nothing
    stolen.content_mut().push("mallory".to_string());
    let intruder = SecretKey::generate();
    assert!(matches!(
        other.put(&mut stolen, None).await,
        Err(PutError::Denied)
    ));
    assert!(matches!(
        other.put(&mut stolen, Some(&intruder)).await,
        Err(PutError::Denied)
    ));
    let read = vm.get().await.unwrap();
    assert_eq!(read.content(), &vec!["v0".to_string()]);

    // The right key succeeds
    let mut owned = other.get().await.unwrap();
    owned.content_mut().push("legit".to_string());
    other.put(&mut owned, Some(&owner)).await.unwrap();
}

#[tokio::test]
async fn test_get_after_remove_is_not_found() {
    let store = MemoryStore::new();
    let mut vm = plain_manager(store.clone());
    let mut doc = VersionedDocument::new(vec!["v0".to_string()]);
    vm.put(&mut doc, None).await.unwrap();

    store.remove(vm.slot(), None, None).await.unwrap();

    let mut cold = plain_manager(store);
    assert!(matches!(cold.get().await, Err(GetError::NotFound)));
}
