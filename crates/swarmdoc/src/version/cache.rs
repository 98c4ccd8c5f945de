//! Time-windowed version cache.
//!
//! Avoids redundant payload fetches and bounds memory: inserting a new
//! version evicts everything whose timestamp falls outside a retention
//! window behind the newest cached entry. Eviction is purely local and never
//! touches remote data. The cache is an optimization — fork detection always
//! runs against a fresh digest, never against this map.

use std::collections::BTreeMap;
use std::time::Duration;

use super::key::VersionKey;

/// Default retention window behind the newest cached version
pub const DEFAULT_RETENTION_WINDOW: Duration = Duration::from_secs(300);

/// Ordered cache of `(VersionKey → value)` pairs with windowed eviction
#[derive(Debug, Clone)]
pub struct VersionCache<V> {
    window: Duration,
    entries: BTreeMap<VersionKey, V>,
}

impl<V> Default for VersionCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_WINDOW)
    }
}

impl<V> VersionCache<V> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: BTreeMap::new(),
        }
    }

    /// Insert one entry, then evict everything older than the window.
    pub fn put(&mut self, key: VersionKey, value: V) {
        self.entries.insert(key, value);
        self.evict();
    }

    /// Merge a batch of entries, evicting once at the end.
    pub fn put_all(&mut self, entries: impl IntoIterator<Item = (VersionKey, V)>) {
        self.entries.extend(entries);
        self.evict();
    }

    pub fn get(&self, key: &VersionKey) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &VersionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Newest cached entry by version-key order
    pub fn newest(&self) -> Option<(&VersionKey, &V)> {
        self.entries.iter().next_back()
    }

    /// Iterate entries in version-key order
    pub fn iter(&self) -> impl Iterator<Item = (&VersionKey, &V)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self) {
        let Some((newest, _)) = self.entries.iter().next_back() else {
            return;
        };
        let window_ms = self.window.as_millis() as u64;
        let horizon = newest.timestamp_ms().saturating_sub(window_ms);
        self.entries.retain(|key, _| key.timestamp_ms() >= horizon);
    }
}
