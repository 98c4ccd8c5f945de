use serde::{Deserialize, Serialize};

use super::key::VersionKey;

/// Default time-to-live for stored documents: 30 days
pub const DEFAULT_TTL_SECS: u64 = 60 * 60 * 24 * 30;

/// A document payload together with its position in the version chain.
///
/// A fresh document starts with no version key; its first successful put
/// assigns one (with an empty based-on). Every later put supersedes the
/// current version: the manager stamps a new key and records the old one as
/// based-on. Stored versions are never mutated in place — only superseded or
/// removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedDocument<T> {
    content: T,
    version: Option<VersionKey>,
    based_on: Option<VersionKey>,
    ttl_secs: u64,
}

impl<T> VersionedDocument<T> {
    /// Wrap a payload that has never been stored
    pub fn new(content: T) -> Self {
        Self {
            content,
            version: None,
            based_on: None,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }

    /// Wrap a payload fetched from the store at a known version
    pub fn at_version(
        content: T,
        version: VersionKey,
        based_on: Option<VersionKey>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            content,
            version: Some(version),
            based_on,
            ttl_secs,
        }
    }

    /// Override the time-to-live attached to the next put
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn content(&self) -> &T {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut T {
        &mut self.content
    }

    pub fn into_content(self) -> T {
        self.content
    }

    /// The version this document was read at, `None` if never stored
    pub fn version(&self) -> Option<&VersionKey> {
        self.version.as_ref()
    }

    /// The version this one supersedes
    pub fn based_on(&self) -> Option<&VersionKey> {
        self.based_on.as_ref()
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Advance the chain position after a successful put.
    ///
    /// The old version becomes the based-on of the new one.
    pub(crate) fn advance(&mut self, version: VersionKey) {
        self.based_on = self.version.replace(version);
    }
}
