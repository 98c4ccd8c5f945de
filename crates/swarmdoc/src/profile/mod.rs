//! # Profile
//!
//! The per-user profile is the dominant versioned document in the system: it
//! describes the user's synchronized file tree and is mutated by every
//! file-add/move/delete operation, one mutation at a time per process
//! instance. It is stored encrypted under a password-derived
//! [`Secret`](crate::crypto::Secret) and write-protected by the user's
//! keypair.
//!
//! [`manager::ProfileManager`] is the serialization point: a dedicated actor
//! that batches concurrent readers onto one fetch and grants writers a
//! bounded exclusive mutation window.

pub mod manager;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::version::{GetError, PutError};

pub use manager::{ProfileConfig, ProfileDocument, ProfileManager};

/// Errors raised by profile operations and the profile manager
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("path already exists: {0}")]
    PathExists(String),
    #[error("profile read failed: {0}")]
    Get(Arc<GetError>),
    #[error("profile write failed: {0}")]
    Put(#[from] PutError),
    #[error("mutation window expired before the process signaled readiness")]
    MutationTimeout,
    #[error("process does not hold the mutation window")]
    NotHoldingWindow,
    #[error("profile manager is gone")]
    ChannelClosed,
}

/// An entry in the profile's file tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry {
    File {
        /// BLAKE3 hash of the (chunked, uploaded) file content
        content_hash: [u8; 32],
        size: u64,
    },
    Dir,
}

/// The authenticated user's file tree plus metadata.
///
/// Paths are relative, `/`-separated strings. The tree is a flat map; a
/// directory move relocates every entry under its prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    owner: PublicKey,
    entries: BTreeMap<String, Entry>,
    updated_at_ms: u64,
}

impl Profile {
    pub fn new(owner: PublicKey) -> Self {
        Self {
            owner,
            entries: BTreeMap::new(),
            updated_at_ms: now_ms(),
        }
    }

    pub fn owner(&self) -> &PublicKey {
        &self.owner
    }

    pub fn updated_at_ms(&self) -> u64 {
        self.updated_at_ms
    }

    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or overwrite a file entry
    pub fn add_file(&mut self, path: &str, content_hash: [u8; 32], size: u64) {
        self.entries
            .insert(path.to_string(), Entry::File { content_hash, size });
        self.touch();
    }

    /// Create a directory entry. Idempotent for existing directories.
    ///
    /// # Errors
    ///
    /// [`ProfileError::PathExists`] if a file occupies the path.
    pub fn mkdir(&mut self, path: &str) -> Result<(), ProfileError> {
        match self.entries.get(path) {
            Some(Entry::File { .. }) => Err(ProfileError::PathExists(path.to_string())),
            Some(Entry::Dir) => Ok(()),
            None => {
                self.entries.insert(path.to_string(), Entry::Dir);
                self.touch();
                Ok(())
            }
        }
    }

    /// Remove an entry; removing a directory removes everything under it.
    ///
    /// # Errors
    ///
    /// [`ProfileError::PathNotFound`] if nothing lives at the path.
    pub fn remove(&mut self, path: &str) -> Result<(), ProfileError> {
        let Some(entry) = self.entries.remove(path) else {
            return Err(ProfileError::PathNotFound(path.to_string()));
        };
        if matches!(entry, Entry::Dir) {
            let prefix = format!("{}/", path);
            self.entries.retain(|key, _| !key.starts_with(&prefix));
        }
        self.touch();
        Ok(())
    }

    /// Move an entry; moving a directory relocates everything under it.
    ///
    /// # Errors
    ///
    /// [`ProfileError::PathNotFound`] if the source is absent,
    /// [`ProfileError::PathExists`] if the destination is occupied.
    pub fn mv(&mut self, from: &str, to: &str) -> Result<(), ProfileError> {
        let Some(entry) = self.entries.remove(from) else {
            return Err(ProfileError::PathNotFound(from.to_string()));
        };
        if self.entries.contains_key(to) {
            self.entries.insert(from.to_string(), entry);
            return Err(ProfileError::PathExists(to.to_string()));
        }
        let is_dir = matches!(entry, Entry::Dir);
        self.entries.insert(to.to_string(), entry);

        if is_dir {
            let prefix = format!("{}/", from);
            let children: Vec<String> = self
                .entries
                .keys()
                .filter(|key| key.starts_with(&prefix))
                .cloned()
                .collect();
            for child in children {
                let moved = format!("{}/{}", to, &child[prefix.len()..]);
                if let Some(value) = self.entries.remove(&child) {
                    self.entries.insert(moved, value);
                }
            }
        }
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at_ms = now_ms();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}
