//! Public-key directory.
//!
//! Every user publishes their content-protection public key under a
//! well-known slot `(user-id, "public-key", "public-key")`. [`KeyDirectory`]
//! is a read-through cache over that slot: the own key is answered directly,
//! a cached key next, and the store last. Lookups are never retried
//! automatically — a missing or malformed key is a hard error the caller
//! decides about.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::crypto::{PublicKey, SecretKey};
use crate::store::{ProtectedStore, PutRequest, PutStatus, Slot, StoreError};
use crate::version::VersionKey;

/// Domain label of the well-known public-key slot
const PUBLIC_KEY_DOMAIN: &str = "public-key";

/// Errors raised by directory lookups
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("no public key published for user {0}")]
    NotFound(String),
    #[error("published key for user {0} is malformed")]
    Malformed(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("publish rejected: {0:?}")]
    PublishRejected(PutStatus),
}

/// Read-through cache mapping user identity to public key
#[derive(Debug, Clone)]
pub struct KeyDirectory<S> {
    store: S,
    own_user: String,
    own_key: PublicKey,
    cache: Arc<Mutex<HashMap<String, PublicKey>>>,
}

impl<S> KeyDirectory<S>
where
    S: ProtectedStore,
{
    pub fn new(store: S, own_user: impl Into<String>, own_key: PublicKey) -> Self {
        Self {
            store,
            own_user: own_user.into(),
            own_key,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The well-known slot a user's key lives in
    pub fn slot_for(user_id: &str) -> Slot {
        Slot::from_labels(user_id, PUBLIC_KEY_DOMAIN, PUBLIC_KEY_DOMAIN)
    }

    /// Look up a user's public key.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] if nothing is published,
    /// [`DirectoryError::Malformed`] if the published payload does not parse
    /// as a key. Neither is retried here.
    pub async fn public_key(&self, user_id: &str) -> Result<PublicKey, DirectoryError> {
        if user_id == self.own_user {
            return Ok(self.own_key);
        }
        if let Some(key) = self.cache.lock().get(user_id) {
            return Ok(*key);
        }

        let slot = Self::slot_for(user_id);
        let stored = self
            .store
            .get_latest(&slot)
            .await?
            .ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))?;

        let key: PublicKey = bincode::deserialize(&stored.payload)
            .map_err(|_| DirectoryError::Malformed(user_id.to_string()))?;

        debug!("cached public key for user {}", user_id);
        self.cache.lock().insert(user_id.to_string(), key);
        Ok(key)
    }

    /// Publish the own public key under the well-known slot, gated by the
    /// key itself so only its holder can replace it.
    pub async fn publish(&self, secret: &SecretKey, ttl_secs: u64) -> Result<(), DirectoryError> {
        let payload = bytes::Bytes::from(
            bincode::serialize(&self.own_key).map_err(|e| StoreError::Default(e.into()))?,
        );
        let request = PutRequest {
            slot: Self::slot_for(&self.own_user),
            version: VersionKey::now(&payload),
            based_on: None,
            payload,
            ttl_secs,
            // The key slot is not versioned-chained; last write wins
            prepare: false,
            protection: Some(secret.clone()),
        };
        match self.store.put(request).await? {
            PutStatus::Ok => Ok(()),
            status => Err(DirectoryError::PublishRejected(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::version::DEFAULT_TTL_SECS;

    #[tokio::test]
    async fn test_own_key_answered_directly() {
        let own = SecretKey::generate();
        let directory = KeyDirectory::new(MemoryStore::new(), "alice", own.public());

        // No publish happened; the own key still resolves
        assert_eq!(directory.public_key("alice").await.unwrap(), own.public());
    }

    #[tokio::test]
    async fn test_lookup_reads_through_and_caches() {
        let store = MemoryStore::new();

        let bob = SecretKey::generate();
        let bob_directory = KeyDirectory::new(store.clone(), "bob", bob.public());
        bob_directory.publish(&bob, DEFAULT_TTL_SECS).await.unwrap();

        let alice = SecretKey::generate();
        let directory = KeyDirectory::new(store.clone(), "alice", alice.public());
        assert_eq!(directory.public_key("bob").await.unwrap(), bob.public());

        // Second lookup is served from cache even if the store entry goes away
        store
            .remove(&KeyDirectory::<MemoryStore>::slot_for("bob"), None, Some(&bob))
            .await
            .unwrap();
        assert_eq!(directory.public_key("bob").await.unwrap(), bob.public());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let alice = SecretKey::generate();
        let directory = KeyDirectory::new(MemoryStore::new(), "alice", alice.public());

        let err = directory.public_key("nobody").await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_malformed_key_is_rejected() {
        let store = MemoryStore::new();
        let payload = bytes::Bytes::from_static(b"not a key");
        store
            .put(PutRequest {
                slot: KeyDirectory::<MemoryStore>::slot_for("mallory"),
                version: VersionKey::now(&payload),
                based_on: None,
                payload,
                ttl_secs: 60,
                prepare: false,
                protection: None,
            })
            .await
            .unwrap();

        let alice = SecretKey::generate();
        let directory = KeyDirectory::new(store, "alice", alice.public());
        let err = directory.public_key("mallory").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_publish_is_gated_by_the_key_itself() {
        let store = MemoryStore::new();
        let bob = SecretKey::generate();
        let bob_directory = KeyDirectory::new(store.clone(), "bob", bob.public());
        bob_directory.publish(&bob, DEFAULT_TTL_SECS).await.unwrap();

        // An impostor cannot replace bob's published key
        let impostor = SecretKey::generate();
        let impostor_directory = KeyDirectory::new(store, "bob", impostor.public());
        let err = impostor_directory.publish(&impostor, DEFAULT_TTL_SECS).await.unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::PublishRejected(PutStatus::Denied)
        ));
    }
}
