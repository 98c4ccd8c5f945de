/**
 * Cryptographic types and operations.
 *  - Content-protection keypairs (ed25519 sign/verify)
 *  - Symmetric content encryption for private documents
 */
pub mod crypto;
/**
 * Read-through cache for other users' public keys,
 *  backed by a well-known slot in the store.
 */
pub mod directory;
/**
 * The per-user profile document and the actor that
 *  serializes concurrent readers and writers on it.
 */
pub mod profile;
/**
 * The store seam. Put/get/remove/digest against the
 *  DHT, keyed by (location, domain, content, version),
 *  with asymmetric write protection. Ships an in-memory
 *  implementation for local use and tests.
 */
pub mod store;
/**
 * The optimistic versioning protocol: version keys and
 *  the based-on DAG, windowed caches, payload codecs,
 *  and the get/put state machine with delay and fork
 *  detection.
 */
pub mod version;

pub mod prelude {
    pub use crate::crypto::{PublicKey, Secret, SecretKey};
    pub use crate::directory::KeyDirectory;
    pub use crate::profile::{Profile, ProfileError, ProfileManager};
    pub use crate::store::{MemoryStore, ProtectedStore, PutStatus, Slot};
    pub use crate::version::{
        Codec, PlainCodec, SecretCodec, VersionKey, VersionManager, VersionedDocument,
    };
}
