//! Cryptographic primitives for swarmdoc
//!
//! This module provides the two cryptographic capabilities the sync protocol
//! consumes:
//!
//! - **Content protection**: Ed25519 keypairs (`SecretKey`/`PublicKey`) that
//!   gate writes and removals on a document's version chain. The first
//!   protected put registers the public key with the store; every later put
//!   or remove must prove possession of the matching private key by signing
//!   the request.
//! - **Content encryption**: ChaCha20-Poly1305 `Secret` keys for documents
//!   that must not be readable by other peers (most importantly the user
//!   profile, whose key is derived from the user's password).
//!
//! Reads are never gated: the DHT serves ciphertext to anyone, protection
//! only covers mutation.

mod keys;
mod secret;

pub use keys::{
    KeyError, PublicKey, SecretKey, Signature, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
pub use secret::{Secret, SecretError, BLAKE3_HASH_SIZE, NONCE_SIZE, SECRET_SIZE};
