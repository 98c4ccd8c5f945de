//! Payload codecs.
//!
//! The version manager is generic over a [`Codec`] capability instead of
//! splitting into plain and encrypted manager types. [`PlainCodec`] is the
//! identity case (bincode only); [`SecretCodec`] additionally seals the
//! bytes with a symmetric [`Secret`]. A decryption failure is its own error,
//! distinct from a not-found result.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::{Secret, SecretError};

/// Errors that can occur while encoding or decoding a payload
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("codec error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] bincode::Error),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

/// Capability to turn a document into stored bytes and back
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Identity codec: bincode serialization, no encryption
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

impl PlainCodec {
    pub fn new() -> Self {
        Self
    }
}

impl<T> Codec<T> for PlainCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Encrypting codec: bincode then ChaCha20-Poly1305 under a [`Secret`]
#[derive(Debug, Clone)]
pub struct SecretCodec {
    secret: Secret,
}

impl SecretCodec {
    pub fn new(secret: Secret) -> Self {
        Self { secret }
    }
}

impl<T> Codec<T> for SecretCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let plain = bincode::serialize(value)?;
        Ok(self.secret.encrypt(&plain)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let plain = self.secret.decrypt(bytes)?;
        Ok(bincode::deserialize(&plain)?)
    }
}
