use std::fmt;

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Size of an Ed25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of an Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("signature verification failed")]
    BadSignature,
}

/// Public half of a content-protection keypair
///
/// Stored as the compressed 32-byte Edwards point so the type is `Copy`,
/// ordered, and hashable — it doubles as a map key in share directories.
/// The point is only validated when a signature is actually verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl From<[u8; PUBLIC_KEY_SIZE]> for PublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        PublicKey(bytes)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid public key size, expected {}, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        Ok(buff.into())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl PublicKey {
    /// Parse a public key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PUBLIC_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("public key hex decode error"))?;
        Ok(buff.into())
    }

    /// Raw key bytes
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    /// Hex-encoded key bytes
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a signature over `message`
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::BadSignature`] if the signature does not match, or
    /// a default error if the stored bytes are not a valid Edwards point.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), KeyError> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|_| anyhow::anyhow!("public key invalid edwards point"))?;
        let sig = DalekSignature::from_bytes(&signature.0);
        key.verify(message, &sig)
            .map_err(|_| KeyError::BadSignature)
    }
}

/// Private half of a content-protection keypair
///
/// Proves write ownership of a protected document by signing put and remove
/// requests. Holders of this key — and only they — may supersede or delete
/// versions on a slot once it is gated.
///
/// # Examples
///
/// ```ignore
/// let secret_key = SecretKey::generate();
/// let public_key = secret_key.public();
/// let sig = secret_key.sign(b"payload");
/// public_key.verify(b"payload", &sig)?;
/// ```
#[derive(Debug, Clone)]
pub struct SecretKey(SigningKey);

impl From<[u8; PRIVATE_KEY_SIZE]> for SecretKey {
    fn from(bytes: [u8; PRIVATE_KEY_SIZE]) -> Self {
        SecretKey(SigningKey::from_bytes(&bytes))
    }
}

impl SecretKey {
    /// Generate a new keypair using a cryptographically secure RNG
    pub fn generate() -> Self {
        let mut buff = [0; PRIVATE_KEY_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(SigningKey::from_bytes(&buff))
    }

    /// Create a secret key from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly
    /// `PRIVATE_KEY_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, KeyError> {
        if data.len() != PRIVATE_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid secret key size, expected {}, got {}",
                PRIVATE_KEY_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; PRIVATE_KEY_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Raw key bytes
    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// The matching public key
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    /// Sign `message` with this key
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message).to_bytes())
    }
}

/// A detached Ed25519 signature over a put or remove request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub(crate) [u8; SIGNATURE_SIZE]);

impl Signature {
    /// Raw signature bytes
    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        self.0
    }
}

impl From<[u8; SIGNATURE_SIZE]> for Signature {
    fn from(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Signature(bytes)
    }
}
