//! Symmetric key material for client-side encryption

use crate::{CipherProfile, CryptoError, Result};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A symmetric key sized for a specific cipher profile
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    key: Vec<u8>,
}

impl SecretKey {
    /// Generate a new random key for the given profile
    pub fn generate(profile: CipherProfile) -> Self {
        Self::generate_with_rng(profile, &mut OsRng)
    }

    /// Generate a new random key using the supplied random source
    pub fn generate_with_rng<R: RngCore + CryptoRng>(profile: CipherProfile, rng: &mut R) -> Self {
        let mut key = vec![0u8; profile.key_length()];
        rng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a key from raw bytes, checking its length against the profile
    pub fn from_bytes(profile: CipherProfile, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != profile.key_length() {
            return Err(CryptoError::InvalidKey(format!(
                "{} requires a {} byte key, got {}",
                profile,
                profile.key_length(),
                bytes.len()
            )));
        }
        Ok(Self { key: bytes.to_vec() })
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.key.len()
    }

    /// Whether the key is empty
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    pub(crate) fn check_profile(&self, profile: CipherProfile) -> Result<()> {
        if self.key.len() != profile.key_length() {
            return Err(CryptoError::InvalidKey(format!(
                "{} requires a {} byte key, got {}",
                profile,
                profile.key_length(),
                self.key.len()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({} bytes)", self.key.len())
    }
}
