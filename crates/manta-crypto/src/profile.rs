//! Cipher profiles supported for client-side encryption
//!
//! A profile is the static description of a symmetric cipher mode: how long
//! its key and IV are, whether it authenticates, and how the ciphertext length
//! relates to the plaintext length.

use crate::{CryptoError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// GCM authentication tag size in bytes (128 bits)
pub const GCM_TAG_SIZE: usize = 16;

/// GCM nonce size in bytes (96 bits)
pub const GCM_NONCE_SIZE: usize = 12;

/// Supported cipher profiles
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CipherProfile {
    /// AES-128 in Galois/Counter mode
    #[default]
    AesGcm128,
    /// AES-256 in Galois/Counter mode
    AesGcm256,
    /// AES-128 in counter mode, no authentication
    AesCtr128,
    /// AES-256 in counter mode, no authentication
    AesCtr256,
    /// AES-128 in CBC mode with PKCS#7 padding, no authentication
    AesCbc128,
    /// AES-256 in CBC mode with PKCS#7 padding, no authentication
    AesCbc256,
}

/// Block cipher mode of a profile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherMode {
    Gcm,
    Ctr,
    Cbc,
}

impl CipherProfile {
    /// Every supported profile
    pub const ALL: [CipherProfile; 6] = [
        Self::AesGcm128,
        Self::AesGcm256,
        Self::AesCtr128,
        Self::AesCtr256,
        Self::AesCbc128,
        Self::AesCbc256,
    ];

    /// Get the algorithm identifier string
    pub fn algorithm_id(&self) -> &'static str {
        match self {
            Self::AesGcm128 => "AES128/GCM/NoPadding",
            Self::AesGcm256 => "AES256/GCM/NoPadding",
            Self::AesCtr128 => "AES128/CTR/NoPadding",
            Self::AesCtr256 => "AES256/CTR/NoPadding",
            Self::AesCbc128 => "AES128/CBC/PKCS5Padding",
            Self::AesCbc256 => "AES256/CBC/PKCS5Padding",
        }
    }

    /// Look up a profile by its algorithm identifier (case-insensitive)
    pub fn from_algorithm_id(id: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.algorithm_id().eq_ignore_ascii_case(id))
            .ok_or_else(|| CryptoError::UnsupportedCipher(id.to_string()))
    }

    /// Block cipher mode
    pub fn mode(&self) -> CipherMode {
        match self {
            Self::AesGcm128 | Self::AesGcm256 => CipherMode::Gcm,
            Self::AesCtr128 | Self::AesCtr256 => CipherMode::Ctr,
            Self::AesCbc128 | Self::AesCbc256 => CipherMode::Cbc,
        }
    }

    /// Key length in bytes
    pub fn key_length(&self) -> usize {
        match self {
            Self::AesGcm128 | Self::AesCtr128 | Self::AesCbc128 => 16,
            Self::AesGcm256 | Self::AesCtr256 | Self::AesCbc256 => 32,
        }
    }

    /// IV / nonce length in bytes
    pub fn iv_length(&self) -> usize {
        match self.mode() {
            CipherMode::Gcm => GCM_NONCE_SIZE,
            CipherMode::Ctr | CipherMode::Cbc => AES_BLOCK_SIZE,
        }
    }

    /// Authentication tag length in bytes (zero when not authenticated)
    pub fn tag_length(&self) -> usize {
        match self.mode() {
            CipherMode::Gcm => GCM_TAG_SIZE,
            CipherMode::Ctr | CipherMode::Cbc => 0,
        }
    }

    /// Whether the profile is an AEAD mode
    pub fn is_aead(&self) -> bool {
        self.mode() == CipherMode::Gcm
    }

    /// Underlying block size in bytes
    pub fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    /// Whether ciphertext is produced byte-for-byte as plaintext arrives
    /// (as opposed to whole blocks only)
    pub fn is_streaming(&self) -> bool {
        self.mode() != CipherMode::Cbc
    }

    /// Exact ciphertext length for a plaintext of `plaintext_length` bytes
    pub fn ciphertext_length(&self, plaintext_length: u64) -> u64 {
        match self.mode() {
            CipherMode::Gcm => plaintext_length + GCM_TAG_SIZE as u64,
            CipherMode::Ctr => plaintext_length,
            CipherMode::Cbc => {
                let block = AES_BLOCK_SIZE as u64;
                (plaintext_length / block + 1) * block
            }
        }
    }
}

impl fmt::Display for CipherProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.algorithm_id())
    }
}

impl FromStr for CipherProfile {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_algorithm_id(s)
    }
}

impl TryFrom<String> for CipherProfile {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_algorithm_id(&value)
    }
}

impl From<CipherProfile> for String {
    fn from(profile: CipherProfile) -> Self {
        profile.algorithm_id().to_string()
    }
}
