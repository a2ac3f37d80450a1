//! Error types for the manta-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Invalid key format or length
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid IV / nonce
    #[error("invalid nonce: {0}")]
    InvalidNonce(String),

    /// Cipher identifier that does not name a supported profile
    #[error("unsupported cipher: {0}")]
    UnsupportedCipher(String),

    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed for reasons other than authentication
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Authentication tag or HMAC did not match the ciphertext
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Base64 decode error
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl CryptoError {
    /// Check if this error is an authentication failure
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}
