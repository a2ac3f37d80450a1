//! # Manta Crypto
//!
//! Client-side streaming encryption for objects stored in Manta.
//!
//! This crate provides:
//! - **Cipher profiles**: AES-GCM, AES-CTR and AES-CBC with 128 and 256 bit keys
//! - **Streaming encryption**: [`EncryptingEntity`] encrypts a plaintext entity while writing it
//! - **Streaming decryption**: [`StreamDecryptor`] with tag or HMAC verification
//! - **Digesting**: writers and entities that hash exactly the bytes written
//!
//! ## Example
//!
//! ```rust,ignore
//! use manta_crypto::{BytesEntity, CipherProfile, EncryptingEntity, Entity, SecretKey};
//!
//! let key = SecretKey::generate(CipherProfile::AesGcm128);
//! let mut entity = EncryptingEntity::new(BytesEntity::new(&b"Hello, World!"[..]), CipherProfile::AesGcm128, &key)?;
//!
//! let mut ciphertext = Vec::new();
//! entity.write_to(&mut ciphertext)?;
//!
//! let plaintext = manta_crypto::decrypt_to_vec(CipherProfile::AesGcm128, &key, entity.iv(), &ciphertext)?;
//! ```

pub mod cipher;
pub mod decrypting;
pub mod digesting;
pub mod encrypting;
pub mod entity;
pub mod error;
pub mod keys;
pub mod profile;

pub use cipher::{CipherContext, Direction};
pub use decrypting::{decrypt_stream, decrypt_to_vec, StreamDecryptor};
pub use digesting::{
    hmac_sha256, md5_hex, DigestedEntity, DigestingWriter, HmacSha256, HMAC_SHA256_ALGORITHM, HMAC_SHA256_SIZE,
};
pub use encrypting::{CipherState, EncryptingEntity};
pub use entity::{BytesEntity, Entity, ReaderEntity};
pub use error::{CryptoError, Result};
pub use keys::SecretKey;
pub use profile::{CipherMode, CipherProfile};

/// Default chunk size for streaming encryption (256 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
