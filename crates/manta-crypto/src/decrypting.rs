//! Streaming decryption
//!
//! Plaintext is released as ciphertext arrives. Callers must discard what was
//! released if [`StreamDecryptor::finish`] fails, since authentication is
//! only decided once the whole stream has been seen.

use crate::cipher::CipherContext;
use crate::digesting::{hmac_sha256, HmacSha256, HMAC_SHA256_SIZE};
use crate::keys::SecretKey;
use crate::profile::CipherProfile;
use crate::{CryptoError, Result, DEFAULT_CHUNK_SIZE};
use hmac::Mac;
use std::io::{Read, Write};

/// Incremental decryptor for one ciphertext stream
pub struct StreamDecryptor {
    context: CipherContext,
    hmac: Option<HmacSha256>,
    trailer: Vec<u8>,
}

impl StreamDecryptor {
    pub fn new(profile: CipherProfile, key: &SecretKey, iv: &[u8]) -> Result<Self> {
        Ok(Self {
            context: CipherContext::decryptor(profile, key, iv)?,
            hmac: None,
            trailer: Vec::new(),
        })
    }

    /// Expect and verify an HMAC-SHA256 trailer after the ciphertext
    pub fn with_hmac(mut self, key: &SecretKey) -> Result<Self> {
        if self.context.profile().is_aead() {
            return Err(CryptoError::Decryption(format!(
                "{} does not carry an HMAC trailer",
                self.context.profile()
            )));
        }
        self.hmac = Some(hmac_sha256(key.as_bytes())?);
        Ok(self)
    }

    pub fn profile(&self) -> CipherProfile {
        self.context.profile()
    }

    /// Feed the next ciphertext slice, appending released plaintext to `out`
    pub fn update(&mut self, ciphertext: &[u8], out: &mut Vec<u8>) {
        let Some(mac) = self.hmac.as_mut() else {
            self.context.update(ciphertext, out);
            return;
        };

        self.trailer.extend_from_slice(ciphertext);
        if self.trailer.len() > HMAC_SHA256_SIZE {
            let release = self.trailer.len() - HMAC_SHA256_SIZE;
            let body: Vec<u8> = self.trailer.drain(..release).collect();
            mac.update(&body);
            self.context.update(&body, out);
        }
    }

    /// Verify the HMAC trailer or tag and emit any held-back plaintext
    pub fn finish(self, out: &mut Vec<u8>) -> Result<()> {
        if let Some(mac) = self.hmac {
            if self.trailer.len() != HMAC_SHA256_SIZE {
                return Err(CryptoError::Integrity(
                    "ciphertext is shorter than its HMAC trailer".to_string(),
                ));
            }
            mac.verify_slice(&self.trailer)
                .map_err(|_| CryptoError::Integrity("HMAC does not match ciphertext".to_string()))?;
        }
        self.context.finalize(out)
    }
}

/// Decrypt everything from `reader` into `writer`, returning the plaintext length
pub fn decrypt_stream<R: Read, W: Write>(
    mut decryptor: StreamDecryptor,
    mut reader: R,
    mut writer: W,
) -> Result<u64> {
    let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];
    let mut out = Vec::with_capacity(DEFAULT_CHUNK_SIZE);
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.clear();
        decryptor.update(&buf[..n], &mut out);
        writer.write_all(&out)?;
        total += out.len() as u64;
    }

    out.clear();
    decryptor.finish(&mut out)?;
    writer.write_all(&out)?;
    writer.flush()?;
    Ok(total + out.len() as u64)
}

/// Decrypt an in-memory ciphertext
pub fn decrypt_to_vec(profile: CipherProfile, key: &SecretKey, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut decryptor = StreamDecryptor::new(profile, key, iv)?;
    let mut out = Vec::with_capacity(ciphertext.len());
    decryptor.update(ciphertext, &mut out);
    decryptor.finish(&mut out)?;
    Ok(out)
}
