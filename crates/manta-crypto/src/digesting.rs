//! Digesting writers and entities
//!
//! Digests are computed over the bytes that actually reach the sink. For
//! memory-backed entities the whole buffer is digested in one pass instead
//! of being observed through the writer.

use crate::entity::Entity;
use crate::{CryptoError, Result};
use digest::{FixedOutput, Output, Update};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::Sha256;
use std::io::{self, Write};

/// HMAC-SHA256 used for non-AEAD ciphertext trailers
pub type HmacSha256 = Hmac<Sha256>;

/// Identifier advertised for the HMAC trailer
pub const HMAC_SHA256_ALGORITHM: &str = "HmacSHA256";

/// HMAC-SHA256 output size in bytes
pub const HMAC_SHA256_SIZE: usize = 32;

/// Create an HMAC-SHA256 instance keyed with `key`
pub fn hmac_sha256(key: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// MD5 of `data` as lowercase hex
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::default();
    Update::update(&mut hasher, data);
    hex::encode(hasher.finalize_fixed())
}

/// Writer that forwards to an inner sink and digests everything written
pub struct DigestingWriter<W, D> {
    inner: W,
    digest: D,
    bytes_written: u64,
}

impl<W: Write, D: Update> DigestingWriter<W, D> {
    pub fn new(inner: W, digest: D) -> Self {
        Self {
            inner,
            digest,
            bytes_written: 0,
        }
    }

    /// Bytes forwarded so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Give back the sink and the running digest without finalizing it
    pub fn into_parts(self) -> (W, D) {
        (self.inner, self.digest)
    }
}

impl<W: Write, D: Update + FixedOutput> DigestingWriter<W, D> {
    /// Finish the digest, returning the sink alongside it
    pub fn finalize(self) -> (W, Output<D>) {
        (self.inner, self.digest.finalize_fixed())
    }
}

impl<W: Write, D: Update> Write for DigestingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        Update::update(&mut self.digest, &buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Lets a writer update a digest it does not own
struct DigestRef<'a, D>(&'a mut D);

impl<D: Update> Update for DigestRef<'_, D> {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }
}

/// Entity wrapper that digests the wrapped entity's bytes as they are written
pub struct DigestedEntity<E, D> {
    wrapped: E,
    digest: D,
}

impl<E: Entity, D: Update + FixedOutput> DigestedEntity<E, D> {
    pub fn new(wrapped: E, digest: D) -> Self {
        Self { wrapped, digest }
    }

    /// Finish the digest over everything written so far
    pub fn finalize(self) -> Output<D> {
        self.digest.finalize_fixed()
    }

    pub fn into_inner(self) -> E {
        self.wrapped
    }
}

impl<E: Entity, D: Update> Entity for DigestedEntity<E, D> {
    fn content_length(&self) -> Option<u64> {
        self.wrapped.content_length()
    }

    fn write_to(&mut self, out: &mut dyn Write) -> io::Result<u64> {
        if let Some(buf) = self.wrapped.backing_buffer() {
            Update::update(&mut self.digest, buf);
            return self.wrapped.write_to(out);
        }

        let mut writer = DigestingWriter::new(out, DigestRef(&mut self.digest));
        self.wrapped.write_to(&mut writer)
    }

    fn backing_buffer(&self) -> Option<&[u8]> {
        self.wrapped.backing_buffer()
    }

    fn is_repeatable(&self) -> bool {
        false
    }
}
