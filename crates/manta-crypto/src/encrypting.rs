//! Streaming encryption of entities
//!
//! [`EncryptingEntity`] wraps a plaintext [`Entity`] and produces ciphertext
//! as the wrapped entity writes. Plaintext is pushed through the cipher in
//! bounded chunks, so memory use does not depend on the object size. The
//! wrapped entity's length, when known, fixes the ciphertext length exactly.

use crate::cipher::CipherContext;
use crate::digesting::{hmac_sha256, DigestingWriter, HmacSha256, HMAC_SHA256_SIZE};
use crate::entity::Entity;
use crate::keys::SecretKey;
use crate::profile::CipherProfile;
use crate::{CryptoError, Result, DEFAULT_CHUNK_SIZE};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::{CryptoRng, RngCore};
use std::io::{self, Write};

/// The cipher parameters a reader needs to decrypt what was written
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherState {
    pub profile: CipherProfile,
    pub iv: Vec<u8>,
}

impl CipherState {
    /// IV encoded for transport in a header
    pub fn iv_base64(&self) -> String {
        BASE64.encode(&self.iv)
    }
}

/// Entity that encrypts a wrapped plaintext entity while writing it
pub struct EncryptingEntity<E> {
    wrapped: E,
    profile: CipherProfile,
    iv: Vec<u8>,
    context: Option<CipherContext>,
    hmac: Option<HmacSha256>,
    with_trailer: bool,
    chunk_size: usize,
    bytes_written: Option<u64>,
}

impl<E: Entity> EncryptingEntity<E> {
    /// Wrap `wrapped`, drawing a fresh IV from the OS CSPRNG
    pub fn new(wrapped: E, profile: CipherProfile, key: &SecretKey) -> Result<Self> {
        Self::from_context(wrapped, CipherContext::encryptor(profile, key)?)
    }

    /// Wrap `wrapped`, drawing the IV from `rng`
    pub fn with_rng<R: RngCore + CryptoRng>(
        wrapped: E,
        profile: CipherProfile,
        key: &SecretKey,
        rng: &mut R,
    ) -> Result<Self> {
        Self::from_context(wrapped, CipherContext::encryptor_with_rng(profile, key, rng)?)
    }

    fn from_context(wrapped: E, context: CipherContext) -> Result<Self> {
        Ok(Self {
            wrapped,
            profile: context.profile(),
            iv: context.iv().to_vec(),
            context: Some(context),
            hmac: None,
            with_trailer: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            bytes_written: None,
        })
    }

    /// Append an HMAC-SHA256 over the ciphertext.
    ///
    /// Only meaningful for profiles without their own authentication.
    pub fn with_hmac(mut self, key: &SecretKey) -> Result<Self> {
        if self.profile.is_aead() {
            return Err(CryptoError::Encryption(format!(
                "{} is already authenticated, an HMAC trailer is not used",
                self.profile
            )));
        }
        self.hmac = Some(hmac_sha256(key.as_bytes())?);
        self.with_trailer = true;
        Ok(self)
    }

    /// Maximum plaintext bytes pushed through the cipher at once
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn profile(&self) -> CipherProfile {
        self.profile
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Profile and IV to publish next to the ciphertext
    pub fn cipher_state(&self) -> CipherState {
        CipherState {
            profile: self.profile,
            iv: self.iv.clone(),
        }
    }

    pub fn has_hmac(&self) -> bool {
        self.with_trailer
    }

    /// Ciphertext bytes produced by the completed write, if any
    pub fn bytes_written(&self) -> Option<u64> {
        self.bytes_written
    }

    fn trailer_length(&self) -> u64 {
        if self.with_trailer {
            HMAC_SHA256_SIZE as u64
        } else {
            0
        }
    }
}

impl<E: Entity> Entity for EncryptingEntity<E> {
    fn content_length(&self) -> Option<u64> {
        self.wrapped
            .content_length()
            .map(|n| self.profile.ciphertext_length(n) + self.trailer_length())
    }

    fn write_to(&mut self, out: &mut dyn Write) -> io::Result<u64> {
        let context = self.context.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "encrypting entity is not repeatable")
        })?;

        let written = match self.hmac.take() {
            Some(mac) => {
                let mut writer = CipherWriter::new(context, DigestingWriter::new(&mut *out, mac), self.chunk_size);
                self.wrapped.write_to(&mut writer)?;
                let (digesting, written) = writer.finish()?;
                let (sink, tag) = digesting.finalize();
                sink.write_all(&tag)?;
                written + tag.len() as u64
            }
            None => {
                let mut writer = CipherWriter::new(context, &mut *out, self.chunk_size);
                self.wrapped.write_to(&mut writer)?;
                let (_, written) = writer.finish()?;
                written
            }
        };

        self.bytes_written = Some(written);
        Ok(written)
    }
}

/// Sink adapter feeding plaintext through a cipher context
struct CipherWriter<W> {
    context: CipherContext,
    inner: W,
    buffer: Vec<u8>,
    chunk_size: usize,
    written: u64,
}

impl<W: Write> CipherWriter<W> {
    fn new(context: CipherContext, inner: W, chunk_size: usize) -> Self {
        Self {
            context,
            inner,
            buffer: Vec::with_capacity(chunk_size + 2 * crate::profile::AES_BLOCK_SIZE),
            chunk_size,
            written: 0,
        }
    }

    /// Emit the final cipher output, returning the sink and the ciphertext byte count
    fn finish(self) -> io::Result<(W, u64)> {
        let Self {
            context,
            mut inner,
            mut buffer,
            written,
            ..
        } = self;

        buffer.clear();
        context
            .finalize(&mut buffer)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        inner.write_all(&buffer)?;
        inner.flush()?;
        Ok((inner, written + buffer.len() as u64))
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let take = buf.len().min(self.chunk_size);
        self.buffer.clear();
        self.context.update(&buf[..take], &mut self.buffer);
        self.inner.write_all(&self.buffer)?;
        self.written += self.buffer.len() as u64;
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
