//! Incremental cipher state for streaming encryption and decryption
//!
//! A [`CipherContext`] is created once per encryption pass with a freshly
//! generated IV (or, for decryption, with the IV published next to the
//! ciphertext) and is then fed the data in order through
//! [`CipherContext::update`]. [`CipherContext::finalize`] consumes the context,
//! so a context can never be reused for a second stream.
//!
//! GCM is assembled from a 32-bit counter keystream and GHASH so that the tag
//! can be computed incrementally; the output is byte-compatible with the
//! one-shot `aes-gcm` implementation.

use crate::{
    keys::SecretKey,
    profile::{CipherMode, CipherProfile, AES_BLOCK_SIZE, GCM_TAG_SIZE},
    CryptoError, Result,
};
use aes::cipher::{BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes256, Block};
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;

/// Whether a context encrypts or decrypts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Streaming cipher state bound to one profile, key and IV
pub struct CipherContext {
    profile: CipherProfile,
    direction: Direction,
    iv: Vec<u8>,
    engine: Engine,
    bytes_in: u64,
}

impl CipherContext {
    /// Create an encrypting context with an IV drawn from the OS CSPRNG
    pub fn encryptor(profile: CipherProfile, key: &SecretKey) -> Result<Self> {
        Self::encryptor_with_rng(profile, key, &mut OsRng)
    }

    /// Create an encrypting context with an IV drawn from `rng`
    pub fn encryptor_with_rng<R: RngCore + CryptoRng>(
        profile: CipherProfile,
        key: &SecretKey,
        rng: &mut R,
    ) -> Result<Self> {
        let mut iv = vec![0u8; profile.iv_length()];
        rng.fill_bytes(&mut iv);
        Self::new(profile, key, iv, Direction::Encrypt)
    }

    /// Create a decrypting context from the IV that accompanied the ciphertext
    pub fn decryptor(profile: CipherProfile, key: &SecretKey, iv: &[u8]) -> Result<Self> {
        if iv.len() != profile.iv_length() {
            return Err(CryptoError::InvalidNonce(format!(
                "{} requires a {} byte IV, got {}",
                profile,
                profile.iv_length(),
                iv.len()
            )));
        }
        Self::new(profile, key, iv.to_vec(), Direction::Decrypt)
    }

    fn new(profile: CipherProfile, key: &SecretKey, iv: Vec<u8>, direction: Direction) -> Result<Self> {
        key.check_profile(profile)?;
        let engine = Engine::new(profile, key.as_bytes(), &iv, direction)?;
        Ok(Self {
            profile,
            direction,
            iv,
            engine,
            bytes_in: 0,
        })
    }

    /// The cipher profile
    pub fn profile(&self) -> CipherProfile {
        self.profile
    }

    /// Encrypt or decrypt
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The IV / nonce in use
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Number of input bytes consumed so far
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Process the next slice of input, appending any output to `out`.
    ///
    /// Block modes and decryption hold back trailing bytes (a partial block,
    /// or the bytes that may turn out to be the tag) until more input arrives
    /// or the context is finalized.
    pub fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.bytes_in += input.len() as u64;
        match (&mut self.engine, self.direction) {
            (Engine::Gcm(gcm), Direction::Encrypt) => gcm.encrypt(input, out),
            (Engine::Gcm(gcm), Direction::Decrypt) => gcm.decrypt(input, out),
            (Engine::Ctr(keystream), _) => {
                let start = out.len();
                out.extend_from_slice(input);
                keystream.apply(&mut out[start..]);
            }
            (Engine::Cbc(cbc), Direction::Encrypt) => cbc.encrypt(input, out),
            (Engine::Cbc(cbc), Direction::Decrypt) => cbc.decrypt(input, out),
        }
    }

    /// Finish the stream: emit the GCM tag or final CBC block when encrypting,
    /// verify the tag or strip padding when decrypting.
    pub fn finalize(self, out: &mut Vec<u8>) -> Result<()> {
        match (self.engine, self.direction) {
            (Engine::Gcm(gcm), Direction::Encrypt) => {
                out.extend_from_slice(&gcm.tag());
                Ok(())
            }
            (Engine::Gcm(gcm), Direction::Decrypt) => gcm.verify(),
            (Engine::Ctr(_), _) => Ok(()),
            (Engine::Cbc(cbc), Direction::Encrypt) => {
                cbc.pad(out);
                Ok(())
            }
            (Engine::Cbc(cbc), Direction::Decrypt) => cbc.unpad(out),
        }
    }
}

impl std::fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherContext")
            .field("profile", &self.profile)
            .field("direction", &self.direction)
            .field("iv", &hex::encode(&self.iv))
            .field("bytes_in", &self.bytes_in)
            .finish()
    }
}

enum Engine {
    Gcm(GcmState),
    Ctr(Keystream),
    Cbc(CbcState),
}

impl Engine {
    fn new(profile: CipherProfile, key: &[u8], iv: &[u8], direction: Direction) -> Result<Self> {
        match profile.mode() {
            CipherMode::Gcm => Ok(Self::Gcm(GcmState::new(key, iv)?)),
            CipherMode::Ctr => Ok(Self::Ctr(Keystream::ctr128(key, iv)?)),
            CipherMode::Cbc => Ok(Self::Cbc(CbcState::new(key, iv, direction)?)),
        }
    }
}

fn invalid_key(e: impl std::fmt::Display) -> CryptoError {
    CryptoError::InvalidKey(e.to_string())
}

fn unsupported_key_length(len: usize) -> CryptoError {
    CryptoError::InvalidKey(format!("unsupported AES key length: {} bytes", len))
}

enum Keystream {
    Aes128Ctr32(ctr::Ctr32BE<Aes128>),
    Aes256Ctr32(ctr::Ctr32BE<Aes256>),
    Aes128Ctr128(ctr::Ctr128BE<Aes128>),
    Aes256Ctr128(ctr::Ctr128BE<Aes256>),
}

impl Keystream {
    /// 32-bit big-endian counter, as used inside GCM
    fn ctr32(key: &[u8], counter_block: &[u8]) -> Result<Self> {
        match key.len() {
            16 => ctr::Ctr32BE::<Aes128>::new_from_slices(key, counter_block)
                .map(Self::Aes128Ctr32)
                .map_err(invalid_key),
            32 => ctr::Ctr32BE::<Aes256>::new_from_slices(key, counter_block)
                .map(Self::Aes256Ctr32)
                .map_err(invalid_key),
            n => Err(unsupported_key_length(n)),
        }
    }

    /// Full 128-bit big-endian counter
    fn ctr128(key: &[u8], iv: &[u8]) -> Result<Self> {
        match key.len() {
            16 => ctr::Ctr128BE::<Aes128>::new_from_slices(key, iv)
                .map(Self::Aes128Ctr128)
                .map_err(invalid_key),
            32 => ctr::Ctr128BE::<Aes256>::new_from_slices(key, iv)
                .map(Self::Aes256Ctr128)
                .map_err(invalid_key),
            n => Err(unsupported_key_length(n)),
        }
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128Ctr32(c) => c.apply_keystream(buf),
            Self::Aes256Ctr32(c) => c.apply_keystream(buf),
            Self::Aes128Ctr128(c) => c.apply_keystream(buf),
            Self::Aes256Ctr128(c) => c.apply_keystream(buf),
        }
    }
}

/// GHASH over arbitrarily split input; partial blocks are carried over so the
/// result matches hashing the concatenated stream.
struct GhashAccumulator {
    ghash: GHash,
    pending: Vec<u8>,
    length: u64,
}

impl GhashAccumulator {
    fn new(h: &Block) -> Self {
        Self {
            ghash: <GHash as KeyInit>::new(h),
            pending: Vec::with_capacity(AES_BLOCK_SIZE),
            length: 0,
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        self.length += data.len() as u64;

        if !self.pending.is_empty() {
            let take = (AES_BLOCK_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() < AES_BLOCK_SIZE {
                return;
            }
            self.ghash.update(&[ghash::Block::clone_from_slice(&self.pending)]);
            self.pending.clear();
        }

        let mut blocks = data.chunks_exact(AES_BLOCK_SIZE);
        for block in &mut blocks {
            self.ghash.update(&[ghash::Block::clone_from_slice(block)]);
        }
        self.pending.extend_from_slice(blocks.remainder());
    }

    fn finalize(mut self) -> [u8; GCM_TAG_SIZE] {
        if !self.pending.is_empty() {
            self.ghash.update_padded(&self.pending);
        }
        // No associated data: the upper 64 bits of the length block stay zero.
        let lengths = (u128::from(self.length) * 8).to_be_bytes();
        self.ghash.update(&[ghash::Block::clone_from_slice(&lengths)]);

        let mut out = [0u8; GCM_TAG_SIZE];
        out.copy_from_slice(self.ghash.finalize().as_slice());
        out
    }
}

struct GcmState {
    keystream: Keystream,
    ghash: GhashAccumulator,
    tag_mask: [u8; GCM_TAG_SIZE],
    tail: Vec<u8>,
}

impl GcmState {
    fn new(key: &[u8], nonce: &[u8]) -> Result<Self> {
        let mut h = Block::default();
        match key.len() {
            16 => Aes128::new_from_slice(key).map_err(invalid_key)?.encrypt_block(&mut h),
            32 => Aes256::new_from_slice(key).map_err(invalid_key)?.encrypt_block(&mut h),
            n => return Err(unsupported_key_length(n)),
        }

        // J0 = nonce || 0^31 || 1; its keystream block masks the tag and the
        // payload starts at J0 + 1.
        let mut j0 = [0u8; AES_BLOCK_SIZE];
        j0[..nonce.len()].copy_from_slice(nonce);
        j0[AES_BLOCK_SIZE - 1] = 1;

        let mut keystream = Keystream::ctr32(key, &j0)?;
        let mut tag_mask = [0u8; GCM_TAG_SIZE];
        keystream.apply(&mut tag_mask);

        Ok(Self {
            keystream,
            ghash: GhashAccumulator::new(&h),
            tag_mask,
            tail: Vec::new(),
        })
    }

    fn encrypt(&mut self, input: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(input);
        self.keystream.apply(&mut out[start..]);
        self.ghash.update(&out[start..]);
    }

    fn decrypt(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.tail.extend_from_slice(input);
        if self.tail.len() <= GCM_TAG_SIZE {
            return;
        }

        let release = self.tail.len() - GCM_TAG_SIZE;
        let start = out.len();
        out.extend_from_slice(&self.tail[..release]);
        self.tail.drain(..release);

        self.ghash.update(&out[start..]);
        self.keystream.apply(&mut out[start..]);
    }

    fn tag(self) -> [u8; GCM_TAG_SIZE] {
        let mut tag = self.ghash.finalize();
        for (t, m) in tag.iter_mut().zip(self.tag_mask.iter()) {
            *t ^= m;
        }
        tag
    }

    fn verify(mut self) -> Result<()> {
        let received = std::mem::take(&mut self.tail);
        if received.len() != GCM_TAG_SIZE {
            return Err(CryptoError::Integrity(format!(
                "ciphertext too short to hold a {} byte authentication tag",
                GCM_TAG_SIZE
            )));
        }

        let expected = self.tag();
        if bool::from(expected[..].ct_eq(&received[..])) {
            Ok(())
        } else {
            Err(CryptoError::Integrity("authentication tag mismatch".to_string()))
        }
    }
}

enum CbcCipher {
    Aes128Enc(cbc::Encryptor<Aes128>),
    Aes256Enc(cbc::Encryptor<Aes256>),
    Aes128Dec(cbc::Decryptor<Aes128>),
    Aes256Dec(cbc::Decryptor<Aes256>),
}

impl CbcCipher {
    fn process(&mut self, block: &mut Block) {
        match self {
            Self::Aes128Enc(c) => c.encrypt_block_mut(block),
            Self::Aes256Enc(c) => c.encrypt_block_mut(block),
            Self::Aes128Dec(c) => c.decrypt_block_mut(block),
            Self::Aes256Dec(c) => c.decrypt_block_mut(block),
        }
    }
}

struct CbcState {
    cipher: CbcCipher,
    pending: Vec<u8>,
}

impl CbcState {
    fn new(key: &[u8], iv: &[u8], direction: Direction) -> Result<Self> {
        let cipher = match (key.len(), direction) {
            (16, Direction::Encrypt) => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
                .map(CbcCipher::Aes128Enc)
                .map_err(invalid_key)?,
            (32, Direction::Encrypt) => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
                .map(CbcCipher::Aes256Enc)
                .map_err(invalid_key)?,
            (16, Direction::Decrypt) => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                .map(CbcCipher::Aes128Dec)
                .map_err(invalid_key)?,
            (32, Direction::Decrypt) => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                .map(CbcCipher::Aes256Dec)
                .map_err(invalid_key)?,
            (n, _) => return Err(unsupported_key_length(n)),
        };

        Ok(Self {
            cipher,
            pending: Vec::with_capacity(AES_BLOCK_SIZE * 2),
        })
    }

    fn process_blocks(&mut self, len: usize, out: &mut Vec<u8>) {
        for chunk in self.pending[..len].chunks_exact(AES_BLOCK_SIZE) {
            let mut block = Block::clone_from_slice(chunk);
            self.cipher.process(&mut block);
            out.extend_from_slice(&block);
        }
        self.pending.drain(..len);
    }

    fn encrypt(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(input);
        let full = self.pending.len() / AES_BLOCK_SIZE * AES_BLOCK_SIZE;
        self.process_blocks(full, out);
    }

    fn decrypt(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(input);
        if self.pending.len() <= AES_BLOCK_SIZE {
            return;
        }
        // The last block carries the padding, keep it until finalize.
        let full = (self.pending.len() - 1) / AES_BLOCK_SIZE * AES_BLOCK_SIZE;
        self.process_blocks(full, out);
    }

    fn pad(mut self, out: &mut Vec<u8>) {
        let pad = AES_BLOCK_SIZE - self.pending.len();
        self.pending.resize(AES_BLOCK_SIZE, pad as u8);
        self.process_blocks(AES_BLOCK_SIZE, out);
    }

    fn unpad(mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.pending.len() != AES_BLOCK_SIZE {
            return Err(CryptoError::Decryption(
                "ciphertext length is not a multiple of the block size".to_string(),
            ));
        }

        let mut block = Block::clone_from_slice(&self.pending);
        self.cipher.process(&mut block);

        let pad = block[AES_BLOCK_SIZE - 1] as usize;
        let valid = (1..=AES_BLOCK_SIZE).contains(&pad)
            && block[AES_BLOCK_SIZE - pad..].iter().all(|&b| b as usize == pad);
        if !valid {
            return Err(CryptoError::Decryption("invalid PKCS#7 padding".to_string()));
        }

        out.extend_from_slice(&block[..AES_BLOCK_SIZE - pad]);
        Ok(())
    }
}
