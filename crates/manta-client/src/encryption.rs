//! Client-side encryption support
//!
//! Objects are encrypted while they are streamed to the store. The cipher,
//! IV, HMAC type and key id travel as object headers so a reader holding the
//! same key can rebuild the decryptor from `head_object` alone. Objects
//! assembled from encrypted multipart parts list every part's IV and
//! ciphertext length instead of a single IV.

use crate::error::{ClientError, ErrorContext};
use crate::store::ObjectStore;
use crate::types::{ObjectBody, ObjectHeaders, ObjectInfo, ObjectMetadata, PutObjectResult};
use crate::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures::TryStreamExt;
use manta_crypto::{
    CipherProfile, CipherState, EncryptingEntity, Entity, SecretKey, StreamDecryptor, HMAC_SHA256_ALGORITHM,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Header naming the cipher algorithm
pub const ENCRYPT_CIPHER_HEADER: &str = "m-encrypt-cipher";

/// Header carrying the base64 IV
pub const ENCRYPT_IV_HEADER: &str = "m-encrypt-iv";

/// Header naming the HMAC algorithm of the ciphertext trailer
pub const ENCRYPT_HMAC_TYPE_HEADER: &str = "m-encrypt-hmac-type";

/// Header naming the key used
pub const ENCRYPT_KEY_ID_HEADER: &str = "m-encrypt-key-id";

/// Header on an assembled object listing each part's base64 IV, in order
pub const ENCRYPT_PART_IVS_HEADER: &str = "m-encrypt-part-ivs";

/// Header on an assembled object listing each part's ciphertext length
pub const ENCRYPT_PART_LENGTHS_HEADER: &str = "m-encrypt-part-lengths";

/// Configuration for client-side encryption
#[derive(Clone)]
pub struct EncryptionConfig {
    profile: CipherProfile,
    key: SecretKey,
    key_id: String,
    hmac_key: Option<SecretKey>,
}

impl EncryptionConfig {
    /// Create a config, checking the key against the profile
    pub fn new(profile: CipherProfile, key: SecretKey, key_id: impl Into<String>) -> Result<Self> {
        if key.len() != profile.key_length() {
            return Err(ClientError::Configuration(format!(
                "{} requires a {} byte key, got {}",
                profile,
                profile.key_length(),
                key.len()
            )));
        }
        Ok(Self {
            profile,
            key,
            key_id: key_id.into(),
            hmac_key: None,
        })
    }

    /// Create with a new random key
    pub fn generate(profile: CipherProfile, key_id: impl Into<String>) -> Self {
        Self {
            profile,
            key: SecretKey::generate(profile),
            key_id: key_id.into(),
            hmac_key: None,
        }
    }

    /// Authenticate ciphertext with an HMAC-SHA256 trailer.
    ///
    /// Only valid for unauthenticated profiles.
    pub fn with_hmac(mut self, key: SecretKey) -> Result<Self> {
        if self.profile.is_aead() {
            return Err(ClientError::Configuration(format!(
                "{} already authenticates ciphertext, HMAC is not supported",
                self.profile
            )));
        }
        self.hmac_key = Some(key);
        Ok(self)
    }

    pub fn profile(&self) -> CipherProfile {
        self.profile
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn has_hmac(&self) -> bool {
        self.hmac_key.is_some()
    }

    /// Wrap `source` so it is encrypted with a fresh IV when written
    pub fn encrypting_entity<E: Entity>(&self, source: E) -> Result<EncryptingEntity<E>> {
        let entity = EncryptingEntity::new(source, self.profile, &self.key)?;
        Ok(match &self.hmac_key {
            Some(hmac_key) => entity.with_hmac(hmac_key)?,
            None => entity,
        })
    }

    /// Add the headers describing `state` to `headers`
    pub fn headers(&self, state: &CipherState, headers: ObjectHeaders) -> ObjectHeaders {
        let headers = headers
            .with_header(ENCRYPT_CIPHER_HEADER, state.profile.algorithm_id())
            .with_header(ENCRYPT_IV_HEADER, state.iv_base64())
            .with_header(ENCRYPT_KEY_ID_HEADER, self.key_id.clone());
        if self.has_hmac() {
            headers.with_header(ENCRYPT_HMAC_TYPE_HEADER, HMAC_SHA256_ALGORITHM)
        } else {
            headers
        }
    }

    /// Build a decryptor from the headers of a stored object.
    ///
    /// Objects assembled from encrypted parts carry one IV and ciphertext
    /// length per part and are decrypted one segment at a time.
    pub fn decryptor_for(&self, info: &ObjectInfo) -> Result<SegmentedDecryptor<'_>> {
        let header = |name: &str| {
            info.headers
                .get(name)
                .ok_or_else(|| ClientError::Configuration(format!("{} has no {} header", info.path, name)))
        };

        let profile = CipherProfile::from_algorithm_id(header(ENCRYPT_CIPHER_HEADER)?)?;
        if profile != self.profile {
            return Err(ClientError::Configuration(format!(
                "{} was encrypted with {}, configured cipher is {}",
                info.path, profile, self.profile
            )));
        }

        if let Some(key_id) = info.headers.get(ENCRYPT_KEY_ID_HEADER) {
            if key_id != &self.key_id {
                return Err(ClientError::Configuration(format!(
                    "{} was encrypted with key {}, configured key is {}",
                    info.path, key_id, self.key_id
                )));
            }
        }

        let authenticated = match (info.headers.get(ENCRYPT_HMAC_TYPE_HEADER), &self.hmac_key) {
            (None, _) => false,
            (Some(kind), Some(_)) if kind.eq_ignore_ascii_case(HMAC_SHA256_ALGORITHM) => true,
            (Some(kind), Some(_)) => {
                return Err(ClientError::Configuration(format!(
                    "unsupported HMAC type {} on {}",
                    kind, info.path
                )))
            }
            (Some(_), None) => {
                return Err(ClientError::Configuration(format!(
                    "{} is authenticated with an HMAC but no HMAC key is configured",
                    info.path
                )))
            }
        };

        let segments = match info.headers.get(ENCRYPT_PART_IVS_HEADER) {
            Some(ivs) => parse_segments(&info.path, ivs, header(ENCRYPT_PART_LENGTHS_HEADER)?)?,
            None => vec![CipherSegment {
                iv: decode_iv(&info.path, header(ENCRYPT_IV_HEADER)?)?,
                length: info.content_length,
            }],
        };

        let total: u64 = segments.iter().map(|s| s.length).sum();
        if total != info.content_length {
            return Err(ClientError::Configuration(format!(
                "{} holds {} bytes but its segments add up to {}",
                info.path, info.content_length, total
            )));
        }

        Ok(SegmentedDecryptor {
            config: self,
            authenticated,
            pending: segments.into(),
            current: None,
        })
    }
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("profile", &self.profile)
            .field("key_id", &self.key_id)
            .field("hmac", &self.has_hmac())
            .finish_non_exhaustive()
    }
}

/// One independently encrypted run of ciphertext
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherSegment {
    pub iv: Vec<u8>,
    /// Ciphertext length, including any tag or HMAC trailer
    pub length: u64,
}

/// Decrypts an object made of consecutive encrypted segments.
///
/// A plain encrypted object is a single segment. Each segment is finished,
/// and its tag or HMAC checked, as soon as its last byte arrives.
pub struct SegmentedDecryptor<'a> {
    config: &'a EncryptionConfig,
    authenticated: bool,
    pending: VecDeque<CipherSegment>,
    current: Option<(StreamDecryptor, u64)>,
}

impl SegmentedDecryptor<'_> {
    /// Segments not started yet
    pub fn pending_segments(&self) -> usize {
        self.pending.len()
    }

    /// Feed the next ciphertext slice, appending released plaintext to `out`
    pub fn update(&mut self, mut ciphertext: &[u8], out: &mut Vec<u8>) -> Result<()> {
        while !ciphertext.is_empty() {
            if self.current.is_none() {
                self.start_next(out)?;
                continue;
            }
            if let Some((decryptor, remaining)) = self.current.as_mut() {
                let take = (*remaining).min(ciphertext.len() as u64) as usize;
                decryptor.update(&ciphertext[..take], out);
                *remaining -= take as u64;
                ciphertext = &ciphertext[take..];
            }
            if matches!(self.current, Some((_, 0))) {
                if let Some((decryptor, _)) = self.current.take() {
                    decryptor.finish(out)?;
                }
            }
        }
        Ok(())
    }

    /// Check that every segment was seen in full
    pub fn finish(mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.current.is_some() {
            return Err(ClientError::Integrity("ciphertext ends inside a segment".to_string()));
        }
        while let Some(segment) = self.pending.pop_front() {
            if segment.length != 0 {
                return Err(ClientError::Integrity("ciphertext is missing segments".to_string()));
            }
            self.open(&segment)?.finish(out)?;
        }
        Ok(())
    }

    fn start_next(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let segment = self
            .pending
            .pop_front()
            .ok_or_else(|| ClientError::Integrity("ciphertext is longer than its segments".to_string()))?;
        let decryptor = self.open(&segment)?;
        if segment.length == 0 {
            decryptor.finish(out)?;
        } else {
            self.current = Some((decryptor, segment.length));
        }
        Ok(())
    }

    fn open(&self, segment: &CipherSegment) -> Result<StreamDecryptor> {
        let decryptor = StreamDecryptor::new(self.config.profile, &self.config.key, &segment.iv)?;
        match &self.config.hmac_key {
            Some(hmac_key) if self.authenticated => Ok(decryptor.with_hmac(hmac_key)?),
            _ => Ok(decryptor),
        }
    }
}

fn decode_iv(path: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| ClientError::Configuration(format!("invalid IV header on {}: {}", path, e)))
}

fn parse_segments(path: &str, ivs: &str, lengths: &str) -> Result<Vec<CipherSegment>> {
    let ivs: Vec<&str> = ivs.split(',').collect();
    let lengths: Vec<&str> = lengths.split(',').collect();
    if ivs.len() != lengths.len() {
        return Err(ClientError::Configuration(format!(
            "{} lists {} part IVs but {} part lengths",
            path,
            ivs.len(),
            lengths.len()
        )));
    }

    ivs.into_iter()
        .zip(lengths)
        .map(|(iv, length)| {
            let length = length.trim().parse::<u64>().map_err(|_| {
                ClientError::Configuration(format!("invalid part length {:?} on {}", length, path))
            })?;
            Ok(CipherSegment {
                iv: decode_iv(path, iv.trim())?,
                length,
            })
        })
        .collect()
}

/// Headers that let a reader decrypt an object assembled from `parts`.
///
/// `parts` must be in assembly order. Returns `None` when no part is
/// encrypted. Every part has to be encrypted the same way, since the
/// assembled object is described by a single cipher, key id and HMAC type.
pub fn assembled_cipher_headers(parts: &[ObjectInfo]) -> Result<Option<ObjectMetadata>> {
    let encrypted = parts
        .iter()
        .filter(|p| p.headers.contains_key(ENCRYPT_CIPHER_HEADER))
        .count();
    if encrypted == 0 {
        return Ok(None);
    }
    if encrypted != parts.len() {
        return Err(ClientError::protocol(
            "Multipart upload mixes encrypted and unencrypted parts",
            ErrorContext::new()
                .with("encrypted_parts", encrypted)
                .with("parts", parts.len()),
        ));
    }

    let shared = [ENCRYPT_CIPHER_HEADER, ENCRYPT_KEY_ID_HEADER, ENCRYPT_HMAC_TYPE_HEADER];
    let first = &parts[0];
    let mut ivs = Vec::with_capacity(parts.len());
    let mut lengths = Vec::with_capacity(parts.len());
    for part in parts {
        for name in shared {
            if part.headers.get(name) != first.headers.get(name) {
                return Err(ClientError::protocol(
                    "Encrypted parts of multipart upload were encrypted differently",
                    ErrorContext::new().with("header", name).with("path", &part.path),
                ));
            }
        }
        let iv = part.headers.get(ENCRYPT_IV_HEADER).ok_or_else(|| {
            ClientError::protocol(
                "Encrypted part has no IV header",
                ErrorContext::new().with("path", &part.path),
            )
        })?;
        ivs.push(iv.as_str());
        lengths.push(part.content_length.to_string());
    }

    let mut headers: ObjectMetadata = shared
        .into_iter()
        .filter_map(|name| first.headers.get(name).map(|v| (name.to_string(), v.clone())))
        .collect();
    headers.insert(ENCRYPT_PART_IVS_HEADER.to_string(), ivs.join(","));
    headers.insert(ENCRYPT_PART_LENGTHS_HEADER.to_string(), lengths.join(","));
    Ok(Some(headers))
}

/// Object store access with client-side encryption
pub struct EncryptedClient<S: ObjectStore> {
    inner: Arc<S>,
    encryption: EncryptionConfig,
}

impl<S: ObjectStore> EncryptedClient<S> {
    pub fn new(inner: Arc<S>, encryption: EncryptionConfig) -> Self {
        Self { inner, encryption }
    }

    /// Get the underlying store
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    pub fn encryption_config(&self) -> &EncryptionConfig {
        &self.encryption
    }

    /// Encrypt `source` while uploading it to `path`
    #[instrument(skip(self, source, headers))]
    pub async fn put_object_encrypted_with_headers<E: Entity + Send + 'static>(
        &self,
        path: &str,
        source: E,
        headers: ObjectHeaders,
    ) -> Result<PutObjectResult> {
        let entity = self.encryption.encrypting_entity(source)?;
        let headers = self.encryption.headers(&entity.cipher_state(), headers);
        debug!(path = %path, cipher = %self.encryption.profile(), "Uploading encrypted object");
        self.inner.put_object(path, ObjectBody::from_entity(entity), &headers).await
    }

    pub async fn put_object_encrypted<E: Entity + Send + 'static>(
        &self,
        path: &str,
        source: E,
    ) -> Result<PutObjectResult> {
        self.put_object_encrypted_with_headers(path, source, ObjectHeaders::new()).await
    }

    /// Download and decrypt an object.
    ///
    /// Ciphertext is decrypted chunk by chunk as it arrives; authentication
    /// failures surface as [`ClientError::Integrity`].
    #[instrument(skip(self))]
    pub async fn get_object_decrypted(&self, path: &str) -> Result<Bytes> {
        let info = self.inner.head_object(path).await?;
        let mut decryptor = self.encryption.decryptor_for(&info)?;

        let mut plaintext = Vec::with_capacity(info.content_length as usize);
        let mut chunks = self.inner.get_object_stream(path).await?;
        while let Some(chunk) = chunks.try_next().await? {
            decryptor.update(&chunk, &mut plaintext)?;
        }
        decryptor.finish(&mut plaintext)?;

        debug!(path = %path, bytes = plaintext.len(), "Decrypted object");
        Ok(Bytes::from(plaintext))
    }
}
