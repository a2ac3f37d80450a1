//! Common types for the client SDK

use bytes::Bytes;
use chrono::{DateTime, Utc};
use manta_crypto::Entity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use uuid::Uuid;

/// User metadata stored with an object, ordered by key
pub type ObjectMetadata = BTreeMap<String, String>;

/// Headers sent along with an object
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectHeaders {
    /// Content type
    pub content_type: Option<String>,
    /// Additional headers
    pub headers: ObjectMetadata,
}

impl ObjectHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set content type
    pub fn with_content_type(mut self, ct: impl Into<String>) -> Self {
        self.content_type = Some(ct.into());
        self
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// An in-flight multipart upload
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultipartUpload {
    id: Uuid,
    path: String,
}

impl MultipartUpload {
    pub fn new(id: Uuid, path: impl Into<String>) -> Self {
        Self { id, path: path.into() }
    }

    /// Upload id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Path of the object being assembled
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// A part that has been uploaded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPart {
    /// 1-based part number
    pub part_number: u32,
    /// Fingerprint assigned by the store
    pub etag: String,
    /// Where the part lives remotely
    pub object_path: String,
}

/// Part number and fingerprint, as handed to `complete`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MultipartUploadTuple {
    pub part_number: u32,
    pub etag: String,
}

impl MultipartUploadTuple {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

impl From<&UploadPart> for MultipartUploadTuple {
    fn from(part: &UploadPart) -> Self {
        Self::new(part.part_number, part.etag.clone())
    }
}

impl From<UploadPart> for MultipartUploadTuple {
    fn from(part: UploadPart) -> Self {
        Self::new(part.part_number, part.etag)
    }
}

/// Object body handed to the store
pub enum ObjectBody {
    /// Bytes already in memory
    Bytes(Bytes),
    /// Streaming entity written by the store
    Entity(Box<dyn Entity + Send>),
}

impl ObjectBody {
    pub fn from_entity<E: Entity + Send + 'static>(entity: E) -> Self {
        Self::Entity(Box::new(entity))
    }

    /// Length when known up front
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Self::Bytes(b) => Some(b.len() as u64),
            Self::Entity(e) => e.content_length(),
        }
    }

    /// Write the whole body into memory
    pub fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            Self::Bytes(b) => Ok(b),
            Self::Entity(mut entity) => {
                let mut buf = Vec::with_capacity(entity.content_length().unwrap_or(0) as usize);
                entity.write_to(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "ObjectBody::Bytes({} bytes)", b.len()),
            Self::Entity(e) => write!(f, "ObjectBody::Entity(length={:?})", e.content_length()),
        }
    }
}

impl From<Bytes> for ObjectBody {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<Vec<u8>> for ObjectBody {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(v))
    }
}

impl From<&'static [u8]> for ObjectBody {
    fn from(s: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(s))
    }
}

/// Put object result
#[derive(Clone, Debug)]
pub struct PutObjectResult {
    /// ETag of the stored object
    pub etag: String,
    /// MD5 of the bytes received, hex encoded
    pub content_md5: Option<String>,
}

/// Head object result
#[derive(Clone, Debug)]
pub struct ObjectInfo {
    pub path: String,
    pub etag: String,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub headers: ObjectMetadata,
    pub is_directory: bool,
    pub last_modified: DateTime<Utc>,
}

/// One entry of a directory listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Full path of the entry
    pub path: String,
    pub is_directory: bool,
    /// Fingerprint, for objects
    pub etag: Option<String>,
    pub size: u64,
}

impl DirectoryEntry {
    /// Last path segment
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Job lifecycle state as reported by the store
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Other(String),
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Other(s) => s,
        }
    }

    /// Queued or running
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

impl From<String> for JobState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => Self::Queued,
            "running" => Self::Running,
            "done" => Self::Done,
            _ => Self::Other(s),
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of job phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhaseType {
    Map,
    Reduce,
}

/// A shell program run as one phase of a job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPhase {
    #[serde(rename = "type")]
    pub phase_type: JobPhaseType,
    pub exec: String,
}

impl JobPhase {
    pub fn reduce(exec: impl Into<String>) -> Self {
        Self {
            phase_type: JobPhaseType::Reduce,
            exec: exec.into(),
        }
    }
}

/// A remote compute job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteJob {
    pub id: Uuid,
    pub name: String,
    pub state: JobState,
    #[serde(default)]
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub phases: Vec<JobPhase>,
}
