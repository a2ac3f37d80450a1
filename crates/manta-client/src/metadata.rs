//! Upload namespace layout and the persisted metadata record

use crate::store::ObjectStore;
use crate::types::{ObjectHeaders, ObjectMetadata};
use crate::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Reserved directory, relative to the home directory, holding every upload namespace
pub const MULTIPART_DIRECTORY: &str = "stor/.multipart-6439b444-9041-11e6-9be2-9f622f483d01";

/// Name of the record file inside an upload namespace
pub const METADATA_FILE: &str = "metadata.json";

/// Record describing an in-flight upload, stored as `metadata.json`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartMetadata {
    /// Final object path
    pub path: String,
    /// Metadata to attach to the final object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_metadata: Option<ObjectMetadata>,
    /// Content type of the final object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Completion job, once submitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

impl MultipartMetadata {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_object_metadata(mut self, metadata: Option<ObjectMetadata>) -> Self {
        self.object_metadata = metadata.filter(|m| !m.is_empty());
        self
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }
}

/// Paths of upload namespaces under one home directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartPaths {
    root: String,
}

impl MultipartPaths {
    pub fn new(home: &str) -> Self {
        Self {
            root: format!("{}/{}", home.trim_end_matches('/'), MULTIPART_DIRECTORY),
        }
    }

    /// The reserved directory holding all namespaces
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Namespace directory of one upload
    pub fn upload_dir(&self, id: Uuid) -> String {
        format!("{}/{}", self.root, id)
    }

    pub fn metadata(&self, id: Uuid) -> String {
        format!("{}/{}/{}", self.root, id, METADATA_FILE)
    }

    pub fn part(&self, id: Uuid, part_number: u32) -> String {
        format!("{}/{}/{}", self.root, id, part_number)
    }
}

/// Write the record for an upload, replacing any previous one
pub async fn write_metadata<S: ObjectStore + ?Sized>(
    store: &S,
    path: &str,
    metadata: &MultipartMetadata,
) -> Result<()> {
    let json = serde_json::to_vec(metadata)?;
    let headers = ObjectHeaders::new().with_content_type("application/json");
    store.put_object(path, Bytes::from(json).into(), &headers).await?;
    debug!(path = %path, job_id = ?metadata.job_id, "Wrote multipart metadata");
    Ok(())
}

/// Read the record for an upload
pub async fn read_metadata<S: ObjectStore + ?Sized>(store: &S, path: &str) -> Result<MultipartMetadata> {
    let data = store.get_object(path).await?;
    Ok(serde_json::from_slice(&data)?)
}
