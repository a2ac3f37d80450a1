//! Remote object store contract
//!
//! The multipart manager only needs a handful of path-addressed object,
//! directory and job primitives. Anything that speaks them (an HTTP client,
//! [`MemoryStore`](crate::MemoryStore)) can back an upload.

use crate::types::{DirectoryEntry, JobPhase, ObjectBody, ObjectHeaders, ObjectInfo, PutObjectResult, RemoteJob};
use crate::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use uuid::Uuid;

/// Path-addressed object store with directories and compute jobs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object, replacing any existing one at `path`
    async fn put_object(&self, path: &str, body: ObjectBody, headers: &ObjectHeaders) -> Result<PutObjectResult>;

    /// Object or directory metadata
    async fn head_object(&self, path: &str) -> Result<ObjectInfo>;

    /// Stream an object's content
    async fn get_object_stream(&self, path: &str) -> Result<BoxStream<'static, Result<Bytes>>>;

    /// Create a directory, with its parents when `recursive`
    async fn put_directory(&self, path: &str, recursive: bool) -> Result<()>;

    /// Stream the entries of a directory
    async fn list_directory(&self, path: &str) -> Result<BoxStream<'static, Result<DirectoryEntry>>>;

    /// Delete a path and everything under it
    async fn delete_recursive(&self, path: &str) -> Result<()>;

    /// Submit a job, returning its id
    async fn submit_job(&self, name: &str, phases: Vec<JobPhase>) -> Result<Uuid>;

    /// Cancel a queued or running job
    async fn cancel_job(&self, id: Uuid) -> Result<()>;

    /// Fetch a job by id
    async fn get_job(&self, id: Uuid) -> Result<RemoteJob>;

    /// Stream jobs with the given name
    async fn list_jobs_by_name(&self, name: &str) -> Result<BoxStream<'static, Result<RemoteJob>>>;

    /// Read a whole object into memory
    async fn get_object(&self, path: &str) -> Result<Bytes> {
        let stream = self.get_object_stream(path).await?;
        let buf = stream
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await?;
        Ok(buf.freeze())
    }
}
