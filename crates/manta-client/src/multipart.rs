//! Multipart uploads assembled by remote jobs
//!
//! Parts are stored as plain objects inside a per-upload namespace directory
//! next to a `metadata.json` record. Completing an upload submits a job that
//! concatenates the parts into the final object and then deletes the
//! namespace, so the upload outlives the client that started it and its
//! status has to be reconstructed from what is left on the remote side.

use crate::config::Config;
use crate::encryption::{assembled_cipher_headers, EncryptionConfig};
use crate::error::{ClientError, ErrorContext};
use crate::metadata::{read_metadata, write_metadata, MultipartMetadata, MultipartPaths, METADATA_FILE};
use crate::script::JobScriptBuilder;
use crate::status::{resolve_status, UploadStatus};
use crate::store::ObjectStore;
use crate::types::{
    DirectoryEntry, MultipartUpload, MultipartUploadTuple, ObjectBody, ObjectHeaders, ObjectInfo, ObjectMetadata,
    RemoteJob, UploadPart,
};
use crate::Result;
use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use manta_crypto::Entity;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Largest part number, and the most parts one upload may have
pub const MAX_PARTS: u32 = 10_000;

/// Part objects inspected at once while completing
const PART_HEAD_CONCURRENCY: usize = 16;

/// Prefix of completion job names, followed by the upload id
pub const JOB_NAME_PREFIX: &str = "multipart-";

/// Name of the completion job for an upload
pub fn job_name(upload_id: Uuid) -> String {
    format!("{}{}", JOB_NAME_PREFIX, upload_id)
}

/// Multipart upload operations
#[async_trait]
pub trait MultipartManager: Send + Sync {
    type Upload: Send + Sync;
    type Part: Send + 'static;

    /// Start an upload for the object at `path`
    async fn initiate_upload(
        &self,
        path: &str,
        metadata: Option<ObjectMetadata>,
        headers: Option<ObjectHeaders>,
    ) -> Result<Self::Upload>;

    /// Store one part, replacing any earlier part with the same number
    async fn upload_part(&self, upload: &Self::Upload, part_number: u32, body: ObjectBody) -> Result<Self::Part>;

    /// Look up a stored part
    async fn get_part(&self, upload: &Self::Upload, part_number: u32) -> Result<Self::Part>;

    /// Stream the stored parts in listing order
    async fn list_parts(&self, upload: &Self::Upload) -> Result<BoxStream<'static, Result<Self::Part>>>;

    /// Fail unless the stored parts are numbered `1..=N` without gaps
    async fn validate_that_there_are_sequential_part_numbers(&self, upload: &Self::Upload) -> Result<()>;

    /// Submit the job assembling `parts` into the final object
    async fn complete(
        &self,
        upload: &Self::Upload,
        parts: Vec<MultipartUploadTuple>,
        extra_metadata: Option<ObjectMetadata>,
    ) -> Result<()>;

    /// Cancel any running completion job and remove the upload's data
    async fn abort(&self, upload: &Self::Upload) -> Result<()>;

    /// Current lifecycle state of the upload
    async fn get_status(&self, upload: &Self::Upload) -> Result<UploadStatus>;

    /// Uploads whose namespace still exists
    async fn list_in_progress(&self) -> Result<Vec<Self::Upload>>;
}

/// Polling parameters for [`JobsMultipartManager::wait_for_completion`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaitOptions {
    /// Delay between status checks
    pub poll_interval: Duration,
    /// Maximum number of status checks
    pub max_polls: u32,
    /// Overall limit, independent of the poll count
    pub timeout: Option<Duration>,
}

impl WaitOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_polls: config.times_to_poll,
            timeout: config.wait_timeout,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// How waiting for a completion job ended
#[derive(Debug)]
pub enum WaitOutcome<R> {
    /// The final object exists and the namespace is gone
    Completed,
    /// Polls or time ran out; carries the caller's fallback value
    TimedOut(R),
    /// The job was aborted or its state cannot be determined
    Failed(ClientError),
}

impl<R> WaitOutcome<R> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

enum Polled {
    Completed,
    Failed(ClientError),
}

/// Multipart manager backed by remote concatenation jobs
pub struct JobsMultipartManager<S: ObjectStore> {
    store: Arc<S>,
    config: Config,
    paths: MultipartPaths,
}

impl<S: ObjectStore> JobsMultipartManager<S> {
    pub fn new(store: Arc<S>, config: Config) -> Self {
        let paths = MultipartPaths::new(config.home());
        Self { store, config, paths }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &MultipartPaths {
        &self.paths
    }

    /// Namespace directory of an upload
    pub fn upload_dir(&self, upload: &MultipartUpload) -> String {
        self.paths.upload_dir(upload.id())
    }

    /// Encrypt `source` while uploading it as a part.
    ///
    /// The cipher, IV and key id are stored as headers on the part object.
    /// On completion each part's IV and ciphertext length are listed on the
    /// assembled object so it can be decrypted segment by segment.
    #[instrument(skip(self, source, encryption))]
    pub async fn upload_encrypted_part<E: Entity + Send + 'static>(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        source: E,
        encryption: &EncryptionConfig,
    ) -> Result<UploadPart> {
        validate_part_number(part_number)?;

        let entity = encryption.encrypting_entity(source)?;
        let headers = encryption.headers(&entity.cipher_state(), ObjectHeaders::new());
        let path = self.paths.part(upload.id(), part_number);

        let result = self.store.put_object(&path, ObjectBody::from_entity(entity), &headers).await?;
        debug!(upload_id = %upload.id(), part_number, etag = %result.etag, "Uploaded encrypted part");

        Ok(UploadPart {
            part_number,
            etag: result.etag,
            object_path: path,
        })
    }

    /// Poll until the completion job finishes.
    ///
    /// `on_exceeded` is only called when the polls run out or `timeout`
    /// elapses; the remote job is left alone either way.
    #[instrument(skip(self, on_exceeded))]
    pub async fn wait_for_completion<R, F>(
        &self,
        upload: &MultipartUpload,
        options: WaitOptions,
        on_exceeded: F,
    ) -> Result<WaitOutcome<R>>
    where
        F: FnOnce(Uuid) -> R,
    {
        if options.max_polls == 0 {
            return Err(ClientError::Configuration(
                "times to poll must be greater than zero".to_string(),
            ));
        }

        let dir = self.upload_dir(upload);
        let job = self.find_job(upload).await?.ok_or_else(|| {
            ClientError::protocol(
                "Unable to find job associated with multipart upload. \
                 Was complete() run for upload or was it run so long ago \
                 that we no longer have a record for it?",
                ErrorContext::new()
                    .with("upload_id", upload.id())
                    .with("upload_directory", &dir),
            )
        })?;

        let polling = self.poll_job(upload, job.id, &options);
        let polled = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, polling).await {
                Ok(polled) => polled?,
                Err(_) => {
                    debug!(upload_id = %upload.id(), ?limit, "Wait timeout elapsed");
                    None
                }
            },
            None => polling.await?,
        };

        Ok(match polled {
            Some(Polled::Completed) => WaitOutcome::Completed,
            Some(Polled::Failed(err)) => WaitOutcome::Failed(err),
            None => WaitOutcome::TimedOut(on_exceeded(upload.id())),
        })
    }

    async fn poll_job(&self, upload: &MultipartUpload, job_id: Uuid, options: &WaitOptions) -> Result<Option<Polled>> {
        let dir = self.upload_dir(upload);
        let context = || {
            ErrorContext::new()
                .with("upload_id", upload.id())
                .with("upload_directory", &dir)
                .with("job_id", job_id)
        };

        for attempt in 1..=options.max_polls {
            match self.status_with_job(upload, Some(job_id)).await? {
                UploadStatus::Completed => return Ok(Some(Polled::Completed)),
                UploadStatus::Aborted => {
                    return Ok(Some(Polled::Failed(ClientError::protocol(
                        "Manta job backing multipart upload was aborted. \
                         This upload was unable to be completed.",
                        context(),
                    ))))
                }
                UploadStatus::Unknown => {
                    return Ok(Some(Polled::Failed(ClientError::protocol(
                        "Manta job backing multipart upload is in an unknown state",
                        context(),
                    ))))
                }
                _ => {}
            }

            if attempt < options.max_polls {
                debug!(
                    upload_id = %upload.id(),
                    attempt,
                    max_polls = options.max_polls,
                    "Waiting {:?} for upload to complete",
                    options.poll_interval
                );
                tokio::time::sleep(options.poll_interval).await;
            }
        }

        Ok(None)
    }

    /// The completion job, from the recorded id or else by name
    async fn find_job(&self, upload: &MultipartUpload) -> Result<Option<RemoteJob>> {
        let recorded = match read_metadata(self.store.as_ref(), &self.paths.metadata(upload.id())).await {
            Ok(record) => record.job_id,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(job_id) = recorded {
            return self.fetch_job(upload, job_id).await.map(Some);
        }

        debug!(upload_id = %upload.id(), "No job id recorded, trying job listing");
        let mut jobs = self.store.list_jobs_by_name(&job_name(upload.id())).await?;
        jobs.next().await.transpose()
    }

    async fn fetch_job(&self, upload: &MultipartUpload, job_id: Uuid) -> Result<RemoteJob> {
        match self.store.get_job(job_id).await {
            Err(e) if e.is_not_found() => Err(ClientError::protocol(
                "Job recorded for multipart upload was not found",
                ErrorContext::new()
                    .with("upload_id", upload.id())
                    .with("job_id", job_id),
            )),
            other => other,
        }
    }

    async fn status_with_job(&self, upload: &MultipartUpload, job_id: Option<Uuid>) -> Result<UploadStatus> {
        let dir = self.upload_dir(upload);
        let namespace_exists = match self.store.head_object(&dir).await {
            Ok(info) if info.is_directory => true,
            Ok(_) => {
                return Err(ClientError::protocol(
                    "Remote path was a file and not a directory as expected",
                    ErrorContext::new().with("upload_directory", &dir),
                ))
            }
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };

        let job = match job_id {
            Some(id) => Some(self.fetch_job(upload, id).await?),
            None => self.find_job(upload).await?,
        };

        resolve_status(upload.id(), &dir, namespace_exists, job.as_ref())
    }
}

#[async_trait]
impl<S: ObjectStore> MultipartManager for JobsMultipartManager<S> {
    type Upload = MultipartUpload;
    type Part = UploadPart;

    #[instrument(skip(self, metadata, headers))]
    async fn initiate_upload(
        &self,
        path: &str,
        metadata: Option<ObjectMetadata>,
        headers: Option<ObjectHeaders>,
    ) -> Result<MultipartUpload> {
        let id = Uuid::now_v7();
        debug!(upload_id = %id, path = %path, "Creating a new multipart upload");

        let dir = self.paths.upload_dir(id);
        self.store.put_directory(&dir, true).await?;

        let record = MultipartMetadata::new(path)
            .with_object_metadata(metadata)
            .with_content_type(headers.and_then(|h| h.content_type));
        write_metadata(self.store.as_ref(), &self.paths.metadata(id), &record).await?;

        Ok(MultipartUpload::new(id, path))
    }

    #[instrument(skip(self, body))]
    async fn upload_part(&self, upload: &MultipartUpload, part_number: u32, body: ObjectBody) -> Result<UploadPart> {
        validate_part_number(part_number)?;

        let path = self.paths.part(upload.id(), part_number);
        let result = self.store.put_object(&path, body, &ObjectHeaders::new()).await?;
        debug!(upload_id = %upload.id(), part_number, etag = %result.etag, "Uploaded part");

        Ok(UploadPart {
            part_number,
            etag: result.etag,
            object_path: path,
        })
    }

    #[instrument(skip(self))]
    async fn get_part(&self, upload: &MultipartUpload, part_number: u32) -> Result<UploadPart> {
        validate_part_number(part_number)?;

        let path = self.paths.part(upload.id(), part_number);
        let info = self.store.head_object(&path).await?;
        Ok(UploadPart {
            part_number,
            etag: info.etag,
            object_path: path,
        })
    }

    #[instrument(skip(self))]
    async fn list_parts(&self, upload: &MultipartUpload) -> Result<BoxStream<'static, Result<UploadPart>>> {
        let listing = self.store.list_directory(&self.upload_dir(upload)).await?;
        Ok(listing
            .try_filter_map(|entry| future::ready(part_from_entry(entry)))
            .boxed())
    }

    #[instrument(skip(self))]
    async fn validate_that_there_are_sequential_part_numbers(&self, upload: &MultipartUpload) -> Result<()> {
        let parts: Vec<UploadPart> = self.list_parts(upload).await?.try_collect().await?;

        match first_missing_part(parts.iter().map(|p| p.part_number)) {
            Some(missing) => Err(ClientError::protocol(
                "Missing part of multipart upload",
                ErrorContext::new().with("missing_part", missing),
            )),
            None => Ok(()),
        }
    }

    #[instrument(skip(self, parts, extra_metadata), fields(part_count = parts.len()))]
    async fn complete(
        &self,
        upload: &MultipartUpload,
        mut parts: Vec<MultipartUploadTuple>,
        extra_metadata: Option<ObjectMetadata>,
    ) -> Result<()> {
        parts.sort();
        parts.dedup();

        if parts.len() > MAX_PARTS as usize {
            return Err(ClientError::Configuration(format!(
                "Too many multipart parts specified [{}]. The maximum number of parts is {}",
                parts.len(),
                MAX_PARTS
            )));
        }

        debug!(upload_id = %upload.id(), "Completing multipart upload");
        let dir = self.upload_dir(upload);
        let metadata_path = self.paths.metadata(upload.id());
        let mut record = read_metadata(self.store.as_ref(), &metadata_path).await?;

        if let Some(job_id) = record.job_id {
            return Err(ClientError::protocol(
                "Completion job was already submitted for multipart upload",
                ErrorContext::new()
                    .with("upload_id", upload.id())
                    .with("job_id", job_id),
            ));
        }

        let listing: HashMap<String, UploadPart> = self
            .list_parts(upload)
            .await?
            .take(MAX_PARTS as usize)
            .map_ok(|part| (part.etag.clone(), part))
            .try_collect()
            .await?;

        let mut missing = Vec::new();
        let mut part_paths = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let expected = index as u32 + 1;
            if part.part_number != expected {
                missing.push(MultipartUploadTuple::new(expected, "N/A"));
                continue;
            }
            match listing.get(&part.etag) {
                Some(stored) if stored.part_number == part.part_number => part_paths.push(stored.object_path.clone()),
                _ => missing.push(part.clone()),
            }
        }

        if !missing.is_empty() {
            warn!(upload_id = %upload.id(), missing = missing.len(), "Multipart parts missing at completion");
            let mut context = ErrorContext::new().with("upload_id", upload.id());
            for (i, part) in missing.iter().enumerate() {
                context.insert(
                    format!("missing_part_{}", i + 1),
                    format!("[part_number={}, etag={}]", part.part_number, part.etag),
                );
            }
            return Err(ClientError::protocol(
                "Multipart part(s) specified couldn't be found",
                context,
            ));
        }

        let mut object_metadata = record.object_metadata.clone().unwrap_or_default();
        if let Some(extra) = extra_metadata {
            object_metadata.extend(extra);
        }

        let part_infos: Vec<ObjectInfo> = stream::iter(part_paths.iter().cloned())
            .map(|path| async move { self.store.head_object(&path).await })
            .buffered(PART_HEAD_CONCURRENCY)
            .try_collect()
            .await?;
        if let Some(cipher_headers) = assembled_cipher_headers(&part_infos)? {
            debug!(upload_id = %upload.id(), "Carrying part cipher parameters to final object");
            object_metadata.extend(cipher_headers);
        }

        let phases = JobScriptBuilder::new(upload.id(), record.path.clone(), dir)
            .parts(part_paths)
            .content_type(record.content_type.clone())
            .metadata(object_metadata)
            .build();

        let job_id = self.store.submit_job(&job_name(upload.id()), phases).await?;
        debug!(upload_id = %upload.id(), job_id = %job_id, "Created job for concatenating parts");

        record.job_id = Some(job_id);
        write_metadata(self.store.as_ref(), &metadata_path, &record)
            .await
            .map_err(|e| {
                warn!(upload_id = %upload.id(), job_id = %job_id, error = %e, "Failed to record completion job");
                ClientError::protocol(
                    format!("Completion job was submitted but could not be recorded: {}", e),
                    ErrorContext::new()
                        .with("upload_id", upload.id())
                        .with("job_id", job_id),
                )
            })
    }

    #[instrument(skip(self))]
    async fn abort(&self, upload: &MultipartUpload) -> Result<()> {
        let dir = self.upload_dir(upload);
        debug!(upload_id = %upload.id(), "Aborting multipart upload");

        match self.find_job(upload).await {
            Ok(Some(job)) if !job.cancelled && job.state.is_active() => {
                debug!(upload_id = %upload.id(), job_id = %job.id, "Cancelling backing job");
                self.store.cancel_job(job.id).await?;
            }
            Ok(_) => {}
            // Lookup failures do not block namespace cleanup
            Err(e) => warn!(upload_id = %upload.id(), error = %e, "Unable to look up backing job"),
        }

        debug!(path = %dir, "Deleting multipart upload data");
        match self.store.delete_recursive(&dir).await {
            Err(e) if e.is_not_found() => {
                debug!(path = %dir, "Upload data already removed");
                Ok(())
            }
            other => other,
        }
    }

    #[instrument(skip(self))]
    async fn get_status(&self, upload: &MultipartUpload) -> Result<UploadStatus> {
        self.status_with_job(upload, None).await
    }

    #[instrument(skip(self))]
    async fn list_in_progress(&self) -> Result<Vec<MultipartUpload>> {
        let root = self.paths.root();
        let listing = match self.store.list_directory(root).await {
            Ok(listing) => listing,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let entries: Vec<DirectoryEntry> = listing.try_collect().await?;

        let mut uploads = Vec::new();
        let mut errors = Vec::new();
        for entry in entries.into_iter().filter(|e| e.is_directory) {
            let id = match Uuid::parse_str(entry.name()) {
                Ok(id) => id,
                Err(_) => {
                    errors.push(ClientError::protocol(
                        "Directory in multipart area is not named by an upload id",
                        ErrorContext::new().with("upload_directory", &entry.path),
                    ));
                    continue;
                }
            };

            match read_metadata(self.store.as_ref(), &self.paths.metadata(id)).await {
                Ok(record) => uploads.push(MultipartUpload::new(id, record.path)),
                // Removed between the listing and the read
                Err(e) if e.is_not_found() => debug!(upload_id = %id, "Upload vanished while listing"),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(uploads)
        } else {
            Err(ClientError::Aggregate {
                message: "Problem(s) listing multipart uploads in progress".to_string(),
                errors,
            })
        }
    }
}

fn validate_part_number(part_number: u32) -> Result<()> {
    if part_number == 0 || part_number > MAX_PARTS {
        return Err(ClientError::Configuration(format!(
            "Part number must be between 1 and {}, got {}",
            MAX_PARTS, part_number
        )));
    }
    Ok(())
}

fn part_from_entry(entry: DirectoryEntry) -> Result<Option<UploadPart>> {
    if entry.is_directory || entry.name() == METADATA_FILE {
        return Ok(None);
    }

    let part_number = entry.name().parse::<u32>().map_err(|_| {
        ClientError::protocol(
            "Unexpected object in multipart upload directory",
            ErrorContext::new().with("path", &entry.path),
        )
    })?;

    Ok(Some(UploadPart {
        part_number,
        etag: entry.etag.unwrap_or_default(),
        object_path: entry.path,
    }))
}

/// First part number missing from the sorted sequence starting at 1
pub fn first_missing_part(part_numbers: impl IntoIterator<Item = u32>) -> Option<u32> {
    let mut numbers: Vec<u32> = part_numbers.into_iter().collect();
    numbers.sort_unstable();

    let mut expected = 1;
    for number in numbers {
        if number != expected {
            return Some(expected);
        }
        expected += 1;
    }
    None
}
