//! Multipart Upload Lifecycle Tests
//!
//! Drives `JobsMultipartManager` against the in-memory store:
//! 1. Upload, complete and assemble
//! 2. Status transitions
//! 3. Waiting for completion
//! 4. Listing uploads in progress
//! 5. Encrypted parts
//!
//! Run with: cargo test --package manta-client --test multipart_tests

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use manta_client::{
    write_metadata, BytesEntity, CipherProfile, ClientError, Config, DirectoryEntry, EncryptedClient,
    EncryptionConfig, JobPhase, JobState, JobsMultipartManager, MemoryStore, MultipartManager, MultipartMetadata,
    MultipartUpload, MultipartUploadTuple, ObjectBody, ObjectHeaders, ObjectInfo, ObjectMetadata, ObjectStore,
    PutObjectResult, RemoteJob, SecretKey, UploadPart, UploadStatus, WaitOptions, WaitOutcome,
    ENCRYPT_CIPHER_HEADER, ENCRYPT_IV_HEADER, ENCRYPT_PART_IVS_HEADER, ENCRYPT_PART_LENGTHS_HEADER, JOB_ID_HEADER,
    MAX_PARTS, METADATA_FILE, UPLOAD_ID_HEADER,
};
use rstest::rstest;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TARGET: &str = "/user/stor/assembled.txt";

fn manager() -> (Arc<MemoryStore>, JobsMultipartManager<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let manager = JobsMultipartManager::new(store.clone(), Config::new("/user"));
    (store, manager)
}

fn fast_wait() -> WaitOptions {
    WaitOptions::default()
        .with_poll_interval(Duration::from_millis(1))
        .with_max_polls(3)
}

async fn upload_parts(
    manager: &JobsMultipartManager<MemoryStore>,
    upload: &MultipartUpload,
    parts: &[&'static [u8]],
) -> Vec<UploadPart> {
    let mut uploaded = Vec::new();
    for (i, data) in parts.iter().enumerate() {
        uploaded.push(manager.upload_part(upload, i as u32 + 1, (*data).into()).await.unwrap());
    }
    uploaded
}

fn tuples(parts: &[UploadPart]) -> Vec<MultipartUploadTuple> {
    parts.iter().map(MultipartUploadTuple::from).collect()
}

fn only_job(store: &MemoryStore) -> Uuid {
    let jobs = store.jobs();
    assert_eq!(jobs.len(), 1);
    jobs[0].id
}

// ═══════════════════════════════════════════════════════════════════════════════
// UPLOAD AND ASSEMBLY
// ═══════════════════════════════════════════════════════════════════════════════

#[test_log::test(tokio::test)]
async fn test_parts_are_assembled_in_order() {
    let (store, manager) = manager();
    let mut metadata = ObjectMetadata::new();
    metadata.insert("m-color".into(), "blue".into());
    metadata.insert("m-size".into(), "small".into());

    let upload = manager
        .initiate_upload(
            TARGET,
            Some(metadata),
            Some(ObjectHeaders::new().with_content_type("text/plain")),
        )
        .await
        .unwrap();
    assert_eq!(upload.path(), TARGET);

    let parts = upload_parts(&manager, &upload, &[b"alpha-", b"beta-", b"gamma"]).await;

    // Completion input order does not matter
    let mut input = tuples(&parts);
    input.reverse();
    let mut extra = ObjectMetadata::new();
    extra.insert("m-size".into(), "large".into());
    manager.complete(&upload, input, Some(extra)).await.unwrap();

    let job_id = only_job(&store);
    store.run_job(job_id).unwrap();

    let data = store.get_object(TARGET).await.unwrap();
    assert_eq!(&data[..], b"alpha-beta-gamma");

    let info = store.head_object(TARGET).await.unwrap();
    assert_eq!(info.content_type.as_deref(), Some("text/plain"));
    assert_eq!(info.headers.get("m-color").unwrap(), "blue");
    assert_eq!(info.headers.get("m-size").unwrap(), "large");
    assert_eq!(info.headers.get(UPLOAD_ID_HEADER).unwrap(), &upload.id().to_string());
    assert_eq!(info.headers.get(JOB_ID_HEADER).unwrap(), &job_id.to_string());

    assert!(!store.exists(&manager.upload_dir(&upload)));
}

#[tokio::test]
async fn test_list_parts_skips_metadata_record() {
    let (_store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    let uploaded = upload_parts(&manager, &upload, &[b"a", b"b"]).await;

    let mut listed: Vec<UploadPart> = manager.list_parts(&upload).await.unwrap().try_collect().await.unwrap();
    listed.sort_by_key(|p| p.part_number);
    assert_eq!(listed, uploaded);

    let part = manager.get_part(&upload, 2).await.unwrap();
    assert_eq!(part, uploaded[1]);
    assert!(manager.get_part(&upload, 3).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_reupload_replaces_part() {
    let (store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();

    let first = manager.upload_part(&upload, 1, b"old"[..].into()).await.unwrap();
    let second = manager.upload_part(&upload, 1, b"new"[..].into()).await.unwrap();
    assert_ne!(first.etag, second.etag);

    // The stale fingerprint no longer matches anything stored
    let err = manager.complete(&upload, vec![first.into()], None).await.unwrap_err();
    assert!(matches!(err, ClientError::ProtocolState { .. }));

    manager.complete(&upload, vec![second.into()], None).await.unwrap();
    store.run_job(only_job(&store)).unwrap();
    assert_eq!(&store.get_object(TARGET).await.unwrap()[..], b"new");
}

#[tokio::test]
async fn test_part_number_bounds() {
    let (_store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();

    for bad in [0, MAX_PARTS + 1] {
        let err = manager.upload_part(&upload, bad, b"x"[..].into()).await.unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }
    manager.upload_part(&upload, MAX_PARTS, b"x"[..].into()).await.unwrap();
}

#[tokio::test]
async fn test_too_many_parts_rejected_before_remote_calls() {
    let (store, manager) = manager();
    // Never initiated, so any remote call would fail with NotFound
    let upload = MultipartUpload::new(Uuid::new_v4(), TARGET);
    let parts = (1..=MAX_PARTS + 1).map(|n| MultipartUploadTuple::new(n, "etag")).collect();

    let err = manager.complete(&upload, parts, None).await.unwrap_err();
    assert!(matches!(err, ClientError::Configuration(_)));
    assert!(store.jobs().is_empty());
}

#[tokio::test]
async fn test_duplicates_do_not_count_against_part_limit() {
    let (store, manager) = manager();
    let upload = MultipartUpload::new(Uuid::new_v4(), TARGET);
    let mut parts: Vec<_> = (1..=MAX_PARTS).map(|n| MultipartUploadTuple::new(n, "etag")).collect();
    parts.push(MultipartUploadTuple::new(1, "etag"));

    // Past the limit check, so the missing upload record is what fails
    let err = manager.complete(&upload, parts, None).await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {}", err);
    assert!(store.jobs().is_empty());
}

#[tokio::test]
async fn test_missing_parts_fail_completion() {
    let (store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    let parts = upload_parts(&manager, &upload, &[b"1", b"2", b"3"]).await;

    // Gap at part 2
    let err = manager
        .complete(&upload, vec![(&parts[0]).into(), (&parts[2]).into()], None)
        .await
        .unwrap_err();
    let context = err.context().unwrap();
    assert_eq!(context.get("missing_part_1"), Some("[part_number=2, etag=N/A]"));

    // Unknown fingerprint
    let err = manager
        .complete(&upload, vec![MultipartUploadTuple::new(1, "bogus")], None)
        .await
        .unwrap_err();
    assert_eq!(err.context().unwrap().get("missing_part_1"), Some("[part_number=1, etag=bogus]"));

    assert!(store.jobs().is_empty());
    assert_eq!(manager.get_status(&upload).await.unwrap(), UploadStatus::Created);
}

#[tokio::test]
async fn test_duplicate_tuples_are_collapsed() {
    let (store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    let parts = upload_parts(&manager, &upload, &[b"ab", b"cd"]).await;

    let mut input = tuples(&parts);
    input.push((&parts[0]).into());
    manager.complete(&upload, input, None).await.unwrap();

    store.run_job(only_job(&store)).unwrap();
    assert_eq!(&store.get_object(TARGET).await.unwrap()[..], b"abcd");
}

#[tokio::test]
async fn test_second_complete_rejected() {
    let (store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    let parts = upload_parts(&manager, &upload, &[b"x"]).await;

    manager.complete(&upload, tuples(&parts), None).await.unwrap();
    let err = manager.complete(&upload, tuples(&parts), None).await.unwrap_err();

    let job_id = only_job(&store);
    assert_eq!(err.context().unwrap().get("job_id"), Some(job_id.to_string().as_str()));
}

/// Delegates to a `MemoryStore`, failing metadata record writes once armed
struct FailingRecordStore {
    inner: MemoryStore,
    fail_records: AtomicBool,
}

#[async_trait]
impl ObjectStore for FailingRecordStore {
    async fn put_object(
        &self,
        path: &str,
        body: ObjectBody,
        headers: &ObjectHeaders,
    ) -> manta_client::Result<PutObjectResult> {
        if self.fail_records.load(Ordering::SeqCst) && path.ends_with(METADATA_FILE) {
            return Err(ClientError::Remote {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        self.inner.put_object(path, body, headers).await
    }

    async fn head_object(&self, path: &str) -> manta_client::Result<ObjectInfo> {
        self.inner.head_object(path).await
    }

    async fn get_object_stream(
        &self,
        path: &str,
    ) -> manta_client::Result<BoxStream<'static, manta_client::Result<Bytes>>> {
        self.inner.get_object_stream(path).await
    }

    async fn put_directory(&self, path: &str, recursive: bool) -> manta_client::Result<()> {
        self.inner.put_directory(path, recursive).await
    }

    async fn list_directory(
        &self,
        path: &str,
    ) -> manta_client::Result<BoxStream<'static, manta_client::Result<DirectoryEntry>>> {
        self.inner.list_directory(path).await
    }

    async fn delete_recursive(&self, path: &str) -> manta_client::Result<()> {
        self.inner.delete_recursive(path).await
    }

    async fn submit_job(&self, name: &str, phases: Vec<JobPhase>) -> manta_client::Result<Uuid> {
        self.inner.submit_job(name, phases).await
    }

    async fn cancel_job(&self, id: Uuid) -> manta_client::Result<()> {
        self.inner.cancel_job(id).await
    }

    async fn get_job(&self, id: Uuid) -> manta_client::Result<RemoteJob> {
        self.inner.get_job(id).await
    }

    async fn list_jobs_by_name(
        &self,
        name: &str,
    ) -> manta_client::Result<BoxStream<'static, manta_client::Result<RemoteJob>>> {
        self.inner.list_jobs_by_name(name).await
    }
}

#[tokio::test]
async fn test_unrecorded_job_id_is_reported() {
    let store = Arc::new(FailingRecordStore {
        inner: MemoryStore::new(),
        fail_records: AtomicBool::new(false),
    });
    let manager = JobsMultipartManager::new(store.clone(), Config::new("/user"));
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    let part = manager.upload_part(&upload, 1, b"x"[..].into()).await.unwrap();

    store.fail_records.store(true, Ordering::SeqCst);
    let err = manager.complete(&upload, vec![(&part).into()], None).await.unwrap_err();
    assert!(matches!(err, ClientError::ProtocolState { .. }), "unexpected error: {}", err);

    let job_id = only_job(&store.inner);
    assert_eq!(err.context().unwrap().get("job_id"), Some(job_id.to_string().as_str()));
    assert_eq!(
        err.context().unwrap().get("upload_id"),
        Some(upload.id().to_string().as_str())
    );

    // The job is still found by name
    assert_eq!(manager.get_status(&upload).await.unwrap(), UploadStatus::Committing);
}

#[tokio::test]
async fn test_sequential_part_validation() {
    let (_store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();

    for n in [1, 2, 4] {
        manager.upload_part(&upload, n, b"p"[..].into()).await.unwrap();
    }
    let err = manager
        .validate_that_there_are_sequential_part_numbers(&upload)
        .await
        .unwrap_err();
    assert_eq!(err.context().unwrap().get("missing_part"), Some("3"));

    manager.upload_part(&upload, 3, b"p"[..].into()).await.unwrap();
    manager
        .validate_that_there_are_sequential_part_numbers(&upload)
        .await
        .unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATUS
// ═══════════════════════════════════════════════════════════════════════════════

#[test_log::test(tokio::test)]
async fn test_status_through_completion() {
    let (store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    assert_eq!(manager.get_status(&upload).await.unwrap(), UploadStatus::Created);

    let parts = upload_parts(&manager, &upload, &[b"x"]).await;
    manager.complete(&upload, tuples(&parts), None).await.unwrap();
    assert_eq!(manager.get_status(&upload).await.unwrap(), UploadStatus::Committing);

    let job_id = only_job(&store);
    store.set_job_state(job_id, JobState::Running).unwrap();
    assert_eq!(manager.get_status(&upload).await.unwrap(), UploadStatus::Committing);

    store.set_job_state(job_id, JobState::Queued).unwrap();
    store.run_job(job_id).unwrap();
    // Record is gone with the namespace, so the job is found by name
    assert_eq!(manager.get_status(&upload).await.unwrap(), UploadStatus::Completed);
}

#[tokio::test]
async fn test_status_through_abort() {
    let (store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    let parts = upload_parts(&manager, &upload, &[b"x"]).await;
    manager.complete(&upload, tuples(&parts), None).await.unwrap();

    // Cancelled but not yet cleaned up
    let job_id = only_job(&store);
    store.cancel_job(job_id).await.unwrap();
    assert_eq!(manager.get_status(&upload).await.unwrap(), UploadStatus::Aborting);

    manager.abort(&upload).await.unwrap();
    assert_eq!(manager.get_status(&upload).await.unwrap(), UploadStatus::Aborted);
    assert!(!store.exists(TARGET));

    // Already gone
    manager.abort(&upload).await.unwrap();
}

#[tokio::test]
async fn test_abort_cancels_queued_job() {
    let (store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    let parts = upload_parts(&manager, &upload, &[b"x"]).await;
    manager.complete(&upload, tuples(&parts), None).await.unwrap();

    manager.abort(&upload).await.unwrap();

    let job = store.get_job(only_job(&store)).await.unwrap();
    assert!(job.cancelled);
    assert!(!store.exists(&manager.upload_dir(&upload)));

    // A cancelled job never runs
    store.run_job(job.id).unwrap();
    assert!(!store.exists(TARGET));
}

#[tokio::test]
async fn test_abort_without_job() {
    let (store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    upload_parts(&manager, &upload, &[b"x"]).await;

    manager.abort(&upload).await.unwrap();
    assert_eq!(store.object_count(), 0);
    assert_eq!(manager.get_status(&upload).await.unwrap(), UploadStatus::Unknown);
}

#[test_log::test(tokio::test)]
async fn test_abort_with_unknown_recorded_job() {
    let (store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    upload_parts(&manager, &upload, &[b"x", b"y"]).await;

    let record = MultipartMetadata {
        path: TARGET.to_string(),
        object_metadata: None,
        content_type: None,
        job_id: Some(Uuid::new_v4()),
    };
    write_metadata(store.as_ref(), &manager.paths().metadata(upload.id()), &record)
        .await
        .unwrap();
    assert!(manager.get_status(&upload).await.is_err());

    manager.abort(&upload).await.unwrap();
    assert!(!store.exists(&manager.upload_dir(&upload)));
    assert_eq!(store.object_count(), 0);
}

#[tokio::test]
async fn test_namespace_that_is_a_file() {
    let (store, manager) = manager();
    let upload = MultipartUpload::new(Uuid::new_v4(), TARGET);
    store.put_directory(manager.paths().root(), true).await.unwrap();
    store
        .put_object(&manager.upload_dir(&upload), b"oops"[..].into(), &ObjectHeaders::new())
        .await
        .unwrap();

    let err = manager.get_status(&upload).await.unwrap_err();
    assert!(err.to_string().contains("not a directory"));
    assert_eq!(
        err.context().unwrap().get("upload_directory"),
        Some(manager.upload_dir(&upload).as_str())
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAITING
// ═══════════════════════════════════════════════════════════════════════════════

#[test_log::test(tokio::test)]
async fn test_wait_completed() {
    let (store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    let parts = upload_parts(&manager, &upload, &[b"x"]).await;
    manager.complete(&upload, tuples(&parts), None).await.unwrap();
    store.run_job(only_job(&store)).unwrap();

    let outcome = manager
        .wait_for_completion(&upload, fast_wait(), |_| unreachable!("job already finished"))
        .await
        .unwrap();
    assert!(outcome.is_completed());
}

#[tokio::test]
async fn test_wait_failed_after_abort() {
    let (_store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    let parts = upload_parts(&manager, &upload, &[b"x"]).await;
    manager.complete(&upload, tuples(&parts), None).await.unwrap();
    manager.abort(&upload).await.unwrap();

    let outcome = manager.wait_for_completion(&upload, fast_wait(), |id| id).await.unwrap();
    match outcome {
        WaitOutcome::Failed(err) => {
            assert!(err.to_string().contains("aborted"));
            assert_eq!(err.context().unwrap().get("upload_id"), Some(upload.id().to_string().as_str()));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_wait_times_out_after_max_polls() {
    let (_store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    let parts = upload_parts(&manager, &upload, &[b"x"]).await;
    manager.complete(&upload, tuples(&parts), None).await.unwrap();

    let outcome = manager
        .wait_for_completion(&upload, fast_wait(), |id| format!("gave up on {}", id))
        .await
        .unwrap();
    match outcome {
        WaitOutcome::TimedOut(message) => assert_eq!(message, format!("gave up on {}", upload.id())),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_wait_overall_timeout() {
    let (_store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();
    let parts = upload_parts(&manager, &upload, &[b"x"]).await;
    manager.complete(&upload, tuples(&parts), None).await.unwrap();

    let options = WaitOptions::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_max_polls(u32::MAX)
        .with_timeout(Duration::from_millis(30));
    let outcome = manager.wait_for_completion(&upload, options, |_| ()).await.unwrap();
    assert!(matches!(outcome, WaitOutcome::TimedOut(())));
}

#[tokio::test]
async fn test_wait_without_complete_is_error() {
    let (_store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();

    let err = manager.wait_for_completion(&upload, fast_wait(), |_| ()).await.unwrap_err();
    assert_eq!(
        err.context().unwrap().get("upload_directory"),
        Some(manager.upload_dir(&upload).as_str())
    );
}

#[tokio::test]
async fn test_wait_rejects_zero_polls() {
    let (_store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();

    let options = fast_wait().with_max_polls(0);
    let err = manager.wait_for_completion(&upload, options, |_| ()).await.unwrap_err();
    assert!(matches!(err, ClientError::Configuration(_)));
}

// ═══════════════════════════════════════════════════════════════════════════════
// LISTING IN PROGRESS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_list_in_progress_without_any_uploads() {
    let (_store, manager) = manager();
    assert!(manager.list_in_progress().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_in_progress() {
    let (store, manager) = manager();
    let open = manager.initiate_upload("/user/stor/open", None, None).await.unwrap();
    let done = manager.initiate_upload("/user/stor/done", None, None).await.unwrap();

    let parts = upload_parts(&manager, &done, &[b"x"]).await;
    manager.complete(&done, tuples(&parts), None).await.unwrap();
    store.run_job(only_job(&store)).unwrap();

    // Namespace whose record disappeared
    store
        .put_directory(&manager.paths().upload_dir(Uuid::new_v4()), false)
        .await
        .unwrap();

    let uploads = manager.list_in_progress().await.unwrap();
    assert_eq!(uploads, vec![open]);
}

#[tokio::test]
async fn test_list_in_progress_aggregates_errors() {
    let (store, manager) = manager();
    let good = manager.initiate_upload("/user/stor/good", None, None).await.unwrap();
    let broken = manager.initiate_upload("/user/stor/broken", None, None).await.unwrap();

    store
        .put_object(
            &manager.paths().metadata(broken.id()),
            b"{not json"[..].into(),
            &ObjectHeaders::new(),
        )
        .await
        .unwrap();
    store
        .put_directory(&format!("{}/not-an-upload", manager.paths().root()), false)
        .await
        .unwrap();

    match manager.list_in_progress().await.unwrap_err() {
        ClientError::Aggregate { message, errors } => {
            assert_eq!(message, "Problem(s) listing multipart uploads in progress");
            assert_eq!(errors.len(), 2);
            assert!(errors.iter().any(|e| matches!(e, ClientError::Serialization(_))));
            assert!(errors.iter().any(|e| matches!(e, ClientError::ProtocolState { .. })));
        }
        other => panic!("expected aggregate error, got {}", other),
    }

    // Fixing the record clears the failure
    store
        .put_object(
            &manager.paths().metadata(broken.id()),
            br#"{"path":"/user/stor/broken"}"#[..].into(),
            &ObjectHeaders::new(),
        )
        .await
        .unwrap();
    store
        .delete_recursive(&format!("{}/not-an-upload", manager.paths().root()))
        .await
        .unwrap();

    let mut uploads = manager.list_in_progress().await.unwrap();
    uploads.sort_by_key(|u| u.id());
    let mut expected = vec![good, broken];
    expected.sort_by_key(|u| u.id());
    assert_eq!(uploads, expected);
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENCRYPTED PARTS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_encrypted_part_round_trip() {
    let (store, manager) = manager();
    let encryption = EncryptionConfig::generate(CipherProfile::AesGcm256, "part-key");
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();

    let plaintext = vec![0x5au8; 4096];
    let part = manager
        .upload_encrypted_part(&upload, 1, BytesEntity::new(plaintext.clone()), &encryption)
        .await
        .unwrap();

    let info = store.head_object(&part.object_path).await.unwrap();
    assert_eq!(info.etag, part.etag);
    assert_eq!(info.headers.get(ENCRYPT_CIPHER_HEADER).unwrap(), "AES256/GCM/NoPadding");
    assert_eq!(info.content_length, plaintext.len() as u64 + 16);

    let reader = EncryptedClient::new(store.clone(), encryption);
    let decrypted = reader.get_object_decrypted(&part.object_path).await.unwrap();
    assert_eq!(&decrypted[..], &plaintext[..]);
}

#[tokio::test]
async fn test_encrypted_part_number_bounds() {
    let (_store, manager) = manager();
    let encryption = EncryptionConfig::generate(CipherProfile::AesCtr128, "k");
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();

    let err = manager
        .upload_encrypted_part(&upload, 0, BytesEntity::new(&b"x"[..]), &encryption)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Configuration(_)));
}

fn part_encryption(profile: CipherProfile, hmac: bool) -> EncryptionConfig {
    let encryption = EncryptionConfig::generate(profile, "part-key");
    if hmac {
        encryption.with_hmac(SecretKey::generate(profile)).unwrap()
    } else {
        encryption
    }
}

#[rstest]
#[case(CipherProfile::AesGcm128, false)]
#[case(CipherProfile::AesCtr256, true)]
#[case(CipherProfile::AesCbc256, true)]
#[tokio::test]
async fn test_encrypted_parts_assemble_into_decryptable_object(#[case] profile: CipherProfile, #[case] hmac: bool) {
    let (store, manager) = manager();
    let encryption = part_encryption(profile, hmac);
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();

    let first: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
    let second = b"tail of the object".to_vec();
    let mut parts = Vec::new();
    for (n, data) in [(1, first.clone()), (2, second.clone())] {
        let part = manager
            .upload_encrypted_part(&upload, n, BytesEntity::new(data), &encryption)
            .await
            .unwrap();
        parts.push(part);
    }

    manager.complete(&upload, tuples(&parts), None).await.unwrap();
    store.run_job(only_job(&store)).unwrap();

    let info = store.head_object(TARGET).await.unwrap();
    assert!(info.headers.get(ENCRYPT_IV_HEADER).is_none());
    assert_eq!(info.headers.get(ENCRYPT_PART_IVS_HEADER).unwrap().split(',').count(), 2);
    let lengths: u64 = info
        .headers
        .get(ENCRYPT_PART_LENGTHS_HEADER)
        .unwrap()
        .split(',')
        .map(|n| n.parse::<u64>().unwrap())
        .sum();
    assert_eq!(lengths, info.content_length);

    let reader = EncryptedClient::new(store.clone(), encryption);
    let plaintext = reader.get_object_decrypted(TARGET).await.unwrap();
    assert_eq!(plaintext.len(), first.len() + second.len());
    assert!(plaintext[..first.len()] == first[..]);
    assert_eq!(&plaintext[first.len()..], &second[..]);
}

#[tokio::test]
async fn test_mixed_encrypted_and_plain_parts_rejected() {
    let (store, manager) = manager();
    let encryption = part_encryption(CipherProfile::AesGcm256, false);
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();

    let encrypted = manager
        .upload_encrypted_part(&upload, 1, BytesEntity::new(&b"secret"[..]), &encryption)
        .await
        .unwrap();
    let plain = manager.upload_part(&upload, 2, b"plain"[..].into()).await.unwrap();

    let err = manager
        .complete(&upload, vec![(&encrypted).into(), (&plain).into()], None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ProtocolState { .. }), "unexpected error: {}", err);
    assert!(store.jobs().is_empty());
    assert_eq!(manager.get_status(&upload).await.unwrap(), UploadStatus::Created);
}

#[tokio::test]
async fn test_parts_with_different_keys_rejected() {
    let (store, manager) = manager();
    let upload = manager.initiate_upload(TARGET, None, None).await.unwrap();

    let one = manager
        .upload_encrypted_part(
            &upload,
            1,
            BytesEntity::new(&b"a"[..]),
            &EncryptionConfig::generate(CipherProfile::AesCtr128, "key-a"),
        )
        .await
        .unwrap();
    let two = manager
        .upload_encrypted_part(
            &upload,
            2,
            BytesEntity::new(&b"b"[..]),
            &EncryptionConfig::generate(CipherProfile::AesCtr128, "key-b"),
        )
        .await
        .unwrap();

    let err = manager
        .complete(&upload, vec![(&one).into(), (&two).into()], None)
        .await
        .unwrap_err();
    assert_eq!(err.context().unwrap().get("header"), Some("m-encrypt-key-id"));
    assert!(store.jobs().is_empty());
}
