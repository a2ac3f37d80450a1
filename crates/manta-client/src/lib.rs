//! # Manta Client
//!
//! Jobs-based multipart uploads and client-side encryption for the Manta
//! object store.
//!
//! ## Features
//!
//! - **Multipart uploads**: parts are stored in a namespace directory and
//!   assembled server-side by a two-phase reduce job
//! - **Status tracking**: upload state is reconstructed from the namespace
//!   and the completion job, so it survives client restarts
//! - **Client-side encryption**: streaming AES-GCM/CTR/CBC with optional
//!   HMAC-SHA256 trailers, described to readers through object headers
//!
//! ## Example
//!
//! ```rust,ignore
//! use manta_client::{Config, JobsMultipartManager, MemoryStore, MultipartManager, WaitOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let manager = JobsMultipartManager::new(store, Config::new("/user"));
//!
//!     let upload = manager.initiate_upload("/user/stor/big.bin", None, None).await?;
//!     let part1 = manager.upload_part(&upload, 1, b"hello"[..].into()).await?;
//!     let part2 = manager.upload_part(&upload, 2, b" world"[..].into()).await?;
//!
//!     manager.complete(&upload, vec![part1.into(), part2.into()], None).await?;
//!     let outcome = manager
//!         .wait_for_completion(&upload, WaitOptions::default(), |id| id)
//!         .await?;
//!     println!("finished: {}", outcome.is_completed());
//!
//!     Ok(())
//! }
//! ```

mod config;
mod encryption;
mod error;
mod memory;
mod metadata;
mod multipart;
mod script;
mod status;
mod store;
mod types;

pub use config::{Config, DEFAULT_POLL_INTERVAL, DEFAULT_TIMES_TO_POLL};
pub use encryption::{
    assembled_cipher_headers, CipherSegment, EncryptedClient, EncryptionConfig, SegmentedDecryptor,
    ENCRYPT_CIPHER_HEADER, ENCRYPT_HMAC_TYPE_HEADER, ENCRYPT_IV_HEADER, ENCRYPT_KEY_ID_HEADER,
    ENCRYPT_PART_IVS_HEADER, ENCRYPT_PART_LENGTHS_HEADER,
};
pub use error::{ClientError, ErrorContext, Result};
pub use memory::MemoryStore;
pub use metadata::{
    read_metadata, write_metadata, MultipartMetadata, MultipartPaths, METADATA_FILE, MULTIPART_DIRECTORY,
};
pub use multipart::{
    first_missing_part, job_name, JobsMultipartManager, MultipartManager, WaitOptions, WaitOutcome, JOB_NAME_PREFIX,
    MAX_PARTS,
};
pub use script::{quote, JobScriptBuilder, JOB_ID_HEADER, UPLOAD_ID_HEADER};
pub use status::{resolve_status, UploadStatus};
pub use store::ObjectStore;
pub use types::*;

// Re-export the crypto types needed to configure encryption
pub use manta_crypto::{BytesEntity, CipherProfile, Entity, ReaderEntity, SecretKey};
