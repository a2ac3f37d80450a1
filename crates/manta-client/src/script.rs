//! Completion job programs
//!
//! A completion job has two reduce phases: the first streams every part,
//! in part order, into the final object; the second removes the upload
//! namespace.

use crate::types::{JobPhase, ObjectMetadata};
use uuid::Uuid;

/// Header on the final object naming the upload it was assembled from
pub const UPLOAD_ID_HEADER: &str = "m-multipart-upload-id";

/// Header on the final object naming the job that assembled it
pub const JOB_ID_HEADER: &str = "m-multipart-job-id";

/// Quote a value for the job shell
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Renders the phases of a completion job
#[derive(Clone, Debug)]
pub struct JobScriptBuilder {
    upload_id: Uuid,
    target: String,
    upload_dir: String,
    part_paths: Vec<String>,
    content_type: Option<String>,
    metadata: ObjectMetadata,
}

impl JobScriptBuilder {
    pub fn new(upload_id: Uuid, target: impl Into<String>, upload_dir: impl Into<String>) -> Self {
        Self {
            upload_id,
            target: target.into(),
            upload_dir: upload_dir.into(),
            part_paths: Vec::new(),
            content_type: None,
            metadata: ObjectMetadata::new(),
        }
    }

    /// Part objects to concatenate, already in part order
    pub fn parts(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        self.part_paths = paths.into_iter().collect();
        self
    }

    pub fn content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn metadata(mut self, metadata: ObjectMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn concatenate_command(&self) -> String {
        let mut cmd = String::from("set -o pipefail; mget -q");
        for path in &self.part_paths {
            cmd.push(' ');
            cmd.push_str(&quote(path));
        }

        cmd.push_str(&format!(
            " | mput -H \"{}: {}\" -H \"{}: $MANTA_JOB_ID\" -q",
            UPLOAD_ID_HEADER, self.upload_id, JOB_ID_HEADER
        ));
        if let Some(content_type) = &self.content_type {
            cmd.push_str(" -H ");
            cmd.push_str(&quote(&format!("Content-Type: {}", content_type)));
        }
        for (key, value) in &self.metadata {
            cmd.push_str(" -H ");
            cmd.push_str(&quote(&format!("{}: {}", key, value)));
        }

        cmd.push(' ');
        cmd.push_str(&quote(&self.target));
        cmd
    }

    pub fn cleanup_command(&self) -> String {
        format!("mrm -r {}", quote(&self.upload_dir))
    }

    /// Both phases, concatenation first
    pub fn build(&self) -> Vec<JobPhase> {
        vec![
            JobPhase::reduce(self.concatenate_command()),
            JobPhase::reduce(self.cleanup_command()),
        ]
    }
}
