//! Upload status derived from the namespace and the completion job

use crate::error::{ClientError, ErrorContext};
use crate::types::{JobState, RemoteJob};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Where an upload is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    /// Namespace exists, no completion job yet
    Created,
    /// Completion job submitted and not finished cleaning up
    Committing,
    /// Final object assembled and namespace removed
    Completed,
    /// Job cancelled, namespace not yet removed
    Aborting,
    /// Job cancelled and namespace removed
    Aborted,
    Unknown,
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Committing => "COMMITTING",
            Self::Completed => "COMPLETED",
            Self::Aborting => "ABORTING",
            Self::Aborted => "ABORTED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Map the observed remote state to an [`UploadStatus`].
///
/// `namespace_exists` must already account for the namespace being a
/// directory. A job in an unrecognised state after the namespace is gone
/// is an error, since nothing else can explain the missing namespace.
pub fn resolve_status(
    upload_id: Uuid,
    upload_dir: &str,
    namespace_exists: bool,
    job: Option<&RemoteJob>,
) -> Result<UploadStatus> {
    let Some(job) = job else {
        return Ok(if namespace_exists {
            UploadStatus::Created
        } else {
            UploadStatus::Unknown
        });
    };

    if job.cancelled {
        return Ok(if namespace_exists {
            UploadStatus::Aborting
        } else {
            UploadStatus::Aborted
        });
    }

    match (namespace_exists, &job.state) {
        (false, JobState::Done) => Ok(UploadStatus::Completed),
        (false, JobState::Running | JobState::Queued) => Ok(UploadStatus::Committing),
        (false, JobState::Other(state)) => Err(ClientError::protocol(
            "Unexpected job state",
            ErrorContext::new()
                .with("job_state", state)
                .with("job_id", job.id)
                .with("upload_id", upload_id)
                .with("upload_directory", upload_dir),
        )),
        (true, JobState::Done | JobState::Running | JobState::Queued) => Ok(UploadStatus::Committing),
        (true, JobState::Other(_)) => Ok(UploadStatus::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;

    fn job(state: JobState, cancelled: bool) -> RemoteJob {
        RemoteJob {
            id: Uuid::new_v4(),
            name: "multipart-test".into(),
            state,
            cancelled,
            created_at: Utc::now(),
            phases: Vec::new(),
        }
    }

    #[rstest]
    #[case(true, None, UploadStatus::Created)]
    #[case(false, None, UploadStatus::Unknown)]
    #[case(true, Some((JobState::Running, true)), UploadStatus::Aborting)]
    #[case(false, Some((JobState::Done, true)), UploadStatus::Aborted)]
    #[case(false, Some((JobState::Done, false)), UploadStatus::Completed)]
    #[case(false, Some((JobState::Running, false)), UploadStatus::Committing)]
    #[case(false, Some((JobState::Queued, false)), UploadStatus::Committing)]
    #[case(true, Some((JobState::Done, false)), UploadStatus::Committing)]
    #[case(true, Some((JobState::Queued, false)), UploadStatus::Committing)]
    #[case(true, Some((JobState::Other("archived".into()), false)), UploadStatus::Unknown)]
    fn test_state_table(
        #[case] namespace_exists: bool,
        #[case] remote: Option<(JobState, bool)>,
        #[case] expected: UploadStatus,
    ) {
        let job = remote.map(|(state, cancelled)| job(state, cancelled));
        let status = resolve_status(Uuid::nil(), "/ns", namespace_exists, job.as_ref()).unwrap();
        assert_eq!(status, expected);
    }

    #[test]
    fn test_unexpected_state_without_namespace() {
        let job = job(JobState::Other("archived".into()), false);
        let err = resolve_status(Uuid::nil(), "/ns", false, Some(&job)).unwrap_err();
        let context = err.context().unwrap();
        assert_eq!(context.get("job_state"), Some("archived"));
        assert_eq!(context.get("upload_directory"), Some("/ns"));
        assert_eq!(context.get("job_id"), Some(job.id.to_string().as_str()));
    }

    #[test]
    fn test_display() {
        assert_eq!(UploadStatus::Committing.to_string(), "COMMITTING");
    }
}
