//! Errors - 層ごとのエラー型
//!
//! `ContentsError` is what the host sees. `StageError` is the outcome of one
//! staging attempt; it is `Clone` because every joiner of an in-flight stage
//! receives the same value.

use std::time::Duration;

use thiserror::Error;

use crate::domain::ids::JobId;
use crate::ports::remote::RemoteError;

pub type Result<T, E = ContentsError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("endpoint {endpoint} unavailable: {reason}")]
    EndpointUnavailable { endpoint: String, reason: String },

    #[error("transfer job {job_id} failed with {code}")]
    TransferFailed { job_id: JobId, code: String },

    #[error("transfer job {job_id} did not finish within {timeout:?}")]
    TransferTimedOut { job_id: JobId, timeout: Duration },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("local cache: {0}")]
    Local(String),

    /// The task driving the stage went away before it finished.
    #[error("stage of '{0}' was interrupted")]
    Interrupted(String),
}

impl StageError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StageError::TransferTimedOut { .. } | StageError::Interrupted(_)
        )
    }

    pub(crate) fn local(err: std::io::Error) -> Self {
        StageError::Local(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ContentsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("endpoint {endpoint} unavailable: {reason}")]
    EndpointUnavailable { endpoint: String, reason: String },

    #[error("transfer job {job_id} failed with {code}")]
    TransferFailed { job_id: JobId, code: String },

    #[error("transfer job {job_id} did not finish within {timeout:?}")]
    TransferTimedOut { job_id: JobId, timeout: Duration },

    /// Content could not be brought to or from the local cache.
    #[error("upstream unavailable for '{path}': {source}")]
    UpstreamUnavailable {
        path: String,
        #[source]
        source: StageError,
    },

    #[error("'{path}' is not UTF-8 text")]
    InvalidEncoding { path: String },

    #[error("'{path}' is not a valid notebook: {reason}")]
    InvalidDocument { path: String, reason: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("local filesystem: {0}")]
    Io(#[from] std::io::Error),
}

impl ContentsError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ContentsError::TransferTimedOut { .. } => true,
            ContentsError::UpstreamUnavailable { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Wrap a staging failure for `path`.
    pub fn upstream(path: impl Into<String>, source: StageError) -> Self {
        ContentsError::UpstreamUnavailable {
            path: path.into(),
            source,
        }
    }
}

/// Job-level outcomes of delete and copy surface directly; only staging
/// failures are wrapped in `UpstreamUnavailable`.
impl From<StageError> for ContentsError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::EndpointUnavailable { endpoint, reason } => {
                ContentsError::EndpointUnavailable { endpoint, reason }
            }
            StageError::TransferFailed { job_id, code } => {
                ContentsError::TransferFailed { job_id, code }
            }
            StageError::TransferTimedOut { job_id, timeout } => {
                ContentsError::TransferTimedOut { job_id, timeout }
            }
            StageError::Remote(err) => ContentsError::Remote(err),
            StageError::Local(message) => ContentsError::Io(std::io::Error::other(message)),
            StageError::Interrupted(path) => {
                let source = StageError::Interrupted(path.clone());
                ContentsError::UpstreamUnavailable { path, source }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn job() -> JobId {
        JobId::new("job-1")
    }

    #[rstest]
    #[case::timeout(StageError::TransferTimedOut { job_id: job(), timeout: Duration::from_secs(1) }, true)]
    #[case::interrupted(StageError::Interrupted("a".into()), true)]
    #[case::failed(StageError::TransferFailed { job_id: job(), code: "FAILED".into() }, false)]
    #[case::endpoint(StageError::EndpointUnavailable { endpoint: "e".into(), reason: "r".into() }, false)]
    #[case::local(StageError::Local("disk full".into()), false)]
    fn stage_retryability(#[case] err: StageError, #[case] retryable: bool) {
        assert_eq!(err.is_retryable(), retryable);
    }

    #[test]
    fn upstream_inherits_retryability() {
        let err = ContentsError::upstream("a.txt", StageError::Interrupted("a.txt".into()));
        assert!(err.is_retryable());

        let err = ContentsError::upstream(
            "a.txt",
            StageError::TransferFailed { job_id: job(), code: "X".into() },
        );
        assert!(!err.is_retryable());
        assert!(!ContentsError::NotFound("a".into()).is_retryable());
    }

    #[test]
    fn job_outcomes_convert_without_wrapping() {
        let err: ContentsError = StageError::TransferFailed { job_id: job(), code: "X".into() }.into();
        assert!(matches!(err, ContentsError::TransferFailed { code, .. } if code == "X"));

        let err: ContentsError = StageError::Interrupted("p".into()).into();
        assert!(matches!(err, ContentsError::UpstreamUnavailable { path, .. } if path == "p"));
    }
}
