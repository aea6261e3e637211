//! RemoteEndpoint port - 転送サービスの抽象化
//!
//! The transfer service is an opaque async RPC service: directory listings
//! and a handful of synchronous operations, plus long-running jobs that are
//! submitted, polled and cancelled.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ids::{EndpointId, JobId};
use crate::domain::listing::ListingEntry;
use crate::domain::state::RemoteJobStatus;

/// Error returned by the remote service.
///
/// `code` is a dotted identifier such as `ExternalError.DirListingFailed.NotDirectory`.
/// Callers branch on [`RemoteError::kind`], never on `message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    NotFound,
    NotDirectory,
    AlreadyExists,
    PermissionDenied,
    Other,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            http_status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Network or decoding failure before the service produced an error code.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new("TransportError", message)
    }

    pub fn kind(&self) -> RemoteErrorKind {
        let has = |name: &str| self.code.split('.').any(|segment| segment == name);

        if has("NotDirectory") {
            RemoteErrorKind::NotDirectory
        } else if has("NotFound") {
            RemoteErrorKind::NotFound
        } else if has("Exists") || has("AlreadyExists") {
            RemoteErrorKind::AlreadyExists
        } else if self
            .code
            .split('.')
            .any(|segment| segment.ends_with("PermissionDenied"))
        {
            RemoteErrorKind::PermissionDenied
        } else {
            RemoteErrorKind::Other
        }
    }
}

/// Copy `src_path` on `src_endpoint` to `dst_path` on `dst_endpoint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub src_endpoint: EndpointId,
    pub src_path: String,
    pub dst_endpoint: EndpointId,
    pub dst_path: String,
    pub recursive: bool,

    /// Free-form diagnostics label shown by the service.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub endpoint: EndpointId,
    pub path: String,
    pub recursive: bool,
    pub label: String,
}

/// Operations on the transfer service.
///
/// `mkdir` treats an already-existing directory as success; implementations
/// absorb that case.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn list_directory(
        &self,
        endpoint: &EndpointId,
        path: &str,
        include_hidden: bool,
    ) -> Result<Vec<ListingEntry>, RemoteError>;

    async fn submit_transfer(&self, request: TransferRequest) -> Result<JobId, RemoteError>;

    async fn submit_delete(&self, request: DeleteRequest) -> Result<JobId, RemoteError>;

    async fn poll_job(&self, job: &JobId) -> Result<RemoteJobStatus, RemoteError>;

    async fn cancel_job(&self, job: &JobId) -> Result<(), RemoteError>;

    async fn activate_endpoint(&self, endpoint: &EndpointId) -> Result<(), RemoteError>;

    async fn rename_object(
        &self,
        endpoint: &EndpointId,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), RemoteError>;

    async fn mkdir(&self, endpoint: &EndpointId, path: &str) -> Result<(), RemoteError>;
}
