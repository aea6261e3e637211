//! TransferApiClient - Transfer REST API adapter
//!
//! Speaks the Globus-style Transfer API (v0.10): directory listings under
//! `operation/endpoint/{id}/ls`, task submission through `transfer` and
//! `delete` with a `submission_id`, and task polling under `task/{id}`.
//! Token acquisition happens elsewhere; the client only sends the bearer
//! token it was given.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::TransferApiConfig;
use crate::domain::ids::{EndpointId, JobId};
use crate::domain::listing::ListingEntry;
use crate::domain::state::RemoteJobStatus;
use crate::ports::{
    DeleteRequest, RemoteEndpoint, RemoteError, RemoteErrorKind, TransferRequest,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The service rejects labels longer than this.
const MAX_LABEL_LEN: usize = 128;

/// Listing response body.
#[derive(Debug, Deserialize)]
struct ListingPage {
    #[serde(rename = "DATA", default)]
    data: Vec<ListingEntry>,
}

#[derive(Debug, Deserialize)]
struct SubmissionId {
    value: String,
}

#[derive(Debug, Deserialize)]
struct TaskSubmitted {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct FatalError {
    code: String,
}

#[derive(Debug, Deserialize)]
struct TaskDocument {
    status: String,
    #[serde(default)]
    nice_status: Option<String>,
    #[serde(default)]
    fatal_error: Option<FatalError>,
}

impl TaskDocument {
    fn into_status(self) -> RemoteJobStatus {
        match self.status.as_str() {
            "SUCCEEDED" => RemoteJobStatus::Succeeded,
            "FAILED" => RemoteJobStatus::Failed {
                code: self
                    .fatal_error
                    .map(|e| e.code)
                    .or(self.nice_status)
                    .unwrap_or_else(|| "FAILED".to_string()),
            },
            // ACTIVE, INACTIVE (paused, e.g. credentials expired)
            _ => RemoteJobStatus::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultDocument {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Keep label characters the service accepts; everything else becomes `_`.
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | ',' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_LABEL_LEN)
        .collect()
}

/// Decode an error body, falling back to the HTTP status.
fn parse_error(status: StatusCode, body: &str) -> RemoteError {
    let parsed: Option<ResultDocument> = serde_json::from_str(body).ok();
    let err = match parsed {
        Some(doc) if !doc.code.is_empty() => RemoteError::new(doc.code, doc.message),
        _ => RemoteError::new(
            format!("HttpError.{}", status.as_u16()),
            status.canonical_reason().unwrap_or("unexpected response"),
        ),
    };
    err.with_status(status.as_u16())
}

pub struct TransferApiClient {
    http: Client,
    base_url: String,
    access_token: String,
}

impl TransferApiClient {
    pub fn new(config: &TransferApiConfig) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::transport(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header(ACCEPT, "application/json")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;
        if !status.is_success() {
            return Err(parse_error(status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| RemoteError::transport(format!("unexpected response body: {e}")))
    }

    async fn submission_id(&self) -> Result<String, RemoteError> {
        let id: SubmissionId = self.send(self.request(Method::GET, "submission_id")).await?;
        Ok(id.value)
    }
}

#[async_trait]
impl RemoteEndpoint for TransferApiClient {
    async fn list_directory(
        &self,
        endpoint: &EndpointId,
        path: &str,
        include_hidden: bool,
    ) -> Result<Vec<ListingEntry>, RemoteError> {
        let request = self
            .request(Method::GET, &format!("operation/endpoint/{endpoint}/ls"))
            .query(&[
                ("path", path),
                ("show_hidden", if include_hidden { "1" } else { "0" }),
            ]);
        let page: ListingPage = self.send(request).await?;
        debug!(%endpoint, path, entries = page.data.len(), "listed directory");
        Ok(page.data)
    }

    async fn submit_transfer(&self, request: TransferRequest) -> Result<JobId, RemoteError> {
        let submission_id = self.submission_id().await?;
        let body = json!({
            "DATA_TYPE": "transfer",
            "submission_id": submission_id,
            "source_endpoint": request.src_endpoint.as_str(),
            "destination_endpoint": request.dst_endpoint.as_str(),
            "label": sanitize_label(&request.label),
            "DATA": [{
                "DATA_TYPE": "transfer_item",
                "source_path": request.src_path,
                "destination_path": request.dst_path,
                "recursive": request.recursive,
            }],
        });
        let submitted: TaskSubmitted = self
            .send(self.request(Method::POST, "transfer").json(&body))
            .await?;
        Ok(JobId::new(submitted.task_id))
    }

    async fn submit_delete(&self, request: DeleteRequest) -> Result<JobId, RemoteError> {
        let submission_id = self.submission_id().await?;
        let body = json!({
            "DATA_TYPE": "delete",
            "submission_id": submission_id,
            "endpoint": request.endpoint.as_str(),
            "label": sanitize_label(&request.label),
            "recursive": request.recursive,
            "DATA": [{ "DATA_TYPE": "delete_item", "path": request.path }],
        });
        let submitted: TaskSubmitted = self
            .send(self.request(Method::POST, "delete").json(&body))
            .await?;
        Ok(JobId::new(submitted.task_id))
    }

    async fn poll_job(&self, job: &JobId) -> Result<RemoteJobStatus, RemoteError> {
        let task: TaskDocument = self
            .send(self.request(Method::GET, &format!("task/{job}")))
            .await?;
        Ok(task.into_status())
    }

    async fn cancel_job(&self, job: &JobId) -> Result<(), RemoteError> {
        let _: Value = self
            .send(self.request(Method::POST, &format!("task/{job}/cancel")))
            .await?;
        Ok(())
    }

    async fn activate_endpoint(&self, endpoint: &EndpointId) -> Result<(), RemoteError> {
        let result: ResultDocument = self
            .send(self.request(Method::POST, &format!("endpoint/{endpoint}/autoactivate")))
            .await?;
        if result.code.starts_with("AutoActivationFailed") {
            return Err(RemoteError::new(result.code, result.message));
        }
        Ok(())
    }

    async fn rename_object(
        &self,
        endpoint: &EndpointId,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), RemoteError> {
        let body = json!({
            "DATA_TYPE": "rename",
            "old_path": old_path,
            "new_path": new_path,
        });
        let _: ResultDocument = self
            .send(
                self.request(Method::POST, &format!("operation/endpoint/{endpoint}/rename"))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn mkdir(&self, endpoint: &EndpointId, path: &str) -> Result<(), RemoteError> {
        let body = json!({ "DATA_TYPE": "mkdir", "path": path });
        let result: Result<ResultDocument, RemoteError> = self
            .send(
                self.request(Method::POST, &format!("operation/endpoint/{endpoint}/mkdir"))
                    .json(&body),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == RemoteErrorKind::AlreadyExists => {
                // The service reports the same code when a file sits at `path`.
                let listing = self.list_directory(endpoint, path, false).await.map(drop);
                settle_mkdir_collision(err, listing)
            }
            Err(err) => Err(err),
        }
    }
}

/// Outcome of a mkdir that hit an existing object, given a listing of that object.
fn settle_mkdir_collision(
    exists: RemoteError,
    listing: Result<(), RemoteError>,
) -> Result<(), RemoteError> {
    match listing {
        Ok(()) => {
            debug!(code = %exists.code, "directory already exists");
            Ok(())
        }
        Err(err) if err.kind() == RemoteErrorKind::NotDirectory => Err(exists),
        Err(err) => Err(err),
    }
}
