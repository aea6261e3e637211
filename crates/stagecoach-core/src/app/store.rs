//! ContentStore - ホストに見せる操作面
//!
//! # 学習ポイント
//! - reads go through the stager, metadata comes straight from listings
//! - job-level failures of delete/copy surface as-is, staging failures are
//!   wrapped in `UpstreamUnavailable`
//! - local mirror maintenance is best-effort and only logs
//!
//! # 使用例
//! ```ignore
//! let store = StoreBuilder::new(config)
//!     .remote(Arc::new(client))
//!     .local_store(Arc::new(TokioLocalStore::new()))
//!     .build()?;
//! let model = store.get("notes/a.ipynb", true, None, None).await?;
//! ```

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::app::model_builder::ContentModelBuilder;
use crate::app::paths::{PathTranslator, ResolvedPath};
use crate::app::stager::{CacheStager, job_label};
use crate::domain::ids::EndpointId;
use crate::domain::listing::ListingEntry;
use crate::domain::model::{ContentFormat, ContentKind, ContentModel};
use crate::error::{ContentsError, Result};
use crate::observability::StagerCounts;
use crate::ports::{DeleteRequest, LocalStore, RemoteEndpoint, RemoteErrorKind, TransferRequest};

pub struct ContentStore {
    remote: Arc<dyn RemoteEndpoint>,
    local: Arc<dyn LocalStore>,
    stager: CacheStager,
    builder: ContentModelBuilder,
    translator: PathTranslator,
    remote_endpoint: EndpointId,
    staging_timeout: Duration,
    include_hidden: bool,
}

impl ContentStore {
    pub(crate) fn new(
        remote: Arc<dyn RemoteEndpoint>,
        local: Arc<dyn LocalStore>,
        stager: CacheStager,
        remote_endpoint: EndpointId,
        staging_timeout: Duration,
        include_hidden: bool,
    ) -> Self {
        let translator = stager.translator().clone();
        Self {
            builder: ContentModelBuilder::new(local.clone()),
            remote,
            local,
            stager,
            translator,
            remote_endpoint,
            staging_timeout,
            include_hidden,
        }
    }

    pub fn stager(&self) -> &CacheStager {
        &self.stager
    }

    pub fn counts(&self) -> StagerCounts {
        self.stager.counts()
    }

    /// Leaf name starts with a dot. No remote call.
    pub fn is_hidden(&self, path: &str) -> bool {
        PathTranslator::leaf(path).starts_with('.')
    }

    pub async fn dir_exists(&self, path: &str) -> Result<bool> {
        let resolved = self.translator.resolve(path);
        match self
            .remote
            .list_directory(&self.remote_endpoint, &resolved.remote, self.include_hidden)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => match err.kind() {
                RemoteErrorKind::NotFound | RemoteErrorKind::NotDirectory => Ok(false),
                _ => Err(err.into()),
            },
        }
    }

    pub async fn file_exists(&self, path: &str) -> Result<bool> {
        let resolved = self.translator.resolve(path);
        match self
            .remote
            .list_directory(&self.remote_endpoint, &resolved.remote, self.include_hidden)
            .await
        {
            Ok(_) => Ok(false),
            Err(err) => match err.kind() {
                RemoteErrorKind::NotDirectory => Ok(true),
                RemoteErrorKind::NotFound => Ok(false),
                _ => Err(err.into()),
            },
        }
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.dir_exists(path).await? || self.file_exists(path).await?)
    }

    /// Model of `path`, optionally with content.
    ///
    /// Without a hint the kind follows the name (`.ipynb` is a notebook),
    /// except that an entry the listing reports as a directory is served as
    /// one.
    #[instrument(skip(self))]
    pub async fn get(
        &self,
        path: &str,
        want_content: bool,
        kind_hint: Option<ContentKind>,
        format: Option<ContentFormat>,
    ) -> Result<ContentModel> {
        let resolved = self.translator.resolve(path);
        let kind = kind_hint.unwrap_or_else(|| ContentKind::infer(&resolved.logical));

        if kind == ContentKind::Directory || resolved.logical.is_empty() {
            return self.directory(&resolved, want_content).await;
        }

        let entry = self.stat(&resolved).await?;
        if entry.is_dir() {
            if kind_hint.is_some() {
                return Err(ContentsError::InvalidRequest(format!(
                    "'{}' is a directory, not a {kind}",
                    resolved.logical
                )));
            }
            return self.directory(&resolved, want_content).await;
        }

        if !want_content {
            return Ok(ContentModelBuilder::metadata_model(
                &resolved.logical,
                kind,
                &entry,
            ));
        }

        let deadline = self.deadline();
        let staged = match entry.modified_at() {
            Ok(Some(modified)) => {
                self.stager
                    .ensure_fresh_since(&resolved.logical, modified, deadline)
                    .await
            }
            // Without a usable timestamp the cached copy can't be trusted.
            _ => self.stager.ensure_fresh(&resolved.logical, deadline).await,
        }
        .map_err(|err| ContentsError::upstream(&resolved.logical, err))?;

        let mut model = self
            .builder
            .from_staged_file(&resolved.logical, &staged.local_path, kind, format)
            .await?
            .with_modified(ContentModelBuilder::entry_modified(&resolved.logical, &entry));
        model.size = Some(entry.size);
        Ok(model)
    }

    /// Store `model` at `path` and return the fresh metadata model.
    #[instrument(skip(self, model), fields(kind = %model.kind))]
    pub async fn save(&self, model: &ContentModel, path: &str) -> Result<ContentModel> {
        let resolved = self.translator.resolve(path);
        model.validate()?;

        match model.kind {
            ContentKind::Directory => {
                self.activate().await?;
                self.remote
                    .mkdir(&self.remote_endpoint, &resolved.remote)
                    .await
                    .map_err(|err| match err.kind() {
                        RemoteErrorKind::NotFound => {
                            ContentsError::NotFound(PathTranslator::parent(&resolved.logical))
                        }
                        RemoteErrorKind::AlreadyExists => ContentsError::InvalidRequest(format!(
                            "'{}' exists and is not a directory",
                            resolved.logical
                        )),
                        _ => ContentsError::Remote(err),
                    })?;
                info!(path = %resolved.logical, "created directory");
            }
            ContentKind::File | ContentKind::Notebook => {
                if resolved.logical.is_empty() {
                    return Err(ContentsError::InvalidRequest(
                        "cannot save a file over the root directory".to_string(),
                    ));
                }
                if !model.has_content() {
                    return Err(ContentsError::InvalidRequest(format!(
                        "no content given for {} '{}'",
                        model.kind, resolved.logical
                    )));
                }
                let bytes = ContentModelBuilder::payload_bytes(&resolved.logical, model)?;
                self.stager
                    .publish(&resolved.logical, &bytes, self.deadline())
                    .await
                    .map_err(|err| ContentsError::upstream(&resolved.logical, err))?;
                info!(path = %resolved.logical, len = bytes.len(), "saved");
            }
        }

        self.get(&resolved.logical, false, Some(model.kind), None).await
    }

    /// Delete `path` (recursively) on the remote endpoint and drop any cached copy.
    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str) -> Result<()> {
        let resolved = self.translator.resolve(path);
        if resolved.logical.is_empty() {
            return Err(ContentsError::InvalidRequest(
                "refusing to delete the root directory".to_string(),
            ));
        }
        self.stat(&resolved).await?;
        self.activate().await?;

        let label = job_label("delete", &resolved.logical);
        let job_id = self
            .remote
            .submit_delete(DeleteRequest {
                endpoint: self.remote_endpoint.clone(),
                path: resolved.remote.clone(),
                recursive: true,
                label: label.clone(),
            })
            .await?;
        info!(job = %job_id, path = %resolved.logical, "delete submitted");
        self.stager.await_job(job_id, &label, self.deadline()).await?;

        match self.local.remove(&resolved.local).await {
            Ok(()) => debug!(local = %resolved.local.display(), "removed local mirror"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                local = %resolved.local.display(),
                error = %err,
                "could not remove local mirror"
            ),
        }
        self.stager.invalidate(&resolved.logical);
        Ok(())
    }

    /// Rename on the remote endpoint, then mirror it locally. Not atomic.
    #[instrument(skip(self))]
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let from = self.translator.resolve(old_path);
        let to = self.translator.resolve(new_path);
        if from.logical.is_empty() || to.logical.is_empty() {
            return Err(ContentsError::InvalidRequest(
                "cannot rename the root directory".to_string(),
            ));
        }

        self.activate().await?;
        self.remote
            .rename_object(&self.remote_endpoint, &from.remote, &to.remote)
            .await
            .map_err(|err| match err.kind() {
                RemoteErrorKind::NotFound => ContentsError::NotFound(from.logical.clone()),
                _ => ContentsError::Remote(err),
            })?;
        info!(from = %from.logical, to = %to.logical, "renamed");

        match self.local.rename(&from.local, &to.local).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                from = %from.local.display(),
                to = %to.local.display(),
                error = %err,
                "could not rename local mirror"
            ),
        }
        self.stager.invalidate(&from.logical);
        self.stager.invalidate(&to.logical);
        Ok(())
    }

    /// Copy within the remote endpoint and return the destination's metadata.
    #[instrument(skip(self))]
    pub async fn copy(&self, from_path: &str, to_path: &str) -> Result<ContentModel> {
        let from = self.translator.resolve(from_path);
        let to = self.translator.resolve(to_path);
        if to.logical.is_empty() {
            return Err(ContentsError::InvalidRequest(
                "cannot copy over the root directory".to_string(),
            ));
        }

        let source_is_dir = from.logical.is_empty() || self.stat(&from).await?.is_dir();
        self.activate().await?;

        let label = job_label("copy", &from.logical);
        let job_id = self
            .remote
            .submit_transfer(TransferRequest {
                src_endpoint: self.remote_endpoint.clone(),
                src_path: from.remote.clone(),
                dst_endpoint: self.remote_endpoint.clone(),
                dst_path: to.remote.clone(),
                recursive: source_is_dir,
                label: label.clone(),
            })
            .await?;
        info!(job = %job_id, from = %from.logical, to = %to.logical, "copy submitted");
        self.stager.await_job(job_id, &label, self.deadline()).await?;
        self.stager.invalidate(&to.logical);

        let hint = source_is_dir.then_some(ContentKind::Directory);
        self.get(&to.logical, false, hint, None).await
    }

    async fn directory(&self, resolved: &ResolvedPath, with_content: bool) -> Result<ContentModel> {
        let entries = self
            .remote
            .list_directory(&self.remote_endpoint, &resolved.remote, self.include_hidden)
            .await
            .map_err(|err| match err.kind() {
                RemoteErrorKind::NotFound | RemoteErrorKind::NotDirectory => {
                    ContentsError::NotFound(resolved.logical.clone())
                }
                _ => ContentsError::Remote(err),
            })?;
        Ok(ContentModelBuilder::directory_model(
            &resolved.logical,
            &entries,
            with_content,
        ))
    }

    /// Listing entry of `resolved`, looked up in its parent's listing.
    async fn stat(&self, resolved: &ResolvedPath) -> Result<ListingEntry> {
        if resolved.logical.is_empty() {
            return Ok(ListingEntry::dir(""));
        }
        let parent = self
            .translator
            .resolve(&PathTranslator::parent(&resolved.logical));
        let leaf = PathTranslator::leaf(&resolved.logical);

        // Hidden entries are always visible here so they can be addressed directly.
        let entries = self
            .remote
            .list_directory(&self.remote_endpoint, &parent.remote, true)
            .await
            .map_err(|err| match err.kind() {
                RemoteErrorKind::NotFound | RemoteErrorKind::NotDirectory => {
                    ContentsError::NotFound(resolved.logical.clone())
                }
                _ => ContentsError::Remote(err),
            })?;
        entries
            .into_iter()
            .find(|entry| entry.name == leaf)
            .ok_or_else(|| ContentsError::NotFound(resolved.logical.clone()))
    }

    async fn activate(&self) -> Result<()> {
        self.remote
            .activate_endpoint(&self.remote_endpoint)
            .await
            .map_err(|err| ContentsError::EndpointUnavailable {
                endpoint: self.remote_endpoint.to_string(),
                reason: err.to_string(),
            })
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.staging_timeout
    }
}
