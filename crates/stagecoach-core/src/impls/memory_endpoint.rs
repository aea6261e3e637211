//! InMemoryEndpoint - 開発用の転送サービス
//!
//! # 学習ポイント
//! - jobs complete lazily, on the poll that reaches their scripted outcome
//! - side effects run outside the state lock (local stores are async)
//! - error codes mimic the real service, so classification is exercised
//!
//! # 使用例
//! ```ignore
//! let endpoint = InMemoryEndpoint::new()
//!     .with_local_endpoint(EndpointId::new("laptop"), Arc::new(TokioLocalStore::new()));
//! endpoint.put_file(&remote, "/~/a.txt", b"hello", Utc::now());
//! endpoint.push_behavior(JobBehavior::CompleteAfter(3));
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::ids::{EndpointId, JobId};
use crate::domain::listing::{ListingEntry, format_remote_timestamp};
use crate::domain::state::RemoteJobStatus;
use crate::ports::{
    Clock, DeleteRequest, LocalStore, RemoteEndpoint, RemoteError, SystemClock, TransferRequest,
};

pub const CODE_NOT_FOUND: &str = "ClientError.NotFound";
pub const CODE_NOT_DIRECTORY: &str = "ExternalError.DirListingFailed.NotDirectory";
pub const CODE_ALREADY_EXISTS: &str = "ClientError.AlreadyExists";
pub const CODE_MKDIR_EXISTS: &str = "ExternalError.MkdirFailed.Exists";
pub const CODE_ACTIVATION_FAILED: &str = "AutoActivationFailed";
pub const STATUS_FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
pub const STATUS_IS_A_DIRECTORY: &str = "IS_A_DIRECTORY";
pub const STATUS_CANCELED: &str = "CANCELED";

/// Scripted outcome of the next submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobBehavior {
    /// Succeed on the n-th poll (n >= 1).
    CompleteAfter(u32),

    /// Fail on the first poll with the given status code.
    Fail { code: String },

    /// Stay pending until cancelled.
    Never,
}

impl Default for JobBehavior {
    fn default() -> Self {
        JobBehavior::CompleteAfter(1)
    }
}

/// Counters for assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub listings: usize,
    pub transfers_submitted: usize,
    pub deletes_submitted: usize,
    pub polls: usize,
    pub cancels: usize,
    pub activations: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File {
        bytes: Vec<u8>,
        modified: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
enum JobKind {
    Transfer(TransferRequest),
    Delete(DeleteRequest),
}

struct Job {
    kind: JobKind,
    behavior: JobBehavior,
    polls: u32,
    status: RemoteJobStatus,
}

#[derive(Default)]
struct EndpointState {
    trees: HashMap<EndpointId, BTreeMap<String, Node>>,
    jobs: HashMap<JobId, Job>,
    behaviors: VecDeque<JobBehavior>,
    default_behavior: JobBehavior,
    unavailable: HashSet<EndpointId>,
    fail_cancels: bool,
    next_poll_error: Option<RemoteError>,
    stats: EndpointStats,
}

/// Content moved by a finished transfer.
enum Payload {
    File(Vec<u8>),
    /// Relative path (empty for the root) -> file bytes, `None` for dirs.
    Tree(Vec<(String, Option<Vec<u8>>)>),
}

pub struct InMemoryEndpoint {
    state: Mutex<EndpointState>,
    locals: HashMap<EndpointId, Arc<dyn LocalStore>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

fn error(code: &str, message: impl Into<String>) -> RemoteError {
    RemoteError::new(code, message)
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", _)) if path.len() > 1 => Some("/"),
        Some((parent, _)) if !parent.is_empty() => Some(parent),
        _ => None,
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

fn child_path(parent: &str, rest: &str) -> String {
    match (parent.trim_end_matches('/'), rest) {
        (base, "") => base.to_string(),
        (base, rest) => format!("{base}/{rest}"),
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_below(path: &str, prefix: &str) -> bool {
    prefix == "/" || path.starts_with(&format!("{prefix}/"))
}

fn add_ancestors(tree: &mut BTreeMap<String, Node>, path: &str) {
    let mut current = parent_of(path);
    while let Some(dir) = current {
        tree.entry(dir.to_string()).or_insert(Node::Dir);
        current = parent_of(dir);
    }
}

impl InMemoryEndpoint {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Remote files written by transfers get their mtime from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(EndpointState::default()),
            locals: HashMap::new(),
            clock,
        }
    }

    /// Route transfers touching `endpoint` to a local store.
    pub fn with_local_endpoint(mut self, endpoint: EndpointId, store: Arc<dyn LocalStore>) -> Self {
        self.locals.insert(endpoint, store);
        self
    }

    fn state(&self) -> MutexGuard<'_, EndpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_directory(&self, endpoint: &EndpointId, path: &str) {
        let path = normalize(path);
        let mut state = self.state();
        let tree = state.trees.entry(endpoint.clone()).or_default();
        add_ancestors(tree, &path);
        tree.insert(path, Node::Dir);
    }

    pub fn put_file(&self, endpoint: &EndpointId, path: &str, bytes: &[u8], modified: DateTime<Utc>) {
        let path = normalize(path);
        let mut state = self.state();
        let tree = state.trees.entry(endpoint.clone()).or_default();
        add_ancestors(tree, &path);
        tree.insert(
            path,
            Node::File {
                bytes: bytes.to_vec(),
                modified,
            },
        );
    }

    pub fn file_bytes(&self, endpoint: &EndpointId, path: &str) -> Option<Vec<u8>> {
        match self.state().trees.get(endpoint)?.get(&normalize(path))? {
            Node::File { bytes, .. } => Some(bytes.clone()),
            Node::Dir => None,
        }
    }

    pub fn contains(&self, endpoint: &EndpointId, path: &str) -> bool {
        self.state()
            .trees
            .get(endpoint)
            .is_some_and(|tree| tree.contains_key(&normalize(path)))
    }

    pub fn push_behavior(&self, behavior: JobBehavior) {
        self.state().behaviors.push_back(behavior);
    }

    pub fn set_default_behavior(&self, behavior: JobBehavior) {
        self.state().default_behavior = behavior;
    }

    pub fn set_unavailable(&self, endpoint: &EndpointId, unavailable: bool) {
        let mut state = self.state();
        if unavailable {
            state.unavailable.insert(endpoint.clone());
        } else {
            state.unavailable.remove(endpoint);
        }
    }

    pub fn fail_cancels(&self, fail: bool) {
        self.state().fail_cancels = fail;
    }

    pub fn fail_next_poll(&self, err: RemoteError) {
        self.state().next_poll_error = Some(err);
    }

    pub fn stats(&self) -> EndpointStats {
        self.state().stats.clone()
    }

    fn submit(&self, kind: JobKind) -> JobId {
        let mut state = self.state();
        let behavior = state
            .behaviors
            .pop_front()
            .unwrap_or_else(|| state.default_behavior.clone());
        match &kind {
            JobKind::Transfer(_) => state.stats.transfers_submitted += 1,
            JobKind::Delete(_) => state.stats.deletes_submitted += 1,
        }
        let job_id = JobId::generate();
        state.jobs.insert(
            job_id.clone(),
            Job {
                kind,
                behavior,
                polls: 0,
                status: RemoteJobStatus::Pending,
            },
        );
        job_id
    }

    /// Run a finished job's side effect. Returns the failure code, if any.
    async fn apply(&self, kind: JobKind) -> Option<String> {
        match kind {
            JobKind::Transfer(request) => self.apply_transfer(request).await.err(),
            JobKind::Delete(request) => {
                let path = normalize(&request.path);
                let mut state = self.state();
                let tree = state.trees.entry(request.endpoint.clone()).or_default();
                if tree.remove(&path).is_none() {
                    return Some(STATUS_FILE_NOT_FOUND.to_string());
                }
                tree.retain(|p, _| !is_below(p, &path));
                None
            }
        }
    }

    async fn apply_transfer(&self, request: TransferRequest) -> Result<(), String> {
        let payload = self.read_source(&request).await?;

        if let Some(store) = self.locals.get(&request.dst_endpoint) {
            let base = PathBuf::from(&request.dst_path);
            let written = match payload {
                Payload::File(bytes) => store.write(&base, &bytes).await,
                Payload::Tree(items) => {
                    let mut result = store.create_dir_all(&base).await;
                    for (rel, bytes) in items {
                        if result.is_err() {
                            break;
                        }
                        let target = if rel.is_empty() { base.clone() } else { base.join(&rel) };
                        result = match bytes {
                            Some(bytes) => store.write(&target, &bytes).await,
                            None => store.create_dir_all(&target).await,
                        };
                    }
                    result
                }
            };
            return written.map_err(|err| format!("LOCAL_WRITE_FAILED: {err}"));
        }

        let now = self.clock.now();
        let dst = normalize(&request.dst_path);
        let mut state = self.state();
        let tree = state.trees.entry(request.dst_endpoint.clone()).or_default();
        add_ancestors(tree, &dst);
        match payload {
            Payload::File(bytes) => {
                tree.insert(dst, Node::File { bytes, modified: now });
            }
            Payload::Tree(items) => {
                for (rel, bytes) in items {
                    let node = match bytes {
                        Some(bytes) => Node::File { bytes, modified: now },
                        None => Node::Dir,
                    };
                    tree.insert(child_path(&dst, &rel), node);
                }
            }
        }
        Ok(())
    }

    async fn read_source(&self, request: &TransferRequest) -> Result<Payload, String> {
        if let Some(store) = self.locals.get(&request.src_endpoint) {
            return store
                .read(&PathBuf::from(&request.src_path))
                .await
                .map(Payload::File)
                .map_err(|_| STATUS_FILE_NOT_FOUND.to_string());
        }

        let src = normalize(&request.src_path);
        let state = self.state();
        let tree = state
            .trees
            .get(&request.src_endpoint)
            .ok_or_else(|| STATUS_FILE_NOT_FOUND.to_string())?;
        match tree.get(&src) {
            None => Err(STATUS_FILE_NOT_FOUND.to_string()),
            Some(Node::File { bytes, .. }) => Ok(Payload::File(bytes.clone())),
            Some(Node::Dir) if !request.recursive => Err(STATUS_IS_A_DIRECTORY.to_string()),
            Some(Node::Dir) => {
                let prefix = format!("{}/", src.trim_end_matches('/'));
                let mut items = vec![(String::new(), None)];
                for (path, node) in tree.iter().filter(|(p, _)| is_below(p, &src)) {
                    let rel = path.strip_prefix(&prefix).unwrap_or(path).to_string();
                    let bytes = match node {
                        Node::File { bytes, .. } => Some(bytes.clone()),
                        Node::Dir => None,
                    };
                    items.push((rel, bytes));
                }
                Ok(Payload::Tree(items))
            }
        }
    }
}

#[async_trait]
impl RemoteEndpoint for InMemoryEndpoint {
    async fn list_directory(
        &self,
        endpoint: &EndpointId,
        path: &str,
        include_hidden: bool,
    ) -> Result<Vec<ListingEntry>, RemoteError> {
        let path = normalize(path);
        let mut state = self.state();
        state.stats.listings += 1;

        let tree = state
            .trees
            .get(endpoint)
            .ok_or_else(|| error(CODE_NOT_FOUND, format!("unknown endpoint {endpoint}")))?;
        match tree.get(&path) {
            None => Err(error(CODE_NOT_FOUND, format!("{path} does not exist"))),
            Some(Node::File { .. }) => Err(error(
                CODE_NOT_DIRECTORY,
                format!("{path} is not a directory"),
            )),
            Some(Node::Dir) => Ok(tree
                .iter()
                .filter(|(p, _)| is_below(p, &path) && parent_of(p) == Some(path.as_str()))
                .map(|(p, node)| match node {
                    Node::Dir => ListingEntry::dir(name_of(p)),
                    Node::File { bytes, modified } => ListingEntry::file(
                        name_of(p),
                        bytes.len() as u64,
                        format_remote_timestamp(*modified),
                    ),
                })
                .filter(|entry| include_hidden || !entry.name.starts_with('.'))
                .collect()),
        }
    }

    async fn submit_transfer(&self, request: TransferRequest) -> Result<JobId, RemoteError> {
        Ok(self.submit(JobKind::Transfer(request)))
    }

    async fn submit_delete(&self, request: DeleteRequest) -> Result<JobId, RemoteError> {
        Ok(self.submit(JobKind::Delete(request)))
    }

    async fn poll_job(&self, job_id: &JobId) -> Result<RemoteJobStatus, RemoteError> {
        let effect = {
            let mut state = self.state();
            state.stats.polls += 1;
            if let Some(err) = state.next_poll_error.take() {
                return Err(err);
            }
            let job = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| error(CODE_NOT_FOUND, format!("unknown task {job_id}")))?;
            if job.status.is_terminal() {
                return Ok(job.status.clone());
            }
            job.polls += 1;
            match job.behavior.clone() {
                JobBehavior::Fail { code } => {
                    job.status = RemoteJobStatus::Failed { code };
                    return Ok(job.status.clone());
                }
                JobBehavior::CompleteAfter(n) if job.polls >= n => job.kind.clone(),
                _ => return Ok(RemoteJobStatus::Pending),
            }
        };

        let status = match self.apply(effect).await {
            None => RemoteJobStatus::Succeeded,
            Some(code) => RemoteJobStatus::Failed { code },
        };
        if let Some(job) = self.state().jobs.get_mut(job_id) {
            job.status = status.clone();
        }
        Ok(status)
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.stats.cancels += 1;
        if state.fail_cancels {
            return Err(error("ServiceUnavailable", "cancel rejected"));
        }
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| error(CODE_NOT_FOUND, format!("unknown task {job_id}")))?;
        if !job.status.is_terminal() {
            job.status = RemoteJobStatus::Failed {
                code: STATUS_CANCELED.to_string(),
            };
        }
        Ok(())
    }

    async fn activate_endpoint(&self, endpoint: &EndpointId) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.stats.activations += 1;
        if state.unavailable.contains(endpoint) {
            return Err(error(
                CODE_ACTIVATION_FAILED,
                format!("endpoint {endpoint} could not be activated"),
            ));
        }
        Ok(())
    }

    async fn rename_object(
        &self,
        endpoint: &EndpointId,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), RemoteError> {
        let (old, new) = (normalize(old_path), normalize(new_path));
        let mut state = self.state();
        let tree = state.trees.entry(endpoint.clone()).or_default();
        if !tree.contains_key(&old) {
            return Err(error(CODE_NOT_FOUND, format!("{old} does not exist")));
        }
        if tree.contains_key(&new) {
            return Err(error(CODE_ALREADY_EXISTS, format!("{new} already exists")));
        }

        let moved: Vec<String> = tree
            .keys()
            .filter(|p| **p == old || is_below(p, &old))
            .cloned()
            .collect();
        for path in moved {
            if let Some(node) = tree.remove(&path) {
                let rest = path.strip_prefix(&old).unwrap_or_default();
                tree.insert(format!("{new}{rest}"), node);
            }
        }
        add_ancestors(tree, &new);
        Ok(())
    }

    async fn mkdir(&self, endpoint: &EndpointId, path: &str) -> Result<(), RemoteError> {
        let path = normalize(path);
        let mut state = self.state();
        let tree = state.trees.entry(endpoint.clone()).or_default();
        if let Some(parent) = parent_of(&path)
            && !matches!(tree.get(parent), Some(Node::Dir))
        {
            return Err(error(CODE_NOT_FOUND, format!("{parent} does not exist")));
        }
        match tree.get(&path) {
            Some(Node::Dir) => Ok(()),
            Some(Node::File { .. }) => Err(error(CODE_MKDIR_EXISTS, format!("{path} exists"))),
            None => {
                tree.insert(path, Node::Dir);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryLocalStore;
    use crate::ports::RemoteErrorKind;
    use std::path::Path;

    fn remote() -> EndpointId {
        EndpointId::new("remote")
    }

    fn seeded() -> InMemoryEndpoint {
        let endpoint = InMemoryEndpoint::new();
        endpoint.add_directory(&remote(), "/~");
        endpoint.put_file(&remote(), "/~/b.txt", b"b", Utc::now());
        endpoint.put_file(&remote(), "/~/.hidden", b"h", Utc::now());
        endpoint.add_directory(&remote(), "/~/a");
        endpoint
    }

    #[tokio::test]
    async fn listing_is_sorted_and_filters_hidden() {
        let endpoint = seeded();
        let names: Vec<String> = endpoint
            .list_directory(&remote(), "/~/", false)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a", "b.txt"]);

        let all = endpoint.list_directory(&remote(), "/~", true).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn listing_errors_use_service_codes() {
        let endpoint = seeded();
        let err = endpoint.list_directory(&remote(), "/~/b.txt", false).await.unwrap_err();
        assert_eq!(err.kind(), RemoteErrorKind::NotDirectory);

        let err = endpoint.list_directory(&remote(), "/~/zzz", false).await.unwrap_err();
        assert_eq!(err.kind(), RemoteErrorKind::NotFound);
    }

    #[tokio::test]
    async fn transfer_lands_on_the_poll_that_completes_it() {
        let local = Arc::new(InMemoryLocalStore::new());
        let endpoint = seeded().with_local_endpoint(EndpointId::new("local"), local.clone());
        endpoint.push_behavior(JobBehavior::CompleteAfter(2));

        let job = endpoint
            .submit_transfer(TransferRequest {
                src_endpoint: remote(),
                src_path: "/~/b.txt".into(),
                dst_endpoint: EndpointId::new("local"),
                dst_path: "/cache/b.txt".into(),
                recursive: false,
                label: "t".into(),
            })
            .await
            .unwrap();

        assert_eq!(endpoint.poll_job(&job).await.unwrap(), RemoteJobStatus::Pending);
        assert!(!local.exists(Path::new("/cache/b.txt")).await.unwrap());
        assert_eq!(endpoint.poll_job(&job).await.unwrap(), RemoteJobStatus::Succeeded);
        assert_eq!(local.read(Path::new("/cache/b.txt")).await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn recursive_copy_and_delete() {
        let endpoint = seeded();
        endpoint.put_file(&remote(), "/~/a/x.txt", b"x", Utc::now());

        let copy = endpoint
            .submit_transfer(TransferRequest {
                src_endpoint: remote(),
                src_path: "/~/a".into(),
                dst_endpoint: remote(),
                dst_path: "/~/c".into(),
                recursive: true,
                label: "cp".into(),
            })
            .await
            .unwrap();
        assert_eq!(endpoint.poll_job(&copy).await.unwrap(), RemoteJobStatus::Succeeded);
        assert_eq!(endpoint.file_bytes(&remote(), "/~/c/x.txt"), Some(b"x".to_vec()));

        let delete = endpoint
            .submit_delete(DeleteRequest {
                endpoint: remote(),
                path: "/~/a".into(),
                recursive: true,
                label: "rm".into(),
            })
            .await
            .unwrap();
        assert_eq!(endpoint.poll_job(&delete).await.unwrap(), RemoteJobStatus::Succeeded);
        assert!(!endpoint.contains(&remote(), "/~/a"));
        assert!(!endpoint.contains(&remote(), "/~/a/x.txt"));
        assert!(endpoint.contains(&remote(), "/~/c/x.txt"));
    }

    #[tokio::test]
    async fn missing_source_fails_the_job() {
        let endpoint = seeded();
        let job = endpoint
            .submit_transfer(TransferRequest {
                src_endpoint: remote(),
                src_path: "/~/nope".into(),
                dst_endpoint: remote(),
                dst_path: "/~/dst".into(),
                recursive: false,
                label: "t".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            endpoint.poll_job(&job).await.unwrap(),
            RemoteJobStatus::Failed {
                code: STATUS_FILE_NOT_FOUND.into()
            }
        );
    }

    #[tokio::test]
    async fn mkdir_is_idempotent_and_rename_moves_subtrees() {
        let endpoint = seeded();
        endpoint.mkdir(&remote(), "/~/a").await.unwrap();
        endpoint.mkdir(&remote(), "/~/new").await.unwrap();
        endpoint.put_file(&remote(), "/~/new/f", b"f", Utc::now());

        let err = endpoint.mkdir(&remote(), "/~/missing/child").await.unwrap_err();
        assert_eq!(err.kind(), RemoteErrorKind::NotFound);

        let err = endpoint.mkdir(&remote(), "/~/new/f").await.unwrap_err();
        assert_eq!(err.code, CODE_MKDIR_EXISTS);
        assert_eq!(err.kind(), RemoteErrorKind::AlreadyExists);

        endpoint.rename_object(&remote(), "/~/new", "/~/renamed").await.unwrap();
        assert!(endpoint.contains(&remote(), "/~/renamed/f"));
        assert!(!endpoint.contains(&remote(), "/~/new"));

        let err = endpoint.rename_object(&remote(), "/~/b.txt", "/~/a").await.unwrap_err();
        assert_eq!(err.kind(), RemoteErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn cancel_terminates_pending_jobs() {
        let endpoint = seeded();
        endpoint.push_behavior(JobBehavior::Never);
        let job = endpoint
            .submit_delete(DeleteRequest {
                endpoint: remote(),
                path: "/~/b.txt".into(),
                recursive: false,
                label: "rm".into(),
            })
            .await
            .unwrap();
        assert_eq!(endpoint.poll_job(&job).await.unwrap(), RemoteJobStatus::Pending);

        endpoint.cancel_job(&job).await.unwrap();
        assert!(endpoint.poll_job(&job).await.unwrap().is_terminal());
        assert!(endpoint.contains(&remote(), "/~/b.txt"));
        assert_eq!(endpoint.stats().cancels, 1);
    }
}
