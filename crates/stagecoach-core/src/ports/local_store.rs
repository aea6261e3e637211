//! LocalStore port - ローカルキャッシュの抽象化
//!
//! The staging cache lives on a local filesystem the transfer service also
//! writes to. Everything the store itself touches goes through this trait so
//! tests can swap in an in-memory tree.

use std::io;
use std::path::Path;

use async_trait::async_trait;

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the file at `path`, creating missing parents. Readers never
    /// observe a partially written file.
    async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Remove a file or a whole directory tree. Missing paths are `NotFound`.
    async fn remove(&self, path: &Path) -> io::Result<()>;

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}
