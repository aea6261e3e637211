//! Local filesystem backend for the staging cache.
//!
//! Writes go to a sibling temp file that is synced and renamed over the
//! target, so a reader sees either the old or the new content.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

use crate::ports::LocalStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLocalStore;

impl TokioLocalStore {
    pub fn new() -> Self {
        Self
    }

    async fn ensure_parent(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", Ulid::new()))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl LocalStore for TokioLocalStore {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path).await
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.ensure_parent(path).await?;
        let tmp = temp_sibling(path);

        let written = match write_synced(&tmp, bytes).await {
            Ok(()) => fs::rename(&tmp, path).await,
            Err(err) => Err(err),
        };
        if written.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        written
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        fs::try_exists(path).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = fs::metadata(path).await?; // propagates NotFound cleanly
        if meta.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.ensure_parent(to).await?;
        fs::rename(from, to).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TokioLocalStore) {
        (TempDir::new().unwrap(), TokioLocalStore::new())
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let (dir, store) = setup();
        let path = dir.path().join("deep/nested/file.txt");
        store.write(&path, b"nested").await.unwrap();
        assert_eq!(store.read(&path).await.unwrap(), b"nested");
    }

    #[tokio::test]
    async fn test_write_replaces_and_leaves_no_temp_files() {
        let (dir, store) = setup();
        let path = dir.path().join("a.txt");
        store.write(&path, b"one").await.unwrap();
        store.write(&path, b"two").await.unwrap();
        assert_eq!(store.read(&path).await.unwrap(), b"two");

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.txt")]);
    }

    #[tokio::test]
    async fn test_remove_file_and_tree() {
        let (dir, store) = setup();
        let file = dir.path().join("f.txt");
        let tree = dir.path().join("t");
        store.write(&file, b"f").await.unwrap();
        store.write(&tree.join("x/y.txt"), b"y").await.unwrap();

        store.remove(&file).await.unwrap();
        store.remove(&tree).await.unwrap();
        assert!(!store.exists(&file).await.unwrap());
        assert!(!store.exists(&tree).await.unwrap());

        let err = store.remove(&file).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_rename_creates_target_parent() {
        let (dir, store) = setup();
        let from = dir.path().join("a.txt");
        let to = dir.path().join("moved/b.txt");
        store.write(&from, b"a").await.unwrap();

        store.rename(&from, &to).await.unwrap();
        assert!(!store.exists(&from).await.unwrap());
        assert_eq!(store.read(&to).await.unwrap(), b"a");
    }
}
