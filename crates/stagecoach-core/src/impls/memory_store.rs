//! InMemoryLocalStore - 開発用・テスト用のローカルキャッシュ
//!
//! # 実装詳細
//! - files: `BTreeMap<PathBuf, Vec<u8>>`
//! - dirs: `BTreeSet<PathBuf>`, parents are created implicitly on write
//! - one `std::sync::Mutex`, never held across an await

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::ports::LocalStore;

#[derive(Default)]
struct Tree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl Tree {
    fn add_ancestors(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }
}

#[derive(Default)]
pub struct InMemoryLocalStore {
    tree: Mutex<Tree>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All file paths, sorted. Handy in assertions.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.tree().files.keys().cloned().collect()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.tree()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut tree = self.tree();
        if tree.is_dir(path) {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", path.display()),
            ));
        }
        tree.add_ancestors(path);
        tree.files.insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        let tree = self.tree();
        Ok(tree.files.contains_key(path) || tree.is_dir(path))
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.tree();
        if tree.files.remove(path).is_some() {
            return Ok(());
        }
        if !tree.dirs.remove(path) {
            return Err(not_found(path));
        }
        tree.files.retain(|p, _| !p.starts_with(path));
        tree.dirs.retain(|p| !p.starts_with(path));
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut tree = self.tree();
        if let Some(bytes) = tree.files.remove(from) {
            tree.add_ancestors(to);
            tree.files.insert(to.to_path_buf(), bytes);
            return Ok(());
        }
        if !tree.is_dir(from) {
            return Err(not_found(from));
        }

        let moved_files: Vec<(PathBuf, Vec<u8>)> = tree
            .files
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, b)| (p.clone(), b.clone()))
            .collect();
        let moved_dirs: Vec<PathBuf> = tree
            .dirs
            .iter()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();

        for (old, bytes) in moved_files {
            tree.files.remove(&old);
            if let Ok(rest) = old.strip_prefix(from) {
                tree.files.insert(to.join(rest), bytes);
            }
        }
        for old in moved_dirs {
            tree.dirs.remove(&old);
            if let Ok(rest) = old.strip_prefix(from) {
                let new = if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                };
                tree.dirs.insert(new);
            }
        }
        tree.add_ancestors(to);
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.tree();
        tree.add_ancestors(path);
        tree.dirs.insert(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_parents() {
        let store = InMemoryLocalStore::new();
        store.write(Path::new("/c/a/b.txt"), b"x").await.unwrap();

        assert!(store.exists(Path::new("/c/a")).await.unwrap());
        assert_eq!(store.read(Path::new("/c/a/b.txt")).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn remove_takes_the_whole_tree() {
        let store = InMemoryLocalStore::new();
        store.write(Path::new("/c/d/1"), b"1").await.unwrap();
        store.write(Path::new("/c/d/e/2"), b"2").await.unwrap();
        store.write(Path::new("/c/keep"), b"k").await.unwrap();

        store.remove(Path::new("/c/d")).await.unwrap();
        assert_eq!(store.file_paths(), vec![PathBuf::from("/c/keep")]);

        let err = store.remove(Path::new("/c/d")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn rename_moves_directories() {
        let store = InMemoryLocalStore::new();
        store.write(Path::new("/c/old/x.txt"), b"x").await.unwrap();

        store.rename(Path::new("/c/old"), Path::new("/c/new")).await.unwrap();
        assert!(!store.exists(Path::new("/c/old")).await.unwrap());
        assert_eq!(store.read(Path::new("/c/new/x.txt")).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn missing_reads_are_not_found() {
        let store = InMemoryLocalStore::new();
        let err = store.read(Path::new("/nope")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
