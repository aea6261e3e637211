//! PathTranslator - 論理パスの解決
//!
//! Maps a logical, root-relative path onto the remote endpoint and onto the
//! local cache directory. Pure string work, no I/O.

use std::path::PathBuf;

use crate::config::ContentsConfig;

/// A logical path together with its remote and local counterparts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Normalized: no leading/trailing slash, no `.`/`..`, empty for root.
    pub logical: String,
    pub remote: String,
    pub local: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PathTranslator {
    remote_base: String,
    local_base: PathBuf,
}

impl PathTranslator {
    pub fn new(remote_base_path: &str, local_cache_directory: impl Into<PathBuf>) -> Self {
        let trimmed = remote_base_path.trim_end_matches('/');
        Self {
            remote_base: if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            },
            local_base: local_cache_directory.into(),
        }
    }

    pub fn from_config(config: &ContentsConfig) -> Self {
        Self::new(&config.remote_base_path, config.local_cache_directory.clone())
    }

    pub fn remote_base(&self) -> &str {
        &self.remote_base
    }

    pub fn local_base(&self) -> &PathBuf {
        &self.local_base
    }

    pub fn resolve(&self, logical: &str) -> ResolvedPath {
        let logical = Self::normalize(logical);

        let remote = if logical.is_empty() {
            self.remote_base.clone()
        } else if self.remote_base == "/" {
            format!("/{logical}")
        } else {
            format!("{}/{}", self.remote_base, logical)
        };

        let mut local = self.local_base.clone();
        for segment in logical.split('/').filter(|s| !s.is_empty()) {
            local.push(segment);
        }

        ResolvedPath {
            logical,
            remote,
            local,
        }
    }

    /// Collapse separators and dot segments. `..` never climbs above the root.
    pub fn normalize(logical: &str) -> String {
        let mut segments: Vec<&str> = Vec::new();
        for segment in logical.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
        segments.join("/")
    }

    /// Parent of a logical path (root is its own parent).
    pub fn parent(logical: &str) -> String {
        let normalized = Self::normalize(logical);
        match normalized.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        }
    }

    pub fn leaf(logical: &str) -> String {
        let normalized = Self::normalize(logical);
        match normalized.rsplit_once('/') {
            Some((_, leaf)) => leaf.to_string(),
            None => normalized,
        }
    }

    pub fn join(parent: &str, name: &str) -> String {
        Self::normalize(&format!("{parent}/{name}"))
    }

    /// True when `path` equals `prefix` or lies underneath it.
    pub fn is_within(path: &str, prefix: &str) -> bool {
        prefix.is_empty()
            || path == prefix
            || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
    }
}
