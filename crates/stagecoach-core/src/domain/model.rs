//! Content model: the unit returned to and accepted from the host.
//!
//! The JSON shape follows the notebook-server contents API (`type`,
//! `created`, `last_modified`, `format`, `mimetype`, `content`, `writable`),
//! so a host can forward it without reshaping.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ContentsError;

/// Suffix that marks a notebook document.
pub const NOTEBOOK_SUFFIX: &str = ".ipynb";

/// Timestamp used for entries without a remote mtime (directories).
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Kind of entity a model describes. Mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    File,
    Directory,
    Notebook,
}

impl ContentKind {
    /// Suffix-based guess used when the caller gives no hint.
    pub fn infer(path: &str) -> Self {
        if path.trim_end_matches('/').ends_with(NOTEBOOK_SUFFIX) {
            ContentKind::Notebook
        } else {
            ContentKind::File
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::File => "file",
            ContentKind::Directory => "directory",
            ContentKind::Notebook => "notebook",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = ContentsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(ContentKind::File),
            "directory" => Ok(ContentKind::Directory),
            "notebook" => Ok(ContentKind::Notebook),
            other => Err(ContentsError::InvalidRequest(format!(
                "unhandled contents type: {other}"
            ))),
        }
    }
}

/// Serialization format of `content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Json,
    Text,
    Base64,
}

impl ContentFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentFormat::Json => "json",
            ContentFormat::Text => "text",
            ContentFormat::Base64 => "base64",
        }
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentFormat {
    type Err = ContentsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ContentFormat::Json),
            "text" => Ok(ContentFormat::Text),
            "base64" => Ok(ContentFormat::Base64),
            other => Err(ContentsError::InvalidRequest(format!(
                "unknown content format: {other}"
            ))),
        }
    }
}

/// Payload of a model. Which variant is valid depends on the model's kind.
///
/// File content is a string for both `text` and `base64`; the model's
/// `format` says which.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Directory children, metadata only.
    Entries(Vec<ContentModel>),

    Text(String),

    /// Parsed notebook document.
    Document(serde_json::Value),
}

fn default_writable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentModel {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub path: String,

    #[serde(rename = "type")]
    pub kind: ContentKind,

    #[serde(default = "epoch")]
    pub created: DateTime<Utc>,

    #[serde(default = "epoch")]
    pub last_modified: DateTime<Utc>,

    #[serde(default)]
    pub format: Option<ContentFormat>,

    #[serde(default)]
    pub mimetype: Option<String>,

    #[serde(default)]
    pub content: Option<Content>,

    #[serde(default = "default_writable")]
    pub writable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ContentModel {
    fn base(path: &str, kind: ContentKind) -> Self {
        Self {
            name: leaf_name(path).to_string(),
            path: path.to_string(),
            kind,
            created: epoch(),
            last_modified: epoch(),
            format: None,
            mimetype: None,
            content: None,
            writable: true,
            size: None,
        }
    }

    /// Directory model with the epoch sentinel timestamps.
    pub fn directory(path: &str) -> Self {
        let mut model = Self::base(path, ContentKind::Directory);
        model.format = Some(ContentFormat::Json);
        model
    }

    pub fn notebook(path: &str) -> Self {
        let mut model = Self::base(path, ContentKind::Notebook);
        model.format = Some(ContentFormat::Json);
        model
    }

    pub fn file(path: &str) -> Self {
        Self::base(path, ContentKind::File)
    }

    /// Set both timestamps (the service reports a single mtime).
    pub fn with_modified(mut self, at: DateTime<Utc>) -> Self {
        self.created = at;
        self.last_modified = at;
        self
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Check the kind / format / mimetype / content table.
    pub fn validate(&self) -> Result<(), ContentsError> {
        let invalid = |reason: String| {
            Err(ContentsError::InvalidRequest(format!(
                "invalid {} model for '{}': {reason}",
                self.kind, self.path
            )))
        };

        match self.kind {
            ContentKind::Directory | ContentKind::Notebook => {
                if self.format != Some(ContentFormat::Json) {
                    return invalid(format!("format must be json, got {:?}", self.format));
                }
                if let Some(mimetype) = &self.mimetype {
                    return invalid(format!("mimetype must be null, got {mimetype}"));
                }
            }
            ContentKind::File => {
                if self.format == Some(ContentFormat::Json) {
                    return invalid("format must be text or base64".to_string());
                }
                if self.content.is_some() && self.format.is_none() {
                    return invalid("content present without a format".to_string());
                }
            }
        }

        match (self.kind, &self.content) {
            (_, None) => Ok(()),
            (ContentKind::Directory, Some(Content::Entries(children))) => {
                match children.iter().find(|child| child.content.is_some()) {
                    Some(child) => invalid(format!("child '{}' carries content", child.name)),
                    None => Ok(()),
                }
            }
            (ContentKind::Notebook, Some(Content::Document(doc))) if doc.is_object() => Ok(()),
            (ContentKind::File, Some(Content::Text(_))) => Ok(()),
            (_, Some(_)) => invalid("content does not match the model type".to_string()),
        }
    }
}

/// Last segment of a slash separated path (empty for the root).
pub fn leaf_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("a/b.ipynb", ContentKind::Notebook)]
    #[case("a/b.ipynb/", ContentKind::Notebook)]
    #[case("a/b.txt", ContentKind::File)]
    #[case("notes", ContentKind::File)]
    fn infers_kind_from_suffix(#[case] path: &str, #[case] kind: ContentKind) {
        assert_eq!(ContentKind::infer(path), kind);
    }

    #[test]
    fn base_models_have_expected_shape() {
        let dir = ContentModel::directory("a/b");
        assert_eq!(dir.name, "b");
        assert_eq!(dir.format, Some(ContentFormat::Json));
        assert_eq!(dir.created, epoch());
        assert!(dir.writable);
        dir.validate().unwrap();

        let root = ContentModel::directory("");
        assert_eq!(root.name, "");
    }

    #[rstest]
    #[case::dir_text_format({
        let mut m = ContentModel::directory("d");
        m.format = Some(ContentFormat::Text);
        m
    })]
    #[case::dir_with_mimetype({
        let mut m = ContentModel::directory("d");
        m.mimetype = Some("text/plain".into());
        m
    })]
    #[case::dir_with_nested_content({
        let mut child = ContentModel::file("d/a.txt");
        child.format = Some(ContentFormat::Text);
        child.content = Some(Content::Text("x".into()));
        let mut m = ContentModel::directory("d");
        m.content = Some(Content::Entries(vec![child]));
        m
    })]
    #[case::notebook_without_json({
        let mut m = ContentModel::notebook("n.ipynb");
        m.format = None;
        m
    })]
    #[case::notebook_with_text_content({
        let mut m = ContentModel::notebook("n.ipynb");
        m.content = Some(Content::Text("{}".into()));
        m
    })]
    #[case::file_json_format({
        let mut m = ContentModel::file("f");
        m.format = Some(ContentFormat::Json);
        m
    })]
    #[case::file_content_without_format({
        let mut m = ContentModel::file("f");
        m.content = Some(Content::Text("x".into()));
        m
    })]
    fn rejects_mismatched_models(#[case] model: ContentModel) {
        let err = model.validate().unwrap_err();
        assert!(matches!(err, ContentsError::InvalidRequest(_)), "{err}");
    }

    #[test]
    fn serializes_to_contents_api_shape() {
        let mut model = ContentModel::file("docs/readme.md");
        model.format = Some(ContentFormat::Text);
        model.mimetype = Some("text/markdown".into());
        model.content = Some(Content::Text("# hi".into()));

        let v = serde_json::to_value(&model).unwrap();
        assert_eq!(v["type"], "file");
        assert_eq!(v["name"], "readme.md");
        assert_eq!(v["format"], "text");
        assert_eq!(v["content"], "# hi");
        assert_eq!(v["created"], "1970-01-01T00:00:00Z");
        assert!(v.get("size").is_none());
    }

    #[test]
    fn deserializes_host_save_payloads() {
        let nb: ContentModel = serde_json::from_value(json!({
            "type": "notebook",
            "format": "json",
            "content": {"cells": [], "metadata": {}, "nbformat": 4, "nbformat_minor": 5}
        }))
        .unwrap();
        assert!(matches!(nb.content, Some(Content::Document(_))));
        nb.validate().unwrap();

        let dir: ContentModel = serde_json::from_value(json!({"type": "directory", "format": "json"})).unwrap();
        assert!(dir.writable);
        assert_eq!(dir.content, None);

        let file: ContentModel = serde_json::from_value(json!({
            "type": "file", "format": "base64", "content": "AAE="
        }))
        .unwrap();
        assert_eq!(file.content, Some(Content::Text("AAE=".into())));
    }

    #[test]
    fn unknown_kind_is_invalid_request() {
        let err = "symlink".parse::<ContentKind>().unwrap_err();
        assert!(matches!(err, ContentsError::InvalidRequest(_)));
    }
}
