//! ContentModelBuilder - ContentModel の組み立て
//!
//! # 学習ポイント
//! - metadata models come from listing entries alone (no transfer)
//! - content models come from bytes already staged in the local cache
//! - a notebook that fails to parse is an error, never a plain file

use std::path::Path;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::app::paths::PathTranslator;
use crate::domain::listing::ListingEntry;
use crate::domain::model::{
    Content, ContentFormat, ContentKind, ContentModel, NOTEBOOK_SUFFIX, epoch,
};
use crate::error::{ContentsError, Result};
use crate::ports::LocalStore;

const TEXT_FALLBACK_MIMETYPE: &str = "text/plain";
const BINARY_FALLBACK_MIMETYPE: &str = "application/octet-stream";

/// First notebook format with a top-level `cells` array; older ones nest
/// cells under `worksheets`.
const FLAT_CELLS_NBFORMAT: u64 = 4;

fn guess_mimetype(path: &str) -> Option<&'static str> {
    mime_guess::from_path(path).first_raw()
}

pub struct ContentModelBuilder {
    local: Arc<dyn LocalStore>,
}

impl ContentModelBuilder {
    pub fn new(local: Arc<dyn LocalStore>) -> Self {
        Self { local }
    }

    /// Metadata-only model for one child of `parent`.
    ///
    /// A `dir` entry is a Directory even when its name ends in `.ipynb`.
    pub fn from_listing_entry(parent: &str, entry: &ListingEntry) -> ContentModel {
        let path = PathTranslator::join(parent, &entry.name);
        let kind = if entry.is_dir() {
            ContentKind::Directory
        } else if path.ends_with(NOTEBOOK_SUFFIX) {
            ContentKind::Notebook
        } else {
            ContentKind::File
        };
        Self::metadata_model(&path, kind, entry)
    }

    /// Metadata-only model of `path` treated as `kind`.
    pub fn metadata_model(path: &str, kind: ContentKind, entry: &ListingEntry) -> ContentModel {
        let mut model = match kind {
            ContentKind::Directory => return ContentModel::directory(path),
            ContentKind::Notebook => ContentModel::notebook(path),
            ContentKind::File => {
                let mut file = ContentModel::file(path);
                file.mimetype = guess_mimetype(path).map(str::to_string);
                file.format = match &file.mimetype {
                    Some(mimetype) if mimetype.starts_with("text/") => Some(ContentFormat::Text),
                    _ => None,
                };
                file
            }
        };
        model = model.with_modified(Self::entry_modified(path, entry));
        model.size = Some(entry.size);
        model
    }

    /// Listing timestamp of an entry; epoch when absent or unparsable.
    pub fn entry_modified(path: &str, entry: &ListingEntry) -> DateTime<Utc> {
        match entry.modified_at() {
            Ok(Some(at)) => at,
            Ok(None) => epoch(),
            Err(err) => {
                warn!(%path, raw = ?entry.last_modified, error = %err, "unparsable listing timestamp");
                epoch()
            }
        }
    }

    /// Directory model; with content, metadata-only children in listing order.
    pub fn directory_model(path: &str, entries: &[ListingEntry], with_content: bool) -> ContentModel {
        let mut model = ContentModel::directory(path);
        if with_content {
            let children = entries
                .iter()
                .map(|entry| Self::from_listing_entry(path, entry))
                .collect();
            model.content = Some(Content::Entries(children));
        }
        model
    }

    /// Model with content built from the staged copy at `local_path`.
    pub async fn from_staged_file(
        &self,
        path: &str,
        local_path: &Path,
        kind: ContentKind,
        requested_format: Option<ContentFormat>,
    ) -> Result<ContentModel> {
        let bytes = self.local.read(local_path).await?;
        let size = bytes.len() as u64;

        let mut model = match kind {
            ContentKind::Directory => {
                return Err(ContentsError::InvalidRequest(format!(
                    "'{path}' is a directory, not a staged file"
                )));
            }
            ContentKind::Notebook => {
                let text = String::from_utf8(bytes).map_err(|_| ContentsError::InvalidDocument {
                    path: path.to_string(),
                    reason: "not UTF-8".to_string(),
                })?;
                let mut model = ContentModel::notebook(path);
                model.content = Some(Content::Document(parse_notebook(path, &text)?));
                model
            }
            ContentKind::File => {
                let (format, content) = decode_file(path, bytes, requested_format)?;
                let mut model = ContentModel::file(path);
                model.mimetype = Some(
                    guess_mimetype(path)
                        .unwrap_or(match format {
                            ContentFormat::Text => TEXT_FALLBACK_MIMETYPE,
                            _ => BINARY_FALLBACK_MIMETYPE,
                        })
                        .to_string(),
                );
                model.format = Some(format);
                model.content = Some(Content::Text(content));
                model
            }
        };
        model.size = Some(size);
        Ok(model)
    }

    /// Bytes to upload for a save request. The model must already carry content.
    pub fn payload_bytes(path: &str, model: &ContentModel) -> Result<Vec<u8>> {
        let invalid = |reason: &str| ContentsError::InvalidRequest(format!("'{path}': {reason}"));

        match (model.kind, &model.content) {
            (ContentKind::File, Some(Content::Text(content))) => match model.format {
                Some(ContentFormat::Text) => Ok(content.as_bytes().to_vec()),
                Some(ContentFormat::Base64) => {
                    let compact: String =
                        content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                    STANDARD
                        .decode(compact)
                        .map_err(|e| invalid(&format!("bad base64 content: {e}")))
                }
                _ => Err(invalid("file content requires format text or base64")),
            },
            (ContentKind::Notebook, Some(Content::Document(doc))) => {
                validate_notebook(path, doc)?;
                serde_json::to_vec_pretty(doc).map_err(|e| ContentsError::InvalidDocument {
                    path: path.to_string(),
                    reason: e.to_string(),
                })
            }
            (ContentKind::Directory, _) => Err(invalid("directories have no payload")),
            (_, None) => Err(invalid("no content provided")),
            _ => Err(invalid("content does not match the model type")),
        }
    }
}

fn decode_file(
    path: &str,
    bytes: Vec<u8>,
    requested: Option<ContentFormat>,
) -> Result<(ContentFormat, String)> {
    match requested {
        Some(ContentFormat::Base64) => Ok((ContentFormat::Base64, STANDARD.encode(&bytes))),
        Some(ContentFormat::Json) => Err(ContentsError::InvalidRequest(format!(
            "'{path}': files cannot be read as json"
        ))),
        Some(ContentFormat::Text) => match String::from_utf8(bytes) {
            Ok(text) => Ok((ContentFormat::Text, text)),
            Err(_) => Err(ContentsError::InvalidEncoding {
                path: path.to_string(),
            }),
        },
        None => match String::from_utf8(bytes) {
            Ok(text) => Ok((ContentFormat::Text, text)),
            Err(err) => Ok((ContentFormat::Base64, STANDARD.encode(err.into_bytes()))),
        },
    }
}

fn parse_notebook(path: &str, text: &str) -> Result<Value> {
    let doc: Value = serde_json::from_str(text).map_err(|e| ContentsError::InvalidDocument {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    validate_notebook(path, &doc)?;
    Ok(doc)
}

fn validate_notebook(path: &str, doc: &Value) -> Result<()> {
    let invalid = |reason: &str| ContentsError::InvalidDocument {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let object = doc.as_object().ok_or_else(|| invalid("not a JSON object"))?;
    let version = object
        .get("nbformat")
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid("missing integer nbformat"))?;
    let has_array = |key: &str| object.get(key).is_some_and(Value::is_array);

    // Older documents pass through unchanged; upgrading them is the host's job.
    if has_array("cells") || (version < FLAT_CELLS_NBFORMAT && has_array("worksheets")) {
        Ok(())
    } else {
        Err(invalid("missing cells array"))
    }
}
