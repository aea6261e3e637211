//! Domain identifiers (strongly-typed IDs).
//!
//! The transfer service hands out opaque string identifiers for endpoints
//! and jobs. Both are carried as `Id<T>`, where `T` is a zero-sized marker:
//! the two can never be mixed up at a call site, and the marker costs no
//! memory at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each ID kind.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used by `Debug`-style labels (e.g. `"job:"`).
    fn label() -> &'static str;
}

/// Generic opaque identifier.
///
/// `Display` prints the raw value because that is what the remote API
/// expects back verbatim.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    /// Fresh locally generated id (ULID based). Used by in-process endpoints.
    pub fn generate() -> Self {
        Self::new(Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::label(), self.value)
    }
}

// ========================================
// Markers
// ========================================

/// Endpoint marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {}

impl IdMarker for Endpoint {
    fn label() -> &'static str {
        "endpoint:"
    }
}

/// Transfer job marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn label() -> &'static str {
        "job:"
    }
}

/// Identifier of a storage endpoint on the transfer service.
pub type EndpointId = Id<Endpoint>;

/// Identifier of an asynchronous transfer or delete job.
pub type JobId = Id<Job>;
