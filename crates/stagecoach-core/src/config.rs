//! Store configuration management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ids::EndpointId;
use crate::error::{ContentsError, Result};

/// Public endpoint used when none is configured.
pub const DEFAULT_REMOTE_ENDPOINT_ID: &str = "ddb59aef-6d04-11e5-ba46-22000b92c6ec";

pub const DEFAULT_REMOTE_BASE_PATH: &str = "/~/";

pub const DEFAULT_TRANSFER_API_URL: &str = "https://transfer.api.globus.org/v0.10";

/// Content store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentsConfig {
    /// Endpoint holding the documents
    pub remote_endpoint_id: EndpointId,

    /// Endpoint that writes into `local_cache_directory`
    pub local_endpoint_id: EndpointId,

    /// Remote directory mapped to the logical root
    pub remote_base_path: String,

    /// Local directory mirroring the logical root
    pub local_cache_directory: PathBuf,

    /// Upper bound for one staging, publish, delete or copy job
    pub staging_timeout_seconds: u64,

    pub staging_poll_interval_seconds: u64,

    /// Whether directory listings include dot entries
    pub include_hidden: bool,
}

impl ContentsConfig {
    /// Load configuration from `STAGECOACH_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            remote_endpoint_id: lookup("STAGECOACH_REMOTE_ENDPOINT_ID")
                .map(EndpointId::from)
                .unwrap_or(defaults.remote_endpoint_id),
            local_endpoint_id: lookup("STAGECOACH_LOCAL_ENDPOINT_ID")
                .map(EndpointId::from)
                .unwrap_or(defaults.local_endpoint_id),
            remote_base_path: lookup("STAGECOACH_REMOTE_BASE_PATH")
                .unwrap_or(defaults.remote_base_path),
            local_cache_directory: lookup("STAGECOACH_LOCAL_CACHE_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_cache_directory),
            staging_timeout_seconds: parse_var(
                &lookup,
                "STAGECOACH_STAGING_TIMEOUT_SECONDS",
                defaults.staging_timeout_seconds,
            )?,
            staging_poll_interval_seconds: parse_var(
                &lookup,
                "STAGECOACH_STAGING_POLL_INTERVAL_SECONDS",
                defaults.staging_poll_interval_seconds,
            )?,
            include_hidden: lookup("STAGECOACH_INCLUDE_HIDDEN")
                .map(|s| s.trim().to_lowercase() == "true")
                .unwrap_or(defaults.include_hidden),
        })
    }

    pub fn staging_timeout(&self) -> Duration {
        Duration::from_secs(self.staging_timeout_seconds)
    }

    pub fn staging_poll_interval(&self) -> Duration {
        Duration::from_secs(self.staging_poll_interval_seconds)
    }

    /// Reject configurations that would only fail later, mid-request.
    pub fn validate(&self) -> Result<()> {
        if self.remote_endpoint_id.is_empty() {
            return Err(config_error("remote_endpoint_id is empty"));
        }
        if self.local_endpoint_id.is_empty() {
            return Err(config_error("local_endpoint_id is empty"));
        }
        if !self.remote_base_path.starts_with('/') {
            return Err(config_error("remote_base_path must be absolute"));
        }
        if self.local_cache_directory.as_os_str().is_empty() {
            return Err(config_error("local_cache_directory is empty"));
        }
        if self.staging_timeout_seconds == 0 {
            return Err(config_error("staging_timeout_seconds must be positive"));
        }
        if self.staging_poll_interval_seconds == 0 {
            return Err(config_error("staging_poll_interval_seconds must be positive"));
        }
        if self.staging_poll_interval_seconds > self.staging_timeout_seconds {
            return Err(config_error(
                "staging_poll_interval_seconds exceeds staging_timeout_seconds",
            ));
        }
        Ok(())
    }
}

impl Default for ContentsConfig {
    fn default() -> Self {
        Self {
            remote_endpoint_id: EndpointId::new(DEFAULT_REMOTE_ENDPOINT_ID),
            local_endpoint_id: EndpointId::new(""),
            remote_base_path: DEFAULT_REMOTE_BASE_PATH.to_string(),
            local_cache_directory: std::env::temp_dir().join("stagecoach"),
            staging_timeout_seconds: 60,
            staging_poll_interval_seconds: 10,
            include_hidden: false,
        }
    }
}

/// Connection settings for the Transfer REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferApiConfig {
    pub base_url: String,

    /// Bearer token, acquired elsewhere
    pub access_token: String,
}

impl TransferApiConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let access_token = lookup("STAGECOACH_ACCESS_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| config_error("STAGECOACH_ACCESS_TOKEN is not set"))?;
        Ok(Self {
            base_url: lookup("STAGECOACH_TRANSFER_API_URL")
                .unwrap_or_else(|| DEFAULT_TRANSFER_API_URL.to_string()),
            access_token,
        })
    }
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<u64> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| config_error(&format!("Invalid {key} value"))),
        None => Ok(default),
    }
}

fn config_error(message: &str) -> ContentsError {
    ContentsError::Config(message.to_string())
}
