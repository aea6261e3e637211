use serde::{Deserialize, Serialize};

/// Running totals of the cache stager, for status views and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagerCounts {
    /// Transfer jobs submitted (stage and publish).
    pub submitted: usize,
    /// Calls that awaited another caller's in-flight stage.
    pub joined: usize,
    pub cache_hits: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancel_attempts: usize,
}
