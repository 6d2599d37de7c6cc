//! Scheduler Configuration
//!
//! Configuration is plain data so hosts can load it alongside the rest of
//! their settings. Every field has a default, so an empty JSON object is a
//! valid configuration.

use serde::{Deserialize, Serialize};

/// Default cycle threshold: how many times one watcher may be re-queued
/// within a single flush before the flush is aborted.
pub const DEFAULT_MAX_UPDATE_COUNT: u32 = 100;

/// How a scheduled flush is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Hand the flush to the scheduler's deferrer.
    #[default]
    Deferred,

    /// Flush inline on the first enqueue. Intended for tests and debugging.
    Sync,
}

/// Settings for a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Re-queue count above which a flush is aborted as a runaway loop.
    pub max_update_count: u32,

    /// Whether flushes are deferred or run inline.
    pub flush_mode: FlushMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_update_count: DEFAULT_MAX_UPDATE_COUNT,
            flush_mode: FlushMode::Deferred,
        }
    }
}

impl SchedulerConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Configuration that flushes inline, for deterministic tests.
    pub fn sync() -> Self {
        Self {
            flush_mode: FlushMode::Sync,
            ..Self::default()
        }
    }

    pub fn is_sync(&self) -> bool {
        self.flush_mode == FlushMode::Sync
    }
}
