//! Session configuration.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use sealfs_proto::DEFAULT_LOG_NAME;

use crate::error::SealError;

/// Chain length used when none is configured.
pub const DEFAULT_NRATCHET: i64 = 7;

/// Pre-derived keys kept ready for the write path.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Burn actors per session: one fast, the rest slow.
pub const DEFAULT_BURN_ACTORS: usize = 3;

/// Burn scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnConfig {
    /// Total number of burn actors (at least one).
    pub actors: usize,
    /// Poll period of the fast actor.
    pub fast_period: Duration,
}

impl Default for BurnConfig {
    fn default() -> Self {
        Self { actors: DEFAULT_BURN_ACTORS, fast_period: Duration::from_secs(1) }
    }
}

/// Configuration consumed at session start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory whose files are sealed.
    pub tree_dir: PathBuf,
    /// Live keystream file.
    pub keystream_path: PathBuf,
    /// Log file; `<tree_dir>/.SEALFS.LOG` when unset.
    pub log_path: Option<PathBuf>,
    /// Keys derived per chunk. Values below one are treated as one.
    pub nratchet: i64,
    /// Make every payload and log write durable before returning.
    pub sync_io: bool,
    /// Capacity of the key delivery queue, rounded up to a power of two.
    pub queue_capacity: usize,
    /// Burn scheduler tuning.
    pub burn: BurnConfig,
}

impl SessionConfig {
    /// Configuration with defaults for everything but the two paths.
    pub fn new(tree_dir: impl Into<PathBuf>, keystream_path: impl Into<PathBuf>) -> Self {
        Self {
            tree_dir: tree_dir.into(),
            keystream_path: keystream_path.into(),
            log_path: None,
            nratchet: DEFAULT_NRATCHET,
            sync_io: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            burn: BurnConfig::default(),
        }
    }

    /// Set the chain length.
    #[must_use]
    pub fn with_nratchet(mut self, nratchet: i64) -> Self {
        self.nratchet = nratchet;
        self
    }

    /// Set an explicit log path.
    #[must_use]
    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(log_path.into());
        self
    }

    /// Enable or disable synchronous I/O.
    #[must_use]
    pub fn with_sync_io(mut self, sync_io: bool) -> Self {
        self.sync_io = sync_io;
        self
    }

    /// Set the burn scheduler tuning.
    #[must_use]
    pub fn with_burn(mut self, burn: BurnConfig) -> Self {
        self.burn = burn;
        self
    }

    /// Log file location.
    pub fn log_path(&self) -> PathBuf {
        self.log_path.clone().unwrap_or_else(|| self.tree_dir.join(DEFAULT_LOG_NAME))
    }

    /// Chain length, normalized to at least one.
    pub fn nratchet(&self) -> u64 {
        if self.nratchet <= 0 { 1 } else { self.nratchet as u64 }
    }

    /// Queue capacity as a power of two.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1).next_power_of_two()
    }

    /// Reject configurations the session cannot start with.
    pub fn validate(&self) -> Result<(), SealError> {
        if self.keystream_path.as_os_str().is_empty() {
            return Err(SealError::Config("missing keystream path".to_string()));
        }
        if self.burn.actors == 0 {
            return Err(SealError::Config("at least one burn actor is required".to_string()));
        }
        if self.burn.fast_period.is_zero() {
            return Err(SealError::Config("burn period must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Whether `path` names the log file inside the tree.
    pub(crate) fn is_log_file(&self, path: &Path) -> bool {
        path == self.log_path()
    }
}
