//! Error types for resync-core.
//!
//! Process and infrastructure failures are not healed here. They propagate
//! to the scenario runner and abort the run, leaving diagnosis to whoever
//! reads the per-node logs.

use std::ops::Range;

/// Result type alias for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors raised while preparing, launching or signalling cluster nodes.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Harness configuration is invalid or unreadable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Index range falls outside the candidate node pool.
    #[error("node range {range:?} is outside the pool of {pool} nodes")]
    InvalidRange {
        /// The offending range.
        range: Range<usize>,
        /// Size of the node pool.
        pool: usize,
    },

    /// The node binary could not be launched.
    #[error("failed to start node {index}: {source}")]
    Spawn {
        /// Node index.
        index: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A node exited on its own during its start settle interval.
    #[error("node {index} exited during startup: {status}")]
    Exited {
        /// Node index.
        index: usize,
        /// Exit status reported by the OS.
        status: String,
    },

    /// A control message was addressed to a node that is not running.
    #[error("node {index} is not running")]
    NotRunning {
        /// Node index.
        index: usize,
    },

    /// A control message could not be delivered.
    #[error("failed to signal node {index} (pid {pid}): {reason}")]
    Signal {
        /// Node index.
        index: usize,
        /// Process ID the message was addressed to.
        pid: u32,
        /// Why delivery failed.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ClusterError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a signal delivery error.
    #[must_use]
    pub fn signal(index: usize, pid: u32, reason: impl Into<String>) -> Self {
        Self::Signal {
            index,
            pid,
            reason: reason.into(),
        }
    }

    /// Returns true if the error comes from the node processes rather than
    /// from the harness's own configuration.
    #[must_use]
    pub const fn is_process_failure(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. }
                | Self::Exited { .. }
                | Self::NotRunning { .. }
                | Self::Signal { .. }
        )
    }
}
