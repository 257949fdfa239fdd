//! Scenario error types.
//!
//! Three kinds of failure are kept apart: a broken setup (timer submission
//! refused), the verdict itself (too few callbacks), and everything the
//! cluster or harness environment throws, which propagates untouched.

use resync_core::{ClusterError, NodeIdentity};

/// Result type alias for scenario operations.
pub type Result<T> = std::result::Result<T, ScenarioError>;

/// Scenario errors.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// A node refused a timer creation request.
    #[error("timer submission to {node} failed: unexpected status {status}")]
    Submission {
        /// Node the request was sent to.
        node: NodeIdentity,
        /// HTTP status returned.
        status: u16,
    },

    /// Fewer callbacks arrived than the scenario requires.
    #[error(
        "scenario {scenario}: incorrect number of popped timers: received {observed}, expected at least {expected}"
    )]
    Verification {
        /// Scenario name.
        scenario: String,
        /// Callbacks counted.
        observed: u64,
        /// Lower bound required.
        expected: u64,
    },

    /// The scenario's step sequence is not runnable on the node pool.
    #[error("invalid scenario {scenario}: {reason}")]
    InvalidScenario {
        /// Scenario name.
        scenario: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The callback receiver could not be started.
    #[error("callback collector error: {0}")]
    Collector(String),

    /// HTTP transport error while submitting timers.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Node process or cluster layout error.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScenarioError {
    /// Creates an invalid scenario error.
    #[must_use]
    pub fn invalid(scenario: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidScenario {
            scenario: scenario.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is the scenario's verdict rather than a
    /// setup or infrastructure failure.
    #[must_use]
    pub const fn is_verification(&self) -> bool {
        matches!(self, Self::Verification { .. })
    }

    /// Returns true if the test setup itself was refused.
    #[must_use]
    pub const fn is_setup(&self) -> bool {
        matches!(self, Self::Submission { .. })
    }
}
