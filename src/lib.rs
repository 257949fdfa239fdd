//! Resync: live-cluster resynchronization harness for distributed timer services.
//!
//! Starts real timer-service nodes, seeds them with timers, changes cluster
//! membership underneath them, and checks that enough timers still fire.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use resync::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), ScenarioError> {
//! let config = HarnessConfig::default();
//! let collector = CallbackCollector::bind(&config.collector, Arc::new(CallbackCounter::new())).await?;
//! let runner = ScenarioRunner::new(config, &collector)?;
//! for (name, result) in runner.run_all(&reference_suite()).await {
//!     println!("{name}: {}", if result.is_ok() { "passed" } else { "FAILED" });
//! }
//! # Ok(())
//! # }
//! ```

pub use resync_core as core;
pub use resync_test as test;

/// Prelude module for common imports.
pub mod prelude {
    pub use resync_core::{
        ClusterError, ClusterLayout, ConfigGenerator, ControlMessage, HarnessConfig, Membership,
        NodeIdentity, ProcessManager, ReconfigSignaler,
    };
    pub use resync_test::scenario::reference_suite;
    pub use resync_test::{
        CallbackCollector, CallbackCounter, Scenario, ScenarioError, ScenarioReport,
        ScenarioRunner, Step,
    };
}
