// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # resync-test
//!
//! Scenario orchestration for the resync live-cluster harness.
//!
//! This crate provides:
//! - **Callback collection**: an HTTP receiver counting timer pops
//! - **Timer submission**: seeding load on a designated node
//! - **Scenarios**: data-driven membership step sequences with thresholds
//! - **Runner**: executes scenarios with settle waits and teardown
//!
//! Assertions are lower bounds only. Which surviving node fires a timer
//! after redistribution is not deterministic, so exact counts are never
//! checked.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use resync_core::HarnessConfig;
//! use resync_test::{CallbackCollector, CallbackCounter, ScenarioRunner, scenario};
//!
//! let config = HarnessConfig::load("resync.toml")?;
//! let collector = CallbackCollector::bind(&config.collector, Arc::new(CallbackCounter::new())).await?;
//! let runner = ScenarioRunner::new(config, &collector)?;
//!
//! let report = runner.run(&scenario::scale_up()).await?;
//! println!("{report}");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod collector;
pub mod error;
pub mod runner;
pub mod scenario;

pub use client::{TimerClient, TimerRequestSpec};
pub use collector::{CallbackCollector, CallbackCounter};
pub use error::{Result, ScenarioError};
pub use runner::{Phase, ScenarioReport, ScenarioRunner, ScenarioRunnerBuilder};
pub use scenario::{Scenario, Step};
