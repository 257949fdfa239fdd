// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # resync-core
//!
//! Cluster plumbing for the resync live-cluster harness.
//!
//! The timer service under test is an opaque binary. This crate knows how
//! to describe a cluster to it and how to drive its processes:
//!
//! - [`ConfigGenerator`] renders a node's config for a [`Membership`]
//! - [`ClusterLayout`] owns log directories and config snapshot files
//! - [`ProcessManager`] starts and kills node processes by pool index
//! - [`ReconfigSignaler`] delivers reload and rebalance messages, then settles
//! - [`HarnessConfig`] ties the pool, paths and settle intervals together
//!
//! ## Example
//!
//! ```rust,ignore
//! use resync_core::{ClusterLayout, HarnessConfig, Membership, ProcessManager, ReconfigSignaler};
//!
//! let config = HarnessConfig::load("resync.toml")?;
//! let mut processes = ProcessManager::new(&config);
//! let signaler = ReconfigSignaler::new(&config.settle);
//!
//! processes.layout().write_configs(0..2, &Membership::steady(config.nodes[..2].to_vec()))?;
//! processes.start(0..2).await?;
//! signaler.trigger_rebalance(&processes, 0..2).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod control;
pub mod error;
pub mod generator;
pub mod layout;
pub mod process;
pub mod types;

pub use config::{CollectorConfig, HarnessConfig, SettleConfig, TimerConfig};
pub use control::{ControlTransport, ReconfigSignaler, SignalTransport};
pub use error::{ClusterError, Result};
pub use generator::ConfigGenerator;
pub use layout::ClusterLayout;
pub use process::{ProcessHandle, ProcessManager};
pub use types::{ControlMessage, Membership, NodeIdentity, ProcessState};
