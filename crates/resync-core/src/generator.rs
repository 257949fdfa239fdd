//! Per-node cluster config generation.
//!
//! Output is the timer service's section-based format:
//!
//! ```text
//! [http]
//! bind-address = 127.0.0.11
//! bind-port = 7253
//!
//! [logging]
//! folder = scripts/log/chronos7253
//! level = 5
//!
//! [cluster]
//! localhost = 127.0.0.11:7253
//! node = 127.0.0.11:7253
//! node = 127.0.0.12:7254
//! leaving = 127.0.0.13:7255
//! ```
//!
//! Every node's `node =` list includes the node itself, so all configs of a
//! generation carry the same membership view.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::config::HarnessConfig;
use crate::types::{Membership, NodeIdentity};

/// Renders cluster config text for individual nodes.
#[derive(Debug, Clone)]
pub struct ConfigGenerator {
    log_root: PathBuf,
    log_level: u8,
}

impl ConfigGenerator {
    /// Creates a generator writing logs under `log_root`.
    #[must_use]
    pub fn new(log_root: impl Into<PathBuf>, log_level: u8) -> Self {
        Self {
            log_root: log_root.into(),
            log_level,
        }
    }

    /// Creates a generator from harness configuration.
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.log_root.clone(), config.log_level)
    }

    /// Returns the log folder for a node.
    #[must_use]
    pub fn log_dir(&self, node: &NodeIdentity) -> PathBuf {
        self.log_root.join(format!("chronos{}", node.port()))
    }

    /// Renders the config for `this` under the given membership.
    ///
    /// Pure: the same inputs always produce the same text.
    #[must_use]
    pub fn generate(&self, this: &NodeIdentity, membership: &Membership) -> String {
        let mut out = String::with_capacity(256);
        let log_dir = self.log_dir(this);

        // Writing to a String cannot fail.
        let _ = write!(
            out,
            "[http]\n\
             bind-address = {host}\n\
             bind-port = {port}\n\
             \n\
             [logging]\n\
             folder = {folder}\n\
             level = {level}\n\
             \n\
             [cluster]\n\
             localhost = {this}\n",
            host = this.host(),
            port = this.port(),
            folder = display_path(&log_dir),
            level = self.log_level,
        );

        for node in membership.active() {
            let _ = writeln!(out, "node = {node}");
        }
        for node in membership.leaving() {
            let _ = writeln!(out, "leaving = {node}");
        }

        out
    }
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
