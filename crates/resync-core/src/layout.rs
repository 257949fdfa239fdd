//! On-disk layout: per-node log directories and config snapshots.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::config::HarnessConfig;
use crate::error::{ClusterError, Result};
use crate::generator::ConfigGenerator;
use crate::types::{Membership, NodeIdentity};

/// File kept when the log root is cleared.
const KEEP_FILE: &str = ".gitignore";

/// Filesystem layout for one harness run.
#[derive(Debug, Clone)]
pub struct ClusterLayout {
    nodes: Vec<NodeIdentity>,
    config_pattern: String,
    log_root: PathBuf,
    generator: ConfigGenerator,
}

impl ClusterLayout {
    /// Creates the layout described by the harness configuration.
    #[must_use]
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            nodes: config.nodes.clone(),
            config_pattern: config.config_pattern.clone(),
            log_root: config.log_root.clone(),
            generator: ConfigGenerator::from_config(config),
        }
    }

    /// Returns the candidate node pool.
    #[must_use]
    pub fn nodes(&self) -> &[NodeIdentity] {
        &self.nodes
    }

    /// Returns the node at `index`.
    ///
    /// # Errors
    /// Returns an error if `index` is outside the pool.
    pub fn node(&self, index: usize) -> Result<NodeIdentity> {
        self.nodes
            .get(index)
            .copied()
            .ok_or(ClusterError::InvalidRange {
                range: index..index + 1,
                pool: self.nodes.len(),
            })
    }

    /// Returns the nodes in `range`.
    ///
    /// # Errors
    /// Returns an error if `range` is outside the pool.
    pub fn slice(&self, range: Range<usize>) -> Result<&[NodeIdentity]> {
        self.nodes.get(range.clone()).ok_or(ClusterError::InvalidRange {
            range,
            pool: self.nodes.len(),
        })
    }

    /// Returns the config snapshot path for the node at `index`.
    #[must_use]
    pub fn config_path(&self, index: usize) -> PathBuf {
        PathBuf::from(self.config_pattern.replace("{index}", &index.to_string()))
    }

    /// Clears the log root and creates one log directory per node.
    ///
    /// Everything under the log root is removed except a `.gitignore`.
    ///
    /// # Errors
    /// Returns an error if the directories cannot be cleared or created.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.log_root)?;

        for entry in fs::read_dir(&self.log_root)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)?;
            } else if entry.file_name() != KEEP_FILE {
                fs::remove_file(&path)?;
            }
        }

        for node in &self.nodes {
            fs::create_dir_all(self.generator.log_dir(node))?;
        }

        tracing::info!(
            log_root = %self.log_root.display(),
            nodes = self.nodes.len(),
            "prepared log directories"
        );
        Ok(())
    }

    /// Writes config snapshots for every node in `range` under `membership`.
    ///
    /// Existing snapshots are overwritten.
    ///
    /// # Errors
    /// Returns an error if `range` is outside the pool or a file cannot be
    /// written.
    pub fn write_configs(&self, range: Range<usize>, membership: &Membership) -> Result<()> {
        let nodes = self.slice(range.clone())?;

        for (index, node) in range.clone().zip(nodes) {
            let path = self.config_path(index);
            write_snapshot(&path, &self.generator.generate(node, membership))?;
        }

        tracing::debug!(
            range = ?range,
            active = membership.active().len(),
            leaving = membership.leaving().len(),
            "wrote config snapshots"
        );
        Ok(())
    }
}

fn write_snapshot(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    Ok(())
}
