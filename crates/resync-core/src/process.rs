//! Node process lifecycle.
//!
//! One handle per pool index. Nodes are launched from the timer-service
//! binary with their config snapshot path and killed with SIGKILL. Kill is
//! fire-and-forget: the harness never waits for exit and never touches
//! membership here. Surviving nodes learn about departures from their
//! configs, not from the OS.

use std::ops::Range;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::config::HarnessConfig;
use crate::error::{ClusterError, Result};
use crate::layout::ClusterLayout;
use crate::types::{NodeIdentity, ProcessState};

/// Handle to one node process.
#[derive(Debug)]
pub struct ProcessHandle {
    index: usize,
    identity: NodeIdentity,
    state: ProcessState,
    pid: Option<u32>,
    child: Option<Child>,
}

impl ProcessHandle {
    fn unstarted(index: usize, identity: NodeIdentity) -> Self {
        Self {
            index,
            identity,
            state: ProcessState::Unstarted,
            pid: None,
            child: None,
        }
    }

    /// Pool index of the node.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Network identity of the node.
    #[must_use]
    pub const fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    /// OS process ID of the current incarnation, if started.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Owns and controls every node process of a harness run.
#[derive(Debug)]
pub struct ProcessManager {
    binary_path: PathBuf,
    args: Vec<String>,
    config_flag: String,
    inherit_output: bool,
    start_settle: Duration,
    layout: ClusterLayout,
    handles: Vec<ProcessHandle>,
}

impl ProcessManager {
    /// Creates a manager with every node unstarted.
    #[must_use]
    pub fn new(config: &HarnessConfig) -> Self {
        let layout = ClusterLayout::new(config);
        let handles = layout
            .nodes()
            .iter()
            .enumerate()
            .map(|(index, node)| ProcessHandle::unstarted(index, *node))
            .collect();

        Self {
            binary_path: config.binary_path.clone(),
            args: config.args.clone(),
            config_flag: config.config_flag.clone(),
            inherit_output: config.inherit_output,
            start_settle: config.settle.start,
            layout,
            handles,
        }
    }

    /// Returns the filesystem layout used for config snapshots.
    #[must_use]
    pub const fn layout(&self) -> &ClusterLayout {
        &self.layout
    }

    /// Returns the handle at `index`.
    #[must_use]
    pub fn handle(&self, index: usize) -> Option<&ProcessHandle> {
        self.handles.get(index)
    }

    /// Returns the lifecycle state of the node at `index`.
    #[must_use]
    pub fn state(&self, index: usize) -> ProcessState {
        self.handles
            .get(index)
            .map_or(ProcessState::Unstarted, ProcessHandle::state)
    }

    /// Returns the PID of the node at `index`, if it has been started.
    #[must_use]
    pub fn pid(&self, index: usize) -> Option<u32> {
        self.handles.get(index).and_then(ProcessHandle::pid)
    }

    /// Returns the indices of all running nodes.
    #[must_use]
    pub fn running(&self) -> Vec<usize> {
        self.handles
            .iter()
            .filter(|h| h.state.is_running())
            .map(|h| h.index)
            .collect()
    }

    /// Returns `(index, pid)` for every node in `range`.
    ///
    /// # Errors
    /// Returns an error if `range` leaves the pool or a node in it is not
    /// running.
    pub fn running_pids(&self, range: Range<usize>) -> Result<Vec<(usize, u32)>> {
        self.check_range(&range)?;
        self.handles[range]
            .iter()
            .map(|h| match (h.state, h.pid) {
                (ProcessState::Running, Some(pid)) => Ok((h.index, pid)),
                _ => Err(ClusterError::NotRunning { index: h.index }),
            })
            .collect()
    }

    /// Launches every node in `range` that is not already running, then
    /// waits the start settle interval.
    ///
    /// A node that exits during the settle interval (port already bound,
    /// bad config) fails the call.
    ///
    /// # Errors
    /// Returns an error if a node cannot be spawned or dies during startup.
    pub async fn start(&mut self, range: Range<usize>) -> Result<()> {
        self.check_range(&range)?;

        let mut launched = Vec::new();
        for index in range.clone() {
            if self.handles[index].state.is_running() {
                tracing::debug!(index, "node already running, not relaunching");
                continue;
            }
            self.spawn(index)?;
            launched.push(index);
        }

        tracing::debug!(range = ?range, settle = ?self.start_settle, "waiting for nodes to settle");
        tokio::time::sleep(self.start_settle).await;

        for index in launched {
            self.check_alive(index)?;
        }
        Ok(())
    }

    fn spawn(&mut self, index: usize) -> Result<()> {
        let config_path = self.layout.config_path(index);
        let (stdout, stderr) = if self.inherit_output {
            (Stdio::inherit(), Stdio::inherit())
        } else {
            (Stdio::null(), Stdio::null())
        };

        let child = Command::new(&self.binary_path)
            .args(&self.args)
            .arg(&self.config_flag)
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ClusterError::Spawn { index, source })?;

        let pid = child.id().ok_or_else(|| ClusterError::Spawn {
            index,
            source: std::io::Error::other("spawned process has no PID"),
        })?;

        let handle = &mut self.handles[index];
        handle.state = ProcessState::Running;
        handle.pid = Some(pid);
        handle.child = Some(child);

        tracing::info!(
            index,
            pid,
            node = %handle.identity,
            config = %config_path.display(),
            "started node"
        );
        Ok(())
    }

    fn check_alive(&mut self, index: usize) -> Result<()> {
        let handle = &mut self.handles[index];
        let Some(child) = handle.child.as_mut() else {
            return Ok(());
        };

        match child.try_wait()? {
            None => Ok(()),
            Some(status) => {
                handle.state = ProcessState::Terminated;
                handle.child = None;
                tracing::error!(index, status = %status, "node exited during startup");
                Err(ClusterError::Exited {
                    index,
                    status: status.to_string(),
                })
            }
        }
    }

    /// Sends SIGKILL to every running node in `range`.
    ///
    /// Does not wait for the processes to exit.
    ///
    /// # Errors
    /// Returns an error if `range` leaves the pool or the kill cannot be
    /// sent.
    pub fn kill(&mut self, range: Range<usize>) -> Result<()> {
        self.check_range(&range)?;

        for handle in &mut self.handles[range] {
            if !handle.state.is_running() {
                continue;
            }
            let pid = handle.pid.unwrap_or_default();
            let child = handle.child.take();
            handle.state = ProcessState::Terminated;
            if let Some(mut child) = child {
                // Dropping the child afterwards leaves reaping to tokio.
                child
                    .start_kill()
                    .map_err(|e| ClusterError::signal(handle.index, pid, e.to_string()))?;
            }
            tracing::info!(index = handle.index, pid, node = %handle.identity, "killed node");
        }
        Ok(())
    }

    /// Kills every running node, logging rather than returning failures.
    ///
    /// Used for scenario teardown, which must always complete.
    pub fn kill_all(&mut self) {
        for index in 0..self.handles.len() {
            if let Err(e) = self.kill(index..index + 1) {
                tracing::warn!(index, error = %e, "failed to kill node during teardown");
                self.handles[index].state = ProcessState::Terminated;
                self.handles[index].child = None;
            }
        }
    }

    fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.handles.len() {
            return Err(ClusterError::InvalidRange {
                range: range.clone(),
                pool: self.handles.len(),
            });
        }
        Ok(())
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.kill_all();
    }
}
