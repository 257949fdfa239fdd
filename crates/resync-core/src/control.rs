//! Reconfiguration control messages.
//!
//! [`ControlTransport`] delivers a [`ControlMessage`] to one running node.
//! The stock transport is Unix signals (SIGHUP for reload, SIGUSR1 for the
//! rebalance trigger), which is what the timer service listens for.
//! [`ReconfigSignaler`] fans a message out over a node range and then waits
//! a fixed settle interval, since the service reports no completion.

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::SettleConfig;
use crate::error::{ClusterError, Result};
use crate::process::ProcessManager;
use crate::types::ControlMessage;

/// Delivers control messages to node processes.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Delivers `message` to the node at `index` running as `pid`.
    ///
    /// # Errors
    /// Returns an error if the message cannot be delivered.
    async fn deliver(&self, index: usize, pid: u32, message: ControlMessage) -> Result<()>;
}

/// Delivers control messages as Unix signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalTransport;

#[async_trait]
impl ControlTransport for SignalTransport {
    async fn deliver(&self, index: usize, pid: u32, message: ControlMessage) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal;
            use nix::unistd::Pid;

            let nix_sig = unix_signal(message);
            let raw = i32::try_from(pid)
                .map_err(|_| ClusterError::signal(index, pid, "PID out of range"))?;
            signal::kill(Pid::from_raw(raw), nix_sig)
                .map_err(|e| ClusterError::signal(index, pid, format!("kill failed: {e}")))?;

            tracing::debug!(index, pid, signal = ?nix_sig, "sent {message}");
            Ok(())
        }

        #[cfg(not(unix))]
        {
            Err(ClusterError::signal(
                index,
                pid,
                format!("{message} signal not supported on this platform"),
            ))
        }
    }
}

/// Signal the timer service listens for.
#[cfg(unix)]
fn unix_signal(message: ControlMessage) -> nix::sys::signal::Signal {
    use nix::sys::signal::Signal;

    match message {
        ControlMessage::Reload => Signal::SIGHUP,
        ControlMessage::RebalanceTrigger => Signal::SIGUSR1,
    }
}

/// Sends reload and rebalance messages to node ranges.
pub struct ReconfigSignaler {
    transport: Box<dyn ControlTransport>,
    reload_settle: Duration,
    rebalance_settle: Duration,
}

impl ReconfigSignaler {
    /// Creates a signaler using Unix signals.
    #[must_use]
    pub fn new(settle: &SettleConfig) -> Self {
        Self::with_transport(Box::new(SignalTransport), settle)
    }

    /// Creates a signaler with a custom transport.
    #[must_use]
    pub fn with_transport(transport: Box<dyn ControlTransport>, settle: &SettleConfig) -> Self {
        Self {
            transport,
            reload_settle: settle.reload,
            rebalance_settle: settle.rebalance,
        }
    }

    /// Tells every node in `range` to re-read its config, then settles.
    ///
    /// # Errors
    /// Returns an error if a node is not running or cannot be signalled.
    pub async fn reload(&self, processes: &ProcessManager, range: Range<usize>) -> Result<()> {
        self.broadcast(processes, range, ControlMessage::Reload, self.reload_settle)
            .await
    }

    /// Tells every node in `range` to start redistributing timers, then
    /// settles.
    ///
    /// # Errors
    /// Returns an error if a node is not running or cannot be signalled.
    pub async fn trigger_rebalance(
        &self,
        processes: &ProcessManager,
        range: Range<usize>,
    ) -> Result<()> {
        self.broadcast(
            processes,
            range,
            ControlMessage::RebalanceTrigger,
            self.rebalance_settle,
        )
        .await
    }

    async fn broadcast(
        &self,
        processes: &ProcessManager,
        range: Range<usize>,
        message: ControlMessage,
        settle: Duration,
    ) -> Result<()> {
        let targets = processes.running_pids(range.clone())?;

        for (index, pid) in targets {
            self.transport.deliver(index, pid, message).await?;
        }

        tracing::info!(range = ?range, %message, settle = ?settle, "delivered control message");
        tokio::time::sleep(settle).await;
        Ok(())
    }
}

impl std::fmt::Debug for ReconfigSignaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconfigSignaler")
            .field("reload_settle", &self.reload_settle)
            .field("rebalance_settle", &self.rebalance_settle)
            .finish_non_exhaustive()
    }
}
