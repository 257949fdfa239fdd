//! Core types for cluster membership and node lifecycle.
//!
//! Nodes are addressed by their position in the candidate pool. The index
//! is stable for the whole harness run and keys both the node's config
//! file and its process handle.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};

/// Network identity of one timer-service node.
///
/// Assigned once at harness startup and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIdentity {
    addr: SocketAddr,
}

impl NodeIdentity {
    /// Creates a node identity from host and port.
    #[must_use]
    pub const fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(host, port),
        }
    }

    /// Returns the node's IP address.
    #[must_use]
    pub const fn host(&self) -> IpAddr {
        self.addr.ip()
    }

    /// Returns the node's HTTP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Returns the node's socket address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl From<SocketAddr> for NodeIdentity {
    fn from(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Cluster view for one config generation.
///
/// `active` nodes own timers. `leaving` nodes are draining: still listed so
/// the remaining nodes can take over their timers before they disappear.
/// A node is never in both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    active: Vec<NodeIdentity>,
    leaving: Vec<NodeIdentity>,
}

impl Membership {
    /// Creates a steady-state membership with nothing leaving.
    #[must_use]
    pub fn steady(active: impl IntoIterator<Item = NodeIdentity>) -> Self {
        Self {
            active: active.into_iter().collect(),
            leaving: Vec::new(),
        }
    }

    /// Creates a transitional membership.
    ///
    /// # Errors
    /// Returns an error if a node is listed as both active and leaving.
    pub fn transition(
        active: impl IntoIterator<Item = NodeIdentity>,
        leaving: impl IntoIterator<Item = NodeIdentity>,
    ) -> Result<Self> {
        let active: Vec<_> = active.into_iter().collect();
        let leaving: Vec<_> = leaving.into_iter().collect();

        if let Some(node) = leaving.iter().find(|node| active.contains(node)) {
            return Err(ClusterError::config(format!(
                "node {node} cannot be both active and leaving"
            )));
        }

        Ok(Self { active, leaving })
    }

    /// Nodes that own timers in this generation.
    #[must_use]
    pub fn active(&self) -> &[NodeIdentity] {
        &self.active
    }

    /// Nodes draining out of the cluster in this generation.
    #[must_use]
    pub fn leaving(&self) -> &[NodeIdentity] {
        &self.leaving
    }

    /// Returns true if no node is leaving.
    #[must_use]
    pub fn is_steady(&self) -> bool {
        self.leaving.is_empty()
    }
}

/// Control messages understood by a running node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Re-read the config file and adopt its membership.
    Reload,
    /// Start redistributing timers according to the loaded membership.
    RebalanceTrigger,
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reload => f.write_str("reload"),
            Self::RebalanceTrigger => f.write_str("rebalance"),
        }
    }
}

/// Lifecycle of a node process handle.
///
/// ```text
/// Unstarted → Running → Terminated
/// ```
///
/// There is no restart in place: starting a terminated node creates a
/// fresh handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessState {
    /// Never launched.
    #[default]
    Unstarted,
    /// Launched and not yet killed.
    Running,
    /// Killed by the harness.
    Terminated,
}

impl ProcessState {
    /// Returns true if the node can receive control messages.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}
