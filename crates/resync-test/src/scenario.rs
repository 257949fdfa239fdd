//! Scenario definitions.
//!
//! A scenario is data: how many nodes to start, how many timers to seed,
//! a sequence of membership steps, and the minimum number of pops that
//! must arrive afterwards. The runner in [`crate::runner`] executes it.
//!
//! Running nodes always form one contiguous index range. Scaling up extends
//! it to the right; scaling down and killing remove a prefix or a suffix.

use std::ops::Range;

use crate::error::{Result, ScenarioError};

/// One membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Start nodes up to (excluding) `to` and rebalance onto them.
    ScaleUp {
        /// New end of the running range.
        to: usize,
    },
    /// Mark `leaving` as draining, rebalance away from them, then kill them.
    ScaleDown {
        /// Nodes to remove.
        leaving: Range<usize>,
    },
    /// Kill nodes abruptly without telling anyone.
    Kill {
        /// Nodes to kill.
        range: Range<usize>,
    },
}

impl Step {
    /// Returns the running range after this step, or why the step cannot
    /// be applied to `running` on a pool of `pool` nodes.
    pub fn next_running(
        &self,
        running: &Range<usize>,
        pool: usize,
    ) -> std::result::Result<Range<usize>, String> {
        match self {
            Self::ScaleUp { to } => {
                if *to > pool {
                    return Err(format!("cannot scale up to {to} nodes, pool has {pool}"));
                }
                if *to <= running.end {
                    return Err(format!(
                        "scale up to {to} does not add nodes beyond {running:?}"
                    ));
                }
                Ok(running.start..*to)
            }
            Self::ScaleDown { leaving } => {
                let remaining = shrink(running, leaving)?;
                if remaining.is_empty() {
                    return Err(format!("scale down of {leaving:?} leaves no nodes"));
                }
                Ok(remaining)
            }
            Self::Kill { range } => shrink(running, range),
        }
    }
}

/// Removes a prefix or suffix `cut` from `running`.
fn shrink(
    running: &Range<usize>,
    cut: &Range<usize>,
) -> std::result::Result<Range<usize>, String> {
    if cut.is_empty() {
        return Err(format!("range {cut:?} is empty"));
    }
    if cut.start < running.start || cut.end > running.end {
        return Err(format!("range {cut:?} is not within running nodes {running:?}"));
    }
    if cut.start == running.start {
        Ok(cut.end..running.end)
    } else if cut.end == running.end {
        Ok(running.start..cut.start)
    } else {
        Err(format!(
            "range {cut:?} would split running nodes {running:?}"
        ))
    }
}

/// A named, data-driven resync scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    /// Scenario name, used in logs and reports.
    pub name: String,
    /// Nodes `0..initial_nodes` are started first.
    pub initial_nodes: usize,
    /// Index of the node timers are submitted to.
    pub target: usize,
    /// Number of timers to submit.
    pub timers: u32,
    /// Membership changes, in order.
    pub steps: Vec<Step>,
    /// Minimum pops required to pass.
    pub threshold: u64,
}

impl Scenario {
    /// Creates a scenario seeding `timers` timers on node 0 of an
    /// `initial_nodes` cluster. The threshold defaults to `timers`.
    #[must_use]
    pub fn new(name: impl Into<String>, initial_nodes: usize, timers: u32) -> Self {
        Self {
            name: name.into(),
            initial_nodes,
            target: 0,
            timers,
            steps: Vec::new(),
            threshold: u64::from(timers),
        }
    }

    /// Adds a scale-up step.
    #[must_use]
    pub fn scale_up(mut self, to: usize) -> Self {
        self.steps.push(Step::ScaleUp { to });
        self
    }

    /// Adds a scale-down step.
    #[must_use]
    pub fn scale_down(mut self, leaving: Range<usize>) -> Self {
        self.steps.push(Step::ScaleDown { leaving });
        self
    }

    /// Adds an abrupt kill step.
    #[must_use]
    pub fn kill(mut self, range: Range<usize>) -> Self {
        self.steps.push(Step::Kill { range });
        self
    }

    /// Sets the minimum number of pops required.
    #[must_use]
    pub const fn expect_at_least(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the submission target.
    #[must_use]
    pub const fn submit_to(mut self, target: usize) -> Self {
        self.target = target;
        self
    }

    /// Checks the scenario can run on a pool of `pool` nodes.
    ///
    /// # Errors
    /// Returns [`ScenarioError::InvalidScenario`] describing the first
    /// step that cannot be applied.
    pub fn validate(&self, pool: usize) -> Result<()> {
        if self.initial_nodes == 0 || self.initial_nodes > pool {
            return Err(ScenarioError::invalid(
                &self.name,
                format!(
                    "initial cluster of {} nodes does not fit a pool of {pool}",
                    self.initial_nodes
                ),
            ));
        }
        if self.target >= self.initial_nodes {
            return Err(ScenarioError::invalid(
                &self.name,
                format!("submission target {} is not running", self.target),
            ));
        }

        let mut running = 0..self.initial_nodes;
        for (i, step) in self.steps.iter().enumerate() {
            running = step
                .next_running(&running, pool)
                .map_err(|reason| ScenarioError::invalid(&self.name, format!("step {i}: {reason}")))?;
        }
        Ok(())
    }
}

/// Start 2 nodes, seed 100 timers, scale up to 4. All 100 must pop.
#[must_use]
pub fn scale_up() -> Scenario {
    Scenario::new("scale-up", 2, 100).scale_up(4)
}

/// As [`scale_up`], then kill the first 2 nodes.
///
/// Around 75 pops are expected, but which node fires what is not
/// deterministic. 50 cannot be reached unless timers actually moved.
#[must_use]
pub fn scale_up_then_kill() -> Scenario {
    Scenario::new("scale-up-then-kill", 2, 100)
        .scale_up(4)
        .kill(0..2)
        .expect_at_least(50)
}

/// Start 4 nodes, seed 100 timers, drain nodes 2-3 out. All 100 must pop.
#[must_use]
pub fn scale_down() -> Scenario {
    Scenario::new("scale-down", 4, 100).scale_down(2..4)
}

/// Start 2, seed 100, scale up to 4, then drain the first 2 out.
#[must_use]
pub fn scale_up_then_scale_down() -> Scenario {
    Scenario::new("scale-up-then-scale-down", 2, 100)
        .scale_up(4)
        .scale_down(0..2)
}

/// The four reference scenarios, in order.
#[must_use]
pub fn reference_suite() -> Vec<Scenario> {
    vec![
        scale_up(),
        scale_up_then_kill(),
        scale_down(),
        scale_up_then_scale_down(),
    ]
}
