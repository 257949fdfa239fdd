//! Scenario execution.
//!
//! Each scenario moves through
//!
//! ```text
//! Idle → NodesRunning → LoadSubmitted → [Reconfiguring]* → Settled → Verified
//! ```
//!
//! with a fixed settle wait after every state-changing action. Once started
//! a scenario runs to completion: every node is killed at the end whether
//! it passed, failed verification, or hit an error on the way.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use resync_core::{
    ClusterLayout, ControlTransport, HarnessConfig, Membership, ProcessManager, ReconfigSignaler,
};

use crate::client::{TimerClient, TimerRequestSpec};
use crate::collector::{CallbackCollector, CallbackCounter};
use crate::error::{Result, ScenarioError};
use crate::scenario::{Scenario, Step};

/// Where a scenario run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing started yet.
    Idle,
    /// Initial nodes launched.
    NodesRunning,
    /// Timers submitted.
    LoadSubmitted,
    /// Applying a membership step.
    Reconfiguring,
    /// Final settle interval elapsed.
    Settled,
    /// Pop count checked against the threshold.
    Verified,
}

/// Outcome of a passing scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Scenario name.
    pub name: String,
    /// Pops counted.
    pub observed: u64,
    /// Lower bound that was required.
    pub expected: u64,
    /// Wall time of the run, teardown excluded.
    pub elapsed: Duration,
    /// Pool indices still running when the pops were counted.
    pub survivors: Vec<usize>,
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: received {} pops (expected at least {}) in {:.1?}",
            self.name, self.observed, self.expected, self.elapsed
        )
    }
}

/// Runs scenarios against a live cluster.
pub struct ScenarioRunner {
    config: HarnessConfig,
    counter: Arc<CallbackCounter>,
    callback_uri: String,
    client: TimerClient,
    signaler: ReconfigSignaler,
}

impl ScenarioRunner {
    /// Creates a runner builder.
    #[must_use]
    pub fn builder(config: HarnessConfig) -> ScenarioRunnerBuilder {
        ScenarioRunnerBuilder {
            config,
            transport: None,
        }
    }

    /// Creates a runner that signals nodes with Unix signals.
    ///
    /// # Errors
    /// Returns an error if the log directories cannot be prepared or the
    /// HTTP client cannot be built.
    pub fn new(config: HarnessConfig, collector: &CallbackCollector) -> Result<Self> {
        Self::builder(config).build(collector)
    }

    /// Returns the harness configuration.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Runs one scenario.
    ///
    /// # Errors
    /// Returns [`ScenarioError::Verification`] if too few pops arrived,
    /// [`ScenarioError::Submission`] if the seed load was refused, and any
    /// cluster or transport error unchanged.
    pub async fn run(&self, scenario: &Scenario) -> Result<ScenarioReport> {
        scenario.validate(self.config.nodes.len())?;

        tracing::info!(scenario = %scenario.name, "starting scenario");
        let started = Instant::now();
        self.counter.reset();

        let mut processes = ProcessManager::new(&self.config);
        let outcome = self.drive(scenario, &mut processes).await;
        let elapsed = started.elapsed();
        let survivors = processes.running();
        processes.kill_all();

        let observed = outcome?;
        tracing::debug!(scenario = %scenario.name, phase = ?Phase::Verified, observed, "checking pops");

        if observed < scenario.threshold {
            tracing::error!(
                scenario = %scenario.name,
                observed,
                expected = scenario.threshold,
                "scenario failed"
            );
            return Err(ScenarioError::Verification {
                scenario: scenario.name.clone(),
                observed,
                expected: scenario.threshold,
            });
        }

        let report = ScenarioReport {
            name: scenario.name.clone(),
            observed,
            expected: scenario.threshold,
            elapsed,
            survivors,
        };
        tracing::info!(%report, "scenario passed");
        Ok(report)
    }

    /// Runs every scenario in order, carrying on past failures.
    pub async fn run_all(&self, scenarios: &[Scenario]) -> Vec<(String, Result<ScenarioReport>)> {
        let mut results = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            let result = self.run(scenario).await;
            if let Err(e) = &result {
                tracing::warn!(scenario = %scenario.name, error = %e, "scenario did not pass");
            }
            results.push((scenario.name.clone(), result));
        }
        results
    }

    async fn drive(&self, scenario: &Scenario, processes: &mut ProcessManager) -> Result<u64> {
        let log_phase = |phase: Phase| {
            tracing::debug!(scenario = %scenario.name, ?phase, "phase");
        };
        log_phase(Phase::Idle);

        let initial = 0..scenario.initial_nodes;
        self.write_steady(processes, initial.clone())?;
        processes.start(initial.clone()).await?;
        log_phase(Phase::NodesRunning);

        let target = processes.layout().node(scenario.target)?;
        let spec = TimerRequestSpec::for_batch(&self.config.timer, self.callback_uri.clone());
        self.client.submit(&target, scenario.timers, &spec).await?;
        log_phase(Phase::LoadSubmitted);

        let pool = self.config.nodes.len();
        let mut running = initial;
        for step in &scenario.steps {
            log_phase(Phase::Reconfiguring);
            let next = step
                .next_running(&running, pool)
                .map_err(|reason| ScenarioError::invalid(&scenario.name, reason))?;
            self.apply(step, running, next.clone(), processes).await?;
            running = next;
        }

        tokio::time::sleep(self.config.settle.r#final).await;
        log_phase(Phase::Settled);

        Ok(self.counter.read())
    }

    async fn apply(
        &self,
        step: &Step,
        running: Range<usize>,
        next: Range<usize>,
        processes: &mut ProcessManager,
    ) -> Result<()> {
        tracing::info!(?step, from = ?running, to = ?next, "applying membership step");

        match step {
            Step::ScaleUp { to } => {
                self.write_steady(processes, next.clone())?;
                processes.start(running.end..*to).await?;
                self.signaler.reload(processes, running).await?;
                self.signaler.trigger_rebalance(processes, next).await?;
            }
            Step::ScaleDown { leaving } => {
                let layout = processes.layout();
                let membership = Membership::transition(
                    layout.slice(next)?.iter().copied(),
                    layout.slice(leaving.clone())?.iter().copied(),
                )?;
                layout.write_configs(running.clone(), &membership)?;
                self.signaler.reload(processes, running.clone()).await?;
                self.signaler.trigger_rebalance(processes, running).await?;
                processes.kill(leaving.clone())?;
            }
            Step::Kill { range } => {
                processes.kill(range.clone())?;
            }
        }
        Ok(())
    }

    fn write_steady(&self, processes: &ProcessManager, range: Range<usize>) -> Result<()> {
        let layout = processes.layout();
        let membership = Membership::steady(layout.slice(range.clone())?.iter().copied());
        layout.write_configs(range, &membership)?;
        Ok(())
    }
}

impl fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("nodes", &self.config.nodes.len())
            .field("callback_uri", &self.callback_uri)
            .field("signaler", &self.signaler)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ScenarioRunner`].
pub struct ScenarioRunnerBuilder {
    config: HarnessConfig,
    transport: Option<Box<dyn ControlTransport>>,
}

impl ScenarioRunnerBuilder {
    /// Delivers control messages through `transport` instead of signals.
    #[must_use]
    pub fn with_transport(mut self, transport: Box<dyn ControlTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the runner, counting pops received by `collector`.
    ///
    /// Clears the log root and recreates the per-node log directories, so
    /// build one runner per harness run.
    ///
    /// # Errors
    /// Returns an error if the log directories cannot be prepared or the
    /// HTTP client cannot be built.
    pub fn build(self, collector: &CallbackCollector) -> Result<ScenarioRunner> {
        ClusterLayout::new(&self.config).prepare()?;

        let signaler = match self.transport {
            Some(transport) => ReconfigSignaler::with_transport(transport, &self.config.settle),
            None => ReconfigSignaler::new(&self.config.settle),
        };

        Ok(ScenarioRunner {
            counter: Arc::clone(collector.counter()),
            callback_uri: collector.uri(),
            client: TimerClient::new()?,
            signaler,
            config: self.config,
        })
    }
}
