//! End-to-end scenario tests against an in-process fake cluster.
//!
//! Each fake node is an HTTP server that accepts `/timers` and pops the
//! callback straight away. The node "processes" are `/bin/sh` loops that
//! record the control signals they receive, so membership steps run
//! through the real launch, config and signal paths.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg(unix)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use resync_core::{
    ClusterError, CollectorConfig, ControlMessage, ControlTransport, HarnessConfig, NodeIdentity,
    SettleConfig,
};
use resync_test::scenario::{self, Scenario};
use resync_test::{CallbackCollector, CallbackCounter, ScenarioError, ScenarioRunner};

/// How a fake node treats timer submissions.
#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Accept and pop the callback once.
    Deliver,
    /// Accept but never pop.
    Silent,
    /// Answer with a server error.
    Refuse,
}

#[derive(Clone)]
struct FakeNode {
    behavior: Behavior,
    client: reqwest::Client,
}

async fn timers(
    State(node): State<FakeNode>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    match node.behavior {
        Behavior::Refuse => return StatusCode::INTERNAL_SERVER_ERROR,
        Behavior::Silent => return StatusCode::OK,
        Behavior::Deliver => {}
    }

    let Some(uri) = body["callback"]["http"]["uri"].as_str().map(str::to_owned) else {
        return StatusCode::BAD_REQUEST;
    };
    tokio::spawn(async move {
        let _ = node
            .client
            .post(uri)
            .header("X-Sequence-Number", "1")
            .body("stuff")
            .send()
            .await;
    });
    StatusCode::OK
}

/// Starts `count` fake nodes and returns their identities.
async fn fake_cluster(count: usize, behavior: Behavior) -> Vec<NodeIdentity> {
    let mut nodes = Vec::with_capacity(count);
    for _ in 0..count {
        let app = Router::new().route("/timers", post(timers)).with_state(FakeNode {
            behavior,
            client: reqwest::Client::new(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake node");
        let addr: SocketAddr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        nodes.push(NodeIdentity::from(addr));
    }
    nodes
}

/// Node process that records control signals and its own pid next to its config.
const NODE_SCRIPT: &str = r#"echo $$ > "$2.pid"
trap 'echo reload >> "$2.signals"' HUP
trap 'echo rebalance >> "$2.signals"' USR1
while :; do sleep 1 & wait $!; done
"#;

fn harness(dir: &Path, nodes: Vec<NodeIdentity>) -> HarnessConfig {
    let script = dir.join("node.sh");
    std::fs::write(&script, NODE_SCRIPT).expect("write script");
    HarnessConfig {
        binary_path: PathBuf::from("/bin/sh"),
        args: vec![script.to_string_lossy().into_owned()],
        config_pattern: dir.join("node{index}.conf").to_string_lossy().into_owned(),
        log_root: dir.join("log"),
        nodes,
        collector: CollectorConfig {
            bind: "127.0.0.1:0".parse().expect("addr"),
            path: "/pop".to_string(),
        },
        settle: SettleConfig {
            r#final: Duration::from_millis(500),
            ..SettleConfig::uniform(Duration::from_millis(100))
        },
        ..Default::default()
    }
}

async fn collector(config: &HarnessConfig) -> CallbackCollector {
    CallbackCollector::bind(&config.collector, Arc::new(CallbackCounter::new()))
        .await
        .expect("bind collector")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn signals(dir: &Path, index: usize) -> Vec<String> {
    std::fs::read_to_string(dir.join(format!("node{index}.conf.signals")))
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

fn config_lines(dir: &Path, index: usize, key: &str) -> usize {
    let prefix = format!("{key} = ");
    std::fs::read_to_string(dir.join(format!("node{index}.conf")))
        .expect("config")
        .lines()
        .filter(|line| line.starts_with(&prefix))
        .count()
}

#[tokio::test]
async fn test_scale_up_passes_on_healthy_cluster() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let nodes = fake_cluster(4, Behavior::Deliver).await;
    let config = harness(dir.path(), nodes.clone());
    let collector = collector(&config).await;
    let runner = ScenarioRunner::new(config, &collector).expect("runner");

    let started = std::time::Instant::now();
    let report = runner.run(&scenario::scale_up()).await.expect("scale-up");
    let wall = started.elapsed();
    assert!(report.observed >= 100, "{report}");
    assert_eq!(report.expected, 100);
    assert_eq!(report.survivors, [0, 1, 2, 3]);
    assert!(report.elapsed >= Duration::from_millis(500));
    assert!(report.elapsed <= wall);

    // First nodes reload then rebalance; new nodes only rebalance.
    assert_eq!(signals(dir.path(), 0), ["reload", "rebalance"]);
    assert_eq!(signals(dir.path(), 1), ["reload", "rebalance"]);
    assert_eq!(signals(dir.path(), 2), ["rebalance"]);
    assert_eq!(signals(dir.path(), 3), ["rebalance"]);

    for index in 0..4 {
        assert_eq!(config_lines(dir.path(), index, "node"), 4);
        assert_eq!(config_lines(dir.path(), index, "leaving"), 0);
    }
    for node in &nodes {
        assert!(dir.path().join(format!("log/chronos{}", node.port())).is_dir());
    }
}

#[tokio::test]
async fn test_scale_down_marks_leaving_nodes() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let config = harness(dir.path(), fake_cluster(4, Behavior::Deliver).await);
    let collector = collector(&config).await;
    let runner = ScenarioRunner::new(config, &collector).expect("runner");

    let report = runner.run(&scenario::scale_down()).await.expect("scale-down");
    assert!(report.observed >= 100);
    assert_eq!(report.survivors, [0, 1], "leaving nodes must be gone before counting");

    for index in 0..4 {
        assert_eq!(signals(dir.path(), index), ["reload", "rebalance"]);
        assert_eq!(config_lines(dir.path(), index, "node"), 2);
        assert_eq!(config_lines(dir.path(), index, "leaving"), 2);
    }
}

#[tokio::test]
async fn test_kill_step_stops_nodes_before_counting() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let config = harness(dir.path(), fake_cluster(4, Behavior::Deliver).await);
    let collector = collector(&config).await;
    let runner = ScenarioRunner::new(config, &collector).expect("runner");

    let report = runner
        .run(&scenario::scale_up_then_kill())
        .await
        .expect("scale-up-then-kill");
    assert_eq!(report.survivors, [2, 3]);
    assert_eq!(report.expected, 50);
}

#[tokio::test]
async fn test_missing_pops_fail_verification_and_tear_down() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let config = harness(dir.path(), fake_cluster(4, Behavior::Silent).await);
    let collector = collector(&config).await;
    let runner = ScenarioRunner::new(config, &collector).expect("runner");

    let err = runner
        .run(&scenario::scale_up())
        .await
        .expect_err("no pops arrive");
    assert!(err.is_verification());
    assert!(matches!(
        err,
        ScenarioError::Verification {
            observed: 0,
            expected: 100,
            ..
        }
    ));
    assert!(err.to_string().contains("received 0, expected at least 100"));

    for index in 0..4 {
        let pid = std::fs::read_to_string(dir.path().join(format!("node{index}.conf.pid")))
            .expect("pid file");
        assert!(
            exits_within(pid.trim(), Duration::from_secs(3)).await,
            "node {index} survived teardown"
        );
    }
}

/// Waits for a process to disappear or turn into a zombie.
///
/// Without procfs every process looks gone.
async fn exits_within(pid: &str, limit: Duration) -> bool {
    let stat = PathBuf::from(format!("/proc/{pid}/stat"));
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        match std::fs::read_to_string(&stat) {
            Err(_) => return true,
            Ok(text) => {
                let state = text.rsplit(')').next().and_then(|rest| rest.split_whitespace().next());
                if state == Some("Z") {
                    return true;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_refused_submission_aborts_scenario() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let nodes = fake_cluster(4, Behavior::Refuse).await;
    let target = nodes[0];
    let config = harness(dir.path(), nodes);
    let collector = collector(&config).await;
    let runner = ScenarioRunner::new(config, &collector).expect("runner");

    let err = runner
        .run(&scenario::scale_up())
        .await
        .expect_err("submission refused");
    assert!(err.is_setup());
    match err {
        ScenarioError::Submission { node, status } => {
            assert_eq!(node, target);
            assert_eq!(status, 500);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Aborted before any membership step.
    assert!(signals(dir.path(), 0).is_empty());
    assert!(!dir.path().join("node2.conf").exists());
}

#[derive(Clone, Default)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<(usize, ControlMessage)>>>,
}

#[async_trait]
impl ControlTransport for RecordingTransport {
    async fn deliver(
        &self,
        index: usize,
        _pid: u32,
        message: ControlMessage,
    ) -> Result<(), ClusterError> {
        self.sent.lock().expect("lock").push((index, message));
        Ok(())
    }
}

#[tokio::test]
async fn test_upscale_then_downscale_signal_order() {
    use ControlMessage::{RebalanceTrigger as B, Reload as R};

    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let config = harness(dir.path(), fake_cluster(4, Behavior::Deliver).await);
    let collector = collector(&config).await;
    let transport = RecordingTransport::default();
    let runner = ScenarioRunner::builder(config)
        .with_transport(Box::new(transport.clone()))
        .build(&collector)
        .expect("runner");

    let report = runner
        .run(&scenario::scale_up_then_scale_down())
        .await
        .expect("upscale then downscale");
    assert!(report.observed >= 100);
    assert_eq!(report.survivors, [2, 3]);

    let sent = transport.sent.lock().expect("lock").clone();
    assert_eq!(
        sent,
        vec![
            // scale up 0..2 -> 0..4
            (0, R),
            (1, R),
            (0, B),
            (1, B),
            (2, B),
            (3, B),
            // drain 0..2 out of 0..4
            (0, R),
            (1, R),
            (2, R),
            (3, R),
            (0, B),
            (1, B),
            (2, B),
            (3, B),
        ]
    );

    // Survivors see themselves as the full cluster with 0 and 1 leaving.
    assert_eq!(config_lines(dir.path(), 2, "node"), 2);
    assert_eq!(config_lines(dir.path(), 2, "leaving"), 2);
}

#[tokio::test]
async fn test_reference_suite_on_healthy_cluster() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let config = harness(dir.path(), fake_cluster(4, Behavior::Deliver).await);
    let collector = collector(&config).await;
    let runner = ScenarioRunner::new(config, &collector).expect("runner");

    let results = runner.run_all(&scenario::reference_suite()).await;
    let names: Vec<_> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        [
            "scale-up",
            "scale-up-then-kill",
            "scale-down",
            "scale-up-then-scale-down"
        ]
    );
    let survivors: [&[usize]; 4] = [&[0, 1, 2, 3], &[2, 3], &[0, 1], &[2, 3]];
    for ((name, result), expected) in results.into_iter().zip(survivors) {
        let report = result.unwrap_or_else(|e| panic!("{name}: {e}"));
        assert!(report.observed >= report.expected);
        assert_eq!(report.survivors, expected, "{name}");
    }
}

#[tokio::test]
async fn test_run_all_continues_past_invalid_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = harness(dir.path(), fake_cluster(2, Behavior::Deliver).await);
    let collector = collector(&config).await;
    let runner = ScenarioRunner::new(config, &collector).expect("runner");

    let suite = [
        scenario::scale_up(),
        Scenario::new("two-nodes", 2, 10),
    ];
    let results = runner.run_all(&suite).await;
    assert!(matches!(
        results[0].1,
        Err(ScenarioError::InvalidScenario { .. })
    ));
    let report = results[1].1.as_ref().expect("two-nodes");
    assert_eq!(report.observed, 10);
}

/// Runs the reference suite against a real timer-service build.
///
/// `RESYNC_CONFIG=resync.toml cargo test -p resync-test -- --ignored`
#[tokio::test]
#[ignore = "needs a timer-service build and loopback aliases"]
async fn test_live_reference_suite() {
    init_tracing();
    let config = match std::env::var_os("RESYNC_CONFIG") {
        Some(path) => HarnessConfig::load(PathBuf::from(path)).expect("harness config"),
        None => HarnessConfig::default(),
    };
    let collector = collector(&config).await;
    let runner = ScenarioRunner::new(config, &collector).expect("runner");

    for (name, result) in runner.run_all(&scenario::reference_suite()).await {
        if let Err(e) = result {
            panic!("{name}: {e}");
        }
    }
}
