// Demos are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Live resync test
//!
//! Runs the four reference scenarios against a real timer-service build.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: build/bin/chronos, nodes 127.0.0.11-14, collector 127.0.0.10:5001
//! cargo run --example livetest
//!
//! # With a harness config file
//! cargo run --example livetest -- resync.toml
//! RESYNC_CONFIG=resync.toml cargo run --example livetest
//!
//! # More detail
//! RUST_LOG=resync_test=debug,resync_core=debug cargo run --example livetest
//! ```
//!
//! Exits non-zero if any scenario fails.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use resync::prelude::*;
use tracing_subscriber::EnvFilter;

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("RESYNC_CONFIG"))
        .map(PathBuf::from)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match config_path() {
        Some(path) => HarnessConfig::load(&path)
            .with_context(|| format!("loading harness config {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    config.validate().context("invalid harness config")?;

    let collector = CallbackCollector::bind(&config.collector, Arc::new(CallbackCounter::new()))
        .await
        .context("starting callback collector")?;
    let runner = ScenarioRunner::new(config, &collector).context("preparing harness")?;

    let results = runner.run_all(&reference_suite()).await;
    collector.shutdown().await;

    let mut failed = 0;
    for (name, result) in &results {
        match result {
            Ok(report) => println!("PASS {report}"),
            Err(e) => {
                failed += 1;
                println!("FAIL {name}: {e}");
            }
        }
    }
    println!("{} passed, {failed} failed", results.len() - failed);

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
