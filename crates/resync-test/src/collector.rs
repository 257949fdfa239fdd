//! Timer pop collection.
//!
//! Nodes POST to the collector every time a timer fires. The collector
//! acknowledges with `success` and bumps a shared counter. Bodies are not
//! inspected and duplicates are not filtered: scenarios only assert lower
//! bounds, so a timer popping twice simply counts twice.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use resync_core::CollectorConfig;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{Result, ScenarioError};

/// Header the timer service stamps on each pop.
const SEQUENCE_HEADER: &str = "x-sequence-number";

/// Acknowledgement body returned for every pop.
const ACK: &str = "success";

/// Concurrency-safe pop counter.
///
/// Shared between the HTTP receiver, which increments it from any number of
/// concurrent requests, and the scenario runner, which resets and reads it.
#[derive(Debug, Default)]
pub struct CallbackCounter {
    count: AtomicU64,
}

impl CallbackCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
        }
    }

    /// Sets the count back to zero.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    /// Records one pop and returns the new total.
    pub fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the number of pops since the last reset.
    #[must_use]
    pub fn read(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// HTTP receiver for timer pops.
///
/// Runs on a background task until dropped or shut down.
#[derive(Debug)]
pub struct CallbackCollector {
    counter: Arc<CallbackCounter>,
    local_addr: SocketAddr,
    path: String,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl CallbackCollector {
    /// Binds the receiver and starts serving.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound.
    pub async fn bind(config: &CollectorConfig, counter: Arc<CallbackCounter>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind).await.map_err(|e| {
            ScenarioError::Collector(format!("failed to bind {}: {e}", config.bind))
        })?;
        let local_addr = listener.local_addr()?;

        let app = Router::new()
            .route(&config.path, post(pop))
            .with_state(Arc::clone(&counter));

        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "callback collector stopped");
            }
        });

        tracing::info!(addr = %local_addr, path = %config.path, "callback collector listening");

        Ok(Self {
            counter,
            local_addr,
            path: config.path.clone(),
            shutdown: Some(tx),
            server: Some(server),
        })
    }

    /// Returns the callback URI nodes should POST pops to.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("http://{}{}", self.local_addr, self.path)
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the shared counter.
    #[must_use]
    pub const fn counter(&self) -> &Arc<CallbackCounter> {
        &self.counter
    }

    /// Stops serving and waits for the server task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
    }
}

impl Drop for CallbackCollector {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn pop(State(counter): State<Arc<CallbackCounter>>, headers: HeaderMap) -> &'static str {
    let total = counter.increment();
    let sequence = headers
        .get(SEQUENCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::debug!(total, sequence, "timer popped");
    ACK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ephemeral() -> CollectorConfig {
        CollectorConfig {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            path: "/pop".to_string(),
        }
    }

    #[test]
    fn test_counter_reset_reads_zero() {
        let counter = CallbackCounter::new();
        counter.increment();
        counter.increment();
        assert_eq!(counter.read(), 2);
        counter.reset();
        assert_eq!(counter.read(), 0);
    }

    #[test]
    fn test_increment_returns_running_total() {
        let counter = CallbackCounter::default();
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_lose_nothing() {
        const SOURCES: u64 = 16;
        const FIRES: u64 = 1_000;

        let counter = Arc::new(CallbackCounter::new());
        let tasks: Vec<_> = (0..SOURCES)
            .map(|_| {
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    for _ in 0..FIRES {
                        counter.increment();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join");
        }

        assert_eq!(counter.read(), SOURCES * FIRES);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_is_monotonic_under_concurrent_increments() {
        let counter = Arc::new(CallbackCounter::new());
        let writer = {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                for _ in 0..10_000 {
                    counter.increment();
                }
            })
        };

        let mut last = 0;
        while !writer.is_finished() {
            let now = counter.read();
            assert!(now >= last, "count went backwards: {last} -> {now}");
            last = now;
            tokio::task::yield_now().await;
        }
        writer.await.expect("join");
        assert_eq!(counter.read(), 10_000);
    }

    #[tokio::test]
    async fn test_collector_counts_http_pops() {
        let counter = Arc::new(CallbackCounter::new());
        let collector = CallbackCollector::bind(&ephemeral(), Arc::clone(&counter))
            .await
            .expect("bind");
        let client = reqwest::Client::new();

        for seq in 0..5 {
            let resp = client
                .post(collector.uri())
                .header("X-Sequence-Number", seq.to_string())
                .body("opaque")
                .send()
                .await
                .expect("post");
            assert_eq!(resp.status(), reqwest::StatusCode::OK);
            assert_eq!(resp.text().await.expect("body"), "success");
        }

        assert_eq!(counter.read(), 5);
        collector.shutdown().await;
    }

    #[tokio::test]
    async fn test_collector_concurrent_pops() {
        let counter = Arc::new(CallbackCounter::new());
        let collector = CallbackCollector::bind(&ephemeral(), Arc::clone(&counter))
            .await
            .expect("bind");
        let client = reqwest::Client::new();

        let requests: Vec<_> = (0..50)
            .map(|_| {
                let client = client.clone();
                let uri = collector.uri();
                tokio::spawn(async move { client.post(uri).send().await })
            })
            .collect();
        for request in requests {
            let resp = request.await.expect("join").expect("post");
            assert!(resp.status().is_success());
        }

        assert_eq!(counter.read(), 50);
    }

    #[tokio::test]
    async fn test_collector_ignores_other_paths() {
        let counter = Arc::new(CallbackCounter::new());
        let collector = CallbackCollector::bind(&ephemeral(), Arc::clone(&counter))
            .await
            .expect("bind");

        let url = format!("http://{}/timers", collector.local_addr());
        let resp = reqwest::Client::new().post(url).send().await.expect("post");
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(counter.read(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let counter = Arc::new(CallbackCounter::new());
        let first = CallbackCollector::bind(&ephemeral(), Arc::clone(&counter))
            .await
            .expect("bind");
        let taken = CollectorConfig {
            bind: first.local_addr(),
            path: "/pop".to_string(),
        };

        let result = CallbackCollector::bind(&taken, counter).await;
        assert!(matches!(result, Err(ScenarioError::Collector(_))));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_read_never_decreases_between_resets(
                ops in prop::collection::vec(any::<bool>(), 0..200),
            ) {
                let counter = CallbackCounter::new();
                let mut last = 0;
                let mut increments = 0;
                for increment in ops {
                    if increment {
                        counter.increment();
                        increments += 1;
                    }
                    let now = counter.read();
                    prop_assert!(now >= last);
                    last = now;
                }
                prop_assert_eq!(counter.read(), increments);
                counter.reset();
                prop_assert_eq!(counter.read(), 0);
            }
        }
    }
}
