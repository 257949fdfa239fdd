//! Timer submission.
//!
//! Every timer of a batch goes to one designated node, which replicates it
//! to the rest of the cluster. Anything but `200 OK` means the test setup
//! is broken and aborts the scenario: retrying would skew the expected
//! pop count.

use std::time::Duration;

use resync_core::{NodeIdentity, TimerConfig};
use serde::Serialize;

use crate::error::{Result, ScenarioError};

/// Body of one timer creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerRequestSpec {
    timing: Timing,
    callback: Callback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Timing {
    interval: u32,
    repeat_for: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Callback {
    http: HttpCallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct HttpCallback {
    uri: String,
    opaque: String,
}

impl TimerRequestSpec {
    /// Creates a timer request.
    #[must_use]
    pub fn new(
        interval: u32,
        repeat_for: u32,
        callback_uri: impl Into<String>,
        opaque: impl Into<String>,
    ) -> Self {
        Self {
            timing: Timing {
                interval,
                repeat_for,
            },
            callback: Callback {
                http: HttpCallback {
                    uri: callback_uri.into(),
                    opaque: opaque.into(),
                },
            },
        }
    }

    /// Creates the request for one submission batch.
    ///
    /// Without a configured token, each batch gets a fresh UUID.
    #[must_use]
    pub fn for_batch(timer: &TimerConfig, callback_uri: impl Into<String>) -> Self {
        let opaque = timer
            .opaque
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self::new(timer.interval, timer.repeat_for, callback_uri, opaque)
    }

    /// Returns the callback URI.
    #[must_use]
    pub fn callback_uri(&self) -> &str {
        &self.callback.http.uri
    }

    /// Returns the correlation token.
    #[must_use]
    pub fn opaque(&self) -> &str {
        &self.callback.http.opaque
    }
}

/// Submits timers to cluster nodes.
#[derive(Debug, Clone)]
pub struct TimerClient {
    client: reqwest::Client,
}

impl TimerClient {
    /// Creates a client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    /// Sends `count` independent timer requests to `target`.
    ///
    /// # Errors
    /// Returns [`ScenarioError::Submission`] on the first non-200 response,
    /// or a transport error.
    pub async fn submit(
        &self,
        target: &NodeIdentity,
        count: u32,
        spec: &TimerRequestSpec,
    ) -> Result<()> {
        let url = format!("http://{target}/timers");

        for _ in 0..count {
            let resp = self.client.post(&url).json(spec).send().await?;
            let status = resp.status();
            if status != reqwest::StatusCode::OK {
                tracing::error!(node = %target, status = status.as_u16(), "timer submission refused");
                return Err(ScenarioError::Submission {
                    node: *target,
                    status: status.as_u16(),
                });
            }
        }

        tracing::info!(node = %target, count, opaque = spec.opaque(), "submitted timers");
        Ok(())
    }
}
