//! Adapts a pull-based source into a snapshot stream.
//!
//! The adapter polls one seed in a loop:
//!
//! 1. fetch, bounded by the attempt timeout
//! 2. on success, yield the snapshot, reset the failure count and wait `poll_delay`
//! 3. on failure, count it; after `max_discovery_attempts` consecutive failures
//!    yield the error and end the stream, otherwise back off and retry silently
//!
//! Ending the stream is what tells the resolver to fail over to the next seed.
//! Cancellation is observed while fetching and while waiting.

use std::{cmp::Ordering, fmt, sync::Arc, time::Duration};

use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    backoff::BackoffPolicy,
    config::ResolverConfig,
    error::{Result, TopologyError},
    metrics::TopologyMetrics,
    node::Node,
    seed::Seed,
    snapshot::TopologySnapshot,
    source::{PollingSource, SnapshotStream, StreamingSource},
};

/// Pacing parameters for a [`PollingAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingSettings {
    /// Delay after a successful fetch.
    pub poll_delay: Duration,
    /// Consecutive failures before the stream ends.
    pub max_discovery_attempts: u32,
    /// Backoff between failed fetches.
    pub backoff: BackoffPolicy,
}

impl PollingSettings {
    /// Extracts polling settings from a resolver configuration.
    #[must_use]
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            poll_delay: config.poll_delay,
            max_discovery_attempts: config.max_discovery_attempts,
            backoff: config.backoff(),
        }
    }
}

/// Turns a [`PollingSource`] into a [`StreamingSource`].
pub struct PollingAdapter {
    source: Arc<dyn PollingSource>,
    settings: PollingSettings,
    metrics: Arc<dyn TopologyMetrics>,
}

impl PollingAdapter {
    /// Wraps `source` with the given pacing.
    pub fn new(
        source: Arc<dyn PollingSource>,
        settings: PollingSettings,
        metrics: Arc<dyn TopologyMetrics>,
    ) -> Self {
        Self { source, settings, metrics }
    }

    /// Returns the pacing settings.
    #[must_use]
    pub fn settings(&self) -> &PollingSettings {
        &self.settings
    }
}

impl fmt::Debug for PollingAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingAdapter").field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl StreamingSource for PollingAdapter {
    fn subscribe(
        &self,
        seed: &Seed,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> SnapshotStream {
        let state = PollState {
            source: Arc::clone(&self.source),
            seed: seed.clone(),
            timeout,
            settings: self.settings,
            metrics: Arc::clone(&self.metrics),
            cancel,
            failures: 0,
            delivered: false,
            done: false,
        };
        stream::unfold(state, PollState::next).boxed()
    }

    fn compare(&self, a: &Node, b: &Node) -> Ordering {
        self.source.compare(a, b)
    }

    // Each fetch is already bounded, and retries may legitimately take longer
    // than one timeout before the first snapshot.
    fn attempt_deadline(&self, _timeout: Duration) -> Option<Duration> {
        None
    }
}

struct PollState {
    source: Arc<dyn PollingSource>,
    seed: Seed,
    timeout: Duration,
    settings: PollingSettings,
    metrics: Arc<dyn TopologyMetrics>,
    cancel: CancellationToken,
    failures: u32,
    delivered: bool,
    done: bool,
}

impl PollState {
    async fn next(mut self) -> Option<(Result<TopologySnapshot>, Self)> {
        if self.done {
            return None;
        }

        if self.delivered {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(self.settings.poll_delay) => {}
            }
            self.delivered = false;
        }

        loop {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                result = tokio::time::timeout(
                    self.timeout,
                    self.source.fetch(&self.seed, self.timeout),
                ) => result,
            };

            let err = match result {
                Ok(Ok(snapshot)) => {
                    self.failures = 0;
                    self.delivered = true;
                    return Some((Ok(snapshot), self));
                },
                Ok(Err(err)) => err,
                Err(_elapsed) => TopologyError::AttemptTimeout {
                    seed: self.seed.to_string(),
                    duration_ms: self.timeout.as_millis() as u64,
                },
            };

            self.failures += 1;
            if self.failures >= self.settings.max_discovery_attempts {
                debug!(
                    seed = %self.seed,
                    failures = self.failures,
                    error = %err,
                    "Discovery attempts exhausted"
                );
                self.done = true;
                return Some((Err(err), self));
            }

            let delay = self.settings.backoff.delay(self.failures);
            self.metrics.record_discovery_retry(&self.seed.to_string(), self.failures);
            debug!(
                seed = %self.seed,
                attempt = self.failures,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying discovery after backoff"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
