//! Seed failover and topology resolution.
//!
//! The resolver runs one background task that walks the configured seeds:
//!
//! ```text
//!            ┌──────────── refresh() ────────────┐
//!            ▼                                   │
//!   subscribe(seeds[i]) ── first snapshot ──► subscribed ── update ──► rank ──► listener
//!            │                                   │
//!     error / timeout                    error / stream end
//!            │                                   │
//!            └──────► i = (i + 1) % n ◄──────────┘
//! ```
//!
//! Each snapshot is filtered to eligible nodes, sorted with the source's
//! comparator and given dense ranks. The listener is only called when the
//! ranked list differs from the last one emitted. An empty topology or one
//! with no eligible nodes ends the attempt like any other failure.
//!
//! When a full pass over every seed fails without a usable snapshot, the task
//! waits a capped exponential backoff before the next pass. A subscription that
//! delivers and then ends within `attempt_timeout` counts as a failed attempt
//! for that pacing, so a source answering with one-item streams is not
//! resubscribed in a tight loop.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{Instant, error::Elapsed},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::{
    backoff::BackoffPolicy,
    config::ResolverConfig,
    error::{Result, TopologyError},
    metrics::{TopologyMetrics, default_metrics},
    polling::PollingSettings,
    ranking::{RankedAddress, rank_snapshot},
    seed::Seed,
    snapshot::{TopologySnapshot, short_hex},
    source::{SourceKind, StreamingSource},
};

/// Receives resolved address lists.
pub trait AddressListener: Send + Sync + 'static {
    /// Called with each changed ranked address list, in emission order.
    fn on_addresses(&self, addresses: &[RankedAddress]);

    /// Called when an attempt against a seed fails.
    fn on_resolution_error(&self, error: &TopologyError) {
        let _ = error;
    }
}

/// Discovers topology through a list of seeds and feeds ranked addresses to a listener.
///
/// Clones share the same background task. The task stops when [`shutdown`](Self::shutdown)
/// is called or the last clone is dropped.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<ResolverInner>,
    _stop_on_drop: Arc<DropGuard>,
}

struct ResolverInner {
    seeds: Vec<Seed>,
    producer: Arc<dyn StreamingSource>,
    listener: Arc<dyn AddressListener>,
    attempt_timeout: Duration,
    backoff: BackoffPolicy,
    seed_index: AtomicUsize,
    last_emitted: Mutex<Option<Arc<[RankedAddress]>>>,
    refresh: Notify,
    shutdown: CancellationToken,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<dyn TopologyMetrics>,
}

enum Step {
    Shutdown,
    Refresh,
    Item(std::result::Result<Option<Result<TopologySnapshot>>, Elapsed>),
}

enum AttemptOutcome {
    Shutdown,
    Refresh { delivered: bool },
    Failed { delivered: bool, error: TopologyError },
}

#[bon::bon]
impl Resolver {
    /// Creates a resolver. Nothing runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Config`] if the configuration does not validate.
    #[builder]
    pub fn new(
        config: ResolverConfig,
        source: SourceKind,
        listener: Arc<dyn AddressListener>,
        #[builder(default = default_metrics())] metrics: Arc<dyn TopologyMetrics>,
    ) -> Result<Self> {
        config.validate()?;

        let producer =
            source.into_producer(PollingSettings::from_config(&config), Arc::clone(&metrics));
        let shutdown = CancellationToken::new();
        let inner = Arc::new(ResolverInner {
            seeds: config.seeds.clone(),
            producer,
            listener,
            attempt_timeout: config.attempt_timeout,
            backoff: config.backoff(),
            seed_index: AtomicUsize::new(0),
            last_emitted: Mutex::new(None),
            refresh: Notify::new(),
            shutdown: shutdown.clone(),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
            metrics,
        });

        Ok(Self { inner, _stop_on_drop: Arc::new(shutdown.drop_guard()) })
    }
}

impl Resolver {
    /// Spawns the background task. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::AlreadyStarted`] on every call after the first.
    pub fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(TopologyError::AlreadyStarted);
        }

        let span = info_span!("topology_resolver", seeds = self.inner.seeds.len());
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.run().instrument(span));
        *self.inner.task.lock() = Some(handle);
        Ok(())
    }

    /// Cancels the current attempt and resubscribes to the current seed.
    ///
    /// Requests made while no attempt is active are coalesced into one.
    /// Ignored before [`start`](Self::start).
    pub fn refresh(&self) {
        if !self.inner.started.load(Ordering::Acquire) {
            trace!("Ignoring topology refresh before start");
            return;
        }
        debug!(seed = %self.current_seed(), "Topology refresh requested");
        self.inner.refresh.notify_one();
    }

    /// Stops the background task and waits for it to finish. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self.inner.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Topology resolver task did not exit cleanly");
        }
    }

    /// Returns true while the background task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Returns the seed the current (or next) attempt is bound to.
    #[must_use]
    pub fn current_seed(&self) -> Seed {
        self.inner.current_seed().clone()
    }

    /// Returns the last ranked list passed to the listener.
    #[must_use]
    pub fn last_addresses(&self) -> Option<Arc<[RankedAddress]>> {
        self.inner.last_emitted.lock().clone()
    }

    /// Returns the configured seeds.
    #[must_use]
    pub fn seeds(&self) -> &[Seed] {
        &self.inner.seeds
    }
}

impl ResolverInner {
    fn current_seed(&self) -> &Seed {
        &self.seeds[self.seed_index.load(Ordering::Acquire) % self.seeds.len()]
    }

    async fn run(self: Arc<Self>) {
        info!(seed = %self.current_seed(), "Topology resolver started");

        // Failures since the last usable snapshot, and full passes that failed.
        let mut failures_in_cycle = 0usize;
        let mut failed_cycles = 0u32;

        loop {
            let attempt_started = Instant::now();
            match self.attempt().await {
                AttemptOutcome::Shutdown => break,
                AttemptOutcome::Refresh { delivered } => {
                    if delivered {
                        failures_in_cycle = 0;
                        failed_cycles = 0;
                    }
                },
                AttemptOutcome::Failed { delivered, error } => {
                    self.fail_over(&error);
                    if delivered && attempt_started.elapsed() >= self.attempt_timeout {
                        failures_in_cycle = 0;
                        failed_cycles = 0;
                        tokio::task::yield_now().await;
                        continue;
                    }

                    failures_in_cycle += 1;
                    if failures_in_cycle < self.seeds.len() {
                        continue;
                    }
                    failures_in_cycle = 0;
                    failed_cycles = failed_cycles.saturating_add(1);

                    let delay = self.backoff.delay(failed_cycles);
                    debug!(
                        cycle = failed_cycles,
                        backoff_ms = delay.as_millis() as u64,
                        "Every seed failed; backing off before next pass"
                    );
                    tokio::select! {
                        biased;
                        () = self.shutdown.cancelled() => break,
                        () = self.refresh.notified() => {},
                        () = tokio::time::sleep(delay) => {},
                    }
                },
            }

            if self.shutdown.is_cancelled() {
                break;
            }
        }

        info!("Topology resolver stopped");
    }

    /// Runs one subscription attempt against the current seed.
    async fn attempt(&self) -> AttemptOutcome {
        let seed = self.current_seed();
        let cancel = self.shutdown.child_token();
        let _cancel_on_exit = cancel.clone().drop_guard();

        let mut stream = self.producer.subscribe(seed, self.attempt_timeout, cancel);
        let first_deadline = self
            .producer
            .attempt_deadline(self.attempt_timeout)
            .map(|timeout| Instant::now() + timeout);
        let mut delivered = false;

        loop {
            let deadline = if delivered { None } else { first_deadline };
            let step = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => Step::Shutdown,
                () = self.refresh.notified() => Step::Refresh,
                item = async {
                    match deadline {
                        Some(deadline) => tokio::time::timeout_at(deadline, stream.next()).await,
                        None => Ok(stream.next().await),
                    }
                } => Step::Item(item),
            };

            let error = match step {
                Step::Shutdown => return AttemptOutcome::Shutdown,
                Step::Refresh => {
                    debug!(seed = %seed, "Restarting subscription on refresh");
                    return AttemptOutcome::Refresh { delivered };
                },
                Step::Item(Err(_elapsed)) => TopologyError::AttemptTimeout {
                    seed: seed.to_string(),
                    duration_ms: self.attempt_timeout.as_millis() as u64,
                },
                Step::Item(Ok(None)) => TopologyError::StreamEnded { seed: seed.to_string() },
                Step::Item(Ok(Some(Err(e)))) => e,
                Step::Item(Ok(Some(Ok(snapshot)))) => match self.apply_snapshot(seed, &snapshot) {
                    Ok(()) => {
                        if !delivered {
                            info!(seed = %seed, "Subscribed to seed");
                            delivered = true;
                        }
                        continue;
                    },
                    Err(e) => e,
                },
            };

            return AttemptOutcome::Failed { delivered, error };
        }
    }

    /// Ranks a snapshot and emits it if it changed.
    fn apply_snapshot(&self, seed: &Seed, snapshot: &TopologySnapshot) -> Result<()> {
        let seed_label = seed.to_string();
        self.metrics.record_snapshot(&seed_label, snapshot.len(), snapshot.eligible_count());

        if snapshot.is_empty() {
            return Err(TopologyError::EmptyTopology { seed: seed_label });
        }
        if snapshot.eligible_count() == 0 {
            return Err(TopologyError::NoEligibleNodes { seed: seed_label, total: snapshot.len() });
        }

        let ranked = rank_snapshot(snapshot, |a, b| self.producer.compare(a, b));
        let ranked: Arc<[RankedAddress]> = {
            let mut last = self.last_emitted.lock();
            if last.as_deref() == Some(ranked.as_slice()) {
                let hash = short_hex(snapshot.content_hash());
                trace!(seed = %seed, hash = %hash, "Topology unchanged");
                return Ok(());
            }
            let ranked: Arc<[RankedAddress]> = ranked.into();
            *last = Some(Arc::clone(&ranked));
            ranked
        };

        info!(
            seed = %seed,
            addresses = ranked.len(),
            total = snapshot.len(),
            hash = %short_hex(snapshot.content_hash()),
            "Topology changed"
        );
        self.listener.on_addresses(&ranked);
        self.metrics.record_address_update(&seed_label, ranked.len());
        Ok(())
    }

    /// Reports a failed attempt and advances to the next seed.
    fn fail_over(&self, error: &TopologyError) {
        self.listener.on_resolution_error(error);

        let index = self.seed_index.load(Ordering::Acquire) % self.seeds.len();
        let next = (index + 1) % self.seeds.len();
        self.seed_index.store(next, Ordering::Release);

        let seed = &self.seeds[index];
        warn!(
            seed = %seed,
            next_seed = %self.seeds[next],
            error = %error,
            "Seed failed; failing over"
        );
        self.metrics.record_seed_failover(&seed.to_string(), failover_reason(error));
    }
}

fn failover_reason(error: &TopologyError) -> &'static str {
    match error {
        TopologyError::AttemptTimeout { .. } => "timeout",
        TopologyError::EmptyTopology { .. } => "empty",
        TopologyError::NoEligibleNodes { .. } => "no_eligible",
        TopologyError::StreamEnded { .. } => "ended",
        _ => "error",
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("seeds", &self.inner.seeds)
            .field("current_seed", self.inner.current_seed())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
