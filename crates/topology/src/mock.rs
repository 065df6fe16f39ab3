//! Test doubles for topology sources, connection handles and listeners.
//!
//! # Features
//!
//! - **Scripted seeds**: each seed responds with a snapshot, fails, or hangs
//! - **Both source forms**: [`MockTopologySource`] implements [`PollingSource`] and [`StreamingSource`]
//! - **Live pushes**: update open streams and close them on demand
//! - **Attempt log**: every fetch and subscribe is recorded with its seed and time
//! - **Handle control**: [`MockConnectionFactory`] records creations and shutdowns and lets tests
//!   drive handle state
//!
//! # Example
//!
//! ```no_run
//! use inferadb_ledger_topology::{Node, TopologySnapshot, mock::MockTopologySource};
//!
//! let source = MockTopologySource::new();
//! source.fail("ledger-0:5000");
//! source.respond("ledger-1:5000", TopologySnapshot::new([Node::new("10.0.0.1:5000", 0)]));
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Result, TopologyError},
    handle::{ConnectionFactory, ConnectionHandle, ConnectivityState, HandleId, StateReporter},
    ranking::RankedAddress,
    resolver::AddressListener,
    seed::Seed,
    snapshot::TopologySnapshot,
    source::{PollingSource, SnapshotStream, StreamingSource},
};

#[derive(Clone)]
enum Behavior {
    Respond(TopologySnapshot),
    Fail(String),
    Hang,
}

/// Scripted topology source keyed by seed (`host:port`).
///
/// Seeds with no script fail. Clones share the same script and log.
#[derive(Clone, Default)]
pub struct MockTopologySource {
    state: Arc<SourceState>,
}

#[derive(Default)]
struct SourceState {
    behaviors: Mutex<HashMap<String, Behavior>>,
    attempts: Mutex<Vec<(String, Instant)>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<TopologySnapshot>>>>,
}

impl MockTopologySource {
    /// Creates a source where every seed fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `seed` return `snapshot` (polling) or open a stream starting with it (streaming).
    pub fn respond(&self, seed: &str, snapshot: TopologySnapshot) {
        self.set(seed, Behavior::Respond(snapshot));
    }

    /// Makes `seed` fail immediately.
    pub fn fail(&self, seed: &str) {
        self.fail_with(seed, "connection refused");
    }

    /// Makes `seed` fail immediately with `message`.
    pub fn fail_with(&self, seed: &str, message: impl Into<String>) {
        self.set(seed, Behavior::Fail(message.into()));
    }

    /// Makes `seed` never answer.
    pub fn hang(&self, seed: &str) {
        self.set(seed, Behavior::Hang);
    }

    /// Sets the response for `seed` and delivers `snapshot` to its open streams.
    pub fn push(&self, seed: &str, snapshot: TopologySnapshot) {
        self.respond(seed, snapshot.clone());
        if let Some(senders) = self.state.subscribers.lock().get_mut(seed) {
            senders.retain(|sender| sender.send(snapshot.clone()).is_ok());
        }
    }

    /// Ends every open stream for `seed`.
    pub fn end_streams(&self, seed: &str) {
        self.state.subscribers.lock().remove(seed);
    }

    /// Returns the seed of every fetch or subscribe, in call order.
    #[must_use]
    pub fn attempts(&self) -> Vec<String> {
        self.state.attempts.lock().iter().map(|(seed, _)| seed.clone()).collect()
    }

    /// Returns the time of every fetch or subscribe, in call order.
    #[must_use]
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.attempts.lock().iter().map(|(_, at)| *at).collect()
    }

    /// Returns how many times `seed` was queried.
    #[must_use]
    pub fn attempt_count(&self, seed: &str) -> usize {
        self.state.attempts.lock().iter().filter(|(attempt, _)| attempt == seed).count()
    }

    fn set(&self, seed: &str, behavior: Behavior) {
        self.state.behaviors.lock().insert(seed.to_owned(), behavior);
    }

    fn record(&self, seed: &Seed) -> (String, Behavior) {
        let key = seed.to_string();
        self.state.attempts.lock().push((key.clone(), Instant::now()));
        let behavior = self
            .state
            .behaviors
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Behavior::Fail("no response scripted".to_owned()));
        (key, behavior)
    }
}

#[async_trait]
impl PollingSource for MockTopologySource {
    async fn fetch(&self, seed: &Seed, _timeout: Duration) -> Result<TopologySnapshot> {
        let (_, behavior) = self.record(seed);
        match behavior {
            Behavior::Respond(snapshot) => Ok(snapshot),
            Behavior::Fail(message) => Err(TopologyError::discovery(seed, message)),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

impl StreamingSource for MockTopologySource {
    fn subscribe(
        &self,
        seed: &Seed,
        _timeout: Duration,
        cancel: CancellationToken,
    ) -> SnapshotStream {
        let (key, behavior) = self.record(seed);
        match behavior {
            Behavior::Fail(message) => {
                stream::iter([Err(TopologyError::discovery(seed, message))]).boxed()
            },
            Behavior::Hang => stream::pending().boxed(),
            Behavior::Respond(snapshot) => {
                let (sender, receiver) = mpsc::unbounded_channel();
                self.state.subscribers.lock().entry(key).or_default().push(sender);

                let updates = stream::unfold(receiver, |mut receiver| async move {
                    receiver.recv().await.map(|snapshot| (Ok(snapshot), receiver))
                });
                stream::once(async move { Ok(snapshot) })
                    .chain(updates)
                    .take_until(cancel.cancelled_owned())
                    .boxed()
            },
        }
    }
}

impl fmt::Debug for MockTopologySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTopologySource")
            .field("seeds", &self.state.behaviors.lock().len())
            .field("attempts", &self.state.attempts.lock().len())
            .finish()
    }
}

/// Connection factory producing [`MockHandle`]s.
///
/// Clones share the same handle log.
#[derive(Clone, Default)]
pub struct MockConnectionFactory {
    state: Arc<FactoryState>,
}

#[derive(Default)]
struct FactoryState {
    auto_ready: bool,
    handles: Mutex<Vec<MockHandle>>,
    shut_down: Arc<Mutex<Vec<String>>>,
}

impl MockConnectionFactory {
    /// Creates a factory whose handles stay `Idle` until driven by the test.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory whose handles report `Ready` as soon as they connect.
    #[must_use]
    pub fn auto_ready() -> Self {
        Self { state: Arc::new(FactoryState { auto_ready: true, ..FactoryState::default() }) }
    }

    /// Returns addresses of every created handle, in creation order.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.state.handles.lock().iter().map(|handle| handle.address().to_owned()).collect()
    }

    /// Returns addresses of every shut-down handle, in shutdown order.
    #[must_use]
    pub fn shut_down(&self) -> Vec<String> {
        self.state.shut_down.lock().clone()
    }

    /// Returns addresses of handles that are not shut down.
    #[must_use]
    pub fn live(&self) -> Vec<String> {
        self.state
            .handles
            .lock()
            .iter()
            .filter(|handle| !handle.is_shut_down())
            .map(|handle| handle.address().to_owned())
            .collect()
    }

    /// Returns the most recently created handle for `address`.
    #[must_use]
    pub fn handle(&self, address: &str) -> Option<MockHandle> {
        self.state.handles.lock().iter().rev().find(|handle| handle.address() == address).cloned()
    }

    /// Reports `state` for the live handle at `address`.
    ///
    /// Returns false if there is no live handle or its manager is gone.
    pub fn set_state(&self, address: &str, state: ConnectivityState) -> bool {
        self.handle(address)
            .filter(|handle| !handle.is_shut_down())
            .is_some_and(|handle| handle.report(state))
    }
}

impl ConnectionFactory for MockConnectionFactory {
    type Handle = MockHandle;

    fn create(&self, address: &RankedAddress, reporter: StateReporter) -> MockHandle {
        let handle = MockHandle {
            inner: Arc::new(HandleInner {
                address: address.address.clone(),
                created_rank: address.order_index,
                reporter,
                auto_ready: self.state.auto_ready,
                connected: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                shutdown_log: Arc::clone(&self.state.shut_down),
            }),
        };
        self.state.handles.lock().push(handle.clone());
        handle
    }
}

impl fmt::Debug for MockConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnectionFactory")
            .field("auto_ready", &self.state.auto_ready)
            .field("created", &self.state.handles.lock().len())
            .finish()
    }
}

/// Handle created by [`MockConnectionFactory`].
#[derive(Clone)]
pub struct MockHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    address: String,
    created_rank: usize,
    reporter: StateReporter,
    auto_ready: bool,
    connected: AtomicBool,
    shut_down: AtomicBool,
    shutdown_log: Arc<Mutex<Vec<String>>>,
}

impl MockHandle {
    /// Returns the address this handle connects to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Returns the handle id assigned by the manager.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.inner.reporter.id()
    }

    /// Returns the rank the address had when the handle was created.
    #[must_use]
    pub fn created_rank(&self) -> usize {
        self.inner.created_rank
    }

    /// Returns true once `connect` was called.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Returns true once `shutdown` was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Reports a state transition to the manager.
    pub fn report(&self, state: ConnectivityState) -> bool {
        self.inner.reporter.report(state)
    }
}

impl ConnectionHandle for MockHandle {
    fn connect(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
        if self.inner.auto_ready {
            self.report(ConnectivityState::Ready);
        }
    }

    fn shutdown(&self) {
        if !self.inner.shut_down.swap(true, Ordering::SeqCst) {
            self.inner.shutdown_log.lock().push(self.inner.address.clone());
        }
    }
}

impl fmt::Debug for MockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockHandle")
            .field("address", &self.inner.address)
            .field("id", &self.id())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Address listener that records everything it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    updates: Mutex<Vec<Vec<RankedAddress>>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingListener {
    /// Returns every address list received, in order.
    #[must_use]
    pub fn updates(&self) -> Vec<Vec<RankedAddress>> {
        self.updates.lock().clone()
    }

    /// Returns the most recent address list.
    #[must_use]
    pub fn last(&self) -> Option<Vec<RankedAddress>> {
        self.updates.lock().last().cloned()
    }

    /// Returns the display form of every resolution error received.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl AddressListener for RecordingListener {
    fn on_addresses(&self, addresses: &[RankedAddress]) {
        self.updates.lock().push(addresses.to_vec());
    }

    fn on_resolution_error(&self, error: &TopologyError) {
        self.errors.lock().push(error.to_string());
    }
}
