//! One-stop wiring of resolver, connection manager and refresh trigger.

use std::{fmt, future::Future, sync::Arc};

use arc_swap::Guard;
use tokio::sync::watch;
use tonic::Status;
use tracing::info;

use crate::{
    config::ResolverConfig,
    error::Result,
    handle::{ConnectionFactory, ConnectivityState},
    manager::ConnectionManager,
    metrics::{TopologyMetrics, default_metrics},
    picker::{PickError, PickerGeneration},
    refresh::{RefreshPolicy, RefreshTrigger},
    resolver::Resolver,
    source::SourceKind,
};

/// Client-side balancer over a dynamically discovered topology.
///
/// ```text
/// source ──► Resolver ──► ConnectionManager ──► PickerGeneration ──► call
///               ▲                                                     │
///               └──────────────── RefreshTrigger ◄────────────────────┘
/// ```
///
/// # Example
///
/// ```no_run
/// # use inferadb_ledger_topology::{
/// #     ResolverConfig, Seed, SourceKind, TopologyBalancer,
/// #     mock::{MockConnectionFactory, MockTopologySource},
/// # };
/// # async fn example() -> inferadb_ledger_topology::Result<()> {
/// let config = ResolverConfig::builder()
///     .seeds(Seed::parse_all(["ledger-0:5000", "ledger-1:5000"])?)
///     .build()?;
///
/// let balancer = TopologyBalancer::builder()
///     .config(config)
///     .source(SourceKind::polling(MockTopologySource::new()))
///     .factory(MockConnectionFactory::auto_ready())
///     .build()?;
/// balancer.start()?;
///
/// let address = balancer.pick_with(|handle| handle.address().to_owned());
/// # let _ = address;
/// balancer.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct TopologyBalancer<F: ConnectionFactory> {
    resolver: Resolver,
    manager: ConnectionManager<F>,
    trigger: RefreshTrigger,
}

#[bon::bon]
impl<F: ConnectionFactory> TopologyBalancer<F> {
    /// Wires a balancer. Nothing runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Config`](crate::TopologyError::Config) if the
    /// configuration does not validate.
    #[builder]
    pub fn new(
        config: ResolverConfig,
        source: SourceKind,
        factory: F,
        #[builder(default)] refresh_policy: RefreshPolicy,
        #[builder(default = default_metrics())] metrics: Arc<dyn TopologyMetrics>,
    ) -> Result<Self> {
        let manager = ConnectionManager::with_metrics(factory, Arc::clone(&metrics));
        let resolver = Resolver::builder()
            .config(config)
            .source(source)
            .listener(Arc::new(manager.clone()))
            .metrics(Arc::clone(&metrics))
            .build()?;
        let trigger =
            RefreshTrigger::with_metrics(refresh_policy, Arc::new(resolver.clone()), metrics);

        Ok(Self { resolver, manager, trigger })
    }
}

impl<F: ConnectionFactory> TopologyBalancer<F> {
    /// Starts discovery.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::AlreadyStarted`](crate::TopologyError::AlreadyStarted)
    /// if called more than once.
    pub fn start(&self) -> Result<()> {
        self.resolver.start()
    }

    /// Asks the resolver to resubscribe to its current seed.
    pub fn refresh(&self) {
        self.resolver.refresh();
    }

    /// Returns the current picker generation.
    #[must_use]
    pub fn picker(&self) -> Guard<Arc<PickerGeneration<F::Handle>>> {
        self.manager.picker()
    }

    /// Picks a ready handle and applies `f` to it.
    ///
    /// # Errors
    ///
    /// Returns [`PickError::Unavailable`] if no handle is ready.
    pub fn pick_with<R>(&self, f: impl FnOnce(&F::Handle) -> R) -> Result<R, PickError> {
        self.manager.picker().pick().map(f)
    }

    /// Picks a ready handle, runs the call built by `call` and refreshes on matching failures.
    ///
    /// The future returned by `call` must not borrow the handle; clone what it
    /// needs (a channel, a client) before the `async` block.
    ///
    /// # Errors
    ///
    /// Returns `UNAVAILABLE` if no handle is ready, otherwise the call's own
    /// error, unchanged.
    pub async fn call<T, C, Fut>(&self, call: C) -> Result<T, Status>
    where
        C: FnOnce(&F::Handle) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let future = {
            let generation = self.manager.load_picker();
            call(generation.pick()?)
        };
        self.trigger.intercept(future).await
    }

    /// Returns a refresh trigger for wrapping calls made outside [`call`](Self::call).
    #[must_use]
    pub fn refresh_trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    /// Returns the current aggregate connectivity.
    #[must_use]
    pub fn connectivity(&self) -> ConnectivityState {
        self.manager.connectivity()
    }

    /// Subscribes to aggregate connectivity changes.
    #[must_use]
    pub fn watch_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.manager.watch_connectivity()
    }

    /// Returns the resolver.
    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Returns the connection manager.
    #[must_use]
    pub fn manager(&self) -> &ConnectionManager<F> {
        &self.manager
    }

    /// Stops discovery, then destroys every handle.
    pub async fn shutdown(&self) {
        self.resolver.shutdown().await;
        self.manager.shutdown();
        info!("Topology balancer shut down");
    }
}

impl<F: ConnectionFactory> fmt::Debug for TopologyBalancer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyBalancer")
            .field("resolver", &self.resolver)
            .field("manager", &self.manager)
            .field("trigger", &self.trigger)
            .finish()
    }
}
