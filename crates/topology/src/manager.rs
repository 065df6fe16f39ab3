//! Connection handle lifecycle and picker publication.
//!
//! The [`ConnectionManager`] is the sole owner of connection handles. It keeps
//! one handle per address, reconciles that set against every ranked address
//! list from the resolver, and tracks the state each handle reports.
//!
//! Every reconciliation and every state transition rebuilds a
//! [`PickerGeneration`] from the full handle set and publishes it through an
//! [`ArcSwap`]. Both kinds of mutation are serialized by one mutex, and the
//! swap happens inside that critical section, so published generations are
//! ordered the same way as the mutations that produced them.
//!
//! Host callbacks (`connect`, `shutdown`) run after the lock is released, so a
//! handle may report state synchronously from inside them.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::{
    error::TopologyError,
    handle::{
        ConnectionFactory, ConnectionHandle, ConnectivityState, HandleId, StateReporter, StateSink,
        aggregate_connectivity,
    },
    metrics::{TopologyMetrics, default_metrics},
    picker::{PickerEntry, PickerGeneration},
    ranking::RankedAddress,
    resolver::AddressListener,
};

/// Owns connection handles and publishes the current picker.
///
/// Cheap to clone; clones share the same handles and picker.
pub struct ConnectionManager<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionManager<F> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

struct Shared<F: ConnectionFactory> {
    factory: F,
    state: Mutex<ManagerState<F::Handle>>,
    picker: ArcSwap<PickerGeneration<F::Handle>>,
    connectivity: watch::Sender<ConnectivityState>,
    next_id: AtomicU64,
    metrics: Arc<dyn TopologyMetrics>,
    this: Weak<Shared<F>>,
}

struct ManagerState<H> {
    handles: HashMap<String, ManagedHandle<H>>,
    addresses_by_id: HashMap<HandleId, String>,
    shut_down: bool,
}

struct ManagedHandle<H> {
    id: HandleId,
    handle: Arc<H>,
    state: ConnectivityState,
    order_index: usize,
}

impl<F: ConnectionFactory> ConnectionManager<F> {
    /// Creates a manager with no handles and the no-op metrics sink.
    pub fn new(factory: F) -> Self {
        Self::with_metrics(factory, default_metrics())
    }

    /// Creates a manager reporting to `metrics`.
    pub fn with_metrics(factory: F, metrics: Arc<dyn TopologyMetrics>) -> Self {
        let (connectivity, _) = watch::channel(ConnectivityState::Idle);
        let shared = Arc::new_cyclic(|this| Shared {
            factory,
            state: Mutex::new(ManagerState {
                handles: HashMap::new(),
                addresses_by_id: HashMap::new(),
                shut_down: false,
            }),
            picker: ArcSwap::from_pointee(PickerGeneration::empty()),
            connectivity,
            next_id: AtomicU64::new(1),
            metrics,
            this: this.clone(),
        });
        Self { shared }
    }

    /// Reconciles handles against a ranked address list.
    ///
    /// Creates handles for new addresses, destroys handles whose address is
    /// gone, and updates the rank of the rest. Ignored after [`shutdown`](Self::shutdown).
    pub fn update_addresses(&self, addresses: &[RankedAddress]) {
        let shared = &self.shared;
        let mut created = Vec::new();
        let mut removed = Vec::new();

        {
            let mut guard = shared.state.lock();
            if guard.shut_down {
                debug!(addresses = addresses.len(), "Ignoring address update after shutdown");
                return;
            }
            let state = &mut *guard;

            let wanted: HashMap<&str, usize> = addresses
                .iter()
                .map(|ranked| (ranked.address.as_str(), ranked.order_index))
                .collect();

            state.handles.retain(|address, managed| match wanted.get(address.as_str()) {
                Some(&order_index) => {
                    managed.order_index = order_index;
                    true
                },
                None => {
                    removed.push((address.clone(), managed.id, Arc::clone(&managed.handle)));
                    false
                },
            });
            for (_, id, _) in &removed {
                state.addresses_by_id.remove(id);
            }

            for ranked in addresses {
                if state.handles.contains_key(&ranked.address) {
                    continue;
                }
                let id = HandleId(shared.next_id.fetch_add(1, Ordering::Relaxed));
                let sink: Weak<dyn StateSink> = shared.this.clone();
                let handle = Arc::new(shared.factory.create(ranked, StateReporter::new(id, sink)));
                state.handles.insert(
                    ranked.address.clone(),
                    ManagedHandle {
                        id,
                        handle: Arc::clone(&handle),
                        state: ConnectivityState::Idle,
                        order_index: ranked.order_index,
                    },
                );
                state.addresses_by_id.insert(id, ranked.address.clone());
                created.push(handle);
            }

            shared.publish(state);
        }

        if !created.is_empty() || !removed.is_empty() {
            info!(
                added = created.len(),
                removed = removed.len(),
                total = addresses.len(),
                "Reconciled connection handles"
            );
        }

        for (address, id, handle) in removed {
            debug!(address = %address, id = %id, "Shutting down handle");
            handle.shutdown();
        }
        for handle in created {
            handle.connect();
        }
    }

    /// Returns the current picker generation.
    ///
    /// Lock-free. The returned guard stays valid while newer generations are
    /// published.
    #[must_use]
    pub fn picker(&self) -> Guard<Arc<PickerGeneration<F::Handle>>> {
        self.shared.picker.load()
    }

    /// Returns an owned reference to the current picker generation.
    ///
    /// Prefer [`picker`](Self::picker) for short reads; use this when the
    /// generation is held across an `.await`.
    #[must_use]
    pub fn load_picker(&self) -> Arc<PickerGeneration<F::Handle>> {
        self.shared.picker.load_full()
    }

    /// Returns the current aggregate connectivity.
    #[must_use]
    pub fn connectivity(&self) -> ConnectivityState {
        *self.shared.connectivity.borrow()
    }

    /// Subscribes to aggregate connectivity changes.
    #[must_use]
    pub fn watch_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.shared.connectivity.subscribe()
    }

    /// Returns the number of live handles.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.shared.state.lock().handles.len()
    }

    /// Returns the current rank of `address`, if it has a handle.
    #[must_use]
    pub fn order_index(&self, address: &str) -> Option<usize> {
        self.shared.state.lock().handles.get(address).map(|managed| managed.order_index)
    }

    /// Returns the last reported state of the handle for `address`.
    #[must_use]
    pub fn handle_state(&self, address: &str) -> Option<ConnectivityState> {
        self.shared.state.lock().handles.get(address).map(|managed| managed.state)
    }

    /// Returns the id of the handle for `address`.
    #[must_use]
    pub fn handle_id(&self, address: &str) -> Option<HandleId> {
        self.shared.state.lock().handles.get(address).map(|managed| managed.id)
    }

    /// Returns managed addresses in rank order.
    #[must_use]
    pub fn addresses(&self) -> Vec<RankedAddress> {
        let guard = self.shared.state.lock();
        let mut addresses: Vec<RankedAddress> = guard
            .handles
            .iter()
            .map(|(address, managed)| RankedAddress::new(address.clone(), managed.order_index))
            .collect();
        addresses.sort_by_key(|ranked| ranked.order_index);
        addresses
    }

    /// Destroys every handle and publishes an empty picker.
    ///
    /// Later address updates are ignored. Idempotent.
    pub fn shutdown(&self) {
        let drained: Vec<(String, ManagedHandle<F::Handle>)> = {
            let mut guard = self.shared.state.lock();
            if guard.shut_down {
                return;
            }
            guard.shut_down = true;
            guard.addresses_by_id.clear();
            let drained = guard.handles.drain().collect();
            self.shared.publish(&guard);
            drained
        };

        info!(handles = drained.len(), "Connection manager shut down");
        for (_, managed) in drained {
            managed.handle.shutdown();
        }
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shut_down
    }
}

impl<F: ConnectionFactory> Shared<F> {
    /// Rebuilds the picker from the full handle set and recomputes connectivity.
    ///
    /// Must be called with the state lock held.
    fn publish(&self, state: &ManagerState<F::Handle>) {
        let generation = PickerGeneration::build(state.handles.values().map(|managed| {
            PickerEntry {
                handle: Arc::clone(&managed.handle),
                state: managed.state,
                order_index: Some(managed.order_index),
            }
        }));
        let ready = generation.len();
        self.picker.store(Arc::new(generation));

        let aggregate = aggregate_connectivity(state.handles.values().map(|managed| managed.state));
        self.connectivity.send_if_modified(|current| {
            if *current == aggregate {
                return false;
            }
            info!(from = %current, to = %aggregate, "Aggregate connectivity changed");
            *current = aggregate;
            true
        });

        self.metrics.record_picker_rebuild(ready);
    }
}

impl<F: ConnectionFactory> StateSink for Shared<F> {
    fn on_state_change(&self, id: HandleId, new_state: ConnectivityState) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(managed) = state
            .addresses_by_id
            .get(&id)
            .and_then(|address| state.handles.get_mut(address))
        else {
            trace!(id = %id, state = %new_state, "Ignoring state report from destroyed handle");
            return;
        };
        if managed.state == new_state {
            return;
        }

        debug!(id = %id, from = %managed.state, to = %new_state, "Handle state changed");
        managed.state = new_state;
        self.publish(state);
    }
}

impl<F: ConnectionFactory> AddressListener for ConnectionManager<F> {
    fn on_addresses(&self, addresses: &[RankedAddress]) {
        self.update_addresses(addresses);
    }

    fn on_resolution_error(&self, error: &TopologyError) {
        if self.connectivity() != ConnectivityState::Ready {
            warn!(error = %error, handles = self.handle_count(), "Topology resolution degraded");
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for ConnectionManager<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("handles", &self.handle_count())
            .field("connectivity", &self.connectivity())
            .finish_non_exhaustive()
    }
}
