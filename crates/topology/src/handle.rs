//! Connection handle contracts shared with the host runtime.
//!
//! The host owns the actual transport. It supplies a [`ConnectionFactory`]
//! that turns a ranked address into a handle, and reports handle state
//! transitions back through the [`StateReporter`] each handle receives.

use std::{fmt, sync::Weak};

use crate::ranking::RankedAddress;

/// Connectivity of a single handle, or the aggregate of all handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    /// Not connected and not trying to.
    #[default]
    Idle,
    /// Connection in progress.
    Connecting,
    /// Connected and able to serve calls.
    Ready,
    /// Connection failed; the host may retry on its own.
    Failing,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
            Self::Failing => write!(f, "failing"),
        }
    }
}

/// Unique identity of a handle for the lifetime of its manager.
///
/// A handle destroyed and later re-created for the same address gets a new id,
/// so late notifications from the old one cannot touch the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub(crate) u64);

impl HandleId {
    /// Returns the raw id value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// A host-owned connection to one address.
pub trait ConnectionHandle: Send + Sync + 'static {
    /// Starts connecting. Called once, right after creation.
    fn connect(&self) {}

    /// Releases the connection. Called once, when the address leaves the topology
    /// or the manager shuts down.
    fn shutdown(&self);
}

/// Creates handles for newly discovered addresses.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Handle type produced by this factory.
    type Handle: ConnectionHandle;

    /// Creates a handle for `address`.
    ///
    /// The handle should report its transitions through `reporter`. It must not
    /// call [`StateReporter::report`] from inside this method.
    fn create(&self, address: &RankedAddress, reporter: StateReporter) -> Self::Handle;
}

/// Receiver of handle state transitions.
pub(crate) trait StateSink: Send + Sync {
    fn on_state_change(&self, id: HandleId, state: ConnectivityState);
}

/// Reports state transitions for one handle back to its manager.
///
/// Holds only a weak reference, so a reporter kept alive by the host never
/// keeps the manager alive.
#[derive(Clone)]
pub struct StateReporter {
    id: HandleId,
    sink: Weak<dyn StateSink>,
}

impl StateReporter {
    pub(crate) fn new(id: HandleId, sink: Weak<dyn StateSink>) -> Self {
        Self { id, sink }
    }

    /// Returns the id of the handle this reporter belongs to.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Reports a new state for the handle.
    ///
    /// Returns false if the manager is gone. Reports for handles the manager
    /// has already destroyed are ignored.
    pub fn report(&self, state: ConnectivityState) -> bool {
        match self.sink.upgrade() {
            Some(sink) => {
                sink.on_state_change(self.id, state);
                true
            },
            None => false,
        }
    }

    /// Creates a reporter that is not attached to any manager.
    #[must_use]
    pub fn detached(id: u64) -> Self {
        let sink: Weak<dyn StateSink> = Weak::<DetachedSink>::new();
        Self { id: HandleId(id), sink }
    }
}

impl fmt::Debug for StateReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateReporter")
            .field("id", &self.id)
            .field("attached", &(self.sink.strong_count() > 0))
            .finish()
    }
}

struct DetachedSink;

impl StateSink for DetachedSink {
    fn on_state_change(&self, _id: HandleId, _state: ConnectivityState) {}
}

/// Computes aggregate connectivity over a set of handle states.
///
/// `Ready` if any handle is ready, else `Connecting` if any is connecting,
/// else `Failing` if any handle exists, else `Idle`.
pub fn aggregate_connectivity<I>(states: I) -> ConnectivityState
where
    I: IntoIterator<Item = ConnectivityState>,
{
    let mut any = false;
    let mut connecting = false;
    for state in states {
        any = true;
        match state {
            ConnectivityState::Ready => return ConnectivityState::Ready,
            ConnectivityState::Connecting => connecting = true,
            ConnectivityState::Idle | ConnectivityState::Failing => {},
        }
    }
    if connecting {
        ConnectivityState::Connecting
    } else if any {
        ConnectivityState::Failing
    } else {
        ConnectivityState::Idle
    }
}
