//! Lock-free round-robin selection over ready connections.
//!
//! A [`PickerGeneration`] is an immutable array of ready handles plus an atomic
//! cursor. The connection manager builds a new generation whenever membership
//! or readiness changes and swaps it in atomically; callers holding an older
//! generation keep a consistent view until they drop it.
//!
//! Construction is the only step that allocates. [`PickerGeneration::pick`]
//! takes no locks, performs a single atomic increment and never allocates.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use snafu::Snafu;

use crate::handle::ConnectivityState;

/// Returned when a generation has no ready handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum PickError {
    /// No connection is ready to serve the call.
    #[snafu(display("no ready connections"))]
    Unavailable,
}

impl From<PickError> for tonic::Status {
    fn from(err: PickError) -> Self {
        tonic::Status::unavailable(err.to_string())
    }
}

/// One handle as seen by the picker builder.
#[derive(Debug)]
pub struct PickerEntry<H> {
    /// The handle.
    pub handle: Arc<H>,
    /// Current connectivity of the handle.
    pub state: ConnectivityState,
    /// Rank of the handle's address; `None` sorts last.
    pub order_index: Option<usize>,
}

/// An immutable set of ready handles with a shared round-robin cursor.
pub struct PickerGeneration<H> {
    ready: Box<[Arc<H>]>,
    cursor: AtomicUsize,
}

impl<H> PickerGeneration<H> {
    /// Builds a generation from the full handle set.
    ///
    /// Keeps only `Ready` handles and stable-sorts them by `order_index`.
    pub fn build<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = PickerEntry<H>>,
    {
        let mut ready: Vec<(Option<usize>, Arc<H>)> = entries
            .into_iter()
            .filter(|entry| entry.state == ConnectivityState::Ready)
            .map(|entry| (entry.order_index, entry.handle))
            .collect();
        ready.sort_by_key(|(order_index, _)| (order_index.is_none(), *order_index));

        Self {
            ready: ready.into_iter().map(|(_, handle)| handle).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Creates a generation with no handles. Does not allocate.
    #[must_use]
    pub fn empty() -> Self {
        Self { ready: Box::default(), cursor: AtomicUsize::new(0) }
    }

    /// Selects the next ready handle in round-robin order.
    ///
    /// # Errors
    ///
    /// Returns [`PickError::Unavailable`] if the generation is empty.
    #[inline]
    pub fn pick(&self) -> Result<&H, PickError> {
        let len = self.ready.len();
        if len == 0 {
            return Err(PickError::Unavailable);
        }
        // fetch_add wraps on overflow, so the cursor never traps.
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(&self.ready[i % len])
    }

    /// Returns the number of ready handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ready.len()
    }

    /// Returns true if no handle is ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Returns the raw cursor value: picks served by this generation, modulo wraparound.
    #[must_use]
    pub fn picks(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Iterates over the ready handles in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &H> {
        self.ready.iter().map(Arc::as_ref)
    }
}

impl<H> Default for PickerGeneration<H> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<H> fmt::Debug for PickerGeneration<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PickerGeneration")
            .field("ready", &self.ready.len())
            .field("picks", &self.picks())
            .finish()
    }
}
