//! Topology source contracts.
//!
//! A source reports the current node set when asked through a seed. It comes in
//! one of two forms:
//!
//! - [`PollingSource`]: pull-based. Each `fetch` returns one snapshot.
//! - [`StreamingSource`]: push-based. `subscribe` returns a stream of snapshots.
//!
//! [`SourceKind`] tags which form was supplied. The resolver only ever consumes
//! streams, so a polling source is wrapped in a
//! [`PollingAdapter`](crate::polling::PollingAdapter) once at construction.
//!
//! Sources are called by a single logical caller at a time.

use std::{cmp::Ordering, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    metrics::TopologyMetrics,
    node::{Node, by_priority},
    polling::{PollingAdapter, PollingSettings},
    seed::Seed,
    snapshot::TopologySnapshot,
};

/// Stream of snapshots (or failures) from one seed.
pub type SnapshotStream = BoxStream<'static, Result<TopologySnapshot>>;

/// A pull-based topology source.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use async_trait::async_trait;
/// use inferadb_ledger_topology::{Node, PollingSource, Result, Seed, TopologySnapshot};
///
/// struct StaticSource;
///
/// #[async_trait]
/// impl PollingSource for StaticSource {
///     async fn fetch(&self, _seed: &Seed, _timeout: Duration) -> Result<TopologySnapshot> {
///         Ok(TopologySnapshot::new([Node::new("10.0.0.1:5000", 0)]))
///     }
/// }
/// ```
#[async_trait]
pub trait PollingSource: Send + Sync + 'static {
    /// Fetches the current topology through `seed`.
    ///
    /// `timeout` is advisory. The caller also enforces it.
    async fn fetch(&self, seed: &Seed, timeout: Duration) -> Result<TopologySnapshot>;

    /// Total order used to rank eligible nodes. Lower sorts first.
    fn compare(&self, a: &Node, b: &Node) -> Ordering {
        by_priority(a, b)
    }
}

/// A push-based topology source.
pub trait StreamingSource: Send + Sync + 'static {
    /// Opens a snapshot stream through `seed`.
    ///
    /// The stream should end promptly once `cancel` fires. Errors may be
    /// yielded as items; the resolver treats any error or stream end as a
    /// reason to fail over to the next seed.
    fn subscribe(&self, seed: &Seed, timeout: Duration, cancel: CancellationToken)
    -> SnapshotStream;

    /// Total order used to rank eligible nodes. Lower sorts first.
    fn compare(&self, a: &Node, b: &Node) -> Ordering {
        by_priority(a, b)
    }

    /// Deadline the resolver applies while waiting for the first snapshot.
    ///
    /// `None` means the stream enforces its own timeouts.
    fn attempt_deadline(&self, timeout: Duration) -> Option<Duration> {
        Some(timeout)
    }
}

/// The two supported source forms.
#[derive(Clone)]
pub enum SourceKind {
    /// Pull-based source, wrapped in a polling adapter.
    Polling(Arc<dyn PollingSource>),
    /// Push-based source, used as is.
    Streaming(Arc<dyn StreamingSource>),
}

impl SourceKind {
    /// Wraps a pull-based source.
    pub fn polling(source: impl PollingSource) -> Self {
        Self::Polling(Arc::new(source))
    }

    /// Wraps a push-based source.
    pub fn streaming(source: impl StreamingSource) -> Self {
        Self::Streaming(Arc::new(source))
    }

    /// Resolves the variant into the single stream producer the resolver drives.
    pub(crate) fn into_producer(
        self,
        settings: PollingSettings,
        metrics: Arc<dyn TopologyMetrics>,
    ) -> Arc<dyn StreamingSource> {
        match self {
            Self::Polling(source) => Arc::new(PollingAdapter::new(source, settings, metrics)),
            Self::Streaming(source) => source,
        }
    }
}

impl fmt::Debug for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polling(_) => f.write_str("SourceKind::Polling"),
            Self::Streaming(_) => f.write_str("SourceKind::Streaming"),
        }
    }
}
