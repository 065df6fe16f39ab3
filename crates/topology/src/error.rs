//! Topology error types.
//!
//! Errors fall into three groups:
//! - **Configuration**: invalid seeds or settings, fatal at construction
//! - **Discovery**: seed unreachable, empty or ineligible topology, timeouts; absorbed by retry and
//!   seed failover, never surfaced to RPC callers
//! - **Lifecycle**: cancellation and double start
//!
//! Call errors from the host runtime are not represented here. They pass through
//! the refresh trigger untouched.

use snafu::{Location, Snafu};

use crate::config::ConfigError;

/// Result type alias for topology operations.
pub type Result<T, E = TopologyError> = std::result::Result<T, E>;

/// Errors produced by topology discovery and resolution.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TopologyError {
    /// Configuration was rejected at construction.
    #[snafu(display("Configuration error: {source}"))]
    Config {
        /// Underlying validation failure.
        source: ConfigError,
    },

    /// A seed could not be queried or returned a failure.
    #[snafu(display("Discovery via {seed} failed at {location}: {message}"))]
    Discovery {
        /// Seed the attempt was bound to.
        seed: String,
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The seed reported a topology with no nodes at all.
    #[snafu(display("Seed {seed} reported an empty topology"))]
    EmptyTopology {
        /// Seed the snapshot came from.
        seed: String,
    },

    /// The seed reported nodes, but none of them are eligible.
    #[snafu(display("Seed {seed} reported {total} nodes but none are eligible"))]
    NoEligibleNodes {
        /// Seed the snapshot came from.
        seed: String,
        /// Raw node count of the snapshot.
        total: usize,
    },

    /// No snapshot arrived within the per-attempt timeout.
    #[snafu(display("No snapshot from {seed} within {duration_ms}ms"))]
    AttemptTimeout {
        /// Seed the attempt was bound to.
        seed: String,
        /// Timeout in milliseconds.
        duration_ms: u64,
    },

    /// The snapshot stream from a seed finished.
    #[snafu(display("Snapshot stream from {seed} ended"))]
    StreamEnded {
        /// Seed the stream was bound to.
        seed: String,
    },

    /// The resolver background task was already started.
    #[snafu(display("Resolver already started"))]
    AlreadyStarted,
}

impl TopologyError {
    /// Creates a discovery error for a seed.
    ///
    /// Intended for [`PollingSource`](crate::PollingSource) and
    /// [`StreamingSource`](crate::StreamingSource) implementations.
    #[track_caller]
    pub fn discovery(seed: impl ToString, message: impl Into<String>) -> Self {
        DiscoverySnafu { seed: seed.to_string(), message: message.into() }.build()
    }

    /// Returns true if the error is a transient discovery condition.
    ///
    /// Transient errors are absorbed by backoff inside the polling adapter and by
    /// seed failover inside the resolver. Everything else is fatal or a lifecycle signal.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Discovery { .. }
            | Self::EmptyTopology { .. }
            | Self::NoEligibleNodes { .. }
            | Self::AttemptTimeout { .. }
            | Self::StreamEnded { .. } => true,
            Self::Config { .. } | Self::AlreadyStarted => false,
        }
    }

    /// Returns true if the error is a configuration error.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

impl From<ConfigError> for TopologyError {
    fn from(source: ConfigError) -> Self {
        Self::Config { source }
    }
}
