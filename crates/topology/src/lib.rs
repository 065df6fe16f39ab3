//! Client-side topology discovery, seed failover and connection selection for InferaDB Ledger.
//!
//! A client is configured with a handful of seed addresses. From one seed at a
//! time it learns the cluster's current membership, ranks the eligible nodes,
//! keeps one connection per ranked address and spreads calls across the
//! connections that are ready.
//!
//! # Features
//!
//! - **Seed failover**: a seed that fails, times out or reports nothing usable is abandoned for the next
//! - **Push or poll**: streaming sources are consumed directly, polling sources are adapted with backoff
//! - **Stable ranking**: deterministic order by a pluggable comparator, duplicates collapsed
//! - **Lock-free picks**: round-robin over an immutable, atomically swapped generation
//! - **Refresh on failure**: a call failing with a matching status re-resolves immediately
//!
//! # Quick Start
//!
//! ```no_run
//! use inferadb_ledger_topology::{
//!     ResolverConfig, Seed, SourceKind, TopologyBalancer,
//!     mock::{MockConnectionFactory, MockTopologySource},
//! };
//!
//! # async fn example() -> inferadb_ledger_topology::Result<()> {
//! let config = ResolverConfig::builder()
//!     .seeds(Seed::parse_all(["ledger-0:5000", "ledger-1:5000", "ledger-2:5000"])?)
//!     .build()?;
//!
//! let balancer = TopologyBalancer::builder()
//!     .config(config)
//!     .source(SourceKind::polling(MockTopologySource::new()))
//!     .factory(MockConnectionFactory::auto_ready())
//!     .build()?;
//! balancer.start()?;
//!
//! let outcome = balancer
//!     .call(|handle| {
//!         let address = handle.address().to_owned();
//!         async move { Ok::<_, tonic::Status>(address) }
//!     })
//!     .await;
//! # let _ = outcome;
//!
//! balancer.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TopologyBalancer (Public API)               │
//! │   .start() │ .call() │ .pick_with() │ .refresh()           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                        Resolver                             │
//! │   Seed failover │ Cycle backoff │ Ranking │ Dedup          │
//! ├─────────────────────────────────────────────────────────────┤
//! │            StreamingSource / PollingAdapter                 │
//! │   Push subscriptions │ Poll delay │ Per-attempt timeout    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   ConnectionManager                         │
//! │   Handle reconcile │ Connectivity │ Picker generations     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    PickerGeneration                         │
//! │   Ready handles in rank order │ Atomic round-robin cursor  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod balancer;
mod config;
mod error;
mod handle;
mod manager;
mod metrics;
pub mod mock;
mod node;
mod picker;
mod polling;
mod ranking;
mod refresh;
mod resolver;
mod seed;
mod snapshot;
mod source;

// Public API exports
pub use backoff::{BackoffPolicy, backoff_delay, backoff_delay_with, base_delay};
pub use balancer::TopologyBalancer;
pub use config::{ConfigError, ResolverConfig};
pub use error::{Result, TopologyError};
pub use handle::{
    ConnectionFactory, ConnectionHandle, ConnectivityState, HandleId, StateReporter,
    aggregate_connectivity,
};
pub use manager::ConnectionManager;
pub use metrics::{MetricsTopologyMetrics, NoopTopologyMetrics, TopologyMetrics, default_metrics};
pub use node::{Node, NodeAttributes, by_priority};
pub use picker::{PickError, PickerEntry, PickerGeneration};
pub use polling::{PollingAdapter, PollingSettings};
pub use ranking::{RankedAddress, rank_snapshot};
pub use refresh::{Refresh, RefreshPolicy, RefreshTrigger};
pub use resolver::{AddressListener, Resolver};
pub use seed::Seed;
pub use snapshot::{ContentHash, TopologySnapshot};
pub use source::{PollingSource, SnapshotStream, SourceKind, StreamingSource};
