//! End-to-end discovery tests driven through the public API.
//!
//! Every test runs on a paused Tokio clock, so poll delays, backoff and
//! attempt timeouts elapse instantly once all tasks are idle.
//!
//! ## Test Categories
//!
//! - **Seed failover**: unreachable seeds are skipped in order
//! - **Topology changes**: ineligible nodes lose their handles
//! - **Connectivity**: picks follow handle readiness
//! - **Refresh**: call failures re-resolve immediately

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use inferadb_ledger_test_utils::assert_eventually;
use inferadb_ledger_topology::{
    ConnectivityState, Node, PickError, RankedAddress, RefreshPolicy, ResolverConfig, Seed,
    SourceKind, TopologyBalancer, TopologySnapshot,
    mock::{MockConnectionFactory, MockTopologySource},
};
use tonic::{Code, Status};
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(120);

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(seeds: &[&str]) -> ResolverConfig {
    ResolverConfig::builder()
        .seeds(Seed::parse_all(seeds.iter().copied()).unwrap())
        .poll_delay(Duration::from_secs(1))
        .max_discovery_attempts(1)
        .build()
        .unwrap()
}

fn polling_balancer(
    source: &MockTopologySource,
    factory: &MockConnectionFactory,
) -> TopologyBalancer<MockConnectionFactory> {
    TopologyBalancer::builder()
        .config(config(&["seed-a:5000", "seed-b:5000", "seed-c:5000"]))
        .source(SourceKind::polling(source.clone()))
        .factory(factory.clone())
        .build()
        .unwrap()
}

fn ranked(entries: &[(&str, usize)]) -> Vec<RankedAddress> {
    entries.iter().map(|(address, rank)| RankedAddress::new(*address, *rank)).collect()
}

fn pick_address(balancer: &TopologyBalancer<MockConnectionFactory>) -> Result<String, PickError> {
    balancer.pick_with(|handle| handle.address().to_owned())
}

// ============================================================================
// Seed failover
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fails_over_to_third_seed_and_balances() {
    init_tracing();
    let source = MockTopologySource::new();
    source.fail("seed-a:5000");
    source.fail("seed-b:5000");
    source.respond(
        "seed-c:5000",
        TopologySnapshot::new([Node::new("node1:5000", 0), Node::new("node2:5000", 1)]),
    );
    let factory = MockConnectionFactory::auto_ready();
    let balancer = polling_balancer(&source, &factory);

    balancer.start().unwrap();
    assert!(assert_eventually(WAIT, || balancer.picker().len() == 2).await);

    assert_eq!(&source.attempts()[..3], ["seed-a:5000", "seed-b:5000", "seed-c:5000"]);
    assert_eq!(balancer.manager().addresses(), ranked(&[("node1:5000", 0), ("node2:5000", 1)]));
    assert_eq!(balancer.resolver().current_seed().to_string(), "seed-c:5000");
    assert_eq!(balancer.connectivity(), ConnectivityState::Ready);

    let picks: Vec<String> = (0..4).map(|_| pick_address(&balancer).unwrap()).collect();
    assert_eq!(picks, ["node1:5000", "node2:5000", "node1:5000", "node2:5000"]);

    balancer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_all_seeds_failing_keeps_cycling() {
    init_tracing();
    let source = MockTopologySource::new();
    let factory = MockConnectionFactory::auto_ready();
    let balancer = polling_balancer(&source, &factory);

    balancer.start().unwrap();
    assert!(assert_eventually(WAIT, || source.attempts().len() >= 6).await);

    assert_eq!(
        &source.attempts()[..6],
        ["seed-a:5000", "seed-b:5000", "seed-c:5000", "seed-a:5000", "seed-b:5000", "seed-c:5000"]
    );
    assert_eq!(balancer.pick_with(|_| ()), Err(PickError::Unavailable));
    assert!(factory.created().is_empty());

    balancer.shutdown().await;
}

// ============================================================================
// Topology changes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_ineligible_node_is_removed() {
    init_tracing();
    let source = MockTopologySource::new();
    source.respond(
        "seed-a:5000",
        TopologySnapshot::new([Node::new("node1:5000", 0), Node::new("node2:5000", 1)]),
    );
    let factory = MockConnectionFactory::auto_ready();
    let balancer = polling_balancer(&source, &factory);
    balancer.start().unwrap();
    assert!(assert_eventually(WAIT, || balancer.picker().len() == 2).await);

    source.respond(
        "seed-a:5000",
        TopologySnapshot::new([
            Node::new("node1:5000", 0).with_eligible(false),
            Node::new("node2:5000", 1),
        ]),
    );
    assert!(assert_eventually(WAIT, || balancer.manager().handle_count() == 1).await);

    assert_eq!(balancer.manager().addresses(), ranked(&[("node2:5000", 0)]));
    assert_eq!(factory.shut_down(), ["node1:5000"]);
    for _ in 0..3 {
        assert_eq!(pick_address(&balancer).unwrap(), "node2:5000");
    }

    balancer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_priority_change_reorders_without_reconnecting() {
    init_tracing();
    let source = MockTopologySource::new();
    source.respond(
        "seed-a:5000",
        TopologySnapshot::new([Node::new("node1:5000", 0), Node::new("node2:5000", 1)]),
    );
    let factory = MockConnectionFactory::auto_ready();
    let balancer = polling_balancer(&source, &factory);
    balancer.start().unwrap();
    assert!(assert_eventually(WAIT, || balancer.picker().len() == 2).await);

    source.respond(
        "seed-a:5000",
        TopologySnapshot::new([Node::new("node1:5000", 5), Node::new("node2:5000", 1)]),
    );
    assert!(
        assert_eventually(WAIT, || balancer.manager().order_index("node2:5000") == Some(0)).await
    );

    assert_eq!(factory.created(), ["node1:5000", "node2:5000"]);
    assert!(factory.shut_down().is_empty());
    let order: Vec<String> =
        balancer.picker().iter().map(|handle| handle.address().to_owned()).collect();
    assert_eq!(order, ["node2:5000", "node1:5000"]);

    balancer.shutdown().await;
}

// ============================================================================
// Connectivity
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_picks_follow_handle_readiness() {
    init_tracing();
    let source = MockTopologySource::new();
    source.respond(
        "seed-a:5000",
        TopologySnapshot::new([Node::new("node1:5000", 0), Node::new("node2:5000", 1)]),
    );
    let factory = MockConnectionFactory::new();
    let balancer = polling_balancer(&source, &factory);
    let mut connectivity = balancer.watch_connectivity();
    balancer.start().unwrap();
    assert!(assert_eventually(WAIT, || balancer.manager().handle_count() == 2).await);

    assert_eq!(balancer.connectivity(), ConnectivityState::Failing);
    assert!(factory.set_state("node1:5000", ConnectivityState::Connecting));
    assert_eq!(balancer.connectivity(), ConnectivityState::Connecting);
    assert_eq!(pick_address(&balancer), Err(PickError::Unavailable));

    assert!(factory.set_state("node2:5000", ConnectivityState::Ready));
    connectivity.wait_for(|state| *state == ConnectivityState::Ready).await.unwrap();
    assert_eq!(pick_address(&balancer).unwrap(), "node2:5000");

    assert!(factory.set_state("node2:5000", ConnectivityState::Failing));
    assert!(factory.set_state("node1:5000", ConnectivityState::Failing));
    assert_eq!(balancer.connectivity(), ConnectivityState::Failing);
    assert_eq!(pick_address(&balancer), Err(PickError::Unavailable));

    balancer.shutdown().await;
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unavailable_call_refreshes_streaming_seed() {
    init_tracing();
    let source = MockTopologySource::new();
    source.respond("seed-a:5000", TopologySnapshot::new([Node::new("node1:5000", 0)]));
    let factory = MockConnectionFactory::auto_ready();
    let balancer = TopologyBalancer::builder()
        .config(config(&["seed-a:5000", "seed-b:5000"]))
        .source(SourceKind::streaming(source.clone()))
        .factory(factory.clone())
        .refresh_policy(RefreshPolicy::unavailable())
        .build()
        .unwrap();
    balancer.start().unwrap();
    assert!(assert_eventually(WAIT, || balancer.picker().len() == 1).await);

    let internal = balancer.call(|_| async { Err::<(), _>(Status::internal("boom")) }).await;
    assert_eq!(internal.unwrap_err().code(), Code::Internal);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.attempt_count("seed-a:5000"), 1);

    source.respond(
        "seed-a:5000",
        TopologySnapshot::new([Node::new("node1:5000", 0), Node::new("node3:5000", 1)]),
    );
    let failed = balancer.call(|_| async { Err::<(), _>(Status::unavailable("gone")) }).await;
    assert_eq!(failed.unwrap_err().message(), "gone");

    assert!(assert_eventually(WAIT, || balancer.picker().len() == 2).await);
    assert_eq!(source.attempt_count("seed-a:5000"), 2);
    assert_eq!(factory.created(), ["node1:5000", "node3:5000"]);

    balancer.shutdown().await;
}
