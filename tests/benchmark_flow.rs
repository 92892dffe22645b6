//! Benchmark scenarios: gouging short-circuits, wallet problems stay off
//! the host's record, and a compliant host gets a full measured round
//! trip with a formed contract.

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{compliant_settings, wait_until, TestStack};
use hostscore::types::host::HostScan;
use hostscore::types::primitives::{Currency, HostKey, Network};
use hostscore::types::protocol::{HostSettings, ProtocolSnapshot};
use hostscore::types::Host;

/// Seed a host whose latest scan succeeded moments ago with the given
/// settings, which puts it in the benchmark window but not the scan
/// window.
async fn seed_scanned_host(stack: &TestStack, key: HostKey, settings: HostSettings) {
    let host = Host::announced(
        Network::Mainnet,
        key,
        format!("host-{}.example:9982", key.to_hex().get(..6).unwrap_or("x")),
        false,
        Utc::now() - chrono::TimeDelta::days(200),
        1_000,
    );
    stack.store.update(host).await.expect("seed host");
    let scan = HostScan {
        id: 0,
        network: Network::Mainnet,
        node: "eu-test".into(),
        public_key: key,
        timestamp: Utc::now(),
        success: true,
        latency_ms: Some(25.0),
        error: None,
        settings: Some(ProtocolSnapshot::V1 {
            settings,
            price_table: None,
        }),
    };
    stack.store.append_scan(scan, true).await.expect("seed scan");
}

async fn drain(stack: &TestStack, key: HostKey) {
    let scheduler = Arc::clone(&stack.scheduler);
    assert!(
        wait_until(|| {
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler.queue_depths() == (0, 0) && !scheduler.is_in_flight(key)
            }
        })
        .await,
        "benchmark queue never drained"
    );
}

#[tokio::test(start_paused = true)]
async fn compliant_host_gets_a_measured_benchmark() {
    let stack = TestStack::new();
    let key = HostKey::new([0x11; 32]);
    seed_scanned_host(&stack, key, compliant_settings()).await;
    stack.spawn_loops();

    stack.scheduler.queue_scan(key).await.expect("queue");
    let store = Arc::clone(&stack.store);
    assert!(
        wait_until(|| {
            let store = Arc::clone(&store);
            async move {
                store
                    .host(key)
                    .await
                    .is_some_and(|host| !host.benchmark_history.is_empty())
            }
        })
        .await,
        "benchmark never landed"
    );
    stack.token.cancel();

    let host = stack.store.host(key).await.expect("host exists");
    let benchmark = &host.benchmark_history[0];
    assert!(benchmark.success, "error: {:?}", benchmark.error);
    assert!(benchmark.upload_speed > 0.0);
    assert!(benchmark.download_speed > 0.0);
    assert!(host.score.benchmarks >= 0.0);

    assert_eq!(*stack.rhp.contracts_formed.lock(), 1);
    assert_eq!(stack.chain.broadcasts.lock().len(), 1);
    assert!(
        host.protocol.stored_revision().is_some(),
        "contract revision was not persisted"
    );
    assert_eq!(stack.persistence.benchmark_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn gouging_host_is_skipped_without_a_record() {
    let stack = TestStack::new();
    let key = HostKey::new([0x22; 32]);
    // MaxCollateral of zero fails the gouging check outright.
    seed_scanned_host(
        &stack,
        key,
        HostSettings {
            max_collateral: Currency::ZERO,
            ..compliant_settings()
        },
    )
    .await;
    stack.spawn_loops();

    stack.scheduler.queue_scan(key).await.expect("queue");
    drain(&stack, key).await;
    stack.token.cancel();

    // No contract was attempted and no benchmark row was written.
    assert_eq!(*stack.rhp.contracts_formed.lock(), 0);
    assert_eq!(stack.persistence.benchmark_count(), 0);
    let host = stack.store.host(key).await.expect("host exists");
    assert!(host.benchmark_history.is_empty());
}

#[tokio::test(start_paused = true)]
async fn broke_wallet_does_not_penalize_the_host() {
    let stack = TestStack::new();
    *stack.wallet.broke.lock() = true;
    let key = HostKey::new([0x33; 32]);
    seed_scanned_host(&stack, key, compliant_settings()).await;
    stack.spawn_loops();

    let failures_before = stack.store.host(key).await.expect("host").failures;
    stack.scheduler.queue_scan(key).await.expect("queue");
    drain(&stack, key).await;
    stack.token.cancel();

    let host = stack.store.host(key).await.expect("host exists");
    assert_eq!(stack.persistence.benchmark_count(), 0);
    assert!(
        (host.failures - failures_before).abs() < f64::EPSILON,
        "a funding problem on our side was charged to the host"
    );
    // The host stays eligible for the next attempt.
    assert!(!stack.scheduler.is_in_flight(key));
}
