//! Discovery scenarios: a chain announcement flows through the
//! subscriber, the scheduler and a scan worker into a scored host.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use common::{announcement, block, compliant_settings, wait_until, TestStack};
use hostscore::types::host::HostScan;
use hostscore::types::primitives::{HostKey, Network};
use hostscore::types::Host;

#[tokio::test(start_paused = true)]
async fn discovered_host_is_scanned_and_scored() {
    let stack = TestStack::new();
    let key = HostKey::new([0xAA; 32]);
    stack.rhp.serve_v1(key, compliant_settings());

    let block_time = Utc::now();
    stack.chain.push_batch(vec![block(
        1_000,
        block_time,
        vec![announcement(key, "1.2.3.4:9982")],
    )]);
    stack.spawn_loops();

    let store = Arc::clone(&stack.store);
    assert!(
        wait_until(|| {
            let store = Arc::clone(&store);
            async move {
                store
                    .host(key)
                    .await
                    .is_some_and(|host| host.total_scans > 0)
            }
        })
        .await,
        "host was never scanned"
    );
    stack.token.cancel();

    let host = stack.store.host(key).await.expect("host exists");
    assert_eq!(host.known_since, 1_000);
    assert_eq!(host.first_seen, block_time);
    assert_eq!(host.ip_nets, vec!["1.2.3.0/24"]);
    assert!(host.is_online());
    assert_eq!(host.uptime, Duration::ZERO);
    assert_eq!(host.downtime, Duration::ZERO);
    assert!(host.last_seen.is_some());

    // Prices sit at half the maxima, 10 TiB free, accepting contracts,
    // one successful scan.
    assert!((host.score.prices - 0.5).abs() < 1e-9, "{}", host.score.prices);
    assert!((host.score.storage - 1.0).abs() < f64::EPSILON);
    assert!((host.score.contracts - 1.0).abs() < f64::EPSILON);
    assert!((host.score.uptime - 0.75).abs() < f64::EPSILON);

    assert_eq!(stack.persistence.scan_count(), 1);
    assert_eq!(*stack.rhp.scans_served.lock(), 1);
}

#[tokio::test(start_paused = true)]
async fn blocked_domain_host_is_stored_but_never_queued() {
    let stack = TestStack::new();
    stack.blocked.write().replace(["evil.example"]);

    let key = HostKey::new([0xBB; 32]);
    stack.rhp.serve_v1(key, compliant_settings());
    stack.chain.push_batch(vec![block(
        1_000,
        Utc::now(),
        vec![announcement(key, "evil.example:9982")],
    )]);
    stack.spawn_loops();

    let store = Arc::clone(&stack.store);
    assert!(
        wait_until(|| {
            let store = Arc::clone(&store);
            async move { store.host(key).await.is_some() }
        })
        .await,
        "host row never appeared"
    );

    // Let several dispatch ticks pass to prove nothing gets scheduled.
    tokio::time::sleep(Duration::from_secs(30)).await;
    stack.token.cancel();

    let host = stack.store.host(key).await.expect("host exists");
    assert!(host.blocked);
    assert!(!stack.scheduler.is_in_flight(key));
    assert_eq!(stack.scheduler.queue_depths(), (0, 0));
    assert_eq!(stack.persistence.scan_count(), 0);
    assert_eq!(*stack.rhp.scans_served.lock(), 0);
}

#[tokio::test]
async fn failing_unseen_host_leaves_the_rotation() {
    let stack = TestStack::new();
    let key = HostKey::new([0xCC; 32]);
    let announced = Host::announced(
        Network::Mainnet,
        key,
        "down.example:9982".into(),
        false,
        Utc::now() - TimeDelta::days(2),
        500,
    );
    stack.store.update(announced).await.expect("seed host");

    // Twenty consecutive failures, never a success: last_seen stays zero.
    let start = Utc::now() - TimeDelta::hours(20);
    for i in 0..20 {
        let scan = HostScan {
            id: 0,
            network: Network::Mainnet,
            node: "eu-test".into(),
            public_key: key,
            timestamp: start + TimeDelta::hours(i),
            success: false,
            latency_ms: None,
            error: Some("connection refused".into()),
            settings: None,
        };
        stack.store.append_scan(scan, true).await.expect("scan");
    }
    let host = stack.store.host(key).await.expect("host exists");
    assert!(host.last_seen.is_none());
    assert_eq!(
        stack.store.last_failed_scans(key).await.expect("aggregate"),
        20
    );

    // Neither a direct enqueue nor the sweep may pick it up again.
    stack.scheduler.queue_scan(key).await.expect("queue");
    assert!(!stack.scheduler.is_in_flight(key));
    assert_eq!(stack.scheduler.queue_depths(), (0, 0));

    stack.scheduler.sweep().await.expect("sweep");
    assert_eq!(stack.scheduler.queue_depths(), (0, 0));
}
