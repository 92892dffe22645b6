//! Update-feed scenarios: idempotent delivery, acknowledgement, and the
//! host/scan exclusion rule, over the same store the workers write to.

mod common;

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use common::TestStack;
use hostscore::store::UpdateFeed;
use hostscore::types::host::HostScan;
use hostscore::types::primitives::{HostKey, Network};
use hostscore::types::Host;

fn seed_host(byte: u8) -> Host {
    Host::announced(
        Network::Mainnet,
        HostKey::new([byte; 32]),
        format!("host-{byte}.example:9982"),
        false,
        Utc::now(),
        1_000,
    )
}

fn scan(key: HostKey, at: chrono::DateTime<Utc>, success: bool) -> HostScan {
    HostScan {
        id: 0,
        network: Network::Mainnet,
        node: "eu-test".into(),
        public_key: key,
        timestamp: at,
        success,
        latency_ms: success.then_some(20.0),
        error: (!success).then(|| "connection refused".into()),
        settings: None,
    }
}

#[tokio::test]
async fn feed_delivers_acknowledges_and_drains() {
    let stack = TestStack::new();
    let feed = UpdateFeed::new(
        Arc::clone(&stack.persistence),
        vec![Arc::clone(&stack.store)],
    );

    let a = stack.store.update(seed_host(1)).await.expect("host a");
    stack.store.update(seed_host(2)).await.expect("host b");
    stack
        .store
        .append_scan(scan(a.public_key, Utc::now(), true), true)
        .await
        .expect("scan");

    // Both hosts changed; the scan's host is in the batch, so the scan
    // row itself is held back.
    let first = feed.recent_updates().await.expect("first batch");
    assert_eq!(first.hosts.len(), 2);
    assert!(first.scans.is_empty());

    // Redelivery until finalized: same rows, same batch ID.
    let second = feed.recent_updates().await.expect("second batch");
    assert_eq!(second.id, first.id);
    assert_eq!(second.hosts.len(), 2);

    assert!(feed.finalize(first.id).await.expect("finalize"));

    // The held-back scan surfaces once its host row is clean.
    let third = feed.recent_updates().await.expect("third batch");
    assert!(third.hosts.is_empty());
    assert_eq!(third.scans.len(), 1);
    assert!(feed.finalize(third.id).await.expect("finalize scan batch"));

    let fourth = feed.recent_updates().await.expect("fourth batch");
    assert!(fourth.is_empty());
}

#[tokio::test]
async fn feed_hosts_carry_subnet_collisions_and_history() {
    let stack = TestStack::new();
    let feed = UpdateFeed::new(
        Arc::clone(&stack.persistence),
        vec![Arc::clone(&stack.store)],
    );

    // Two hosts sharing a /24, both online.
    let t0 = Utc::now();
    for byte in [1u8, 2u8] {
        let mut host = seed_host(byte);
        host.ip_nets = vec!["1.2.3.0/24".into()];
        let host = stack.store.update(host).await.expect("seed");
        stack
            .store
            .append_scan(scan(host.public_key, t0, true), true)
            .await
            .expect("scan one");
        stack
            .store
            .append_scan(
                scan(host.public_key, t0 + TimeDelta::minutes(30), true),
                true,
            )
            .await
            .expect("scan two");
    }

    let batch = feed.recent_updates().await.expect("batch");
    assert_eq!(batch.hosts.len(), 2);
    for feed_host in &batch.hosts {
        assert_eq!(
            feed_host.active_hosts, 1,
            "each host sees exactly the other one in its subnet"
        );
        assert_eq!(feed_host.host.scan_history.len(), 2);
        assert!(feed_host.host.is_online());
    }
}

#[tokio::test]
async fn stale_acknowledgement_leaves_the_batch_pending() {
    let stack = TestStack::new();
    let feed = UpdateFeed::new(
        Arc::clone(&stack.persistence),
        vec![Arc::clone(&stack.store)],
    );
    stack.store.update(seed_host(7)).await.expect("host");

    let batch = feed.recent_updates().await.expect("batch");
    assert!(!feed
        .finalize(hostscore::types::BatchId::random())
        .await
        .expect("stale finalize"));

    let again = feed.recent_updates().await.expect("redelivery");
    assert_eq!(again.id, batch.id);
    assert_eq!(again.hosts.len(), 1);
}
