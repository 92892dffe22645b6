//! The scan worker: one cheap reachability + settings probe.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::WorkerContext;
use crate::error::{AppError, InfraError, Result};
use crate::filters::subnets::split_host_port;
use crate::ports::store::HostPersistence;
use crate::types::host::HostScan;
use crate::types::primitives::HostKey;
use crate::types::protocol::ProtocolSnapshot;
use crate::types::Host;

/// Budget for a best-effort geolocation lookup.
const GEO_TIMEOUT: Duration = Duration::from_secs(10);

/// Run one scan against a host and persist the outcome.
///
/// Never returns an error into the scheduler: failures are recorded on the
/// scan row, shutdown cancellation suppresses persistence entirely.
pub(crate) async fn scan_host<P>(ctx: &WorkerContext<P>, key: HostKey, token: &CancellationToken)
where
    P: HostPersistence,
{
    let Some(host) = ctx.store.host(key).await else {
        debug!(host = %key, "Scan for unknown host skipped");
        return;
    };
    if host.blocked {
        return;
    }

    let resolved = match ctx.resolver.resolve(&host.net_address).await {
        Ok(ips) => ips,
        Err(e) if e.is_cancellation() => return,
        Err(e) => {
            debug!(host = %key, error = %e, "Resolution failed before scan");
            Vec::new()
        }
    };

    let tip_height = ctx
        .store
        .tip()
        .await
        .ok()
        .flatten()
        .map_or(0, |tip| tip.height);

    let previous_nets = host.ip_nets.clone();
    let host = match ctx.store.prepare_scan(key, tip_height, &resolved).await {
        Ok(host) => host,
        Err(e) => {
            warn!(host = %key, error = %e, "Failed to prepare scan");
            return;
        }
    };
    if host.blocked {
        return;
    }

    let outcome = probe(ctx, &host, token).await;
    if token.is_cancelled() {
        return;
    }
    if let Err(e) = &outcome {
        if e.is_cancellation() {
            return;
        }
    }

    let (settings, latency_ms, error) = match outcome {
        Ok((snapshot, latency)) => {
            (Some(snapshot), Some(latency.as_secs_f64() * 1000.0), None)
        }
        Err(e) => (None, None, Some(e.to_string())),
    };
    let scan = HostScan {
        id: 0,
        network: ctx.store.network(),
        node: ctx.store.node().to_owned(),
        public_key: key,
        timestamp: Utc::now(),
        success: settings.is_some(),
        latency_ms,
        error,
        settings,
    };

    // Failures observed while we have no peers of our own are not the
    // host's fault.
    let count_failure = ctx.syncer.has_peers().await;
    if let Err(e) = ctx.store.append_scan(scan, count_failure).await {
        warn!(host = %key, error = %e, "Failed to persist scan");
        return;
    }

    maybe_locate(ctx, &host, &previous_nets).await;
}

/// Dial the host and fetch its settings; latency is measured around the
/// primary settings RPC only.
async fn probe<P>(
    ctx: &WorkerContext<P>,
    host: &Host,
    token: &CancellationToken,
) -> Result<(ProtocolSnapshot, Duration)>
where
    P: HostPersistence,
{
    let limit = ctx.settings.scan_timeout();
    if host.is_v2() {
        let started = Instant::now();
        let settings = with_deadline(
            limit,
            token,
            ctx.rhp.settings_v2(&host.siamux_addresses, host.public_key),
        )
        .await?;
        Ok((ProtocolSnapshot::V2 { settings }, started.elapsed()))
    } else {
        let started = Instant::now();
        let settings = with_deadline(
            limit,
            token,
            ctx.rhp.settings(&host.net_address, host.public_key),
        )
        .await?;
        let latency = started.elapsed();
        // The settings RPC decides success; the price table rides along.
        let price_table = with_deadline(
            limit,
            token,
            ctx.rhp.price_table(&host.net_address, host.public_key, None),
        )
        .await
        .ok();
        Ok((
            ProtocolSnapshot::V1 {
                settings,
                price_table,
            },
            latency,
        ))
    }
}

/// Race a future against its deadline and the stop token.
pub(crate) async fn with_deadline<T, F>(
    limit: Duration,
    token: &CancellationToken,
    future: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        () = token.cancelled() => Err(AppError::ShutdownRequested),
        outcome = tokio::time::timeout(limit, future) => match outcome {
            Ok(inner) => inner,
            Err(_) => {
                Err(InfraError::Timeout(format!("deadline of {limit:?} exceeded")).into())
            }
        },
    }
}

/// Refresh the cached geolocation when the address set moved or nothing is
/// cached yet. Strictly best-effort.
async fn maybe_locate<P>(ctx: &WorkerContext<P>, host: &Host, previous_nets: &[String])
where
    P: HostPersistence,
{
    let ip_changed = host.ip_nets != previous_nets;
    let missing = matches!(ctx.store.location(host.public_key).await, Ok(None));
    if !ip_changed && !missing {
        return;
    }
    let Some((hostname, _)) = split_host_port(&host.net_address) else {
        return;
    };
    match tokio::time::timeout(GEO_TIMEOUT, ctx.geo.locate(hostname)).await {
        Ok(Ok(location)) => {
            if let Err(e) = ctx.store.cache_location(host.public_key, location).await {
                debug!(host = %host.public_key, error = %e, "Failed to cache location");
            }
        }
        Ok(Err(e)) => debug!(host = %host.public_key, error = %e, "Geolocation lookup failed"),
        Err(_) => debug!(host = %host.public_key, "Geolocation lookup timed out"),
    }
}
