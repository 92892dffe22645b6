//! The benchmark worker: contract formation (or reuse) plus a full
//! sector upload/download round trip.
//!
//! The pipeline runs under a single ten-minute deadline shared with the
//! stop token. Gouging violations abort before any contract is formed and
//! leave no record beyond a log line; wallet funding problems abort
//! without penalizing the host; everything else lands on a benchmark row.

use std::time::Instant;

use chrono::Utc;
use rand::RngCore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scan::with_deadline;
use super::WorkerContext;
use crate::error::{AppError, DomainError, Result};
use crate::filters::gouging;
use crate::ports::chain::ChainTransaction;
use crate::ports::rhp::FormContractParams;
use crate::ports::store::HostPersistence;
use crate::types::host::HostBenchmark;
use crate::types::primitives::{Currency, HostKey};
use crate::types::protocol::{
    ContractRevision, HostPriceTable, HostSettings, SECTOR_SIZE, V2ContractRevision,
    V2HostSettings,
};
use crate::types::{Host, HostProtocol, StoredRevision};

/// Rough size of a formation transaction, for fee estimation.
const FORMATION_TXN_SIZE: u128 = 2_000;

/// Random bytes at the front of every uploaded sector, defeating host-side
/// dedup.
const SECTOR_PREFIX: usize = 256;

/// What a completed pipeline measured.
#[derive(Debug, Clone, Copy)]
struct Measurement {
    upload_speed: f64,
    download_speed: f64,
    ttfb_ms: f64,
}

/// Run one benchmark against a host and persist the outcome.
pub(crate) async fn benchmark_host<P>(
    ctx: &WorkerContext<P>,
    key: HostKey,
    token: &CancellationToken,
) where
    P: HostPersistence,
{
    let Some(host) = ctx.store.host(key).await else {
        debug!(host = %key, "Benchmark for unknown host skipped");
        return;
    };
    if host.blocked || !host.scan_history.first().is_some_and(|s| s.success) {
        return;
    }

    let outcome = with_deadline(
        ctx.settings.benchmark_timeout(),
        token,
        run_pipeline(ctx, &host, token),
    )
    .await;

    let error = match outcome {
        Ok(measurement) => {
            let benchmark = HostBenchmark {
                id: 0,
                network: ctx.store.network(),
                node: ctx.store.node().to_owned(),
                public_key: key,
                timestamp: Utc::now(),
                success: true,
                upload_speed: measurement.upload_speed,
                download_speed: measurement.download_speed,
                ttfb_ms: measurement.ttfb_ms,
                error: None,
            };
            if let Err(e) = ctx.store.append_benchmark(benchmark, false).await {
                warn!(host = %key, error = %e, "Failed to persist benchmark");
            }
            return;
        }
        Err(e) => e,
    };

    if error.is_cancellation() || token.is_cancelled() {
        return;
    }
    // Our wallet ran dry: not the host's fault, try again after refunding.
    if error.is_insufficient_balance() || error.to_string().contains("insufficient balance") {
        info!(host = %key, "Benchmark aborted: renter wallet cannot cover it");
        return;
    }
    // A gouging host is skipped before any contract is formed; the scan
    // settings already tell the whole story.
    if matches!(
        error,
        AppError::Domain(DomainError::Gouging(_) | DomainError::NotAcceptingContracts)
    ) {
        info!(host = %key, error = %error, "Benchmark skipped by gouging check");
        return;
    }

    let benchmark = HostBenchmark {
        id: 0,
        network: ctx.store.network(),
        node: ctx.store.node().to_owned(),
        public_key: key,
        timestamp: Utc::now(),
        success: false,
        upload_speed: 0.0,
        download_speed: 0.0,
        ttfb_ms: 0.0,
        error: Some(error.to_string()),
    };
    let count_failure = ctx.syncer.has_peers().await;
    if let Err(e) = ctx.store.append_benchmark(benchmark, count_failure).await {
        warn!(host = %key, error = %e, "Failed to persist benchmark");
    }
}

async fn run_pipeline<P>(
    ctx: &WorkerContext<P>,
    host: &Host,
    token: &CancellationToken,
) -> Result<Measurement>
where
    P: HostPersistence,
{
    match &host.protocol {
        HostProtocol::V1 {
            settings: Some(settings),
            revision,
            ..
        } => run_v1(ctx, host, settings, revision.clone(), token).await,
        HostProtocol::V2 {
            settings: Some(settings),
            revision,
        } => run_v2(ctx, host, settings, revision.clone(), token).await,
        _ => Err(DomainError::ProtocolViolation(
            "no settings observed for this host yet".into(),
        )
        .into()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// V1 PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

async fn run_v1<P>(
    ctx: &WorkerContext<P>,
    host: &Host,
    settings: &HostSettings,
    revision: Option<ContractRevision>,
    token: &CancellationToken,
) -> Result<Measurement>
where
    P: HostPersistence,
{
    gouging::check_v1(settings, &ctx.limits.snapshot())?;

    let tip_height = ctx
        .store
        .tip()
        .await?
        .map_or(0, |tip| tip.height);
    let size = ctx.settings.benchmark_size_bytes;
    let duration = ctx.settings.contract_duration;
    let num_sectors = (size / SECTOR_SIZE).max(1);
    let cost_estimate = benchmark_cost_v1(settings, size, duration);

    let revision = match revision {
        Some(revision)
            if tip_height < revision.window_start && revision.renter_funds >= cost_estimate =>
        {
            // Keep the live contract but refresh our view of it.
            ctx.rhp
                .latest_revision(&host.net_address, host.public_key, &revision.contract_id)
                .await?
        }
        _ => form_contract_v1(ctx, host, settings, size, duration).await?,
    };
    ctx.store
        .set_revision(host.public_key, StoredRevision::V1(revision.clone()))
        .await?;

    // A valid price table, paid by contract, backs the ephemeral account.
    let price_table = ctx
        .rhp
        .price_table(&host.net_address, host.public_key, Some(&revision))
        .await?;
    let funding = price_table
        .append_sector_cost()
        .saturating_add(price_table.read_sector_cost())
        .saturating_mul(u128::from(num_sectors))
        .saturating_add(price_table.fund_account_cost);
    ctx.rhp
        .fund_account(
            &host.net_address,
            host.public_key,
            &revision,
            &price_table,
            funding,
        )
        .await?;

    transfer_v1(ctx, host, &price_table, num_sectors, token).await
}

/// Upload then download `num_sectors` sectors by ephemeral account.
async fn transfer_v1<P>(
    ctx: &WorkerContext<P>,
    host: &Host,
    price_table: &HostPriceTable,
    num_sectors: u64,
    token: &CancellationToken,
) -> Result<Measurement>
where
    P: HostPersistence,
{
    let bytes = (num_sectors * SECTOR_SIZE) as f64;

    let mut roots = Vec::with_capacity(num_sectors as usize);
    let upload_started = Instant::now();
    for _ in 0..num_sectors {
        if token.is_cancelled() {
            return Err(AppError::ShutdownRequested);
        }
        let sector = random_sector();
        let root = ctx
            .rhp
            .append_sector(&host.net_address, host.public_key, price_table, &sector)
            .await?;
        roots.push(root);
    }
    let upload_speed = bytes / upload_started.elapsed().as_secs_f64().max(f64::MIN_POSITIVE);

    let mut ttfb_ms = 0.0;
    let download_started = Instant::now();
    for (i, root) in roots.iter().enumerate() {
        if token.is_cancelled() {
            return Err(AppError::ShutdownRequested);
        }
        let data = ctx
            .rhp
            .read_sector(&host.net_address, host.public_key, price_table, root)
            .await?;
        if i == 0 {
            ttfb_ms = download_started.elapsed().as_secs_f64() * 1000.0;
        }
        if data.len() as u64 != SECTOR_SIZE {
            return Err(DomainError::ProtocolViolation(format!(
                "host returned {} bytes for a {SECTOR_SIZE}-byte sector",
                data.len()
            ))
            .into());
        }
    }
    let download_speed =
        bytes / download_started.elapsed().as_secs_f64().max(f64::MIN_POSITIVE);

    Ok(Measurement {
        upload_speed,
        download_speed,
        ttfb_ms,
    })
}

async fn form_contract_v1<P>(
    ctx: &WorkerContext<P>,
    host: &Host,
    settings: &HostSettings,
    size: u64,
    duration: u64,
) -> Result<ContractRevision>
where
    P: HostPersistence,
{
    let fee = ctx
        .chain
        .recommended_fee()
        .await?
        .saturating_mul(FORMATION_TXN_SIZE);
    let funding = benchmark_cost_v1(settings, size, duration).saturating_add(fee);
    let collateral = formation_collateral(settings, size, duration);

    let renter_address = ctx.wallet.address().await?;
    let mut transaction = ChainTransaction::default();
    ctx.wallet
        .fund_transaction(&mut transaction, funding.saturating_add(fee))
        .await?;
    ctx.wallet.sign_transaction(&mut transaction).await?;

    let formed = ctx
        .rhp
        .form_contract(
            &host.net_address,
            host.public_key,
            FormContractParams {
                renter_key: ctx.wallet.key(),
                renter_address,
                funding,
                collateral,
                duration,
                fee,
                transaction,
            },
        )
        .await?;
    ctx.chain
        .broadcast_transaction_set(formed.transaction_set)
        .await?;
    info!(
        host = %host.public_key,
        contract = %formed.revision.contract_id,
        "Formed benchmark contract"
    );
    Ok(formed.revision)
}

/// The renter-side cost of one full benchmark under v1 settings:
/// `contract_price + (download + upload + storage * duration) * size`.
fn benchmark_cost_v1(settings: &HostSettings, size: u64, duration: u64) -> Currency {
    let size = u128::from(size);
    settings
        .contract_price
        .saturating_add(settings.download_price.saturating_mul(size))
        .saturating_add(settings.upload_price.saturating_mul(size))
        .saturating_add(
            settings
                .storage_price
                .saturating_mul(size)
                .saturating_mul(u128::from(duration)),
        )
}

/// Host collateral for a formation of `size` bytes over `duration` blocks,
/// capped by the host's maximum.
fn formation_collateral(settings: &HostSettings, size: u64, duration: u64) -> Currency {
    settings
        .collateral
        .saturating_mul(u128::from(size))
        .saturating_mul(u128::from(duration))
        .min(settings.max_collateral)
}

// ═══════════════════════════════════════════════════════════════════════════════
// V2 PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

async fn run_v2<P>(
    ctx: &WorkerContext<P>,
    host: &Host,
    settings: &V2HostSettings,
    revision: Option<V2ContractRevision>,
    token: &CancellationToken,
) -> Result<Measurement>
where
    P: HostPersistence,
{
    gouging::check_v2(settings, &ctx.limits.snapshot())?;

    let tip_height = ctx
        .store
        .tip()
        .await?
        .map_or(0, |tip| tip.height);
    let size = ctx.settings.benchmark_size_bytes;
    let duration = ctx.settings.contract_duration;
    let num_sectors = (size / SECTOR_SIZE).max(1);
    let cost_estimate = benchmark_cost_v2(settings, num_sectors, duration);

    let mut revision = match revision {
        Some(revision)
            if tip_height < revision.expiration_height
                && revision.renter_funds >= cost_estimate =>
        {
            revision
        }
        _ => form_contract_v2(ctx, host, settings, num_sectors, duration).await?,
    };
    ctx.store
        .set_revision(host.public_key, StoredRevision::V2(revision.clone()))
        .await?;

    let bytes = (num_sectors * SECTOR_SIZE) as f64;

    let mut roots = Vec::with_capacity(num_sectors as usize);
    let upload_started = Instant::now();
    for _ in 0..num_sectors {
        if token.is_cancelled() {
            return Err(AppError::ShutdownRequested);
        }
        let sector = random_sector();
        let (root, revised) = ctx
            .rhp
            .append_sector_v2(&host.siamux_addresses, host.public_key, &revision, &sector)
            .await?;
        roots.push(root);
        revision = revised;
    }
    let upload_speed = bytes / upload_started.elapsed().as_secs_f64().max(f64::MIN_POSITIVE);
    ctx.store
        .set_revision(host.public_key, StoredRevision::V2(revision.clone()))
        .await?;

    let mut ttfb_ms = 0.0;
    let download_started = Instant::now();
    for (i, root) in roots.iter().enumerate() {
        if token.is_cancelled() {
            return Err(AppError::ShutdownRequested);
        }
        let data = ctx
            .rhp
            .read_sector_v2(&host.siamux_addresses, host.public_key, &revision, root)
            .await?;
        if i == 0 {
            ttfb_ms = download_started.elapsed().as_secs_f64() * 1000.0;
        }
        if data.len() as u64 != SECTOR_SIZE {
            return Err(DomainError::ProtocolViolation(format!(
                "host returned {} bytes for a {SECTOR_SIZE}-byte sector",
                data.len()
            ))
            .into());
        }
    }
    let download_speed =
        bytes / download_started.elapsed().as_secs_f64().max(f64::MIN_POSITIVE);

    Ok(Measurement {
        upload_speed,
        download_speed,
        ttfb_ms,
    })
}

async fn form_contract_v2<P>(
    ctx: &WorkerContext<P>,
    host: &Host,
    settings: &V2HostSettings,
    num_sectors: u64,
    duration: u64,
) -> Result<V2ContractRevision>
where
    P: HostPersistence,
{
    let fee = ctx
        .chain
        .recommended_fee()
        .await?
        .saturating_mul(FORMATION_TXN_SIZE);
    let funding = benchmark_cost_v2(settings, num_sectors, duration).saturating_add(fee);
    let collateral = settings
        .prices
        .host_risked_collateral(duration)
        .saturating_mul(u128::from(num_sectors));

    let renter_address = ctx.wallet.address().await?;
    let mut transaction = ChainTransaction::default();
    ctx.wallet
        .fund_transaction(&mut transaction, funding.saturating_add(fee))
        .await?;
    ctx.wallet.sign_transaction(&mut transaction).await?;

    let formed = ctx
        .rhp
        .form_contract_v2(
            &host.siamux_addresses,
            host.public_key,
            FormContractParams {
                renter_key: ctx.wallet.key(),
                renter_address,
                funding,
                collateral,
                duration,
                fee,
                transaction,
            },
        )
        .await?;
    ctx.chain
        .broadcast_transaction_set(formed.transaction_set)
        .await?;
    info!(
        host = %host.public_key,
        contract = %formed.revision.contract_id,
        "Formed v2 benchmark contract"
    );
    Ok(formed.revision)
}

/// The renter-side cost of one full benchmark under v2 prices, from the
/// RPC's own per-sector write/read costs.
fn benchmark_cost_v2(settings: &V2HostSettings, num_sectors: u64, duration: u64) -> Currency {
    settings
        .prices
        .contract_price
        .saturating_add(
            settings
                .prices
                .renter_write_cost(duration)
                .saturating_add(settings.prices.renter_read_cost())
                .saturating_mul(u128::from(num_sectors)),
        )
}

fn random_sector() -> Vec<u8> {
    let mut sector = vec![0u8; SECTOR_SIZE as usize];
    rand::rng().fill_bytes(&mut sector[..SECTOR_PREFIX]);
    sector
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::protocol::V2Prices;

    #[test]
    fn v1_cost_covers_transfer_and_storage() {
        let settings = HostSettings {
            contract_price: Currency::new(1_000),
            upload_price: Currency::new(2),
            download_price: Currency::new(3),
            storage_price: Currency::new(1),
            ..HostSettings::default()
        };
        let cost = benchmark_cost_v1(&settings, 100, 10);
        // 1000 + 3*100 + 2*100 + 1*100*10
        assert_eq!(cost, Currency::new(1_000 + 300 + 200 + 1_000));
    }

    #[test]
    fn formation_collateral_is_capped() {
        let settings = HostSettings {
            collateral: Currency::new(10),
            max_collateral: Currency::new(500),
            ..HostSettings::default()
        };
        assert_eq!(formation_collateral(&settings, 100, 10), Currency::new(500));

        let generous = HostSettings {
            max_collateral: Currency::coins(1),
            ..settings
        };
        assert_eq!(
            formation_collateral(&generous, 100, 10),
            Currency::new(10 * 100 * 10)
        );
    }

    #[test]
    fn v2_cost_scales_with_sectors() {
        let settings = V2HostSettings {
            prices: V2Prices {
                contract_price: Currency::new(1_000),
                storage_price: Currency::new(1),
                ingress_price: Currency::new(2),
                egress_price: Currency::new(3),
                collateral: Currency::new(4),
            },
            ..V2HostSettings::default()
        };
        let one = benchmark_cost_v2(&settings, 1, 10);
        let four = benchmark_cost_v2(&settings, 4, 10);
        let per_sector = one.saturating_sub(Currency::new(1_000));
        assert_eq!(
            four,
            per_sector.saturating_mul(4).saturating_add(Currency::new(1_000))
        );
    }

    #[test]
    fn random_sectors_differ_in_their_prefix() {
        let a = random_sector();
        let b = random_sector();
        assert_eq!(a.len() as u64, SECTOR_SIZE);
        assert_ne!(a[..SECTOR_PREFIX], b[..SECTOR_PREFIX]);
        assert_eq!(a[SECTOR_PREFIX..], b[SECTOR_PREFIX..]);
    }
}
