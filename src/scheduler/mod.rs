//! The scan/benchmark scheduler.
//!
//! Hosts enter through two doors: chain discovery enqueues freshly
//! announced hosts, and a periodic sweep walks every known host and
//! enqueues the ones whose interval elapsed. A single mutex guards the two
//! queues, the in-flight set and the worker counters; the in-flight set is
//! what guarantees a host is never in two workers at once.
//!
//! The dispatch loop waits for the network to sync, then drains the scan
//! queue in batches of [`SCAN_BATCH_SIZE`] (one worker task per batch,
//! iterating its entries sequentially) and the benchmark queue one entry
//! per worker, under the [`MAX_SCAN_THREADS`] / [`MAX_BENCHMARK_THREADS`]
//! caps.

pub mod benchmark;
pub mod scan;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::ScannerSettings;
use crate::filters::gouging::SharedPriceLimits;
use crate::ports::chain::ChainSource;
use crate::ports::geo::GeoLocator;
use crate::ports::resolver::NetResolver;
use crate::ports::rhp::RhpClient;
use crate::ports::store::HostPersistence;
use crate::ports::syncer::Syncer;
use crate::ports::wallet::Wallet;
use crate::store::HostStore;
use crate::types::primitives::HostKey;
use crate::types::Host;

/// Cap on concurrently running scan workers.
pub const MAX_SCAN_THREADS: usize = 1_000;

/// Cap on concurrently running benchmark workers.
pub const MAX_BENCHMARK_THREADS: usize = 20;

/// Hosts handed to one scan worker.
pub const SCAN_BATCH_SIZE: usize = 20;

/// Pause between dispatch ticks.
const DISPATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Base interval between scans of a healthy host.
const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Base interval between benchmarks of a healthy host.
const DEFAULT_BENCHMARK_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

// ═══════════════════════════════════════════════════════════════════════════════
// INTERVALS
// ═══════════════════════════════════════════════════════════════════════════════

/// The scan back-off table: `None` means the host is never scanned again
/// (until it is seen once).
///
/// Monotonic non-decreasing in `failed_scans`.
#[must_use]
pub fn calculate_scan_interval(
    ever_seen: bool,
    total_scans: u64,
    failed_scans: u64,
) -> Option<Duration> {
    const HOUR: u64 = 60 * 60;
    if total_scans == 0 {
        return Some(DEFAULT_SCAN_INTERVAL);
    }
    let secs = match failed_scans {
        n if n > 18 => {
            if ever_seen {
                24 * HOUR
            } else {
                return None;
            }
        }
        n if n > 15 => 24 * HOUR,
        n if n > 11 => 16 * HOUR,
        n if n > 9 => 8 * HOUR,
        n if n > 7 => 4 * HOUR,
        n if n > 5 => 2 * HOUR,
        n if n > 3 => HOUR,
        _ => return Some(DEFAULT_SCAN_INTERVAL),
    };
    Some(Duration::from_secs(secs))
}

/// The benchmark back-off table.
#[must_use]
pub fn calculate_benchmark_interval(ever_benchmarked: bool, failed_benchmarks: u64) -> Duration {
    const HOUR: u64 = 60 * 60;
    if !ever_benchmarked {
        return DEFAULT_BENCHMARK_INTERVAL;
    }
    let secs = match failed_benchmarks {
        n if n > 10 => 24 * HOUR,
        n if n > 5 => 8 * HOUR,
        n if n > 3 => 4 * HOUR,
        _ => return DEFAULT_BENCHMARK_INTERVAL,
    };
    Duration::from_secs(secs)
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKER CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a worker needs, bundled once per network.
pub struct WorkerContext<P> {
    /// The network's host store.
    pub store: Arc<HostStore<P>>,
    /// RHP transports.
    pub rhp: Arc<dyn RhpClient>,
    /// The network's chain client.
    pub chain: Arc<dyn ChainSource>,
    /// The renter wallet funding benchmark contracts.
    pub wallet: Arc<dyn Wallet>,
    /// The network's peer syncer.
    pub syncer: Arc<dyn Syncer>,
    /// DNS resolution.
    pub resolver: Arc<dyn NetResolver>,
    /// Best-effort geolocation.
    pub geo: Arc<dyn GeoLocator>,
    /// Current price limits.
    pub limits: SharedPriceLimits,
    /// Scanner tunables.
    pub settings: ScannerSettings,
}

impl<P> std::fmt::Debug for WorkerContext<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct SchedulerState {
    scan_queue: VecDeque<HostKey>,
    benchmark_queue: VecDeque<HostKey>,
    in_flight: HashSet<HostKey>,
    scan_threads: usize,
    benchmark_threads: usize,
}

/// The per-network scheduler.
#[derive(Debug)]
pub struct Scheduler<P> {
    ctx: Arc<WorkerContext<P>>,
    state: Mutex<SchedulerState>,
}

impl<P> Scheduler<P>
where
    P: HostPersistence + Send + Sync + 'static,
{
    /// Create a scheduler over a worker context.
    #[must_use]
    pub fn new(ctx: Arc<WorkerContext<P>>) -> Self {
        Self {
            ctx,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// The worker context.
    #[must_use]
    pub fn context(&self) -> &Arc<WorkerContext<P>> {
        &self.ctx
    }

    /// Current queue depths `(scans, benchmarks)`.
    #[must_use]
    pub fn queue_depths(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.scan_queue.len(), state.benchmark_queue.len())
    }

    /// Whether a host is queued or being probed.
    #[must_use]
    pub fn is_in_flight(&self, key: HostKey) -> bool {
        self.state.lock().in_flight.contains(&key)
    }

    /// Consider a host for the scan or benchmark queue.
    ///
    /// Blocked hosts and hosts already in flight are skipped. A host whose
    /// scan interval has not elapsed may still be due for a benchmark and
    /// lands in the benchmark queue instead.
    ///
    /// # Errors
    /// Returns an error if the failed-probe aggregates cannot be read.
    pub async fn queue_scan(&self, key: HostKey) -> crate::error::Result<()> {
        let Some(host) = self.ctx.store.host(key).await else {
            debug!(host = %key, "Queue request for unknown host skipped");
            return Ok(());
        };
        if host.blocked {
            return Ok(());
        }
        if self.is_in_flight(key) {
            return Ok(());
        }

        let failed = self.ctx.store.last_failed_scans(key).await?;
        let Some(interval) =
            calculate_scan_interval(host.last_seen.is_some(), host.total_scans, failed)
        else {
            return Ok(());
        };

        let scan_due = host.last_scan_at().is_none_or(|at| {
            (Utc::now() - at).to_std().unwrap_or_default() >= interval
        });

        {
            let mut state = self.state.lock();
            if state.in_flight.contains(&key) {
                return Ok(());
            }
            if scan_due {
                state.scan_queue.push_back(key);
                state.in_flight.insert(key);
                return Ok(());
            }
        }

        if self.benchmark_due(&host).await? {
            let mut state = self.state.lock();
            if !state.in_flight.contains(&key) {
                state.benchmark_queue.push_back(key);
                state.in_flight.insert(key);
            }
        }
        Ok(())
    }

    /// Whether the host's benchmark window elapsed and its latest scan
    /// succeeded.
    async fn benchmark_due(&self, host: &Host) -> crate::error::Result<bool> {
        if !host.scan_history.first().is_some_and(|s| s.success) {
            return Ok(false);
        }
        let failed = self.ctx.store.last_failed_benchmarks(host.public_key).await?;
        let interval =
            calculate_benchmark_interval(!host.benchmark_history.is_empty(), failed);
        Ok(host.last_benchmark_at().is_none_or(|at| {
            (Utc::now() - at).to_std().unwrap_or_default() >= interval
        }))
    }

    /// Walk every host and enqueue the due ones.
    ///
    /// # Errors
    /// Returns an error if the failed-probe aggregates cannot be read.
    #[instrument(skip(self), fields(network = %self.ctx.store.network()))]
    pub async fn sweep(&self) -> crate::error::Result<usize> {
        let keys = {
            let hosts = self.ctx.store.hosts().await;
            hosts.into_iter().map(|h| h.public_key).collect::<Vec<_>>()
        };
        let mut queued = 0;
        for key in keys {
            let before = self.is_in_flight(key);
            self.queue_scan(key).await?;
            if !before && self.is_in_flight(key) {
                queued += 1;
            }
        }
        if queued > 0 {
            debug!(queued, "Sweep enqueued hosts");
        }
        Ok(queued)
    }

    /// Run the dispatch loop until cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        // Hold dispatch until the network reports synced.
        loop {
            if token.is_cancelled() {
                return;
            }
            if self.ctx.syncer.is_synced().await {
                break;
            }
            debug!("Waiting for network sync");
            tokio::select! {
                () = token.cancelled() => return,
                () = sleep(DISPATCH_INTERVAL) => {}
            }
        }
        info!(network = %self.ctx.store.network(), "Scheduler dispatching");

        loop {
            if token.is_cancelled() {
                return;
            }
            Self::dispatch_scans(&self, &token);
            Self::dispatch_benchmarks(&self, &token);
            tokio::select! {
                () = token.cancelled() => return,
                () = sleep(DISPATCH_INTERVAL) => {}
            }
        }
    }

    /// Drain the scan queue into batch workers while below the cap.
    fn dispatch_scans(scheduler: &Arc<Self>, token: &CancellationToken) {
        loop {
            let batch: Vec<HostKey> = {
                let mut state = scheduler.state.lock();
                if state.scan_threads >= MAX_SCAN_THREADS || state.scan_queue.is_empty() {
                    break;
                }
                state.scan_threads += 1;
                let take = SCAN_BATCH_SIZE.min(state.scan_queue.len());
                state.scan_queue.drain(..take).collect()
            };

            let worker = Arc::clone(scheduler);
            let token = token.clone();
            tokio::spawn(async move {
                for key in batch {
                    if !token.is_cancelled() {
                        scan::scan_host(&worker.ctx, key, &token).await;
                    }
                    worker.state.lock().in_flight.remove(&key);
                }
                worker.state.lock().scan_threads -= 1;
            });
        }
    }

    /// Drain the benchmark queue one entry per worker while below the cap.
    fn dispatch_benchmarks(scheduler: &Arc<Self>, token: &CancellationToken) {
        loop {
            let key = {
                let mut state = scheduler.state.lock();
                if state.benchmark_threads >= MAX_BENCHMARK_THREADS {
                    break;
                }
                let Some(key) = state.benchmark_queue.pop_front() else {
                    break;
                };
                state.benchmark_threads += 1;
                key
            };

            let worker = Arc::clone(scheduler);
            let token = token.clone();
            tokio::spawn(async move {
                if !token.is_cancelled() {
                    benchmark::benchmark_host(&worker.ctx, key, &token).await;
                }
                let mut state = worker.state.lock();
                state.in_flight.remove(&key);
                state.benchmark_threads -= 1;
            });
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
