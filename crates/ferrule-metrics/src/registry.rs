use crate::histogram::LatencyHistogram;
use crate::snapshot::{MethodMetrics, MetricsSnapshot, ProviderMetrics, Side};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Operations between two stale-entry sweeps.
const CLEANUP_INTERVAL: u64 = 1000;

/// Fallback used when the system clock reads before the epoch.
static TIMESTAMP_FALLBACK: AtomicU64 = AtomicU64::new(1);

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Wall-clock milliseconds, strictly increasing across calls.
///
/// LRU eviction needs a total order of access times, so two calls in the
/// same millisecond still get distinct values.
fn monotonic_timestamp() -> u64 {
    let system_time = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|_| TIMESTAMP_FALLBACK.fetch_add(1, Ordering::SeqCst));

    loop {
        let last = LAST_TIMESTAMP.load(Ordering::Acquire);
        let next = system_time.max(last + 1);
        if LAST_TIMESTAMP
            .compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Acquire)
            .is_ok()
        {
            return next;
        }
    }
}

/// Size limits and entry lifetimes.
///
/// # Example
///
/// ```rust
/// use ferrule_metrics::MetricsConfig;
///
/// let config = MetricsConfig {
///     max_methods: 500,
///     max_providers: 50,
///     method_ttl_secs: 1800,
///     provider_ttl_secs: 600,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Least-recently-used methods are evicted past this count.
    pub max_methods: usize,
    /// Least-recently-used provider addresses are evicted past this count.
    pub max_providers: usize,
    pub method_ttl_secs: u64,
    pub provider_ttl_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_methods: 1000,
            max_providers: 100,
            method_ttl_secs: 3600,
            provider_ttl_secs: 3600,
        }
    }
}

/// How a measured call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// A failure caused by a client or server timeout.
    Timeout,
}

#[derive(Debug)]
struct MethodStats {
    call_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    timeout_count: AtomicU64,
    latencies: LatencyHistogram,
    last_access_ms: AtomicU64,
}

impl MethodStats {
    fn new() -> Self {
        Self {
            call_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            timeout_count: AtomicU64::new(0),
            latencies: LatencyHistogram::new(),
            last_access_ms: AtomicU64::new(monotonic_timestamp()),
        }
    }

    fn record(&self, latency_us: u64, outcome: CallOutcome) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        match outcome {
            CallOutcome::Success => {
                self.success_count.fetch_add(1, Ordering::Relaxed);
            }
            CallOutcome::Failure => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
            }
            CallOutcome::Timeout => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                self.timeout_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.latencies.record(latency_us);
        self.last_access_ms.store(monotonic_timestamp(), Ordering::Relaxed);
    }

    fn snapshot(&self) -> MethodMetrics {
        let (avg_latency_us, p50_latency_us, p95_latency_us, p99_latency_us) = self.latencies.summary();
        MethodMetrics {
            call_count: self.call_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            timeout_count: self.timeout_count.load(Ordering::Relaxed),
            avg_latency_us,
            p50_latency_us,
            p95_latency_us,
            p99_latency_us,
        }
    }
}

#[derive(Debug)]
struct ProviderStats {
    request_count: AtomicU64,
    last_request_ms: AtomicU64,
}

impl ProviderStats {
    fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            last_request_ms: AtomicU64::new(0),
        }
    }

    fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.last_request_ms.store(monotonic_timestamp(), Ordering::Relaxed);
    }

    fn snapshot(&self, address: &str) -> ProviderMetrics {
        ProviderMetrics {
            address: address.to_string(),
            request_count: self.request_count.load(Ordering::Relaxed),
            last_request_ms: self.last_request_ms.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe metrics storage for one side of the wire.
///
/// Counters are relaxed atomics; the method and provider maps are behind
/// `RwLock`s that are only write-locked to insert or evict entries. Every
/// 1000 operations stale entries (older than the TTL) are dropped and the
/// maps are trimmed to their size limits, least recently used first.
///
/// # Example
///
/// ```rust
/// use ferrule_metrics::{CallOutcome, MetricsRegistry};
///
/// let registry = MetricsRegistry::consumer();
/// registry.record_method_call("Default-Calc-1.0.0#add", 150, CallOutcome::Success);
///
/// let snapshot = registry.snapshot();
/// assert_eq!(snapshot.total_requests, 1);
/// ```
#[derive(Debug)]
pub struct MetricsRegistry {
    side: Side,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    active_connections: AtomicU64,
    methods: RwLock<HashMap<String, Arc<MethodStats>>>,
    providers: RwLock<HashMap<String, Arc<ProviderStats>>>,
    start_time: Instant,
    config: MetricsConfig,
    cleanup_counter: AtomicU64,
}

impl MetricsRegistry {
    pub fn consumer() -> Self {
        Self::with_config(Side::Consumer, MetricsConfig::default())
    }

    pub fn provider() -> Self {
        Self::with_config(Side::Provider, MetricsConfig::default())
    }

    pub fn with_config(side: Side, config: MetricsConfig) -> Self {
        Self {
            side,
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            methods: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
            config,
            cleanup_counter: AtomicU64::new(0),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Records one finished call of `method` (usually `directory#method`).
    pub fn record_method_call(&self, method: &str, latency_us: u64, outcome: CallOutcome) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if outcome == CallOutcome::Success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.maybe_cleanup();

        let existing = self.methods.read().get(method).cloned();
        let stats = match existing {
            Some(stats) => stats,
            None => self
                .methods
                .write()
                .entry(method.to_string())
                .or_insert_with(|| Arc::new(MethodStats::new()))
                .clone(),
        };
        stats.record(latency_us, outcome);
    }

    /// Records that a request was routed to `address` (consumer side).
    pub fn record_provider_request(&self, address: &str) {
        self.maybe_cleanup();

        let existing = self.providers.read().get(address).cloned();
        let stats = match existing {
            Some(stats) => stats,
            None => self
                .providers
                .write()
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(ProviderStats::new()))
                .clone(),
        };
        stats.record_request();
    }

    fn maybe_cleanup(&self) {
        let count = self.cleanup_counter.fetch_add(1, Ordering::Relaxed);
        if count % CLEANUP_INTERVAL == 0 {
            self.cleanup_stale_entries();
        }
    }

    fn cleanup_stale_entries(&self) {
        let now = monotonic_timestamp();

        {
            let mut methods = self.methods.write();
            evict(
                &mut methods,
                now,
                self.config.method_ttl_secs * 1000,
                self.config.max_methods,
                |stats| stats.last_access_ms.load(Ordering::Relaxed),
            );
        }

        {
            let mut providers = self.providers.write();
            evict(
                &mut providers,
                now,
                self.config.provider_ttl_secs * 1000,
                self.config.max_providers,
                |stats| stats.last_request_ms.load(Ordering::Relaxed),
            );
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Point-in-time copy of every counter.
    ///
    /// Provider routing counts are only included on the consumer side.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let methods = self
            .methods
            .read()
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect();

        let providers = match self.side {
            Side::Consumer => Some(
                self.providers
                    .read()
                    .iter()
                    .map(|(address, stats)| (address.clone(), stats.snapshot(address)))
                    .collect(),
            ),
            Side::Provider => None,
        };

        MetricsSnapshot {
            side: self.side,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            uptime_ms: self.uptime_ms(),
            methods,
            providers,
        }
    }
}

/// Drops entries older than `ttl_ms`, then the oldest until `max` remain.
fn evict<T>(map: &mut HashMap<String, Arc<T>>, now: u64, ttl_ms: u64, max: usize, last_access: impl Fn(&T) -> u64) {
    map.retain(|_, stats| now.saturating_sub(last_access(stats)) < ttl_ms);

    if map.len() > max {
        let mut entries: Vec<_> = map.iter().map(|(key, stats)| (key.clone(), last_access(stats))).collect();
        entries.sort_by_key(|&(_, at)| at);
        let excess = entries.len() - max;
        for (key, _) in entries.into_iter().take(excess) {
            map.remove(&key);
        }
    }
}
