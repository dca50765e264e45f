//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total movements handed to the dispatcher (monotonic)
    movements_total: AtomicU64,
    /// Movements since last report (reset on report)
    movements_since_report: AtomicU64,
    /// Dispatch tasks rejected because the worker queue was full (monotonic)
    dispatch_rejected_total: AtomicU64,
    /// Sum of enqueue-to-completion latencies in microseconds (reset on report)
    dispatch_latency_sum_us: AtomicU64,
    /// Max dispatch latency in microseconds (reset on report)
    dispatch_latency_max_us: AtomicU64,
    /// Dispatch latency histogram buckets (reset on report)
    dispatch_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Movements evaluated as curfew violations (monotonic)
    violations_total: AtomicU64,
    /// One-shot subscriptions registered (monotonic)
    one_shots_registered: AtomicU64,
    /// One-shot subscriptions resolved with a violation (monotonic)
    one_shots_resolved: AtomicU64,
    /// One-shot subscriptions resolved with a cancellation (monotonic)
    one_shots_cancelled: AtomicU64,
    /// One-shot resolutions that found the waiting side gone (monotonic)
    one_shots_failed: AtomicU64,
    /// Abandoned one-shot subscriptions swept from the registry (monotonic)
    one_shots_pruned: AtomicU64,
    /// Stream subscriptions connected (monotonic)
    streams_connected: AtomicU64,
    /// Stream subscriptions disconnected (monotonic)
    streams_disconnected: AtomicU64,
    /// Movement notifications queued to streams (monotonic)
    stream_pushes: AtomicU64,
    /// Movement notifications dropped because a stream queue was full (monotonic)
    stream_drops: AtomicU64,
    /// Current dispatch queue depth (updated by sampler)
    dispatch_queue_depth: AtomicU64,
    /// Current pending one-shot subscriptions (updated by sampler)
    pending_one_shots: AtomicU64,
    /// Current connected streams (updated by sampler)
    active_streams: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            movements_total: AtomicU64::new(0),
            movements_since_report: AtomicU64::new(0),
            dispatch_rejected_total: AtomicU64::new(0),
            dispatch_latency_sum_us: AtomicU64::new(0),
            dispatch_latency_max_us: AtomicU64::new(0),
            dispatch_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            violations_total: AtomicU64::new(0),
            one_shots_registered: AtomicU64::new(0),
            one_shots_resolved: AtomicU64::new(0),
            one_shots_cancelled: AtomicU64::new(0),
            one_shots_failed: AtomicU64::new(0),
            one_shots_pruned: AtomicU64::new(0),
            streams_connected: AtomicU64::new(0),
            streams_disconnected: AtomicU64::new(0),
            stream_pushes: AtomicU64::new(0),
            stream_drops: AtomicU64::new(0),
            dispatch_queue_depth: AtomicU64::new(0),
            pending_one_shots: AtomicU64::new(0),
            active_streams: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a movement handed to the dispatcher (lock-free)
    #[inline]
    pub fn record_movement(&self) {
        self.movements_total.fetch_add(1, Ordering::Relaxed);
        self.movements_since_report.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dispatch task rejected by a full worker queue
    #[inline]
    pub fn record_dispatch_rejected(&self) {
        self.dispatch_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed dispatch with its enqueue-to-completion latency (lock-free)
    #[inline]
    pub fn record_dispatch_latency(&self, latency_us: u64) {
        self.dispatch_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        // Update histogram bucket
        let bucket = bucket_index(latency_us);
        self.dispatch_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        // Update max
        update_atomic_max(&self.dispatch_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_violation(&self) {
        self.violations_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_one_shot_registered(&self) {
        self.one_shots_registered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_one_shot_resolved(&self) {
        self.one_shots_resolved.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_one_shot_cancelled(&self) {
        self.one_shots_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_one_shot_failed(&self) {
        self.one_shots_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_one_shots_pruned(&self, count: u64) {
        self.one_shots_pruned.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stream_connected(&self) {
        self.streams_connected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stream_disconnected(&self) {
        self.streams_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stream_push(&self) {
        self.stream_pushes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stream_drop(&self) {
        self.stream_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Set current dispatch queue depth (called by sampler)
    #[inline]
    pub fn set_dispatch_queue_depth(&self, depth: u64) {
        self.dispatch_queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Set registry occupancy gauges (called by sampler)
    #[inline]
    pub fn set_registry_sizes(&self, pending_one_shots: u64, active_streams: u64) {
        self.pending_one_shots.store(pending_one_shots, Ordering::Relaxed);
        self.active_streams.store(active_streams, Ordering::Relaxed);
    }

    #[inline]
    pub fn movements_total(&self) -> u64 {
        self.movements_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn violations_total(&self) -> u64 {
        self.violations_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dispatch_rejected_total(&self) -> u64 {
        self.dispatch_rejected_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn one_shots_resolved(&self) -> u64 {
        self.one_shots_resolved.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn one_shots_cancelled(&self) -> u64 {
        self.one_shots_cancelled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn one_shots_failed(&self) -> u64 {
        self.one_shots_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stream_pushes(&self) -> u64 {
        self.stream_pushes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stream_drops(&self) -> u64 {
        self.stream_drops.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let movements_count = self.movements_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.dispatch_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.dispatch_latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.dispatch_latency_buckets);
        let dispatched: u64 = lat_buckets.iter().sum();

        // Calculate elapsed time and reset
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let movements_per_sec = if elapsed.as_secs_f64() > 0.0 {
            movements_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if dispatched > 0 { latency_sum / dispatched } else { 0 };

        MetricsSummary {
            movements_total: self.movements_total.load(Ordering::Relaxed),
            movements_per_sec,
            dispatch_rejected_total: self.dispatch_rejected_total.load(Ordering::Relaxed),
            avg_dispatch_latency_us: avg_latency,
            max_dispatch_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            violations_total: self.violations_total.load(Ordering::Relaxed),
            one_shots_registered: self.one_shots_registered.load(Ordering::Relaxed),
            one_shots_resolved: self.one_shots_resolved.load(Ordering::Relaxed),
            one_shots_cancelled: self.one_shots_cancelled.load(Ordering::Relaxed),
            one_shots_failed: self.one_shots_failed.load(Ordering::Relaxed),
            one_shots_pruned: self.one_shots_pruned.load(Ordering::Relaxed),
            streams_connected: self.streams_connected.load(Ordering::Relaxed),
            streams_disconnected: self.streams_disconnected.load(Ordering::Relaxed),
            stream_pushes: self.stream_pushes.load(Ordering::Relaxed),
            stream_drops: self.stream_drops.load(Ordering::Relaxed),
            dispatch_queue_depth: self.dispatch_queue_depth.load(Ordering::Relaxed),
            pending_one_shots: self.pending_one_shots.load(Ordering::Relaxed),
            active_streams: self.active_streams.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub movements_total: u64,
    pub movements_per_sec: f64,
    pub dispatch_rejected_total: u64,
    pub avg_dispatch_latency_us: u64,
    pub max_dispatch_latency_us: u64,
    /// Dispatch latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub violations_total: u64,
    pub one_shots_registered: u64,
    pub one_shots_resolved: u64,
    pub one_shots_cancelled: u64,
    pub one_shots_failed: u64,
    pub one_shots_pruned: u64,
    pub streams_connected: u64,
    pub streams_disconnected: u64,
    pub stream_pushes: u64,
    pub stream_drops: u64,
    /// Snapshot gauges
    pub dispatch_queue_depth: u64,
    pub pending_one_shots: u64,
    pub active_streams: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            movements_total = %self.movements_total,
            movements_per_sec = format!("{:.1}", self.movements_per_sec),
            avg_dispatch_us = %self.avg_dispatch_latency_us,
            max_dispatch_us = %self.max_dispatch_latency_us,
            p99_us = %self.lat_p99_us,
            violations = %self.violations_total,
            pending_one_shots = %self.pending_one_shots,
            active_streams = %self.active_streams,
            stream_drops = %self.stream_drops,
            dispatch_rejected = %self.dispatch_rejected_total,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.movements_total(), 0);
        assert_eq!(metrics.violations_total(), 0);
    }

    #[test]
    fn test_record_movement() {
        let metrics = Metrics::new();

        metrics.record_movement();
        metrics.record_movement();

        assert_eq!(metrics.movements_total(), 2);
        assert_eq!(metrics.movements_since_report.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_movement();
        metrics.record_movement();
        metrics.record_movement();
        metrics.record_dispatch_latency(100);
        metrics.record_dispatch_latency(200);
        metrics.record_dispatch_latency(300);
        metrics.record_violation();
        metrics.record_one_shot_resolved();

        let summary = metrics.report();

        assert_eq!(summary.movements_total, 3);
        assert_eq!(summary.avg_dispatch_latency_us, 200); // (100+200+300)/3
        assert_eq!(summary.max_dispatch_latency_us, 300);
        assert_eq!(summary.violations_total, 1);
        assert_eq!(summary.one_shots_resolved, 1);

        // Periodic counters should be reset, monotonic ones kept
        assert_eq!(metrics.movements_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.dispatch_latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.dispatch_latency_max_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.movements_total(), 3);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report();

        assert_eq!(summary.movements_total, 0);
        assert_eq!(summary.avg_dispatch_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_movement();
                    m.record_dispatch_latency(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.movements_total(), 10_000);
        assert_eq!(metrics.dispatch_latency_max_us.load(Ordering::Relaxed), 999);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10); // overflow
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        // 100 dispatches, all at 150µs (bucket 1, ≤200)
        for _ in 0..100 {
            metrics.record_dispatch_latency(150);
        }

        let summary = metrics.report();

        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p95_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }

    #[test]
    fn test_gauges() {
        let metrics = Metrics::new();

        metrics.set_dispatch_queue_depth(7);
        metrics.set_registry_sizes(3, 2);

        let summary = metrics.report();
        assert_eq!(summary.dispatch_queue_depth, 7);
        assert_eq!(summary.pending_one_shots, 3);
        assert_eq!(summary.active_streams, 2);
    }
}
