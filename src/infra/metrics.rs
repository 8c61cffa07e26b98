//! Lock-free metrics collection and periodic reporting
//!
//! The cycle loop, the HTTP handlers and the subscriber sessions all record
//! into the same `Metrics` through relaxed atomics. `report()` swaps the
//! periodic counters to zero; monotonic totals are only ever loaded.
//!
//! NOTE: Relaxed ordering is intentional. These are statistical counters and
//! must not be used for coordination.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Cycle latency bucket boundaries (microseconds)
/// Buckets: ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, ≤256000, >256000
const BUCKET_BOUNDS: [u64; 10] = [500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000];
const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

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

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket is open-ended; report 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000, 512000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Cycles run (monotonic)
    cycles_total: AtomicU64,
    /// Cycles since last report (reset on report)
    cycles_since_report: AtomicU64,
    /// Sum of cycle processing latencies, excluding the sensor wait (reset on report)
    cycle_latency_sum_us: AtomicU64,
    /// Max cycle processing latency (reset on report)
    cycle_latency_max_us: AtomicU64,
    /// Cycle processing latency histogram (reset on report)
    cycle_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Frames received from the sensor (monotonic)
    frames_total: AtomicU64,
    /// Frames in which every slot was invalid (monotonic)
    empty_frames_total: AtomicU64,
    /// Reads that returned nothing (monotonic)
    no_data_total: AtomicU64,
    /// Sensor link reinitialisations (monotonic)
    recoveries_total: AtomicU64,
    /// Telemetry messages queued to subscribers (monotonic)
    telemetry_sent_total: AtomicU64,
    /// Telemetry messages dropped on a full subscriber queue (monotonic)
    telemetry_dropped_total: AtomicU64,
    /// Connected telemetry subscribers (gauge)
    subscribers: AtomicU64,
    /// Zone updates applied (monotonic)
    zone_updates_total: AtomicU64,
    /// Zone updates rejected without mutation (monotonic)
    zone_updates_rejected: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_since_report: AtomicU64::new(0),
            cycle_latency_sum_us: AtomicU64::new(0),
            cycle_latency_max_us: AtomicU64::new(0),
            cycle_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            frames_total: AtomicU64::new(0),
            empty_frames_total: AtomicU64::new(0),
            no_data_total: AtomicU64::new(0),
            recoveries_total: AtomicU64::new(0),
            telemetry_sent_total: AtomicU64::new(0),
            telemetry_dropped_total: AtomicU64::new(0),
            subscribers: AtomicU64::new(0),
            zone_updates_total: AtomicU64::new(0),
            zone_updates_rejected: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    /// Record one completed cycle and its processing latency
    pub fn record_cycle(&self, latency_us: u64) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_since_report.fetch_add(1, Ordering::Relaxed);
        self.cycle_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.cycle_latency_max_us, latency_us);
        self.cycle_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a received frame; `valid_targets == 0` counts as an empty frame
    pub fn record_frame(&self, valid_targets: usize) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        if valid_targets == 0 {
            self.empty_frames_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_no_data(&self) {
        self.no_data_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery(&self) {
        self.recoveries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_telemetry(&self, sent: u64, dropped: u64) {
        if sent > 0 {
            self.telemetry_sent_total.fetch_add(sent, Ordering::Relaxed);
        }
        if dropped > 0 {
            self.telemetry_dropped_total.fetch_add(dropped, Ordering::Relaxed);
        }
    }

    pub fn set_subscribers(&self, count: u64) {
        self.subscribers.store(count, Ordering::Relaxed);
    }

    pub fn record_zone_update(&self, applied: bool) {
        if applied {
            self.zone_updates_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.zone_updates_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    pub fn recoveries_total(&self) -> u64 {
        self.recoveries_total.load(Ordering::Relaxed)
    }

    pub fn telemetry_dropped_total(&self) -> u64 {
        self.telemetry_dropped_total.load(Ordering::Relaxed)
    }

    pub fn subscribers(&self) -> u64 {
        self.subscribers.load(Ordering::Relaxed)
    }

    /// Snapshot all counters, resetting the periodic ones
    pub fn report(&self) -> MetricsSummary {
        let cycles = self.cycles_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.cycle_latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.cycle_latency_max_us.swap(0, Ordering::Relaxed);
        let buckets = swap_buckets(&self.cycle_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let cycles_per_sec = if elapsed.as_secs_f64() > 0.0 {
            cycles as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_per_sec,
            avg_cycle_latency_us: if cycles > 0 { latency_sum / cycles } else { 0 },
            max_cycle_latency_us: latency_max,
            cycle_p99_us: percentile_from_buckets(&buckets, 0.99),
            frames_total: self.frames_total.load(Ordering::Relaxed),
            empty_frames_total: self.empty_frames_total.load(Ordering::Relaxed),
            no_data_total: self.no_data_total.load(Ordering::Relaxed),
            recoveries_total: self.recoveries_total.load(Ordering::Relaxed),
            telemetry_sent_total: self.telemetry_sent_total.load(Ordering::Relaxed),
            telemetry_dropped_total: self.telemetry_dropped_total.load(Ordering::Relaxed),
            subscribers: self.subscribers.load(Ordering::Relaxed),
            zone_updates_total: self.zone_updates_total.load(Ordering::Relaxed),
            zone_updates_rejected: self.zone_updates_rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub cycles_total: u64,
    pub cycles_per_sec: f64,
    pub avg_cycle_latency_us: u64,
    pub max_cycle_latency_us: u64,
    pub cycle_p99_us: u64,
    pub frames_total: u64,
    pub empty_frames_total: u64,
    pub no_data_total: u64,
    pub recoveries_total: u64,
    pub telemetry_sent_total: u64,
    pub telemetry_dropped_total: u64,
    pub subscribers: u64,
    pub zone_updates_total: u64,
    pub zone_updates_rejected: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            cycles_total = %self.cycles_total,
            cycles_per_sec = format!("{:.1}", self.cycles_per_sec),
            avg_cycle_us = %self.avg_cycle_latency_us,
            max_cycle_us = %self.max_cycle_latency_us,
            p99_cycle_us = %self.cycle_p99_us,
            frames = %self.frames_total,
            empty_frames = %self.empty_frames_total,
            no_data = %self.no_data_total,
            recoveries = %self.recoveries_total,
            telemetry_sent = %self.telemetry_sent_total,
            telemetry_dropped = %self.telemetry_dropped_total,
            subscribers = %self.subscribers,
            zone_updates = %self.zone_updates_total,
            zone_updates_rejected = %self.zone_updates_rejected,
            "metrics"
        );
    }
}
