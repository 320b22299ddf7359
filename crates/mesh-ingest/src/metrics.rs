//! Pipeline latency instrumentation.
//!
//! Provides nanosecond-resolution timestamps and per-stage duration
//! accumulators, in the same shape the gateway's hot path used upstream:
//! every handler stage records how long it spent on the item it just
//! passed along, and a watchdog can read the running averages without
//! touching the hot path itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Monotonic nanosecond timestamp, stable across the process lifetime.
#[inline(always)]
pub fn now_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// Accumulates total duration and call count for each pipeline stage.
///
/// All fields use `Relaxed` ordering — these are sampling metrics, not
/// synchronization. Call `avg_ns(field)` to compute the mean duration for a
/// given stage.
pub struct StageMetrics {
    pub gateway_ns: AtomicU64,
    pub decode_ns: AtomicU64,
    pub normalize_ns: AtomicU64,
    pub batch_ns: AtomicU64,
    pub egress_ns: AtomicU64,
    pub total_ns: AtomicU64,
    pub count: AtomicU64,
}

impl StageMetrics {
    pub const fn new() -> Self {
        Self {
            gateway_ns: AtomicU64::new(0),
            decode_ns: AtomicU64::new(0),
            normalize_ns: AtomicU64::new(0),
            batch_ns: AtomicU64::new(0),
            egress_ns: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn record_stage(&self, field: &AtomicU64, duration_ns: u64) {
        field.fetch_add(duration_ns, Ordering::Relaxed);
        self.total_ns.fetch_add(duration_ns, Ordering::Relaxed);
    }

    pub fn record_item(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_ns(&self, field: &AtomicU64) -> u64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        field.load(Ordering::Relaxed) / count
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub static METRICS: StageMetrics = StageMetrics::new();

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn avg_is_zero_with_no_samples() {
        let m = StageMetrics::new();
        assert_eq!(m.avg_ns(&m.decode_ns), 0);
    }

    #[test]
    fn records_accumulate_and_average() {
        let m = StageMetrics::new();
        m.record_stage(&m.decode_ns, 100);
        m.record_item();
        m.record_stage(&m.decode_ns, 300);
        m.record_item();
        assert_eq!(m.decode_ns.load(Ordering::Relaxed), 400);
        assert_eq!(m.avg_ns(&m.decode_ns), 200);
    }

    #[test]
    fn now_ns_is_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }
}
