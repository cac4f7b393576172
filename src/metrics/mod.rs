//! Per-signature latency and failure bookkeeping.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Calls slower than this are logged at `warn`.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureStats {
    /// Successful calls.
    pub calls: u64,
    pub total_ms: u64,
    pub slowest_ms: u64,
    /// Successful calls that took longer than the slow threshold.
    pub slow_calls: u64,
    /// Failed calls.
    pub errors: u64,
}

impl SignatureStats {
    fn merge(&mut self, elapsed_ms: u64, slow: bool) {
        self.calls += 1;
        self.total_ms = self.total_ms.saturating_add(elapsed_ms);
        self.slowest_ms = self.slowest_ms.max(elapsed_ms);
        if slow {
            self.slow_calls += 1;
        }
    }

    pub fn average_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.calls as f64
        }
    }

    /// Failed calls as a percentage of all calls.
    pub fn error_rate(&self) -> f64 {
        percentage(self.errors, self.calls + self.errors)
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSnapshot {
    pub calls: u64,
    pub total_ms: u64,
    pub slowest_ms: u64,
    pub average_ms: f64,
    pub slow_calls: u64,
    pub errors: u64,
    pub error_rate: f64,
}

impl From<SignatureStats> for SignatureSnapshot {
    fn from(stats: SignatureStats) -> Self {
        Self {
            calls: stats.calls,
            total_ms: stats.total_ms,
            slowest_ms: stats.slowest_ms,
            average_ms: stats.average_ms(),
            slow_calls: stats.slow_calls,
            errors: stats.errors,
            error_rate: stats.error_rate(),
        }
    }
}

/// Point-in-time copy of everything the recorder knows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    /// Number of distinct signatures seen.
    pub total_queries: usize,
    /// Cumulative milliseconds per signature.
    pub query_metrics: BTreeMap<String, u64>,
    /// Slowest single call per signature, in milliseconds.
    pub slowest: BTreeMap<String, u64>,
    /// Failed calls across every signature.
    pub total_errors: u64,
    /// Failed calls as a percentage of all calls, across every signature.
    pub error_rate: f64,
    pub signatures: BTreeMap<String, SignatureSnapshot>,
}

/// Concurrent, process-scoped recorder of call latencies and failures.
///
/// Shared as `Arc<PerformanceRecorder>`; every update is an atomic
/// per-entry merge, so concurrent calls for the same signature never lose
/// time. Updates share a gate that [`snapshot`](Self::snapshot) and
/// [`reset`](Self::reset) take exclusively, so both see the map between
/// updates and never halfway through a clear.
#[derive(Debug)]
pub struct PerformanceRecorder {
    metrics: DashMap<String, SignatureStats>,
    gate: RwLock<()>,
    slow_threshold_nanos: AtomicU64,
}

impl PerformanceRecorder {
    pub fn new() -> Self {
        Self::with_slow_threshold(DEFAULT_SLOW_THRESHOLD)
    }

    pub fn with_slow_threshold(slow_threshold: Duration) -> Self {
        Self {
            metrics: DashMap::new(),
            gate: RwLock::new(()),
            slow_threshold_nanos: AtomicU64::new(as_nanos(slow_threshold)),
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_nanos(self.slow_threshold_nanos.load(Ordering::Relaxed))
    }

    /// Replace the slow threshold. Applies to calls recorded from now on.
    pub fn set_slow_threshold(&self, threshold: Duration) {
        self.slow_threshold_nanos
            .store(as_nanos(threshold), Ordering::Relaxed);
    }

    /// Record one successful call.
    pub fn record(&self, signature: &str, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis().min(u64::MAX as u128) as u64;
        let threshold = self.slow_threshold();
        let slow = elapsed > threshold;

        {
            let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
            self.metrics
                .entry(signature.to_string())
                .or_default()
                .merge(elapsed_ms, slow);
        }

        if slow {
            warn!(
                signature,
                elapsed_ms,
                threshold_ms = threshold.as_millis() as u64,
                "slow gateway call"
            );
        } else {
            debug!(signature, elapsed_ms, "gateway call completed");
        }
    }

    /// Record one failed call.
    pub fn record_error(&self, signature: &str) {
        {
            let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
            self.metrics.entry(signature.to_string()).or_default().errors += 1;
        }
        debug!(signature, "gateway call failed");
    }

    pub fn signature_count(&self) -> usize {
        self.metrics.len()
    }

    /// Cumulative milliseconds for `signature`, zero if never seen.
    pub fn total_time_ms(&self, signature: &str) -> u64 {
        self.stats(signature).map(|s| s.total_ms).unwrap_or(0)
    }

    /// Slowest successful call, `None` until one has been recorded.
    pub fn slowest_ms(&self, signature: &str) -> Option<u64> {
        self.stats(signature)
            .filter(|s| s.calls > 0)
            .map(|s| s.slowest_ms)
    }

    pub fn calls(&self, signature: &str) -> u64 {
        self.stats(signature).map(|s| s.calls).unwrap_or(0)
    }

    pub fn errors(&self, signature: &str) -> u64 {
        self.stats(signature).map(|s| s.errors).unwrap_or(0)
    }

    pub fn stats(&self, signature: &str) -> Option<SignatureStats> {
        self.metrics.get(signature).map(|entry| *entry.value())
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let mut snapshot = PerformanceSnapshot {
            total_queries: 0,
            query_metrics: BTreeMap::new(),
            slowest: BTreeMap::new(),
            total_errors: 0,
            error_rate: 0.0,
            signatures: BTreeMap::new(),
        };
        let mut total_calls = 0u64;

        {
            let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            for entry in self.metrics.iter() {
                let stats = *entry.value();
                total_calls += stats.calls;
                snapshot.total_errors += stats.errors;
                snapshot.query_metrics.insert(entry.key().clone(), stats.total_ms);
                snapshot.slowest.insert(entry.key().clone(), stats.slowest_ms);
                snapshot.signatures.insert(entry.key().clone(), stats.into());
            }
        }

        snapshot.total_queries = snapshot.signatures.len();
        snapshot.error_rate =
            percentage(snapshot.total_errors, total_calls + snapshot.total_errors);
        snapshot
    }

    /// Drop every counter.
    ///
    /// `DashMap::clear` empties one shard at a time, so the gate is held
    /// exclusively: a concurrent update lands wholly before or wholly after
    /// the reset, and a snapshot never observes a partly cleared map.
    pub fn reset(&self) {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.metrics.clear();
        debug!("performance metrics reset");
    }
}

fn as_nanos(duration: Duration) -> u64 {
    duration.as_nanos().min(u64::MAX as u128) as u64
}

impl Default for PerformanceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_is_additive() {
        let recorder = PerformanceRecorder::new();
        recorder.record("GET_POST_BY_ID", Duration::from_millis(30));
        recorder.record("GET_POST_BY_ID", Duration::from_millis(50));
        recorder.record("LIKE_POST", Duration::from_millis(5));

        assert_eq!(recorder.signature_count(), 2);
        assert_eq!(recorder.total_time_ms("GET_POST_BY_ID"), 80);
        assert_eq!(recorder.slowest_ms("GET_POST_BY_ID"), Some(50));
        assert_eq!(recorder.calls("GET_POST_BY_ID"), 2);
        assert_eq!(recorder.stats("GET_POST_BY_ID").unwrap().average_ms(), 40.0);
    }

    #[test]
    fn test_unknown_signature() {
        let recorder = PerformanceRecorder::new();
        assert_eq!(recorder.total_time_ms("NOPE"), 0);
        assert_eq!(recorder.slowest_ms("NOPE"), None);
        assert_eq!(recorder.calls("NOPE"), 0);
    }

    #[test]
    fn test_snapshot_shape() {
        let recorder = PerformanceRecorder::new();
        recorder.record("DELETE_POST", Duration::from_millis(12));

        let json = serde_json::to_value(recorder.snapshot()).unwrap();
        assert_eq!(json["totalQueries"], 1);
        assert_eq!(json["queryMetrics"]["DELETE_POST"], 12);
        assert_eq!(json["slowest"]["DELETE_POST"], 12);
        assert_eq!(json["signatures"]["DELETE_POST"]["calls"], 1);
        assert_eq!(json["signatures"]["DELETE_POST"]["averageMs"], 12.0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let recorder = PerformanceRecorder::new();
        recorder.record("GET_USER_POSTS", Duration::from_millis(3));
        recorder.reset();

        assert_eq!(recorder.signature_count(), 0);
        assert_eq!(recorder.slowest_ms("GET_USER_POSTS"), None);
        assert!(recorder.snapshot().query_metrics.is_empty());
    }

    #[test]
    fn test_errors_and_error_rate() {
        let recorder = PerformanceRecorder::new();
        recorder.record("LIKE_POST", Duration::from_millis(4));
        recorder.record("LIKE_POST", Duration::from_millis(4));
        recorder.record("LIKE_POST", Duration::from_millis(4));
        recorder.record_error("LIKE_POST");
        recorder.record_error("DELETE_POST");

        assert_eq!(recorder.errors("LIKE_POST"), 1);
        assert_eq!(recorder.stats("LIKE_POST").unwrap().error_rate(), 25.0);
        assert_eq!(recorder.calls("DELETE_POST"), 0);
        assert_eq!(recorder.slowest_ms("DELETE_POST"), None);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.total_queries, 2);
        assert_eq!(snapshot.total_errors, 2);
        assert_eq!(snapshot.error_rate, 40.0);
        assert_eq!(snapshot.signatures["DELETE_POST"].error_rate, 100.0);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["totalErrors"], 2);
        assert_eq!(json["signatures"]["LIKE_POST"]["errors"], 1);
        assert_eq!(json["signatures"]["LIKE_POST"]["errorRate"], 25.0);
    }

    #[test]
    fn test_slow_calls_follow_threshold() {
        let recorder = PerformanceRecorder::with_slow_threshold(Duration::from_millis(10));
        recorder.record("GET_USER_POSTS", Duration::from_millis(25));
        recorder.record("GET_USER_POSTS", Duration::from_millis(10));

        recorder.set_slow_threshold(Duration::from_millis(50));
        assert_eq!(recorder.slow_threshold(), Duration::from_millis(50));
        recorder.record("GET_USER_POSTS", Duration::from_millis(25));

        let stats = recorder.stats("GET_USER_POSTS").unwrap();
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.slow_calls, 1);
        assert_eq!(recorder.snapshot().signatures["GET_USER_POSTS"].slow_calls, 1);
    }

    #[test]
    fn test_snapshot_never_sees_partial_reset() {
        const SIGNATURES: usize = 32;
        let names: Arc<Vec<String>> = Arc::new((0..SIGNATURES).map(|i| format!("s{i}")).collect());
        let recorder = Arc::new(PerformanceRecorder::new());
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let writer = {
            let (recorder, names, done) = (recorder.clone(), names.clone(), done.clone());
            std::thread::spawn(move || {
                for _ in 0..200 {
                    for name in names.iter() {
                        recorder.record(name, Duration::from_millis(1));
                    }
                }
                done.store(true, Ordering::SeqCst);
            })
        };
        let resetter = {
            let (recorder, done) = (recorder.clone(), done.clone());
            std::thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    recorder.reset();
                    std::thread::yield_now();
                }
            })
        };

        while !done.load(Ordering::SeqCst) {
            let snapshot = recorder.snapshot();
            let calls: Vec<u64> = names
                .iter()
                .map(|name| snapshot.signatures.get(name).map(|s| s.calls).unwrap_or(0))
                .collect();
            let max = calls.iter().copied().max().unwrap_or(0);
            let min = calls.iter().copied().min().unwrap_or(0);
            // One writer sweeps every signature per round, so a consistent
            // view differs by at most one call between signatures.
            assert!(max - min <= 1, "inconsistent snapshot: {calls:?}");
        }

        writer.join().unwrap();
        resetter.join().unwrap();
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let recorder = Arc::new(PerformanceRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        recorder.record("GET_ALL_POSTS_PAGED", Duration::from_millis(1));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(recorder.calls("GET_ALL_POSTS_PAGED"), 800);
        assert_eq!(recorder.total_time_ms("GET_ALL_POSTS_PAGED"), 800);
    }
}
