//! Cross-cutting metrics aggregation (§4.7 SUPPLEMENT, §9 open question 3:
//! `upload_success_rate` and `average_scan_time_ms` are real computed
//! metrics here, not hard-coded constants).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Rolling counters the Uploader updates after every cycle; the Heartbeat
/// reads them to compute `upload_success_rate` and `last_upload`.
#[derive(Default)]
pub struct UploadStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    last_success_ms: AtomicI64,
}

impl UploadStats {
    pub fn record_attempt(&self, success: bool, now_ms: i64) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
            self.last_success_ms.store(now_ms, Ordering::Relaxed);
        }
    }

    pub fn success_rate(&self) -> f64 {
        let attempts = self.attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 1.0;
        }
        self.successes.load(Ordering::Relaxed) as f64 / attempts as f64
    }

    pub fn last_success_ms(&self) -> Option<i64> {
        let v = self.last_success_ms.load(Ordering::Relaxed);
        if v == 0 {
            None
        } else {
            Some(v)
        }
    }
}

/// Rolling counters each Polling Engine loop updates; the Heartbeat reads
/// them to compute `average_scan_time_ms`.
#[derive(Default)]
pub struct ScanStats {
    scans: AtomicU64,
    total_scan_ms: AtomicU64,
    overruns: AtomicU64,
}

impl ScanStats {
    pub fn record_scan(&self, elapsed_ms: u64, overrun: bool) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        self.total_scan_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        if overrun {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn average_scan_ms(&self) -> f64 {
        let scans = self.scans.load(Ordering::Relaxed);
        if scans == 0 {
            return 0.0;
        }
        self.total_scan_ms.load(Ordering::Relaxed) as f64 / scans as f64
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_success_rate_defaults_to_one_with_no_attempts() {
        let stats = UploadStats::default();
        assert_eq!(stats.success_rate(), 1.0);
        assert_eq!(stats.last_success_ms(), None);
    }

    #[test]
    fn upload_success_rate_reflects_failures() {
        let stats = UploadStats::default();
        stats.record_attempt(true, 1000);
        stats.record_attempt(false, 2000);
        stats.record_attempt(true, 3000);
        assert!((stats.success_rate() - (2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(stats.last_success_ms(), Some(3000));
    }

    #[test]
    fn scan_stats_average_and_overrun_count() {
        let stats = ScanStats::default();
        stats.record_scan(100, false);
        stats.record_scan(300, true);
        assert_eq!(stats.average_scan_ms(), 200.0);
        assert_eq!(stats.overruns(), 1);
    }
}
