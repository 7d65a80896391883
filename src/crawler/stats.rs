//! Live monitoring counters shared by all workers of a run

use crate::models::LiveStats;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Increment-only counters; [`CrawlStats::snapshot`] produces the reported [`LiveStats`]
#[derive(Debug, Default)]
pub struct CrawlStats {
    urls_crawled: AtomicU64,
    params_fuzzed: AtomicU64,
    payloads_tested: AtomicU64,
    total_resp_ms: AtomicU64,
    resp_count: AtomicU64,
    per_category: Mutex<BTreeMap<String, u64>>,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A page was fetched in `elapsed_ms`
    pub fn record_page(&self, elapsed_ms: u64) {
        self.urls_crawled.fetch_add(1, Ordering::Relaxed);
        self.total_resp_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        self.resp_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_param(&self) {
        self.params_fuzzed.fetch_add(1, Ordering::Relaxed);
    }

    /// A payload of `category` was sent
    pub fn record_payload(&self, category: &str) {
        self.payloads_tested.fetch_add(1, Ordering::Relaxed);
        let mut per_category = match self.per_category.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *per_category.entry(category.to_string()).or_insert(0) += 1;
    }

    pub fn payloads_tested(&self) -> u64 {
        self.payloads_tested.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> LiveStats {
        let resp_count = self.resp_count.load(Ordering::Relaxed);
        let avg_resp_time_ms = if resp_count == 0 {
            0
        } else {
            self.total_resp_ms.load(Ordering::Relaxed) / resp_count
        };
        let per_category = match self.per_category.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        LiveStats {
            urls_crawled: self.urls_crawled.load(Ordering::Relaxed),
            params_fuzzed: self.params_fuzzed.load(Ordering::Relaxed),
            payloads_tested: self.payloads_tested(),
            avg_resp_time_ms,
            per_category,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages_page_times() {
        let stats = CrawlStats::new();
        stats.record_page(100);
        stats.record_page(300);
        stats.record_param();
        stats.record_payload("probes");
        stats.record_payload("probes");
        stats.record_payload("boolean");

        let snap = stats.snapshot();
        assert_eq!(snap.urls_crawled, 2);
        assert_eq!(snap.avg_resp_time_ms, 200);
        assert_eq!(snap.params_fuzzed, 1);
        assert_eq!(snap.payloads_tested, 3);
        assert_eq!(snap.per_category.get("probes"), Some(&2));
        assert_eq!(snap.per_category.get("boolean"), Some(&1));
    }

    #[test]
    fn test_empty_snapshot() {
        assert_eq!(CrawlStats::new().snapshot(), LiveStats::default());
    }
}
