//! Rolling per-operation latency counters for the search engine
//! (SPEC_FULL.md §4.5's "Statistics" subsection). Grounded on the
//! teacher's `stats` module in spirit — a read-only summary over
//! recorded activity — but scoped to in-process counters updated under
//! a lock rather than SQL aggregates over a database.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Bound on how many recent samples are kept for percentile computation.
/// Older samples are evicted FIFO; this trades exact percentiles for a
/// fixed memory footprint under sustained load.
const MAX_SAMPLES: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct SearchSample {
    pub total_ms: u64,
    pub stage1_ms: u64,
    pub stage2_ms: u64,
    pub candidates_considered: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchStatsSnapshot {
    pub count: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub avg_stage1_ms: f64,
    pub avg_stage2_ms: f64,
    pub avg_candidates_considered: f64,
}

#[derive(Default)]
struct Inner {
    samples: VecDeque<SearchSample>,
    total_count: u64,
}

/// Thread-safe rolling counter of search latencies, read by `GET /health`
/// and any future stats endpoint; `record` is called once per completed
/// search, `snapshot` and `reset` are the read/write operations SPEC_FULL.md
/// calls read-only-observable and explicit-reset respectively.
pub struct SearchStats {
    inner: Mutex<Inner>,
}

impl SearchStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn record(&self, sample: SearchSample) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_count += 1;
        if inner.samples.len() == MAX_SAMPLES {
            inner.samples.pop_front();
        }
        inner.samples.push_back(sample);
    }

    pub fn snapshot(&self) -> SearchStatsSnapshot {
        let inner = self.inner.lock().unwrap();
        if inner.samples.is_empty() {
            return SearchStatsSnapshot {
                count: inner.total_count,
                ..Default::default()
            };
        }

        let mut totals: Vec<u64> = inner.samples.iter().map(|s| s.total_ms).collect();
        totals.sort_unstable();
        let n = inner.samples.len();
        let stage1_sum: u64 = inner.samples.iter().map(|s| s.stage1_ms).sum();
        let stage2_sum: u64 = inner.samples.iter().map(|s| s.stage2_ms).sum();
        let candidates_sum: usize = inner.samples.iter().map(|s| s.candidates_considered).sum();

        SearchStatsSnapshot {
            count: inner.total_count,
            p50_ms: percentile(&totals, 0.50),
            p95_ms: percentile(&totals, 0.95),
            avg_stage1_ms: stage1_sum as f64 / n as f64,
            avg_stage2_ms: stage2_sum as f64 / n as f64,
            avg_candidates_considered: candidates_sum as f64 / n as f64,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples.clear();
        inner.total_count = 0;
    }
}

impl Default for SearchStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(total_ms: u64) -> SearchSample {
        SearchSample {
            total_ms,
            stage1_ms: total_ms / 2,
            stage2_ms: total_ms / 2,
            candidates_considered: 100,
        }
    }

    #[test]
    fn empty_stats_snapshot_has_zero_count() {
        let stats = SearchStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.p50_ms, 0);
    }

    #[test]
    fn percentiles_reflect_recorded_samples() {
        let stats = SearchStats::new();
        for ms in [10, 20, 30, 40, 100] {
            stats.record(sample(ms));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.count, 5);
        assert_eq!(snap.p50_ms, 30);
        assert_eq!(snap.p95_ms, 100);
    }

    #[test]
    fn reset_clears_samples_and_count() {
        let stats = SearchStats::new();
        stats.record(sample(10));
        stats.reset();
        let snap = stats.snapshot();
        assert_eq!(snap.count, 0);
        assert!(stats.snapshot().p50_ms == 0);
    }

    #[test]
    fn ring_buffer_evicts_oldest_sample_past_capacity() {
        let stats = SearchStats::new();
        for ms in 0..(MAX_SAMPLES as u64 + 10) {
            stats.record(sample(ms));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.count, MAX_SAMPLES as u64 + 10);
        // p95 should reflect only the retained window, not the earliest samples.
        assert!(snap.p95_ms >= MAX_SAMPLES as u64 - 10);
    }
}
