use crate::llm::Usage;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Width of one metrics window.
pub const BUCKET_WIDTH_MS: u64 = 60_000;

/// Rolling retention: 24 hours of one-minute buckets.
const RETENTION_BUCKETS: usize = 1_440;

/// Aggregated counters over one `[window_start, window_end]` window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub requests_total: u64,
    pub requests_failed: u64,
    pub prompt_tokens_total: u64,
    pub completion_tokens_total: u64,
    pub cost_total: f64,
}

/// Counters attributed to one (provider, model) target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetCounters {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub prompt_tokens_total: u64,
    pub completion_tokens_total: u64,
    pub cost_total: f64,
}

#[derive(Debug, Default)]
struct Bucket {
    totals: TargetCounters,
    per_target: HashMap<(String, String), TargetCounters>,
}

impl Bucket {
    fn snapshot(&self, window_start_ms: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            window_start_ms,
            window_end_ms: window_start_ms + BUCKET_WIDTH_MS,
            requests_total: self.totals.requests_total,
            requests_failed: self.totals.requests_failed,
            prompt_tokens_total: self.totals.prompt_tokens_total,
            completion_tokens_total: self.totals.completion_tokens_total,
            cost_total: self.totals.cost_total,
        }
    }
}

/// Time-bucketed usage aggregator.
///
/// Every dispatcher/stream target attempt outcome posts exactly one update to
/// the bucket containing the outcome's timestamp. Callers pass the timestamp
/// so tests can pin the clock; snapshots are read-only projections.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    buckets: Mutex<BTreeMap<u64, Bucket>>,
}

/// Current time as epoch milliseconds.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful target attempt.
    pub fn record_success(
        &self,
        provider_id: &str,
        model_id: &str,
        usage: Usage,
        cost: f64,
        ts_ms: u64,
    ) {
        let mut buckets = self.buckets.lock().expect("metrics lock poisoned");
        let bucket = Self::bucket_mut(&mut buckets, ts_ms);

        bucket.totals.requests_total += 1;
        bucket.totals.prompt_tokens_total += usage.prompt_tokens;
        bucket.totals.completion_tokens_total += usage.completion_tokens;
        bucket.totals.cost_total += cost;

        let target = bucket
            .per_target
            .entry((provider_id.to_string(), model_id.to_string()))
            .or_default();
        target.requests_total += 1;
        target.prompt_tokens_total += usage.prompt_tokens;
        target.completion_tokens_total += usage.completion_tokens;
        target.cost_total += cost;
    }

    /// Record one failed target attempt.
    pub fn record_failure(&self, provider_id: &str, model_id: &str, ts_ms: u64) {
        let mut buckets = self.buckets.lock().expect("metrics lock poisoned");
        let bucket = Self::bucket_mut(&mut buckets, ts_ms);

        bucket.totals.requests_total += 1;
        bucket.totals.requests_failed += 1;

        let target = bucket
            .per_target
            .entry((provider_id.to_string(), model_id.to_string()))
            .or_default();
        target.requests_total += 1;
        target.requests_failed += 1;
    }

    fn bucket_mut(buckets: &mut BTreeMap<u64, Bucket>, ts_ms: u64) -> &mut Bucket {
        let window_start = ts_ms - ts_ms % BUCKET_WIDTH_MS;
        while buckets.len() >= RETENTION_BUCKETS && !buckets.contains_key(&window_start) {
            let oldest = *buckets.keys().next().expect("non-empty bucket map");
            buckets.remove(&oldest);
        }
        buckets.entry(window_start).or_default()
    }

    /// The bucket containing `now_ms`, or the most recent closed bucket when
    /// the current window is empty. `None` until anything has been recorded.
    pub fn snapshot(&self, now_ms: u64) -> Option<MetricsSnapshot> {
        let buckets = self.buckets.lock().expect("metrics lock poisoned");
        let current = now_ms - now_ms % BUCKET_WIDTH_MS;
        if let Some(bucket) = buckets.get(&current) {
            return Some(bucket.snapshot(current));
        }
        buckets
            .range(..=current)
            .next_back()
            .map(|(start, bucket)| bucket.snapshot(*start))
    }

    /// All buckets whose window intersects `[start_ms, end_ms]`, ordered by
    /// window start.
    pub fn range(&self, start_ms: u64, end_ms: u64) -> Vec<MetricsSnapshot> {
        let buckets = self.buckets.lock().expect("metrics lock poisoned");
        buckets
            .iter()
            .filter(|(window_start, _)| {
                **window_start <= end_ms && **window_start + BUCKET_WIDTH_MS > start_ms
            })
            .map(|(window_start, bucket)| bucket.snapshot(*window_start))
            .collect()
    }

    /// Totals for one (provider, model) target summed across all retained
    /// buckets.
    pub fn target_totals(&self, provider_id: &str, model_id: &str) -> TargetCounters {
        let key = (provider_id.to_string(), model_id.to_string());
        let buckets = self.buckets.lock().expect("metrics lock poisoned");
        let mut totals = TargetCounters::default();
        for bucket in buckets.values() {
            if let Some(counters) = bucket.per_target.get(&key) {
                totals.requests_total += counters.requests_total;
                totals.requests_failed += counters.requests_failed;
                totals.prompt_tokens_total += counters.prompt_tokens_total;
                totals.completion_tokens_total += counters.completion_tokens_total;
                totals.cost_total += counters.cost_total;
            }
        }
        totals
    }
}
