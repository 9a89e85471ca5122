use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::model::TaskType;

/// Timing and token counts for one model invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationMetrics {
    pub inference_time_seconds: f64,
    pub input_token_count: usize,
    pub output_token_count: usize,
    pub total_token_count: usize,
    /// Absent when no measurable time elapsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
}

impl GenerationMetrics {
    pub fn compute(
        inference_time_seconds: f64,
        input_token_count: usize,
        output_token_count: usize,
    ) -> Self {
        let tokens_per_second = (inference_time_seconds > 0.0)
            .then(|| output_token_count as f64 / inference_time_seconds);
        Self {
            inference_time_seconds,
            input_token_count,
            output_token_count,
            total_token_count: input_token_count + output_token_count,
            tokens_per_second,
        }
    }
}

/// Process-wide counters. Starts at zero; only aggregate reads are exposed.
pub struct PipelineMetrics {
    started: Instant,
    requests: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
    cache_hits: AtomicU64,
    generations: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    inference_micros: AtomicU64,
    per_task: [AtomicU64; TaskType::ALL.len()],
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: Option<f64>,
    pub batch_requests: u64,
    pub cache_hits: u64,
    pub generations: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub average_inference_time_seconds: Option<f64>,
    pub average_tokens_per_second: Option<f64>,
    pub requests_by_task: BTreeMap<&'static str, u64>,
    pub uptime_seconds: f64,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            generations: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            inference_micros: AtomicU64::new(0),
            per_task: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn record_request(&self, task: TaskType) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.per_task[task.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation(&self, metrics: &GenerationMetrics) {
        self.generations.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(metrics.input_token_count as u64, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(metrics.output_token_count as u64, Ordering::Relaxed);
        let micros = Duration::from_secs_f64(metrics.inference_time_seconds.max(0.0)).as_micros();
        self.inference_micros
            .fetch_add(micros.min(u64::MAX as u128) as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.requests.load(Ordering::Relaxed);
        let successful_requests = self.succeeded.load(Ordering::Relaxed);
        let generations = self.generations.load(Ordering::Relaxed);
        let total_output_tokens = self.output_tokens.load(Ordering::Relaxed);
        let inference_seconds = self.inference_micros.load(Ordering::Relaxed) as f64 / 1e6;

        let requests_by_task = TaskType::ALL
            .iter()
            .map(|task| (task.as_str(), self.per_task[task.index()].load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            total_requests,
            successful_requests,
            failed_requests: self.failed.load(Ordering::Relaxed),
            success_rate: (total_requests > 0)
                .then(|| successful_requests as f64 / total_requests as f64),
            batch_requests: self.batches.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            generations,
            total_input_tokens: self.input_tokens.load(Ordering::Relaxed),
            total_output_tokens,
            average_inference_time_seconds: (generations > 0)
                .then(|| inference_seconds / generations as f64),
            average_tokens_per_second: (inference_seconds > 0.0)
                .then(|| total_output_tokens as f64 / inference_seconds),
            requests_by_task,
            uptime_seconds: self.started.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_is_output_over_time() {
        let metrics = GenerationMetrics::compute(2.0, 12, 100);
        assert_eq!(metrics.tokens_per_second, Some(50.0));
        assert_eq!(metrics.total_token_count, 112);
    }

    #[test]
    fn zero_time_omits_throughput() {
        let metrics = GenerationMetrics::compute(0.0, 12, 100);
        assert_eq!(metrics.tokens_per_second, None);
        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json.get("tokens_per_second").is_none());
    }

    #[test]
    fn negative_time_omits_throughput() {
        assert_eq!(GenerationMetrics::compute(-1.0, 1, 1).tokens_per_second, None);
    }

    #[test]
    fn snapshot_starts_at_zero() {
        let snapshot = PipelineMetrics::new().snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.success_rate, None);
        assert_eq!(snapshot.average_inference_time_seconds, None);
        assert_eq!(snapshot.requests_by_task.len(), TaskType::ALL.len());
    }

    #[test]
    fn counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_request(TaskType::Summarization);
        metrics.record_request(TaskType::Summarization);
        metrics.record_success();
        metrics.record_failure();
        metrics.record_generation(&GenerationMetrics::compute(0.5, 10, 20));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.success_rate, Some(0.5));
        assert_eq!(snapshot.requests_by_task["summarization"], 2);
        assert_eq!(snapshot.total_output_tokens, 20);
        assert_eq!(snapshot.average_tokens_per_second, Some(40.0));
    }
}
