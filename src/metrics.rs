//! Pipeline counters, reported by `GET /stats`.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-process counters. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    requests: AtomicUsize,
    request_failures: AtomicUsize,
    paragraphs_dispatched: AtomicUsize,
    paragraphs_switched: AtomicUsize,
    paragraphs_failed: AtomicUsize,
    paragraphs_skipped: AtomicUsize,
    completion_calls: AtomicUsize,
    completion_failures: AtomicUsize,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_failure(&self) {
        self.request_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Add the paragraph tallies of one finished request.
    pub fn record_paragraphs(
        &self,
        dispatched: usize,
        switched: usize,
        failed: usize,
        skipped: usize,
    ) {
        self.paragraphs_dispatched.fetch_add(dispatched, Ordering::Relaxed);
        self.paragraphs_switched.fetch_add(switched, Ordering::Relaxed);
        self.paragraphs_failed.fetch_add(failed, Ordering::Relaxed);
        self.paragraphs_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn record_completion_call(&self) {
        self.completion_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion_failure(&self) {
        self.completion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completion_calls(&self) -> usize {
        self.completion_calls.load(Ordering::Relaxed)
    }

    pub fn completion_failures(&self) -> usize {
        self.completion_failures.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> MetricsReport {
        let dispatched = self.paragraphs_dispatched.load(Ordering::Relaxed);
        let switched = self.paragraphs_switched.load(Ordering::Relaxed);
        let switch_success_rate = if dispatched > 0 {
            (switched as f64 / dispatched as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            requests: self.requests.load(Ordering::Relaxed),
            request_failures: self.request_failures.load(Ordering::Relaxed),
            paragraphs_dispatched: dispatched,
            paragraphs_switched: switched,
            paragraphs_failed: self.paragraphs_failed.load(Ordering::Relaxed),
            paragraphs_skipped: self.paragraphs_skipped.load(Ordering::Relaxed),
            switch_success_rate,
            completion_calls: self.completion_calls(),
            completion_failures: self.completion_failures(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub requests: usize,
    pub request_failures: usize,
    pub paragraphs_dispatched: usize,
    pub paragraphs_switched: usize,
    /// Dispatched paragraphs whose result was a failure or never arrived
    pub paragraphs_failed: usize,
    pub paragraphs_skipped: usize,
    /// Switched share of dispatched paragraphs as a percentage (0-100)
    pub switch_success_rate: f64,
    /// Completion calls made by workers in this process
    pub completion_calls: usize,
    pub completion_failures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report() {
        let report = PipelineMetrics::new().report();
        assert_eq!(report.requests, 0);
        assert_eq!(report.switch_success_rate, 0.0);
    }

    #[test]
    fn test_paragraph_tallies_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_request();
        metrics.record_paragraphs(4, 3, 1, 2);
        metrics.record_request();
        metrics.record_paragraphs(4, 4, 0, 0);

        let report = metrics.report();
        assert_eq!(report.requests, 2);
        assert_eq!(report.paragraphs_dispatched, 8);
        assert_eq!(report.paragraphs_switched, 7);
        assert_eq!(report.paragraphs_failed, 1);
        assert_eq!(report.paragraphs_skipped, 2);
        assert_eq!(report.switch_success_rate, 87.5);
    }

    #[test]
    fn test_completion_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_completion_call();
        metrics.record_completion_call();
        metrics.record_completion_failure();
        assert_eq!(metrics.completion_calls(), 2);
        assert_eq!(metrics.completion_failures(), 1);
    }

    #[test]
    fn test_report_serializes() {
        let metrics = PipelineMetrics::new();
        metrics.record_request_failure();
        let json = serde_json::to_value(metrics.report()).unwrap();
        assert_eq!(json["request_failures"], 1);
        assert!(json.get("switch_success_rate").is_some());
    }
}
