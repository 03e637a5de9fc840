use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One append-only metric sample for a phase within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetric {
    pub run_id: String,
    pub phase: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub unit: String,
    pub total_items: i64,
    pub total_duration_seconds: f64,
    pub avg_time_per_item_seconds: f64,
    pub recorded_at: DateTime<Utc>,
}

impl PhaseMetric {
    pub fn new(
        run_id: impl Into<String>,
        phase: impl Into<String>,
        metric_name: impl Into<String>,
        metric_value: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            phase: phase.into(),
            metric_name: metric_name.into(),
            metric_value,
            unit: unit.into(),
            total_items: 0,
            total_duration_seconds: 0.0,
            avg_time_per_item_seconds: 0.0,
            recorded_at: Utc::now(),
        }
    }
}

/// Per-run counters, written once when the run finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub run_id: String,
    pub processed: i64,
    pub success: i64,
    pub error: i64,
    pub skipped: i64,
    pub media_processed: i64,
    pub cache_hits: i64,
    pub cache_misses: i64,
    pub network_errors: i64,
    pub retry_count: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub avg_retries: f64,
}

impl RunTotals {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            start_time: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Derive the rate fields from the raw counters.
    pub fn finalize(&mut self, end: DateTime<Utc>) {
        self.end_time = Some(end);
        if let Some(start) = self.start_time {
            self.duration_seconds = (end - start).num_milliseconds() as f64 / 1000.0;
        }
        if self.processed > 0 {
            self.success_rate = self.success as f64 / self.processed as f64;
            self.error_rate = self.error as f64 / self.processed as f64;
            self.avg_retries = self.retry_count as f64 / self.processed as f64;
        }
        let lookups = self.cache_hits + self.cache_misses;
        if lookups > 0 {
            self.cache_hit_rate = self.cache_hits as f64 / lookups as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn finalize_computes_rates() {
        let mut totals = RunTotals::new("run-1");
        totals.processed = 10;
        totals.success = 8;
        totals.error = 2;
        totals.cache_hits = 3;
        totals.cache_misses = 1;
        totals.retry_count = 5;

        let end = totals.start_time.unwrap() + Duration::seconds(30);
        totals.finalize(end);

        assert_eq!(totals.duration_seconds, 30.0);
        assert_eq!(totals.success_rate, 0.8);
        assert_eq!(totals.error_rate, 0.2);
        assert_eq!(totals.cache_hit_rate, 0.75);
        assert_eq!(totals.avg_retries, 0.5);
    }

    #[test]
    fn finalize_with_zero_processed_leaves_rates_zero() {
        let mut totals = RunTotals::new("run-2");
        totals.finalize(Utc::now());
        assert_eq!(totals.success_rate, 0.0);
        assert_eq!(totals.cache_hit_rate, 0.0);
    }
}
