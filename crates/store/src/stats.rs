//! Append-only run and phase statistics.

use sqlx::any::AnyRow;
use sqlx::Row;

use magpie_core::stats::{PhaseMetric, RunTotals};

use crate::db::Db;
use crate::error::StoreError;
use crate::row::{to_ts, to_ts_opt, ts, ts_opt};

#[derive(Debug, Clone)]
pub struct StatsStore {
    db: Db,
}

fn metric_from_row(row: &AnyRow) -> Result<PhaseMetric, StoreError> {
    Ok(PhaseMetric {
        run_id: row.try_get("run_id")?,
        phase: row.try_get("phase")?,
        metric_name: row.try_get("metric_name")?,
        metric_value: row.try_get("metric_value")?,
        unit: row.try_get("unit")?,
        total_items: row.try_get("total_items")?,
        total_duration_seconds: row.try_get("total_duration_seconds")?,
        avg_time_per_item_seconds: row.try_get("avg_time_per_item_seconds")?,
        recorded_at: ts(row, "recorded_at")?,
    })
}

fn totals_from_row(row: &AnyRow) -> Result<RunTotals, StoreError> {
    Ok(RunTotals {
        run_id: row.try_get("run_id")?,
        processed: row.try_get("processed")?,
        success: row.try_get("success")?,
        error: row.try_get("error")?,
        skipped: row.try_get("skipped")?,
        media_processed: row.try_get("media_processed")?,
        cache_hits: row.try_get("cache_hits")?,
        cache_misses: row.try_get("cache_misses")?,
        network_errors: row.try_get("network_errors")?,
        retry_count: row.try_get("retry_count")?,
        start_time: ts_opt(row, "start_time")?,
        end_time: ts_opt(row, "end_time")?,
        duration_seconds: row.try_get("duration_seconds")?,
        success_rate: row.try_get("success_rate")?,
        error_rate: row.try_get("error_rate")?,
        cache_hit_rate: row.try_get("cache_hit_rate")?,
        avg_retries: row.try_get("avg_retries")?,
    })
}

impl StatsStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn record_phase_metric(&self, metric: &PhaseMetric) -> Result<(), StoreError> {
        let sql = self.db.sql(
            "INSERT INTO phase_statistics (run_id, phase, metric_name, metric_value, unit, \
             total_items, total_duration_seconds, avg_time_per_item_seconds, recorded_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        );
        sqlx::query(&sql)
            .bind(metric.run_id.clone())
            .bind(metric.phase.clone())
            .bind(metric.metric_name.clone())
            .bind(metric.metric_value)
            .bind(metric.unit.clone())
            .bind(metric.total_items)
            .bind(metric.total_duration_seconds)
            .bind(metric.avg_time_per_item_seconds)
            .bind(to_ts(&metric.recorded_at))
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn get_run_metrics(&self, run_id: &str) -> Result<Vec<PhaseMetric>, StoreError> {
        let sql = self.db.sql(
            "SELECT run_id, phase, metric_name, metric_value, unit, total_items, \
             total_duration_seconds, avg_time_per_item_seconds, recorded_at \
             FROM phase_statistics WHERE run_id = ? ORDER BY recorded_at ASC",
        );
        let rows = sqlx::query(&sql)
            .bind(run_id.to_string())
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(metric_from_row).collect()
    }

    /// Write (or overwrite) the per-run totals row.
    pub async fn record_run_totals(&self, totals: &RunTotals) -> Result<(), StoreError> {
        let sql = self.db.sql(
            "INSERT INTO run_totals (run_id, processed, success, error, skipped, \
             media_processed, cache_hits, cache_misses, network_errors, retry_count, \
             start_time, end_time, duration_seconds, success_rate, error_rate, \
             cache_hit_rate, avg_retries) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (run_id) DO UPDATE SET \
               processed = excluded.processed, success = excluded.success, \
               error = excluded.error, skipped = excluded.skipped, \
               media_processed = excluded.media_processed, cache_hits = excluded.cache_hits, \
               cache_misses = excluded.cache_misses, network_errors = excluded.network_errors, \
               retry_count = excluded.retry_count, start_time = excluded.start_time, \
               end_time = excluded.end_time, duration_seconds = excluded.duration_seconds, \
               success_rate = excluded.success_rate, error_rate = excluded.error_rate, \
               cache_hit_rate = excluded.cache_hit_rate, avg_retries = excluded.avg_retries",
        );
        sqlx::query(&sql)
            .bind(totals.run_id.clone())
            .bind(totals.processed)
            .bind(totals.success)
            .bind(totals.error)
            .bind(totals.skipped)
            .bind(totals.media_processed)
            .bind(totals.cache_hits)
            .bind(totals.cache_misses)
            .bind(totals.network_errors)
            .bind(totals.retry_count)
            .bind(to_ts_opt(&totals.start_time))
            .bind(to_ts_opt(&totals.end_time))
            .bind(totals.duration_seconds)
            .bind(totals.success_rate)
            .bind(totals.error_rate)
            .bind(totals.cache_hit_rate)
            .bind(totals.avg_retries)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn get_run_totals(&self, run_id: &str) -> Result<Option<RunTotals>, StoreError> {
        let sql = self.db.sql(
            "SELECT run_id, processed, success, error, skipped, media_processed, cache_hits, \
             cache_misses, network_errors, retry_count, start_time, end_time, \
             duration_seconds, success_rate, error_rate, cache_hit_rate, avg_retries \
             FROM run_totals WHERE run_id = ?",
        );
        let row = sqlx::query(&sql)
            .bind(run_id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(totals_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use chrono::Utc;

    #[tokio::test]
    async fn phase_metrics_append_and_query() {
        let store = StatsStore::new(Db::memory().await.unwrap());
        let mut m = PhaseMetric::new("run-1", "cp_cache", "items_per_second", 4.5, "items/s");
        m.total_items = 9;
        m.total_duration_seconds = 2.0;
        m.avg_time_per_item_seconds = 2.0 / 9.0;
        store.record_phase_metric(&m).await.unwrap();
        store
            .record_phase_metric(&PhaseMetric::new("run-1", "cp_llm", "duration", 12.0, "s"))
            .await
            .unwrap();

        let metrics = store.get_run_metrics("run-1").await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].phase, "cp_cache");
        assert_eq!(metrics[0].total_items, 9);
        assert!(store.get_run_metrics("run-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_totals_upsert() {
        let store = StatsStore::new(Db::memory().await.unwrap());
        let mut totals = RunTotals::new("run-1");
        totals.processed = 5;
        totals.success = 5;
        store.record_run_totals(&totals).await.unwrap();

        totals.finalize(Utc::now());
        store.record_run_totals(&totals).await.unwrap();

        let got = store.get_run_totals("run-1").await.unwrap().unwrap();
        assert_eq!(got.processed, 5);
        assert_eq!(got.success_rate, 1.0);
        assert!(got.end_time.is_some());
    }
}
