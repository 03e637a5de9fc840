//! Processing-queue store. One row per item; claims are linearized through
//! the atomic `mark_processing` transition so an item is never held by two
//! workers at once.

use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;

use magpie_core::queue::{QueueRow, QueueStatus};

use crate::db::{placeholders, Db};
use crate::error::StoreError;
use crate::row::{to_ts, to_ts_opt, ts, ts_opt};

const QUEUE_COLUMNS: &str = "item_id, status, phase, priority, retry_count, last_error, \
    processed_at, created_at, updated_at";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    pub unprocessed: i64,
    pub processing: i64,
    pub processed: i64,
    pub failed: i64,
}

#[derive(Debug, Clone)]
pub struct QueueStore {
    db: Db,
}

fn row_from_any(row: &AnyRow) -> Result<QueueRow, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(QueueRow {
        item_id: row.try_get("item_id")?,
        status: QueueStatus::parse(&status)
            .ok_or_else(|| StoreError::NotFound(format!("unknown queue status '{status}'")))?,
        phase: row.try_get("phase")?,
        priority: row.try_get("priority")?,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
        processed_at: ts_opt(row, "processed_at")?,
        created_at: ts(row, "created_at")?,
        updated_at: ts(row, "updated_at")?,
    })
}

impl QueueStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create(&self, row: &QueueRow) -> Result<(), StoreError> {
        let sql = self.db.sql(&format!(
            "INSERT INTO processing_queue ({QUEUE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (item_id) DO NOTHING"
        ));
        sqlx::query(&sql)
            .bind(row.item_id.clone())
            .bind(row.status.as_str().to_string())
            .bind(row.phase.clone())
            .bind(row.priority)
            .bind(row.retry_count)
            .bind(row.last_error.clone())
            .bind(to_ts_opt(&row.processed_at))
            .bind(to_ts(&row.created_at))
            .bind(to_ts(&row.updated_at))
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn get(&self, item_id: &str) -> Result<Option<QueueRow>, StoreError> {
        let sql = self.db.sql(&format!(
            "SELECT {QUEUE_COLUMNS} FROM processing_queue WHERE item_id = ?"
        ));
        let row = sqlx::query(&sql)
            .bind(item_id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(row_from_any).transpose()
    }

    pub async fn get_all(&self) -> Result<Vec<QueueRow>, StoreError> {
        let sql = self.db.sql(&format!(
            "SELECT {QUEUE_COLUMNS} FROM processing_queue ORDER BY created_at ASC"
        ));
        let rows = sqlx::query(&sql).fetch_all(self.db.pool()).await?;
        rows.iter().map(row_from_any).collect()
    }

    /// Move a row to `status`, optionally recording the phase and last error.
    /// `processed_at` is stamped when the row reaches `processed`.
    pub async fn update_status(
        &self,
        item_id: &str,
        status: QueueStatus,
        phase: Option<&str>,
        error: Option<&str>,
        increment_retry: bool,
    ) -> Result<(), StoreError> {
        let now = to_ts(&Utc::now());
        let processed_at = matches!(status, QueueStatus::Processed).then(|| now.clone());
        let retry_bump = i64::from(increment_retry);
        let sql = self.db.sql(
            "UPDATE processing_queue SET status = ?, \
               phase = COALESCE(?, phase), \
               last_error = COALESCE(?, last_error), \
               retry_count = retry_count + ?, \
               processed_at = COALESCE(?, processed_at), \
               updated_at = ? \
             WHERE item_id = ?",
        );
        sqlx::query(&sql)
            .bind(status.as_str().to_string())
            .bind(phase.map(str::to_string))
            .bind(error.map(str::to_string))
            .bind(retry_bump)
            .bind(processed_at)
            .bind(now)
            .bind(item_id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Next claimable rows: `unprocessed`, highest priority first, oldest
    /// first within a priority band.
    pub async fn next_for_processing(
        &self,
        limit: i64,
        phase: Option<&str>,
    ) -> Result<Vec<QueueRow>, StoreError> {
        let sql = match phase {
            Some(_) => self.db.sql(&format!(
                "SELECT {QUEUE_COLUMNS} FROM processing_queue \
                 WHERE status = ? AND phase = ? \
                 ORDER BY priority DESC, created_at ASC LIMIT ?"
            )),
            None => self.db.sql(&format!(
                "SELECT {QUEUE_COLUMNS} FROM processing_queue \
                 WHERE status = ? \
                 ORDER BY priority DESC, created_at ASC LIMIT ?"
            )),
        };
        let mut q = sqlx::query(&sql).bind(QueueStatus::Unprocessed.as_str().to_string());
        if let Some(p) = phase {
            q = q.bind(p.to_string());
        }
        let rows = q.bind(limit).fetch_all(self.db.pool()).await?;
        rows.iter().map(row_from_any).collect()
    }

    /// Atomic batch claim: `unprocessed` → `processing` for the given ids.
    /// Rows already claimed by another worker are skipped; returns how many
    /// this caller actually won.
    pub async fn mark_processing(&self, ids: &[String], phase: &str) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = self.db.sql(&format!(
            "UPDATE processing_queue SET status = ?, phase = ?, updated_at = ? \
             WHERE status = ? AND item_id IN ({})",
            placeholders(ids.len())
        ));
        let mut q = sqlx::query(&sql)
            .bind(QueueStatus::Processing.as_str().to_string())
            .bind(phase.to_string())
            .bind(to_ts(&Utc::now()))
            .bind(QueueStatus::Unprocessed.as_str().to_string());
        for id in ids {
            q = q.bind(id.clone());
        }
        let res = q.execute(self.db.pool()).await?;
        Ok(res.rows_affected())
    }

    /// Failed rows still under the retry ceiling.
    pub async fn get_failed(&self, max_retries: i64) -> Result<Vec<QueueRow>, StoreError> {
        let sql = self.db.sql(&format!(
            "SELECT {QUEUE_COLUMNS} FROM processing_queue \
             WHERE status = ? AND retry_count < ? ORDER BY created_at ASC"
        ));
        let rows = sqlx::query(&sql)
            .bind(QueueStatus::Failed.as_str().to_string())
            .bind(max_retries)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_from_any).collect()
    }

    /// Flip rows back to `unprocessed` and clear the recorded error.
    pub async fn reset_for_retry(&self, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = self.db.sql(&format!(
            "UPDATE processing_queue SET status = ?, last_error = NULL, updated_at = ? \
             WHERE item_id IN ({})",
            placeholders(ids.len())
        ));
        let mut q = sqlx::query(&sql)
            .bind(QueueStatus::Unprocessed.as_str().to_string())
            .bind(to_ts(&Utc::now()));
        for id in ids {
            q = q.bind(id.clone());
        }
        let res = q.execute(self.db.pool()).await?;
        Ok(res.rows_affected())
    }

    pub async fn delete(&self, item_id: &str) -> Result<bool, StoreError> {
        let sql = self
            .db
            .sql("DELETE FROM processing_queue WHERE item_id = ?");
        let res = sqlx::query(&sql)
            .bind(item_id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        let sql = self.db.sql(
            "SELECT \
               SUM(CASE WHEN status = 'unprocessed' THEN 1 ELSE 0 END) AS unprocessed, \
               SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END) AS processing, \
               SUM(CASE WHEN status = 'processed' THEN 1 ELSE 0 END) AS processed, \
               SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed \
             FROM processing_queue",
        );
        let row = sqlx::query(&sql).fetch_one(self.db.pool()).await?;
        let get = |col: &str| -> Result<i64, StoreError> {
            Ok(row.try_get::<Option<i64>, _>(col)?.unwrap_or(0))
        };
        Ok(QueueStats {
            unprocessed: get("unprocessed")?,
            processing: get("processing")?,
            processed: get("processed")?,
            failed: get("failed")?,
        })
    }

    /// Remove old rows in the given statuses, keeping anything newer than
    /// `older_than`.
    pub async fn cleanup_old(
        &self,
        statuses: &[QueueStatus],
        older_than: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let sql = self.db.sql(&format!(
            "DELETE FROM processing_queue WHERE updated_at < ? AND status IN ({})",
            placeholders(statuses.len())
        ));
        let mut q = sqlx::query(&sql).bind(to_ts(&older_than));
        for s in statuses {
            q = q.bind(s.as_str().to_string());
        }
        let res = q.execute(self.db.pool()).await?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use chrono::Duration;

    async fn store() -> QueueStore {
        QueueStore::new(Db::memory().await.unwrap())
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = store().await;
        let row = QueueRow::new("i1");
        store.create(&row).await.unwrap();
        store.create(&row).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claim_ordering_and_atomicity() {
        let store = store().await;
        let mut low = QueueRow::new("low");
        low.priority = 0;
        let mut high = QueueRow::new("high");
        high.priority = 5;
        store.create(&low).await.unwrap();
        store.create(&high).await.unwrap();

        let next = store.next_for_processing(10, None).await.unwrap();
        assert_eq!(next[0].item_id, "high");
        assert_eq!(next[1].item_id, "low");

        let ids: Vec<String> = next.iter().map(|r| r.item_id.clone()).collect();
        let claimed = store.mark_processing(&ids, "cp_cache").await.unwrap();
        assert_eq!(claimed, 2);

        // A second claim on the same ids wins nothing.
        let reclaimed = store.mark_processing(&ids, "cp_cache").await.unwrap();
        assert_eq!(reclaimed, 0);

        let row = store.get("high").await.unwrap().unwrap();
        assert_eq!(row.status, QueueStatus::Processing);
        assert_eq!(row.phase.as_deref(), Some("cp_cache"));
    }

    #[tokio::test]
    async fn update_status_stamps_processed_at_and_retry() {
        let store = store().await;
        store.create(&QueueRow::new("i1")).await.unwrap();

        store
            .update_status("i1", QueueStatus::Failed, Some("cp_llm"), Some("timeout"), true)
            .await
            .unwrap();
        let row = store.get("i1").await.unwrap().unwrap();
        assert_eq!(row.status, QueueStatus::Failed);
        assert_eq!(row.retry_count, 1);
        assert_eq!(row.last_error.as_deref(), Some("timeout"));
        assert!(row.processed_at.is_none());

        store
            .update_status("i1", QueueStatus::Processed, None, None, false)
            .await
            .unwrap();
        let row = store.get("i1").await.unwrap().unwrap();
        assert_eq!(row.status, QueueStatus::Processed);
        assert!(row.processed_at.is_some());
        // Phase and error survive a COALESCE update.
        assert_eq!(row.phase.as_deref(), Some("cp_llm"));
        assert_eq!(row.retry_count, 1);
    }

    #[tokio::test]
    async fn failed_rows_and_retry_reset() {
        let store = store().await;
        store.create(&QueueRow::new("i1")).await.unwrap();
        store.create(&QueueRow::new("i2")).await.unwrap();

        store
            .update_status("i1", QueueStatus::Failed, None, Some("x"), true)
            .await
            .unwrap();
        store
            .update_status("i2", QueueStatus::Failed, None, Some("y"), true)
            .await
            .unwrap();
        store
            .update_status("i2", QueueStatus::Failed, None, None, true)
            .await
            .unwrap();

        let retryable = store.get_failed(2).await.unwrap();
        assert_eq!(retryable.len(), 1);
        assert_eq!(retryable[0].item_id, "i1");

        let n = store.reset_for_retry(&["i1".to_string()]).await.unwrap();
        assert_eq!(n, 1);
        let row = store.get("i1").await.unwrap().unwrap();
        assert_eq!(row.status, QueueStatus::Unprocessed);
        assert!(row.last_error.is_none());
    }

    #[tokio::test]
    async fn stats_and_cleanup() {
        let store = store().await;
        store.create(&QueueRow::new("a")).await.unwrap();
        store.create(&QueueRow::new("b")).await.unwrap();
        store
            .update_status("b", QueueStatus::Processed, None, None, false)
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.unprocessed, 1);
        assert_eq!(stats.processed, 1);

        let removed = store
            .cleanup_old(&[QueueStatus::Processed], Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("b").await.unwrap().is_none());
        assert!(store.get("a").await.unwrap().is_some());
    }
}
