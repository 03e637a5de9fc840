//! The nine integrity checks.
//!
//! Each sweep loads one snapshot of items, queue rows and categories; every
//! check evaluates against that snapshot and (with `auto_fix`) writes its
//! repairs back through the stores. Repairs are idempotent: a second sweep
//! over repaired data applies zero additional fixes.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Instant;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use magpie_core::category::CategoryRow;
use magpie_core::item::Item;
use magpie_core::queue::{QueueRow, QueueStatus};
use magpie_store::{CategoryStore, ItemPatch, ItemStore, QueueStore, StoreError};

use crate::report::{CheckResult, ValidationSummary};

/// Retry schedules older than this are stale and cleared.
const STALE_RETRY_DAYS: i64 = 7;

pub struct Validator {
    items: ItemStore,
    queue: QueueStore,
    categories: CategoryStore,
    kb_root: PathBuf,
}

struct Snapshot {
    items: Vec<Item>,
    queue: HashMap<String, QueueRow>,
    categories: Vec<CategoryRow>,
}

impl Validator {
    pub fn new(
        items: ItemStore,
        queue: QueueStore,
        categories: CategoryStore,
        kb_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            items,
            queue,
            categories,
            kb_root: kb_root.into(),
        }
    }

    /// Run all nine checks. With `auto_fix`, repairs are applied as issues
    /// are found.
    pub async fn run_all(&self, auto_fix: bool) -> Result<ValidationSummary, StoreError> {
        let sweep_start = Instant::now();
        let snapshot = self.load_snapshot().await?;

        let mut results = Vec::with_capacity(9);
        results.push(self.check_database_integrity(&snapshot, auto_fix).await?);
        results.push(self.check_processing_flags(&snapshot, auto_fix).await?);
        results.push(self.check_queue_consistency(&snapshot, auto_fix).await?);
        results.push(self.check_category_integrity(&snapshot, auto_fix).await?);
        results.push(self.check_filesystem(&snapshot, auto_fix).await?);
        results.push(self.check_content_completeness(&snapshot, auto_fix).await?);
        results.push(self.check_retry_metadata(&snapshot, auto_fix).await?);
        results.push(self.check_temporal(&snapshot, auto_fix).await?);
        results.push(self.check_cross_references(&snapshot, auto_fix).await?);

        let summary =
            ValidationSummary::from_results(results, sweep_start.elapsed().as_secs_f64());
        if summary.total_issues > 0 {
            warn!(
                issues = summary.total_issues,
                fixes = summary.total_fixes,
                "validation found problems"
            );
        } else {
            info!("validation clean");
        }
        Ok(summary)
    }

    async fn load_snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(Snapshot {
            items: self.items.get_all().await?,
            queue: self
                .queue
                .get_all()
                .await?
                .into_iter()
                .map(|row| (row.item_id.clone(), row))
                .collect(),
            categories: self.categories.get_all().await?,
        })
    }

    // ── 1. Database integrity ────────────────────────────────────────

    async fn check_database_integrity(
        &self,
        snapshot: &Snapshot,
        auto_fix: bool,
    ) -> Result<CheckResult, StoreError> {
        let start = Instant::now();
        let mut result = CheckResult::new("database_integrity");

        let known: std::collections::HashSet<&str> =
            snapshot.items.iter().map(|i| i.item_id.as_str()).collect();

        for item in &snapshot.items {
            if item.item_id.trim().is_empty() {
                result.issue("item with empty item_id");
            }
            if item.source_item_id.trim().is_empty() {
                result.issue(format!("item {}: missing source_item_id", item.item_id));
                if auto_fix {
                    // The item's own id is the default origin.
                    let mut fixed = item.clone();
                    fixed.source_item_id = item.item_id.clone();
                    self.items.save(&fixed).await?;
                    result.fixed();
                }
            }
            if item.source.trim().is_empty() {
                result.issue(format!("item {}: missing source", item.item_id));
                if auto_fix {
                    let mut fixed = item.clone();
                    fixed.source = "twitter".to_string();
                    self.items.save(&fixed).await?;
                    result.fixed();
                }
            }
        }

        for item_id in snapshot.queue.keys() {
            if !known.contains(item_id.as_str()) {
                result.issue(format!("queue row references unknown item {item_id}"));
                if auto_fix {
                    self.queue.delete(item_id).await?;
                    result.fixed();
                }
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        result.metadata = json!({"items_checked": snapshot.items.len()});
        Ok(result)
    }

    // ── 2. Processing flag consistency (I1..I5) ──────────────────────

    async fn check_processing_flags(
        &self,
        snapshot: &Snapshot,
        auto_fix: bool,
    ) -> Result<CheckResult, StoreError> {
        let start = Instant::now();
        let mut result = CheckResult::new("processing_flags");

        for item in &snapshot.items {
            let id = &item.item_id;
            let mut patch = ItemPatch::default();
            let mut dirty = false;

            // I3: media implies cache.
            if item.media_processed && !item.cache_complete {
                result.issue(format!("item {id}: media_processed without cache_complete"));
                patch.cache_complete = Some(true);
                dirty = true;
            }
            // I2 (flag part): categories imply cache.
            if item.categories_processed && !item.cache_complete {
                result.issue(format!(
                    "item {id}: categories_processed without cache_complete"
                ));
                patch.cache_complete = Some(true);
                dirty = true;
            }
            // I2 (data part): categories imply category data. No safe repair;
            // the content-completeness check backfills the name.
            if item.categories_processed
                && (item.main_category.is_none() || item.sub_category.is_none())
            {
                result.issue(format!(
                    "item {id}: categories_processed without category data"
                ));
            }

            // I1: a KB item needs every earlier stage. When the prerequisites
            // are missing the KB flag is demoted; raising categorization
            // flags here would fabricate category data.
            if item.kb_item_created
                && !(item.cache_complete && item.media_processed && item.categories_processed)
            {
                result.issue(format!("item {id}: kb_item_created without prerequisites"));
                patch.kb_item_created = Some(false);
                patch.kb_item_written = Some(false);
                dirty = true;
            }
            // I4 (path part).
            if item.kb_item_created && item.kb_file_path.is_empty() {
                result.issue(format!("item {id}: kb_item_created without kb_file_path"));
                patch.kb_item_created = Some(false);
                patch.kb_item_written = Some(false);
                dirty = true;
            }

            // I5: processing_complete mirrors the full flag set.
            let all_flags = item.urls_expanded
                && item.cache_complete
                && item.media_processed
                && item.categories_processed
                && item.kb_item_created
                && item.kb_item_written
                && item.db_synced;
            if item.processing_complete != all_flags {
                // Demotions above may already have broken the chain; only
                // flag the discrepancy present in the snapshot.
                result.issue(format!("item {id}: processing_complete out of sync"));
                patch.processing_complete = Some(all_flags && patch.kb_item_created != Some(false));
                dirty = true;
            }

            if dirty && auto_fix {
                self.items.update(id, patch).await?;
                result.fixed();
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        result.metadata = json!({"items_checked": snapshot.items.len()});
        Ok(result)
    }

    // ── 3. Queue consistency (Q1, Q2) ────────────────────────────────

    async fn check_queue_consistency(
        &self,
        snapshot: &Snapshot,
        auto_fix: bool,
    ) -> Result<CheckResult, StoreError> {
        let start = Instant::now();
        let mut result = CheckResult::new("queue_consistency");

        for item in &snapshot.items {
            let id = &item.item_id;
            match snapshot.queue.get(id) {
                None => {
                    result.issue(format!("item {id}: no queue row"));
                    if auto_fix {
                        let mut row = QueueRow::new(id);
                        if item.processing_complete {
                            row.status = QueueStatus::Processed;
                            row.processed_at = Some(Utc::now());
                        }
                        self.queue.create(&row).await?;
                        result.fixed();
                    }
                }
                Some(row) => {
                    if item.processing_complete && row.status != QueueStatus::Processed {
                        result.issue(format!(
                            "item {id}: complete but queue status is {}",
                            row.status
                        ));
                        if auto_fix {
                            self.queue
                                .update_status(id, QueueStatus::Processed, None, None, false)
                                .await?;
                            result.fixed();
                        }
                    } else if !item.processing_complete && row.status == QueueStatus::Processed {
                        result.issue(format!("item {id}: incomplete but queue says processed"));
                        if auto_fix {
                            self.queue
                                .update_status(id, QueueStatus::Unprocessed, None, None, false)
                                .await?;
                            result.fixed();
                        }
                    }
                }
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        result.metadata = json!({
            "items_checked": snapshot.items.len(),
            "queue_rows_checked": snapshot.queue.len(),
        });
        Ok(result)
    }

    // ── 4. Category integrity ────────────────────────────────────────

    async fn check_category_integrity(
        &self,
        snapshot: &Snapshot,
        auto_fix: bool,
    ) -> Result<CheckResult, StoreError> {
        let start = Instant::now();
        let mut result = CheckResult::new("category_integrity");

        let registry: std::collections::HashSet<String> = snapshot
            .categories
            .iter()
            .map(|c| format!("{}/{}", c.main_category, c.sub_category))
            .collect();

        // Usage counts so auto-created rows start exact (keeps the
        // cross-reference check quiet on the next sweep).
        let mut usage: HashMap<String, i64> = HashMap::new();
        for item in &snapshot.items {
            if let (Some(main), Some(sub)) = (&item.main_category, &item.sub_category) {
                *usage.entry(format!("{main}/{sub}")).or_default() += 1;
            }
        }

        let mut created = std::collections::HashSet::new();
        for item in &snapshot.items {
            let (Some(main), Some(sub)) = (&item.main_category, &item.sub_category) else {
                continue;
            };
            let key = format!("{main}/{sub}");
            if registry.contains(&key) || created.contains(&key) {
                continue;
            }
            result.issue(format!("item {}: unregistered category {key}", item.item_id));
            if auto_fix {
                let mut row = CategoryRow::new(main.clone(), sub.clone());
                row.description = format!("Auto-created for {key}");
                row.item_count = usage.get(&key).copied().unwrap_or(0);
                self.categories.insert_if_missing(&row).await?;
                created.insert(key);
                result.fixed();
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        result.metadata = json!({"categories_checked": snapshot.categories.len()});
        Ok(result)
    }

    // ── 5. Filesystem consistency (I4) ───────────────────────────────

    async fn check_filesystem(
        &self,
        snapshot: &Snapshot,
        auto_fix: bool,
    ) -> Result<CheckResult, StoreError> {
        let start = Instant::now();
        let mut result = CheckResult::new("filesystem_consistency");
        let mut kb_items = 0usize;

        for item in &snapshot.items {
            if !item.kb_item_created || item.kb_file_path.is_empty() {
                continue;
            }
            kb_items += 1;
            let path = self.kb_root.join(&item.kb_file_path);
            match tokio::fs::read_to_string(&path).await {
                Err(_) => {
                    result.issue(format!(
                        "item {}: KB file missing at {}",
                        item.item_id, item.kb_file_path
                    ));
                    if auto_fix {
                        self.items
                            .update(
                                &item.item_id,
                                ItemPatch {
                                    kb_item_created: Some(false),
                                    kb_item_written: Some(false),
                                    processing_complete: Some(false),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        result.fixed();
                    }
                }
                Ok(content) => {
                    let head: String = content.chars().take(500).collect();
                    if !head.contains(&item.item_id) {
                        result.issue(format!(
                            "item {}: KB file does not reference the item id",
                            item.item_id
                        ));
                    }
                }
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        result.metadata = json!({"kb_items_checked": kb_items});
        Ok(result)
    }

    // ── 6. Content completeness ──────────────────────────────────────

    async fn check_content_completeness(
        &self,
        snapshot: &Snapshot,
        auto_fix: bool,
    ) -> Result<CheckResult, StoreError> {
        let start = Instant::now();
        let mut result = CheckResult::new("content_completeness");

        for item in &snapshot.items {
            if item.cache_complete && item.full_text.is_empty() && item.thread_segments.is_empty()
            {
                result.issue(format!(
                    "item {}: cache_complete without any content",
                    item.item_id
                ));
                if auto_fix {
                    self.items
                        .update(
                            &item.item_id,
                            ItemPatch {
                                cache_complete: Some(false),
                                processing_complete: Some(false),
                                ..Default::default()
                            },
                        )
                        .await?;
                    result.fixed();
                }
            }

            if item.categories_processed
                && item.main_category.is_some()
                && item.item_name_suggestion.is_none()
            {
                result.issue(format!(
                    "item {}: categorized without item_name_suggestion",
                    item.item_id
                ));
                if auto_fix {
                    let fallback = format!(
                        "{} - {}",
                        item.main_category.as_deref().unwrap_or_default(),
                        item.item_id
                    );
                    self.items
                        .update(
                            &item.item_id,
                            ItemPatch {
                                item_name_suggestion: Some(Some(fallback)),
                                ..Default::default()
                            },
                        )
                        .await?;
                    result.fixed();
                }
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        result.metadata = json!({"items_checked": snapshot.items.len()});
        Ok(result)
    }

    // ── 7. Retry metadata ────────────────────────────────────────────

    async fn check_retry_metadata(
        &self,
        snapshot: &Snapshot,
        auto_fix: bool,
    ) -> Result<CheckResult, StoreError> {
        let start = Instant::now();
        let mut result = CheckResult::new("retry_metadata");
        let stale_cutoff = Utc::now() - Duration::days(STALE_RETRY_DAYS);

        for item in &snapshot.items {
            if item.retry_count > 0 && item.failure_class.is_none() && !item.processing_complete {
                result.issue(format!(
                    "item {}: retry_count set without failure_class",
                    item.item_id
                ));
            }

            if let Some(next_retry) = item.next_retry_after {
                if next_retry < stale_cutoff {
                    result.issue(format!(
                        "item {}: retry scheduled over a week ago",
                        item.item_id
                    ));
                    if auto_fix {
                        self.items
                            .update(
                                &item.item_id,
                                ItemPatch {
                                    retry_count: Some(0),
                                    next_retry_after: Some(None),
                                    failure_class: Some(None),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        result.fixed();
                    }
                }
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        result.metadata = json!({"items_checked": snapshot.items.len()});
        Ok(result)
    }

    // ── 8. Temporal consistency (I6) ─────────────────────────────────

    async fn check_temporal(
        &self,
        snapshot: &Snapshot,
        auto_fix: bool,
    ) -> Result<CheckResult, StoreError> {
        let start = Instant::now();
        let mut result = CheckResult::new("temporal_consistency");

        for item in &snapshot.items {
            if item.updated_at < item.created_at {
                result.issue(format!(
                    "item {}: updated_at precedes created_at",
                    item.item_id
                ));
                if auto_fix {
                    // Any write re-stamps updated_at to now, which restores
                    // the invariant.
                    self.items
                        .update(&item.item_id, ItemPatch::default())
                        .await?;
                    result.fixed();
                }
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        result.metadata = json!({"items_checked": snapshot.items.len()});
        Ok(result)
    }

    // ── 9. Cross references (I7) ─────────────────────────────────────

    async fn check_cross_references(
        &self,
        snapshot: &Snapshot,
        auto_fix: bool,
    ) -> Result<CheckResult, StoreError> {
        let start = Instant::now();
        let mut result = CheckResult::new("cross_references");

        let mut usage: BTreeMap<(String, String), i64> = BTreeMap::new();
        for item in &snapshot.items {
            if let (Some(main), Some(sub)) = (&item.main_category, &item.sub_category) {
                *usage.entry((main.clone(), sub.clone())).or_default() += 1;
            }
        }

        for category in &snapshot.categories {
            let key = (
                category.main_category.clone(),
                category.sub_category.clone(),
            );
            let actual = usage.get(&key).copied().unwrap_or(0);
            if category.item_count != actual {
                result.issue(format!(
                    "category {}/{}: recorded {} items, actual {}",
                    category.main_category, category.sub_category, category.item_count, actual
                ));
                if auto_fix {
                    self.categories
                        .update_item_count(&category.main_category, &category.sub_category, actual)
                        .await?;
                    result.fixed();
                }
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        result.metadata = json!({"category_pairs_in_use": usage.len()});
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::item::FailureClass;
    use magpie_store::db::Db;

    struct Fixture {
        validator: Validator,
        items: ItemStore,
        queue: QueueStore,
        categories: CategoryStore,
        _kb: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let db = Db::memory().await.unwrap();
        let kb = tempfile::tempdir().unwrap();
        let items = ItemStore::new(db.clone());
        let queue = QueueStore::new(db.clone());
        let categories = CategoryStore::new(db.clone());
        let validator = Validator::new(
            items.clone(),
            queue.clone(),
            categories.clone(),
            kb.path(),
        );
        Fixture {
            validator,
            items,
            queue,
            categories,
            _kb: kb,
        }
    }

    #[tokio::test]
    async fn clean_store_passes_all_checks() {
        let f = fixture().await;
        let summary = f.validator.run_all(true).await.unwrap();
        assert_eq!(summary.total_checks, 9);
        assert_eq!(summary.passed_checks, 9);
        assert_eq!(summary.total_issues, 0);
        assert_eq!(summary.health_report().score, 100.0);
    }

    #[tokio::test]
    async fn s3_kb_flag_without_file_is_demoted() {
        let f = fixture().await;
        let mut item = Item::new("i1");
        item.kb_item_created = true;
        item.kb_file_path = "software/testing/gone/README.md".to_string();
        f.items.create(&item).await.unwrap();
        f.queue.create(&QueueRow::new("i1")).await.unwrap();

        let summary = f.validator.run_all(true).await.unwrap();
        // One flags violation (kb without prerequisites) and one missing
        // file, each repaired by demoting the KB flag.
        assert_eq!(summary.total_issues, 2, "{:#?}", summary.results);
        assert_eq!(summary.total_fixes, 2);

        let repaired = f.items.get("i1").await.unwrap().unwrap();
        assert!(!repaired.kb_item_created);
        assert!(!repaired.categories_processed, "no flag is fabricated");

        // P7: the second sweep is clean.
        let second = f.validator.run_all(true).await.unwrap();
        assert_eq!(second.total_issues, 0);
        assert_eq!(second.total_fixes, 0);
    }

    #[tokio::test]
    async fn flag_progression_repairs_raise_cache_flag() {
        let f = fixture().await;
        let mut item = Item::new("i1");
        item.media_processed = true;
        item.full_text = "content".to_string();
        f.items.create(&item).await.unwrap();
        f.queue.create(&QueueRow::new("i1")).await.unwrap();

        f.validator.run_all(true).await.unwrap();
        let repaired = f.items.get("i1").await.unwrap().unwrap();
        assert!(repaired.cache_complete, "antecedent raised");
        assert!(repaired.media_processed);
    }

    #[tokio::test]
    async fn queue_drift_is_reconciled_both_ways() {
        let f = fixture().await;

        // Complete item without a queue row.
        let mut done = Item::new("done");
        done.urls_expanded = true;
        done.cache_complete = true;
        done.media_processed = true;
        done.categories_processed = true;
        done.main_category = Some("a".to_string());
        done.sub_category = Some("b".to_string());
        done.item_name_suggestion = Some("x".to_string());
        done.kb_item_created = false;
        done.processing_complete = false;
        done.full_text = "text".to_string();
        f.items.create(&done).await.unwrap();

        // Queue says processed for an incomplete item.
        f.queue.create(&QueueRow::new("done")).await.unwrap();
        f.queue
            .update_status("done", QueueStatus::Processed, None, None, false)
            .await
            .unwrap();

        let summary = f.validator.run_all(true).await.unwrap();
        assert!(summary.total_fixes >= 1);
        let row = f.queue.get("done").await.unwrap().unwrap();
        assert_eq!(row.status, QueueStatus::Unprocessed);
    }

    #[tokio::test]
    async fn missing_categories_are_auto_created_and_counted() {
        let f = fixture().await;
        let mut item = Item::new("i1");
        item.main_category = Some("software".to_string());
        item.sub_category = Some("testing".to_string());
        f.items.create(&item).await.unwrap();
        f.queue.create(&QueueRow::new("i1")).await.unwrap();

        let summary = f.validator.run_all(true).await.unwrap();
        assert!(summary.total_fixes >= 1);

        let row = f
            .categories
            .get("software", "testing")
            .await
            .unwrap()
            .unwrap();
        assert!(row.description.starts_with("Auto-created"));
        // The cross-reference check corrected the count in the same sweep or
        // will on the next one; either way two sweeps converge.
        f.validator.run_all(true).await.unwrap();
        let row = f
            .categories
            .get("software", "testing")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.item_count, 1);

        let third = f.validator.run_all(true).await.unwrap();
        assert_eq!(third.total_fixes, 0, "repairs converged");
    }

    #[tokio::test]
    async fn contentless_cache_flag_is_cleared_and_name_backfilled() {
        let f = fixture().await;
        let mut item = Item::new("i1");
        item.cache_complete = true;
        f.items.create(&item).await.unwrap();

        let mut categorized = Item::new("i2");
        categorized.cache_complete = true;
        categorized.full_text = "text".to_string();
        categorized.categories_processed = true;
        categorized.main_category = Some("software".to_string());
        categorized.sub_category = Some("testing".to_string());
        f.items.create(&categorized).await.unwrap();
        f.queue.create(&QueueRow::new("i1")).await.unwrap();
        f.queue.create(&QueueRow::new("i2")).await.unwrap();

        f.validator.run_all(true).await.unwrap();

        let i1 = f.items.get("i1").await.unwrap().unwrap();
        assert!(!i1.cache_complete);

        let i2 = f.items.get("i2").await.unwrap().unwrap();
        assert_eq!(i2.item_name_suggestion.as_deref(), Some("software - i2"));
    }

    #[tokio::test]
    async fn stale_retry_schedules_are_cleared() {
        let f = fixture().await;
        let mut item = Item::new("i1");
        item.retry_count = 4;
        item.failure_class = Some(FailureClass::Transient);
        item.next_retry_after = Some(Utc::now() - Duration::days(10));
        f.items.create(&item).await.unwrap();
        f.queue.create(&QueueRow::new("i1")).await.unwrap();

        f.validator.run_all(true).await.unwrap();
        let repaired = f.items.get("i1").await.unwrap().unwrap();
        assert_eq!(repaired.retry_count, 0);
        assert!(repaired.next_retry_after.is_none());
        assert!(repaired.failure_class.is_none());
    }

    #[tokio::test]
    async fn stale_counts_are_recomputed() {
        let f = fixture().await;
        let mut row = CategoryRow::new("software", "testing");
        row.item_count = 99;
        f.categories.insert_if_missing(&row).await.unwrap();

        let mut item = Item::new("i1");
        item.main_category = Some("software".to_string());
        item.sub_category = Some("testing".to_string());
        f.items.create(&item).await.unwrap();
        f.queue.create(&QueueRow::new("i1")).await.unwrap();

        f.validator.run_all(true).await.unwrap();
        let row = f
            .categories
            .get("software", "testing")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.item_count, 1);
    }

    #[tokio::test]
    async fn repairs_are_idempotent_across_mixed_damage() {
        let f = fixture().await;

        // A pile of different inconsistencies at once.
        let mut a = Item::new("a");
        a.media_processed = true;
        a.full_text = "t".to_string();
        f.items.create(&a).await.unwrap();

        let mut b = Item::new("b");
        b.kb_item_created = true;
        b.kb_file_path = "x/y/z/README.md".to_string();
        f.items.create(&b).await.unwrap();

        let mut c = Item::new("c");
        c.main_category = Some("m".to_string());
        c.sub_category = Some("s".to_string());
        f.items.create(&c).await.unwrap();

        f.queue.create(&QueueRow::new("ghost")).await.unwrap();

        let first = f.validator.run_all(true).await.unwrap();
        assert!(first.total_fixes > 0);
        let second = f.validator.run_all(true).await.unwrap();
        assert_eq!(second.total_fixes, 0, "{:#?}", second.results);
    }
}
