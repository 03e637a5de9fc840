//! The unified item store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;
use tracing::debug;

use magpie_core::item::{FailureClass, Item, ThreadSegment};

use crate::db::{placeholders, Db};
use crate::error::StoreError;
use crate::row::{json_col, json_str, to_ts, to_ts_opt, ts, ts_opt};

const ITEM_COLUMNS: &str = "item_id, source_item_id, source, is_thread, thread_segments, \
    media_refs, full_text, raw_payload, urls_expanded, cache_complete, media_processed, \
    categories_processed, kb_item_created, kb_item_written, processing_complete, db_synced, \
    force_reprocess_pipeline, force_recache, reprocess_requested_at, reprocess_requested_by, \
    main_category, sub_category, item_name_suggestion, categories_raw, \
    recategorization_attempts, kb_title, kb_display_title, kb_description, kb_content, \
    kb_file_path, kb_media_paths, source_url, image_descriptions, errors, retry_count, \
    last_retry_at, next_retry_after, failure_class, cache_succeeded_this_run, \
    media_succeeded_this_run, llm_succeeded_this_run, kb_succeeded_this_run, created_at, \
    updated_at, cached_at, processed_at, kb_generated_at";

const ITEM_PLACEHOLDERS: &str = "?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?";

/// One of the eight boolean processing flags, addressable for bulk updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingFlag {
    UrlsExpanded,
    CacheComplete,
    MediaProcessed,
    CategoriesProcessed,
    KbItemCreated,
    KbItemWritten,
    ProcessingComplete,
    DbSynced,
}

impl ProcessingFlag {
    pub fn column(self) -> &'static str {
        match self {
            ProcessingFlag::UrlsExpanded => "urls_expanded",
            ProcessingFlag::CacheComplete => "cache_complete",
            ProcessingFlag::MediaProcessed => "media_processed",
            ProcessingFlag::CategoriesProcessed => "categories_processed",
            ProcessingFlag::KbItemCreated => "kb_item_created",
            ProcessingFlag::KbItemWritten => "kb_item_written",
            ProcessingFlag::ProcessingComplete => "processing_complete",
            ProcessingFlag::DbSynced => "db_synced",
        }
    }
}

/// A single flag change for `bulk_update_flags`.
#[derive(Debug, Clone)]
pub struct FlagUpdate {
    pub item_id: String,
    pub flag: ProcessingFlag,
    pub value: bool,
}

/// Which reprocessing control `bulk_set_reprocess` flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprocessKind {
    Pipeline,
    Recache,
}

impl ReprocessKind {
    fn column(self) -> &'static str {
        match self {
            ReprocessKind::Pipeline => "force_reprocess_pipeline",
            ReprocessKind::Recache => "force_recache",
        }
    }
}

/// Composable listing filter (spec'd grammar: text, category, source,
/// completeness, reprocess flags, date range, sort + pagination).
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub search_text: Option<String>,
    pub main_category: Option<String>,
    pub sub_category: Option<String>,
    pub source: Option<String>,
    pub processing_complete: Option<bool>,
    pub needs_reprocessing: Option<bool>,
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub sort: ItemSort,
    pub sort_desc: bool,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemSort {
    CreatedAt,
    UpdatedAt,
    ProcessedAt,
    ItemId,
}

impl Default for ItemSort {
    fn default() -> Self {
        ItemSort::CreatedAt
    }
}

impl ItemSort {
    fn column(self) -> &'static str {
        match self {
            ItemSort::CreatedAt => "created_at",
            ItemSort::UpdatedAt => "updated_at",
            ItemSort::ProcessedAt => "processed_at",
            ItemSort::ItemId => "item_id",
        }
    }
}

/// Partial update applied by `ItemStore::update`. `None` leaves the field
/// untouched; nullable columns take `Some(None)` to clear.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub is_thread: Option<bool>,
    pub thread_segments: Option<Vec<ThreadSegment>>,
    pub media_refs: Option<Vec<String>>,
    pub full_text: Option<String>,
    pub raw_payload: Option<serde_json::Value>,

    pub urls_expanded: Option<bool>,
    pub cache_complete: Option<bool>,
    pub media_processed: Option<bool>,
    pub categories_processed: Option<bool>,
    pub kb_item_created: Option<bool>,
    pub kb_item_written: Option<bool>,
    pub processing_complete: Option<bool>,
    pub db_synced: Option<bool>,

    pub force_reprocess_pipeline: Option<bool>,
    pub force_recache: Option<bool>,
    pub reprocess_requested_at: Option<Option<DateTime<Utc>>>,
    pub reprocess_requested_by: Option<Option<String>>,

    pub main_category: Option<Option<String>>,
    pub sub_category: Option<Option<String>>,
    pub item_name_suggestion: Option<Option<String>>,
    pub categories_raw: Option<serde_json::Value>,
    pub recategorization_attempts: Option<i64>,

    pub kb_title: Option<String>,
    pub kb_display_title: Option<String>,
    pub kb_description: Option<String>,
    pub kb_content: Option<String>,
    pub kb_file_path: Option<String>,
    pub kb_media_paths: Option<Vec<String>>,
    pub source_url: Option<String>,

    pub image_descriptions: Option<Vec<String>>,

    pub errors: Option<BTreeMap<String, String>>,
    pub retry_count: Option<i64>,
    pub last_retry_at: Option<Option<DateTime<Utc>>>,
    pub next_retry_after: Option<Option<DateTime<Utc>>>,
    pub failure_class: Option<Option<FailureClass>>,

    pub cache_succeeded_this_run: Option<bool>,
    pub media_succeeded_this_run: Option<bool>,
    pub llm_succeeded_this_run: Option<bool>,
    pub kb_succeeded_this_run: Option<bool>,

    pub cached_at: Option<Option<DateTime<Utc>>>,
    pub processed_at: Option<Option<DateTime<Utc>>>,
    pub kb_generated_at: Option<Option<DateTime<Utc>>>,
}

macro_rules! apply_field {
    ($item:expr, $patch:expr, $($field:ident),+ $(,)?) => {
        $(if let Some(v) = $patch.$field { $item.$field = v; })+
    };
}

impl ItemPatch {
    /// Merge this patch into an item.
    pub fn apply(self, item: &mut Item) {
        apply_field!(
            item, self,
            is_thread, thread_segments, media_refs, full_text, raw_payload,
            urls_expanded, cache_complete, media_processed, categories_processed,
            kb_item_created, kb_item_written, processing_complete, db_synced,
            force_reprocess_pipeline, force_recache, reprocess_requested_at,
            reprocess_requested_by, main_category, sub_category, item_name_suggestion,
            categories_raw, recategorization_attempts, kb_title, kb_display_title,
            kb_description, kb_content, kb_file_path, kb_media_paths, source_url,
            image_descriptions, errors, retry_count, last_retry_at, next_retry_after,
            failure_class, cache_succeeded_this_run, media_succeeded_this_run,
            llm_succeeded_this_run, kb_succeeded_this_run, cached_at, processed_at,
            kb_generated_at,
        );
    }
}

/// Aggregate counters for the operator dashboard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemStats {
    pub total: i64,
    pub cache_complete: i64,
    pub media_processed: i64,
    pub categories_processed: i64,
    pub kb_created: i64,
    pub fully_processed: i64,
    pub pending_reprocess: i64,
    pub with_failures: i64,
}

/// Durable store for the unified item record.
#[derive(Debug, Clone)]
pub struct ItemStore {
    db: Db,
}

fn item_from_row(row: &AnyRow) -> Result<Item, StoreError> {
    let failure_class: Option<String> = row.try_get("failure_class")?;
    Ok(Item {
        item_id: row.try_get("item_id")?,
        source_item_id: row.try_get("source_item_id")?,
        source: row.try_get("source")?,
        is_thread: row.try_get("is_thread")?,
        thread_segments: json_col(row, "thread_segments")?,
        media_refs: json_col(row, "media_refs")?,
        full_text: row.try_get("full_text")?,
        raw_payload: json_col(row, "raw_payload")?,
        urls_expanded: row.try_get("urls_expanded")?,
        cache_complete: row.try_get("cache_complete")?,
        media_processed: row.try_get("media_processed")?,
        categories_processed: row.try_get("categories_processed")?,
        kb_item_created: row.try_get("kb_item_created")?,
        kb_item_written: row.try_get("kb_item_written")?,
        processing_complete: row.try_get("processing_complete")?,
        db_synced: row.try_get("db_synced")?,
        force_reprocess_pipeline: row.try_get("force_reprocess_pipeline")?,
        force_recache: row.try_get("force_recache")?,
        reprocess_requested_at: ts_opt(row, "reprocess_requested_at")?,
        reprocess_requested_by: row.try_get("reprocess_requested_by")?,
        main_category: row.try_get("main_category")?,
        sub_category: row.try_get("sub_category")?,
        item_name_suggestion: row.try_get("item_name_suggestion")?,
        categories_raw: json_col(row, "categories_raw")?,
        recategorization_attempts: row.try_get("recategorization_attempts")?,
        kb_title: row.try_get("kb_title")?,
        kb_display_title: row.try_get("kb_display_title")?,
        kb_description: row.try_get("kb_description")?,
        kb_content: row.try_get("kb_content")?,
        kb_file_path: row.try_get("kb_file_path")?,
        kb_media_paths: json_col(row, "kb_media_paths")?,
        source_url: row.try_get("source_url")?,
        image_descriptions: json_col(row, "image_descriptions")?,
        errors: json_col(row, "errors")?,
        retry_count: row.try_get("retry_count")?,
        last_retry_at: ts_opt(row, "last_retry_at")?,
        next_retry_after: ts_opt(row, "next_retry_after")?,
        failure_class: failure_class.as_deref().and_then(FailureClass::parse),
        cache_succeeded_this_run: row.try_get("cache_succeeded_this_run")?,
        media_succeeded_this_run: row.try_get("media_succeeded_this_run")?,
        llm_succeeded_this_run: row.try_get("llm_succeeded_this_run")?,
        kb_succeeded_this_run: row.try_get("kb_succeeded_this_run")?,
        created_at: ts(row, "created_at")?,
        updated_at: ts(row, "updated_at")?,
        cached_at: ts_opt(row, "cached_at")?,
        processed_at: ts_opt(row, "processed_at")?,
        kb_generated_at: ts_opt(row, "kb_generated_at")?,
    })
}

type AnyQuery<'q> = sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>;

fn bind_item<'q>(q: AnyQuery<'q>, item: &Item) -> Result<AnyQuery<'q>, StoreError> {
    Ok(q.bind(item.item_id.clone())
        .bind(item.source_item_id.clone())
        .bind(item.source.clone())
        .bind(item.is_thread)
        .bind(json_str(&item.thread_segments)?)
        .bind(json_str(&item.media_refs)?)
        .bind(item.full_text.clone())
        .bind(json_str(&item.raw_payload)?)
        .bind(item.urls_expanded)
        .bind(item.cache_complete)
        .bind(item.media_processed)
        .bind(item.categories_processed)
        .bind(item.kb_item_created)
        .bind(item.kb_item_written)
        .bind(item.processing_complete)
        .bind(item.db_synced)
        .bind(item.force_reprocess_pipeline)
        .bind(item.force_recache)
        .bind(to_ts_opt(&item.reprocess_requested_at))
        .bind(item.reprocess_requested_by.clone())
        .bind(item.main_category.clone())
        .bind(item.sub_category.clone())
        .bind(item.item_name_suggestion.clone())
        .bind(json_str(&item.categories_raw)?)
        .bind(item.recategorization_attempts)
        .bind(item.kb_title.clone())
        .bind(item.kb_display_title.clone())
        .bind(item.kb_description.clone())
        .bind(item.kb_content.clone())
        .bind(item.kb_file_path.clone())
        .bind(json_str(&item.kb_media_paths)?)
        .bind(item.source_url.clone())
        .bind(json_str(&item.image_descriptions)?)
        .bind(json_str(&item.errors)?)
        .bind(item.retry_count)
        .bind(to_ts_opt(&item.last_retry_at))
        .bind(to_ts_opt(&item.next_retry_after))
        .bind(item.failure_class.map(|f| f.as_str().to_string()))
        .bind(item.cache_succeeded_this_run)
        .bind(item.media_succeeded_this_run)
        .bind(item.llm_succeeded_this_run)
        .bind(item.kb_succeeded_this_run)
        .bind(to_ts(&item.created_at))
        .bind(to_ts(&item.updated_at))
        .bind(to_ts_opt(&item.cached_at))
        .bind(to_ts_opt(&item.processed_at))
        .bind(to_ts_opt(&item.kb_generated_at)))
}

impl ItemStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert a new record. Fails if the item already exists.
    pub async fn create(&self, item: &Item) -> Result<(), StoreError> {
        let sql = self.db.sql(&format!(
            "INSERT INTO items ({ITEM_COLUMNS}) VALUES ({ITEM_PLACEHOLDERS})"
        ));
        bind_item(sqlx::query(&sql), item)?
            .execute(self.db.pool())
            .await?;
        debug!(item_id = %item.item_id, "item created");
        Ok(())
    }

    /// Write the full record, inserting or replacing. `updated_at` is stamped
    /// here, not by callers.
    pub async fn save(&self, item: &Item) -> Result<(), StoreError> {
        let mut stamped = item.clone();
        stamped.updated_at = Utc::now();

        // Every column except the primary key and created_at is replaced.
        let set_clause = ITEM_COLUMNS
            .split(", ")
            .map(str::trim)
            .filter(|c| *c != "item_id" && *c != "created_at")
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = self.db.sql(&format!(
            "INSERT INTO items ({ITEM_COLUMNS}) VALUES ({ITEM_PLACEHOLDERS}) \
             ON CONFLICT (item_id) DO UPDATE SET {set_clause}"
        ));
        bind_item(sqlx::query(&sql), &stamped)?
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn get(&self, item_id: &str) -> Result<Option<Item>, StoreError> {
        let sql = self
            .db
            .sql(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE item_id = ?"));
        let row = sqlx::query(&sql)
            .bind(item_id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Item>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = self.db.sql(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE item_id IN ({})",
            placeholders(ids.len())
        ));
        let mut q = sqlx::query(&sql);
        for id in ids {
            q = q.bind(id.clone());
        }
        let rows = q.fetch_all(self.db.pool()).await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Every record, in insertion order. Used by the validator sweeps.
    pub async fn get_all(&self) -> Result<Vec<Item>, StoreError> {
        let sql = self
            .db
            .sql(&format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY created_at ASC"));
        let rows = sqlx::query(&sql).fetch_all(self.db.pool()).await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Filtered, sorted, paginated listing. Returns `(page, total_count)`.
    pub async fn list(&self, filter: &ItemFilter) -> Result<(Vec<Item>, i64), StoreError> {
        enum Param {
            Text(String),
            Flag(bool),
        }

        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Param> = Vec::new();

        if let Some(term) = &filter.search_text {
            conditions.push(
                "(full_text LIKE ? OR kb_title LIKE ? OR item_name_suggestion LIKE ?)".into(),
            );
            let like = format!("%{}%", term);
            params.push(Param::Text(like.clone()));
            params.push(Param::Text(like.clone()));
            params.push(Param::Text(like));
        }
        if let Some(main) = &filter.main_category {
            conditions.push("main_category = ?".into());
            params.push(Param::Text(main.clone()));
        }
        if let Some(sub) = &filter.sub_category {
            conditions.push("sub_category = ?".into());
            params.push(Param::Text(sub.clone()));
        }
        if let Some(source) = &filter.source {
            conditions.push("source = ?".into());
            params.push(Param::Text(source.clone()));
        }
        if let Some(complete) = filter.processing_complete {
            conditions.push("processing_complete = ?".into());
            params.push(Param::Flag(complete));
        }
        if let Some(needs) = filter.needs_reprocessing {
            if needs {
                conditions.push("(force_reprocess_pipeline = ? OR force_recache = ?)".into());
                params.push(Param::Flag(true));
                params.push(Param::Flag(true));
            } else {
                conditions.push("(force_reprocess_pipeline = ? AND force_recache = ?)".into());
                params.push(Param::Flag(false));
                params.push(Param::Flag(false));
            }
        }
        if let Some(start) = &filter.date_start {
            conditions.push("created_at >= ?".into());
            params.push(Param::Text(to_ts(start)));
        }
        if let Some(end) = &filter.date_end {
            conditions.push("created_at <= ?".into());
            params.push(Param::Text(to_ts(end)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count_sql = self
            .db
            .sql(&format!("SELECT COUNT(*) AS n FROM items{where_clause}"));
        let mut count_q = sqlx::query(&count_sql);
        for p in &params {
            count_q = match p {
                Param::Text(s) => count_q.bind(s.clone()),
                Param::Flag(b) => count_q.bind(*b),
            };
        }
        let total: i64 = count_q.fetch_one(self.db.pool()).await?.try_get("n")?;

        let direction = if filter.sort_desc { "DESC" } else { "ASC" };
        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        let page_sql = self.db.sql(&format!(
            "SELECT {ITEM_COLUMNS} FROM items{where_clause} ORDER BY {} {} LIMIT ? OFFSET ?",
            filter.sort.column(),
            direction
        ));
        let mut page_q = sqlx::query(&page_sql);
        for p in &params {
            page_q = match p {
                Param::Text(s) => page_q.bind(s.clone()),
                Param::Flag(b) => page_q.bind(*b),
            };
        }
        page_q = page_q.bind(limit).bind(filter.offset.max(0));
        let rows = page_q.fetch_all(self.db.pool()).await?;
        let items = rows.iter().map(item_from_row).collect::<Result<_, _>>()?;
        Ok((items, total))
    }

    /// Read-modify-write under a transaction; returns the updated record.
    pub async fn update(&self, item_id: &str, patch: ItemPatch) -> Result<Item, StoreError> {
        let mut tx = self.db.pool().begin().await?;

        let sql = self
            .db
            .sql(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE item_id = ?"));
        let row = sqlx::query(&sql)
            .bind(item_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("item {item_id}")))?;
        let mut item = item_from_row(&row)?;

        patch.apply(&mut item);
        item.updated_at = Utc::now();

        let set_clause = ITEM_COLUMNS
            .split(", ")
            .map(str::trim)
            .filter(|c| *c != "item_id" && *c != "created_at")
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let upsert = self.db.sql(&format!(
            "INSERT INTO items ({ITEM_COLUMNS}) VALUES ({ITEM_PLACEHOLDERS}) \
             ON CONFLICT (item_id) DO UPDATE SET {set_clause}"
        ));
        bind_item(sqlx::query(&upsert), &item)?
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(item)
    }

    /// Flip individual flags for many items in one transaction.
    pub async fn bulk_update_flags(&self, updates: &[FlagUpdate]) -> Result<u64, StoreError> {
        let mut tx = self.db.pool().begin().await?;
        let now = to_ts(&Utc::now());
        let mut changed = 0u64;
        for u in updates {
            let sql = self.db.sql(&format!(
                "UPDATE items SET {} = ?, updated_at = ? WHERE item_id = ?",
                u.flag.column()
            ));
            let res = sqlx::query(&sql)
                .bind(u.value)
                .bind(now.clone())
                .bind(u.item_id.clone())
                .execute(&mut *tx)
                .await?;
            changed += res.rows_affected();
        }
        tx.commit().await?;
        Ok(changed)
    }

    /// Stamp reprocess requests on a set of items.
    pub async fn bulk_set_reprocess(
        &self,
        ids: &[String],
        kind: ReprocessKind,
        requested_by: &str,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = to_ts(&Utc::now());
        let sql = self.db.sql(&format!(
            "UPDATE items SET {} = ?, reprocess_requested_at = ?, reprocess_requested_by = ?, \
             updated_at = ? WHERE item_id IN ({})",
            kind.column(),
            placeholders(ids.len())
        ));
        let mut q = sqlx::query(&sql)
            .bind(true)
            .bind(now.clone())
            .bind(requested_by.to_string())
            .bind(now);
        for id in ids {
            q = q.bind(id.clone());
        }
        let res = q.execute(self.db.pool()).await?;
        Ok(res.rows_affected())
    }

    /// Items whose reprocess flags are raised.
    pub async fn needing_reprocessing(&self) -> Result<Vec<Item>, StoreError> {
        let sql = self.db.sql(&format!(
            "SELECT {ITEM_COLUMNS} FROM items \
             WHERE force_reprocess_pipeline = ? OR force_recache = ? ORDER BY created_at ASC"
        ));
        let rows = sqlx::query(&sql)
            .bind(true)
            .bind(true)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Substring search over the flattened text and titles.
    pub async fn full_text_search(
        &self,
        term: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Item>, StoreError> {
        let filter = ItemFilter {
            search_text: Some(term.to_string()),
            limit,
            offset,
            ..Default::default()
        };
        Ok(self.list(&filter).await?.0)
    }

    /// Clear the per-run success markers on every item (start of a run).
    pub async fn clear_run_flags(&self) -> Result<(), StoreError> {
        let sql = self.db.sql(
            "UPDATE items SET cache_succeeded_this_run = ?, media_succeeded_this_run = ?, \
             llm_succeeded_this_run = ?, kb_succeeded_this_run = ?",
        );
        sqlx::query(&sql)
            .bind(false)
            .bind(false)
            .bind(false)
            .bind(false)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<ItemStats, StoreError> {
        let sql = self.db.sql(
            "SELECT \
               COUNT(*) AS total, \
               SUM(CASE WHEN cache_complete THEN 1 ELSE 0 END) AS cache_complete, \
               SUM(CASE WHEN media_processed THEN 1 ELSE 0 END) AS media_processed, \
               SUM(CASE WHEN categories_processed THEN 1 ELSE 0 END) AS categories_processed, \
               SUM(CASE WHEN kb_item_created THEN 1 ELSE 0 END) AS kb_created, \
               SUM(CASE WHEN processing_complete THEN 1 ELSE 0 END) AS fully_processed, \
               SUM(CASE WHEN force_reprocess_pipeline OR force_recache THEN 1 ELSE 0 END) AS pending_reprocess, \
               SUM(CASE WHEN failure_class IS NOT NULL THEN 1 ELSE 0 END) AS with_failures \
             FROM items",
        );
        let row = sqlx::query(&sql).fetch_one(self.db.pool()).await?;
        let get = |col: &str| -> Result<i64, StoreError> {
            Ok(row.try_get::<Option<i64>, _>(col)?.unwrap_or(0))
        };
        Ok(ItemStats {
            total: get("total")?,
            cache_complete: get("cache_complete")?,
            media_processed: get("media_processed")?,
            categories_processed: get("categories_processed")?,
            kb_created: get("kb_created")?,
            fully_processed: get("fully_processed")?,
            pending_reprocess: get("pending_reprocess")?,
            with_failures: get("with_failures")?,
        })
    }

    /// Operator-invoked cleanup. `processing_complete` filters which records
    /// qualify; items newer than `older_than` are always kept.
    pub async fn cleanup_old(
        &self,
        processing_complete: Option<bool>,
        older_than: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let (sql, bind_complete) = match processing_complete {
            Some(_) => (
                self.db.sql(
                    "DELETE FROM items WHERE updated_at < ? AND processing_complete = ?",
                ),
                true,
            ),
            None => (
                self.db.sql("DELETE FROM items WHERE updated_at < ?"),
                false,
            ),
        };
        let mut q = sqlx::query(&sql).bind(to_ts(&older_than));
        if bind_complete {
            q = q.bind(processing_complete.unwrap_or(false));
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
    use magpie_core::error::ItemErrorKind;

    async fn store() -> ItemStore {
        ItemStore::new(Db::memory().await.unwrap())
    }

    fn sample(id: &str) -> Item {
        let mut item = Item::new(id);
        item.full_text = format!("hello from {id}");
        item.thread_segments = vec![ThreadSegment {
            text: item.full_text.clone(),
            media_refs: vec![],
            expanded_urls: vec![],
        }];
        item
    }

    #[tokio::test]
    async fn create_get_roundtrip() {
        let store = store().await;
        let mut item = sample("i1");
        item.set_error(ItemErrorKind::Fetch, "boom");
        item.failure_class = Some(FailureClass::Transient);
        item.raw_payload = serde_json::json!({"id": "i1"});
        store.create(&item).await.unwrap();

        let got = store.get("i1").await.unwrap().unwrap();
        assert_eq!(got.item_id, "i1");
        assert_eq!(got.full_text, "hello from i1");
        assert_eq!(got.thread_segments.len(), 1);
        assert_eq!(got.errors.get("fetch").map(String::as_str), Some("boom"));
        assert_eq!(got.failure_class, Some(FailureClass::Transient));
        assert_eq!(got.raw_payload["id"], "i1");

        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_upserts_and_stamps_updated_at() {
        let store = store().await;
        let item = sample("i1");
        store.save(&item).await.unwrap();

        let mut changed = store.get("i1").await.unwrap().unwrap();
        let first_updated = changed.updated_at;
        changed.cache_complete = true;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.save(&changed).await.unwrap();

        let got = store.get("i1").await.unwrap().unwrap();
        assert!(got.cache_complete);
        assert!(got.updated_at > first_updated);
    }

    #[tokio::test]
    async fn update_applies_patch_transactionally() {
        let store = store().await;
        store.create(&sample("i1")).await.unwrap();

        let patch = ItemPatch {
            cache_complete: Some(true),
            main_category: Some(Some("software".to_string())),
            sub_category: Some(Some("testing".to_string())),
            item_name_suggestion: Some(Some("hello".to_string())),
            ..Default::default()
        };
        let updated = store.update("i1", patch).await.unwrap();
        assert!(updated.cache_complete);
        assert_eq!(updated.main_category.as_deref(), Some("software"));

        let err = store.update("nope", ItemPatch::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let store = store().await;
        for i in 0..5 {
            let mut item = sample(&format!("i{i}"));
            item.main_category = Some(if i % 2 == 0 { "even" } else { "odd" }.to_string());
            item.processing_complete = i == 4;
            store.create(&item).await.unwrap();
        }

        let (evens, total) = store
            .list(&ItemFilter {
                main_category: Some("even".to_string()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(evens.len(), 3);

        let (page, total) = store
            .list(&ItemFilter {
                limit: 2,
                offset: 2,
                sort: ItemSort::ItemId,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].item_id, "i2");

        let (complete, _) = store
            .list(&ItemFilter {
                processing_complete: Some(true),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].item_id, "i4");
    }

    #[tokio::test]
    async fn full_text_search_matches_substring() {
        let store = store().await;
        store.create(&sample("alpha")).await.unwrap();
        store.create(&sample("beta")).await.unwrap();

        let hits = store.full_text_search("from alpha", 10, 0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, "alpha");
    }

    #[tokio::test]
    async fn bulk_flag_updates() {
        let store = store().await;
        store.create(&sample("i1")).await.unwrap();
        store.create(&sample("i2")).await.unwrap();

        let n = store
            .bulk_update_flags(&[
                FlagUpdate {
                    item_id: "i1".to_string(),
                    flag: ProcessingFlag::CacheComplete,
                    value: true,
                },
                FlagUpdate {
                    item_id: "i2".to_string(),
                    flag: ProcessingFlag::MediaProcessed,
                    value: true,
                },
            ])
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert!(store.get("i1").await.unwrap().unwrap().cache_complete);
        assert!(store.get("i2").await.unwrap().unwrap().media_processed);
    }

    #[tokio::test]
    async fn reprocess_marking_and_lookup() {
        let store = store().await;
        store.create(&sample("i1")).await.unwrap();
        store.create(&sample("i2")).await.unwrap();

        let n = store
            .bulk_set_reprocess(&["i1".to_string()], ReprocessKind::Pipeline, "operator")
            .await
            .unwrap();
        assert_eq!(n, 1);

        let pending = store.needing_reprocessing().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].item_id, "i1");
        assert_eq!(pending[0].reprocess_requested_by.as_deref(), Some("operator"));
        assert!(pending[0].reprocess_requested_at.is_some());
    }

    #[tokio::test]
    async fn stats_counts() {
        let store = store().await;
        let mut a = sample("a");
        a.cache_complete = true;
        a.media_processed = true;
        let mut b = sample("b");
        b.failure_class = Some(FailureClass::Permanent);
        store.create(&a).await.unwrap();
        store.create(&b).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.cache_complete, 1);
        assert_eq!(stats.media_processed, 1);
        assert_eq!(stats.with_failures, 1);
    }

    #[tokio::test]
    async fn cleanup_old_respects_filter() {
        let store = store().await;
        let mut done = sample("done");
        done.processing_complete = true;
        store.create(&done).await.unwrap();
        store.create(&sample("fresh")).await.unwrap();

        let cutoff = Utc::now() + Duration::seconds(1);
        let removed = store.cleanup_old(Some(true), cutoff).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("done").await.unwrap().is_none());
        assert!(store.get("fresh").await.unwrap().is_some());
    }
}
