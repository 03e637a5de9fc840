//! Schema bootstrap. `CREATE TABLE IF NOT EXISTS` keeps startup idempotent;
//! types are restricted to TEXT / INTEGER / BIGINT / DOUBLE PRECISION so the
//! same DDL runs on both driver profiles. Booleans are stored as INTEGER
//! (0/1) rather than BOOLEAN because sqlx's Any driver cannot map SQLite's
//! declared BOOLEAN column type. Timestamps are RFC3339 TEXT and JSON
//! collections are serialized TEXT. Typed fields live in the structs; the
//! blob form stays at the storage boundary.

use crate::db::Db;
use crate::error::StoreError;

const CREATE_ITEMS: &str = "CREATE TABLE IF NOT EXISTS items (
    item_id TEXT PRIMARY KEY,
    source_item_id TEXT NOT NULL,
    source TEXT NOT NULL,
    is_thread BOOLEAN NOT NULL,
    thread_segments TEXT NOT NULL,
    media_refs TEXT NOT NULL,
    full_text TEXT NOT NULL,
    raw_payload TEXT NOT NULL,
    urls_expanded BOOLEAN NOT NULL,
    cache_complete BOOLEAN NOT NULL,
    media_processed BOOLEAN NOT NULL,
    categories_processed BOOLEAN NOT NULL,
    kb_item_created BOOLEAN NOT NULL,
    kb_item_written BOOLEAN NOT NULL,
    processing_complete BOOLEAN NOT NULL,
    db_synced BOOLEAN NOT NULL,
    force_reprocess_pipeline BOOLEAN NOT NULL,
    force_recache BOOLEAN NOT NULL,
    reprocess_requested_at TEXT,
    reprocess_requested_by TEXT,
    main_category TEXT,
    sub_category TEXT,
    item_name_suggestion TEXT,
    categories_raw TEXT NOT NULL,
    recategorization_attempts BIGINT NOT NULL,
    kb_title TEXT NOT NULL,
    kb_display_title TEXT NOT NULL,
    kb_description TEXT NOT NULL,
    kb_content TEXT NOT NULL,
    kb_file_path TEXT NOT NULL,
    kb_media_paths TEXT NOT NULL,
    source_url TEXT NOT NULL,
    image_descriptions TEXT NOT NULL,
    errors TEXT NOT NULL,
    retry_count BIGINT NOT NULL,
    last_retry_at TEXT,
    next_retry_after TEXT,
    failure_class TEXT,
    cache_succeeded_this_run BOOLEAN NOT NULL,
    media_succeeded_this_run BOOLEAN NOT NULL,
    llm_succeeded_this_run BOOLEAN NOT NULL,
    kb_succeeded_this_run BOOLEAN NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    cached_at TEXT,
    processed_at TEXT,
    kb_generated_at TEXT
)";

const CREATE_QUEUE: &str = "CREATE TABLE IF NOT EXISTS processing_queue (
    item_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    phase TEXT,
    priority BIGINT NOT NULL,
    retry_count BIGINT NOT NULL,
    last_error TEXT,
    processed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

const CREATE_CATEGORIES: &str = "CREATE TABLE IF NOT EXISTS categories (
    main_category TEXT NOT NULL,
    sub_category TEXT NOT NULL,
    display_name TEXT NOT NULL,
    sort_order BIGINT NOT NULL,
    is_active BOOLEAN NOT NULL,
    item_count BIGINT NOT NULL,
    description TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    PRIMARY KEY (main_category, sub_category)
)";

const CREATE_PHASE_STATISTICS: &str = "CREATE TABLE IF NOT EXISTS phase_statistics (
    run_id TEXT NOT NULL,
    phase TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    metric_value DOUBLE PRECISION NOT NULL,
    unit TEXT NOT NULL,
    total_items BIGINT NOT NULL,
    total_duration_seconds DOUBLE PRECISION NOT NULL,
    avg_time_per_item_seconds DOUBLE PRECISION NOT NULL,
    recorded_at TEXT NOT NULL
)";

const CREATE_RUN_TOTALS: &str = "CREATE TABLE IF NOT EXISTS run_totals (
    run_id TEXT PRIMARY KEY,
    processed BIGINT NOT NULL,
    success BIGINT NOT NULL,
    error BIGINT NOT NULL,
    skipped BIGINT NOT NULL,
    media_processed BIGINT NOT NULL,
    cache_hits BIGINT NOT NULL,
    cache_misses BIGINT NOT NULL,
    network_errors BIGINT NOT NULL,
    retry_count BIGINT NOT NULL,
    start_time TEXT,
    end_time TEXT,
    duration_seconds DOUBLE PRECISION NOT NULL,
    success_rate DOUBLE PRECISION NOT NULL,
    error_rate DOUBLE PRECISION NOT NULL,
    cache_hit_rate DOUBLE PRECISION NOT NULL,
    avg_retries DOUBLE PRECISION NOT NULL
)";

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_queue_status ON processing_queue (status, priority)",
    "CREATE INDEX IF NOT EXISTS idx_items_category ON items (main_category, sub_category)",
    "CREATE INDEX IF NOT EXISTS idx_items_complete ON items (processing_complete)",
    "CREATE INDEX IF NOT EXISTS idx_phase_stats_run ON phase_statistics (run_id, phase)",
];

/// Create all tables and indexes. Safe to call on every startup.
pub async fn migrate(db: &Db) -> Result<(), StoreError> {
    for ddl in [
        CREATE_ITEMS,
        CREATE_QUEUE,
        CREATE_CATEGORIES,
        CREATE_PHASE_STATISTICS,
        CREATE_RUN_TOTALS,
    ] {
        sqlx::query(ddl).execute(db.pool()).await?;
    }
    for ddl in INDEXES {
        sqlx::query(ddl).execute(db.pool()).await?;
    }
    Ok(())
}
