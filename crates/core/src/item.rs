use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ItemErrorKind;

/// One segment of a bookmarked thread: its text plus the media and expanded
/// URLs that belong to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadSegment {
    pub text: String,
    #[serde(default)]
    pub media_refs: Vec<String>,
    #[serde(default)]
    pub expanded_urls: Vec<String>,
}

/// Classification recorded on an item after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    Permanent,
    Validation,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
            FailureClass::Validation => "validation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(FailureClass::Transient),
            "permanent" => Some(FailureClass::Permanent),
            "validation" => Some(FailureClass::Validation),
            _ => None,
        }
    }
}

/// The unified per-item record: one bookmarked post (or thread) and every
/// piece of state the pipeline accumulates about it.
///
/// Processing flags form a logical progression: `cache_complete` before
/// `media_processed` before `categories_processed` before `kb_item_created`
/// before `processing_complete`. The validator repairs records that violate
/// that ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    // Identity
    pub item_id: String,
    /// The originally-bookmarked id when this item is part of a thread.
    pub source_item_id: String,
    pub source: String,

    // Structure
    pub is_thread: bool,
    pub thread_segments: Vec<ThreadSegment>,
    /// Content-addressed local paths for every media file of the thread.
    pub media_refs: Vec<String>,
    /// Flattened text across all segments, used for search.
    pub full_text: String,
    /// Opaque payload exactly as the fetcher returned it.
    pub raw_payload: serde_json::Value,

    // Processing flags
    pub urls_expanded: bool,
    pub cache_complete: bool,
    pub media_processed: bool,
    pub categories_processed: bool,
    pub kb_item_created: bool,
    pub kb_item_written: bool,
    pub processing_complete: bool,
    pub db_synced: bool,

    // Reprocessing controls
    pub force_reprocess_pipeline: bool,
    pub force_recache: bool,
    pub reprocess_requested_at: Option<DateTime<Utc>>,
    pub reprocess_requested_by: Option<String>,

    // Categorization
    pub main_category: Option<String>,
    pub sub_category: Option<String>,
    pub item_name_suggestion: Option<String>,
    /// Last raw categorization response, kept for debugging.
    pub categories_raw: serde_json::Value,
    pub recategorization_attempts: i64,

    // KB artifact
    pub kb_title: String,
    pub kb_display_title: String,
    pub kb_description: String,
    pub kb_content: String,
    /// Path of the generated README relative to the knowledge-base root.
    pub kb_file_path: String,
    pub kb_media_paths: Vec<String>,
    pub source_url: String,

    // Vision
    /// One description per non-video image, in media order.
    pub image_descriptions: Vec<String>,

    // Errors and retries
    /// Last error message per stage (`fetch`, `media`, `llm`, `kb`).
    pub errors: BTreeMap<String, String>,
    pub retry_count: i64,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub next_retry_after: Option<DateTime<Utc>>,
    pub failure_class: Option<FailureClass>,

    // Per-run ephemeral flags, reset at the start of each run.
    pub cache_succeeded_this_run: bool,
    pub media_succeeded_this_run: bool,
    pub llm_succeeded_this_run: bool,
    pub kb_succeeded_this_run: bool,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cached_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub kb_generated_at: Option<DateTime<Utc>>,
}

impl Item {
    /// A fresh record for a newly observed bookmark. Every flag starts false.
    pub fn new(item_id: impl Into<String>) -> Self {
        let item_id = item_id.into();
        let now = Utc::now();
        Self {
            source_item_id: item_id.clone(),
            item_id,
            source: "twitter".to_string(),
            is_thread: false,
            thread_segments: Vec::new(),
            media_refs: Vec::new(),
            full_text: String::new(),
            raw_payload: serde_json::Value::Null,
            urls_expanded: false,
            cache_complete: false,
            media_processed: false,
            categories_processed: false,
            kb_item_created: false,
            kb_item_written: false,
            processing_complete: false,
            db_synced: false,
            force_reprocess_pipeline: false,
            force_recache: false,
            reprocess_requested_at: None,
            reprocess_requested_by: None,
            main_category: None,
            sub_category: None,
            item_name_suggestion: None,
            categories_raw: serde_json::Value::Null,
            recategorization_attempts: 0,
            kb_title: String::new(),
            kb_display_title: String::new(),
            kb_description: String::new(),
            kb_content: String::new(),
            kb_file_path: String::new(),
            kb_media_paths: Vec::new(),
            source_url: String::new(),
            image_descriptions: Vec::new(),
            errors: BTreeMap::new(),
            retry_count: 0,
            last_retry_at: None,
            next_retry_after: None,
            failure_class: None,
            cache_succeeded_this_run: false,
            media_succeeded_this_run: false,
            llm_succeeded_this_run: false,
            kb_succeeded_this_run: false,
            created_at: now,
            updated_at: now,
            cached_at: None,
            processed_at: None,
            kb_generated_at: None,
        }
    }

    /// Record the last error for a processing stage.
    pub fn set_error(&mut self, kind: ItemErrorKind, message: impl Into<String>) {
        self.errors.insert(kind.as_str().to_string(), message.into());
    }

    /// True when every phase flag through `kb_item_created` is set.
    pub fn is_fully_processed(&self) -> bool {
        self.cache_complete
            && self.media_processed
            && self.categories_processed
            && self.kb_item_created
    }

    /// Reset flags for a forced re-run. `cached_at` survives unless
    /// `force_recache` also asked for the cache to be rebuilt.
    pub fn reset_for_reprocessing(&mut self) {
        if self.force_recache {
            self.cache_complete = false;
            self.cached_at = None;
        }
        self.urls_expanded = false;
        self.media_processed = false;
        self.categories_processed = false;
        self.kb_item_created = false;
        self.kb_item_written = false;
        self.processing_complete = false;
        self.db_synced = false;
        self.failure_class = None;
        self.retry_count = 0;
        self.next_retry_after = None;
        self.errors.clear();
    }

    /// Clear the per-run success markers at the start of a run.
    pub fn reset_run_flags(&mut self) {
        self.cache_succeeded_this_run = false;
        self.media_succeeded_this_run = false;
        self.llm_succeeded_this_run = false;
        self.kb_succeeded_this_run = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_starts_unprocessed() {
        let item = Item::new("i1");
        assert_eq!(item.item_id, "i1");
        assert_eq!(item.source_item_id, "i1");
        assert_eq!(item.source, "twitter");
        assert!(!item.cache_complete);
        assert!(!item.is_fully_processed());
        assert!(item.updated_at >= item.created_at);
    }

    #[test]
    fn reset_for_reprocessing_keeps_cache_unless_forced() {
        let mut item = Item::new("i1");
        item.cache_complete = true;
        item.cached_at = Some(Utc::now());
        item.media_processed = true;
        item.categories_processed = true;
        item.kb_item_created = true;
        item.processing_complete = true;
        item.retry_count = 3;
        item.failure_class = Some(FailureClass::Transient);

        item.reset_for_reprocessing();
        assert!(item.cache_complete, "cache survives a plain reprocess");
        assert!(item.cached_at.is_some());
        assert!(!item.media_processed);
        assert!(!item.processing_complete);
        assert_eq!(item.retry_count, 0);
        assert!(item.failure_class.is_none());

        item.force_recache = true;
        item.reset_for_reprocessing();
        assert!(!item.cache_complete);
        assert!(item.cached_at.is_none());
    }

    #[test]
    fn set_error_keyed_by_stage() {
        let mut item = Item::new("i1");
        item.set_error(ItemErrorKind::Llm, "timeout");
        item.set_error(ItemErrorKind::Llm, "refused");
        assert_eq!(item.errors.get("llm").map(String::as_str), Some("refused"));
        assert_eq!(item.errors.len(), 1);
    }

    #[test]
    fn failure_class_roundtrip() {
        for fc in [
            FailureClass::Transient,
            FailureClass::Permanent,
            FailureClass::Validation,
        ] {
            assert_eq!(FailureClass::parse(fc.as_str()), Some(fc));
        }
        assert_eq!(FailureClass::parse("bogus"), None);
    }
}
