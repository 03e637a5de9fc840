//! File-backed bookmark fetcher.
//!
//! Reads a JSON export of bookmarks from disk. Useful for development and
//! for sources that deliver dumps rather than an API: drop a file in, run a
//! sweep.
//!
//! Expected shape:
//! ```json
//! [
//!   {
//!     "item_id": "i1",
//!     "source_url": "https://...",
//!     "is_thread": false,
//!     "segments": [{"text": "...", "media_urls": ["https://..."], "expanded_urls": []}]
//!   }
//! ]
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use magpie_core::item::ThreadSegment;

use crate::error::PortError;
use crate::traits::{BookmarkFetcher, ExternalRef, FetchedItem};

#[derive(Debug, Clone, Deserialize)]
struct ExportSegment {
    text: String,
    #[serde(default)]
    media_urls: Vec<String>,
    #[serde(default)]
    expanded_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ExportEntry {
    item_id: String,
    #[serde(default)]
    source_url: String,
    #[serde(default)]
    is_thread: bool,
    #[serde(default)]
    segments: Vec<ExportSegment>,
}

pub struct JsonExportFetcher {
    path: PathBuf,
    entries: Mutex<Option<Vec<ExportEntry>>>,
}

impl JsonExportFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    async fn load(&self) -> Result<Vec<ExportEntry>, PortError> {
        let mut cached = self.entries.lock().await;
        if let Some(entries) = cached.as_ref() {
            return Ok(entries.clone());
        }
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let entries: Vec<ExportEntry> = serde_json::from_str(&raw)
            .map_err(|e| PortError::Parse(format!("bad bookmark export: {e}")))?;
        info!(path = %self.path.display(), count = entries.len(), "bookmark export loaded");
        *cached = Some(entries.clone());
        Ok(entries)
    }
}

#[async_trait]
impl BookmarkFetcher for JsonExportFetcher {
    async fn list_new_items(&self) -> Result<Vec<ExternalRef>, PortError> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .map(|entry| ExternalRef {
                item_id: entry.item_id,
                source_url: entry.source_url,
            })
            .collect())
    }

    async fn fetch_item(&self, external: &ExternalRef) -> Result<FetchedItem, PortError> {
        let entries = self.load().await?;
        let entry = entries
            .into_iter()
            .find(|e| e.item_id == external.item_id)
            .ok_or_else(|| {
                PortError::Parse(format!("item {} not in export", external.item_id))
            })?;

        let raw_payload = serde_json::json!({
            "item_id": entry.item_id,
            "source_url": entry.source_url,
            "segment_count": entry.segments.len(),
        });
        let media_urls = entry
            .segments
            .iter()
            .flat_map(|s| s.media_urls.iter().cloned())
            .collect();
        let thread_segments = entry
            .segments
            .into_iter()
            .map(|s| ThreadSegment {
                text: s.text,
                media_refs: s.media_urls,
                expanded_urls: s.expanded_urls,
            })
            .collect();

        Ok(FetchedItem {
            is_thread: entry.is_thread,
            thread_segments,
            media_urls,
            raw_payload,
        })
    }
}
