//! Port traits. Each backend implements one of these; the orchestrator only
//! ever sees the trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use magpie_core::item::{Item, ThreadSegment};

use crate::error::PortError;

/// A bookmark reference as the source reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRef {
    pub item_id: String,
    pub source_url: String,
}

/// The raw material for one item, straight from the source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchedItem {
    pub is_thread: bool,
    pub thread_segments: Vec<ThreadSegment>,
    /// Remote media URLs, in thread order; the media store localizes them.
    pub media_urls: Vec<String>,
    /// The source's payload, kept opaque.
    pub raw_payload: serde_json::Value,
}

/// Categorization decision returned by the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categorization {
    pub main_category: String,
    pub sub_category: String,
    pub item_name: String,
    pub description: String,
}

/// One item summarized for a synthesis document.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisSource {
    pub item_id: String,
    pub title: String,
    pub description: String,
    pub content: String,
}

/// The bookmark source.
#[async_trait]
pub trait BookmarkFetcher: Send + Sync {
    /// Identifiers bookmarked since the last sweep.
    async fn list_new_items(&self) -> Result<Vec<ExternalRef>, PortError>;

    /// Full payload for one bookmark.
    async fn fetch_item(&self, external: &ExternalRef) -> Result<FetchedItem, PortError>;
}

/// Content-addressed local media storage.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Download a remote file; returns the local path. Idempotent: the same
    /// URL always maps to the same path, and existing files are not
    /// re-downloaded.
    async fn download(&self, url: &str) -> Result<PathBuf, PortError>;
}

/// Image interpretation.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe_image(&self, path: &Path) -> Result<String, PortError>;
}

/// Text model operations used by the pipeline.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Categorize one item. Returns the decision plus the raw model
    /// response for the audit column.
    async fn categorize(
        &self,
        full_text: &str,
        image_descriptions: &[String],
    ) -> Result<(Categorization, serde_json::Value), PortError>;

    /// Produce a synthesis document for a category in markdown.
    async fn synthesize(
        &self,
        main_category: &str,
        sub_category: &str,
        items: &[SynthesisSource],
    ) -> Result<String, PortError>;

    /// Embedding vector for a text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PortError>;
}

/// Markdown/HTML generation for KB artifacts.
pub trait Renderer: Send + Sync {
    fn render_item(&self, item: &Item) -> Result<String, PortError>;

    fn render_synthesis(
        &self,
        main_category: &str,
        sub_category: &str,
        body: &str,
        item_count: usize,
    ) -> Result<String, PortError>;

    /// The root README: navigation plus counts.
    fn render_index(&self, items: &[Item]) -> Result<String, PortError>;

    /// Static `index.html` for the docs tree.
    fn render_html_index(&self, items: &[Item]) -> Result<String, PortError>;
}

/// Pushes generated artifacts to the external target.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Commit and push the given paths. Idempotent: publishing an unchanged
    /// tree is a no-op.
    async fn publish(&self, paths: &[PathBuf], message: &str) -> Result<(), PortError>;
}
