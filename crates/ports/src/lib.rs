//! Capability ports: narrow interfaces to everything that touches the
//! outside world (bookmark source, media downloads, vision and language
//! models, rendering, publishing), plus the reference adapters.

pub mod error;
pub mod file;
pub mod git;
pub mod media;
pub mod ollama;
pub mod traits;

pub use error::PortError;
pub use file::JsonExportFetcher;
pub use git::GitPublisher;
pub use media::FsMediaStore;
pub use ollama::OllamaClient;
pub use traits::{
    BookmarkFetcher, Categorization, ExternalRef, FetchedItem, LanguageModel, MediaStore,
    Publisher, Renderer, SynthesisSource, VisionModel,
};
