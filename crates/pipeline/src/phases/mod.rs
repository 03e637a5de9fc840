//! The seven main phases, in sweep order.

pub mod content;
pub mod embedding;
pub mod fetch;
pub mod git_sync;
pub mod readme;
pub mod synthesis;
pub mod user_input;

/// Canonical main-phase identifiers (phase toggles and event payloads).
pub mod names {
    pub const USER_INPUT_PARSING: &str = "user_input_parsing";
    pub const FETCH_BOOKMARKS: &str = "fetch_bookmarks";
    pub const CONTENT_PROCESSING: &str = "content_processing";
    pub const SYNTHESIS_GENERATION: &str = "synthesis_generation";
    pub const EMBEDDING_GENERATION: &str = "embedding_generation";
    pub const README_GENERATION: &str = "readme_generation";
    pub const GIT_SYNC: &str = "git_sync";
}
