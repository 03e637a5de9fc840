//! Knowledge-base artifact generation: on-disk layout and the minijinja
//! renderer behind the renderer port.

pub mod layout;
pub mod render;

pub use layout::{item_dir, item_readme_path, media_sibling_name};
pub use render::KbRenderer;
