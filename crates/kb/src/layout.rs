//! On-disk layout of the knowledge base:
//! `<root>/<main>/<sub>/<item>/README.md` plus media siblings.

use std::path::{Path, PathBuf};

use magpie_core::category::normalize_name;

/// Directory of one item, relative to the KB root.
pub fn item_dir(main: &str, sub: &str, item_name: &str) -> PathBuf {
    PathBuf::from(normalize_name(main))
        .join(normalize_name(sub))
        .join(normalize_name(item_name))
}

/// README path of one item, relative to the KB root.
pub fn item_readme_path(main: &str, sub: &str, item_name: &str) -> PathBuf {
    item_dir(main, sub, item_name).join("README.md")
}

/// Stable name for the Nth media sibling, keeping the source extension.
pub fn media_sibling_name(index: usize, source: &Path) -> String {
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("media_{}.{}", index + 1, ext.to_ascii_lowercase()),
        None => format!("media_{}", index + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readme_path_is_normalized() {
        let path = item_readme_path("Machine Learning", "Computer Vision", "YOLO Tips");
        assert_eq!(
            path,
            PathBuf::from("machine_learning/computer_vision/yolo_tips/README.md")
        );
    }

    #[test]
    fn media_names_are_ordinal_and_keep_extension() {
        assert_eq!(
            media_sibling_name(0, Path::new("/cache/abc123.jpg")),
            "media_1.jpg"
        );
        assert_eq!(
            media_sibling_name(2, Path::new("/cache/def456.MP4")),
            "media_3.mp4"
        );
        assert_eq!(media_sibling_name(1, Path::new("/cache/noext")), "media_2");
    }
}
