use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `(main, sub)` entry in the category registry.
///
/// `item_count` is maintained by the idempotent `insert-if-missing` /
/// `update_item_count` pair and recomputed by the validator's
/// cross-reference check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRow {
    pub main_category: String,
    pub sub_category: String,
    pub display_name: String,
    pub sort_order: i64,
    pub is_active: bool,
    pub item_count: i64,
    pub description: String,
    pub last_updated: DateTime<Utc>,
}

impl CategoryRow {
    pub fn new(main: impl Into<String>, sub: impl Into<String>) -> Self {
        let main = main.into();
        let sub = sub.into();
        Self {
            display_name: format!("{} / {}", main, sub),
            main_category: main,
            sub_category: sub,
            sort_order: 0,
            is_active: true,
            item_count: 0,
            description: String::new(),
            last_updated: Utc::now(),
        }
    }

    /// The registry key, `main/sub`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.main_category, self.sub_category)
    }
}

/// Normalize a model-suggested category or item name to the on-disk form:
/// lowercase, spaces and punctuation collapsed to single underscores.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = true;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(normalize_name("Machine Learning"), "machine_learning");
        assert_eq!(normalize_name("  C++ / Systems!  "), "c_systems");
        assert_eq!(normalize_name("already_fine"), "already_fine");
        assert_eq!(normalize_name("Trailing..."), "trailing");
    }

    #[test]
    fn category_key() {
        let row = CategoryRow::new("software", "testing");
        assert_eq!(row.key(), "software/testing");
        assert_eq!(row.display_name, "software / testing");
        assert!(row.is_active);
    }
}
