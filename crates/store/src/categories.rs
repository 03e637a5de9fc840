//! Category registry. Writes go through the idempotent
//! `insert_if_missing` / `update_item_count` pair only.

use sqlx::any::AnyRow;
use sqlx::Row;
use chrono::Utc;

use magpie_core::category::CategoryRow;

use crate::db::Db;
use crate::error::StoreError;
use crate::row::{to_ts, ts};

const CATEGORY_COLUMNS: &str = "main_category, sub_category, display_name, sort_order, \
    is_active, item_count, description, last_updated";

#[derive(Debug, Clone)]
pub struct CategoryStore {
    db: Db,
}

fn row_from_any(row: &AnyRow) -> Result<CategoryRow, StoreError> {
    Ok(CategoryRow {
        main_category: row.try_get("main_category")?,
        sub_category: row.try_get("sub_category")?,
        display_name: row.try_get("display_name")?,
        sort_order: row.try_get("sort_order")?,
        is_active: row.try_get("is_active")?,
        item_count: row.try_get("item_count")?,
        description: row.try_get("description")?,
        last_updated: ts(row, "last_updated")?,
    })
}

impl CategoryStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert the row unless a `(main, sub)` entry already exists. Returns
    /// whether a row was created.
    pub async fn insert_if_missing(&self, row: &CategoryRow) -> Result<bool, StoreError> {
        let sql = self.db.sql(&format!(
            "INSERT INTO categories ({CATEGORY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (main_category, sub_category) DO NOTHING"
        ));
        let res = sqlx::query(&sql)
            .bind(row.main_category.clone())
            .bind(row.sub_category.clone())
            .bind(row.display_name.clone())
            .bind(row.sort_order)
            .bind(row.is_active)
            .bind(row.item_count)
            .bind(row.description.clone())
            .bind(to_ts(&row.last_updated))
            .execute(self.db.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn get(&self, main: &str, sub: &str) -> Result<Option<CategoryRow>, StoreError> {
        let sql = self.db.sql(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories \
             WHERE main_category = ? AND sub_category = ?"
        ));
        let row = sqlx::query(&sql)
            .bind(main.to_string())
            .bind(sub.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(row_from_any).transpose()
    }

    pub async fn get_all(&self) -> Result<Vec<CategoryRow>, StoreError> {
        let sql = self.db.sql(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories \
             ORDER BY sort_order ASC, main_category ASC, sub_category ASC"
        ));
        let rows = sqlx::query(&sql).fetch_all(self.db.pool()).await?;
        rows.iter().map(row_from_any).collect()
    }

    /// Set the exact item count (idempotent).
    pub async fn update_item_count(
        &self,
        main: &str,
        sub: &str,
        count: i64,
    ) -> Result<(), StoreError> {
        let sql = self.db.sql(
            "UPDATE categories SET item_count = ?, last_updated = ? \
             WHERE main_category = ? AND sub_category = ?",
        );
        sqlx::query(&sql)
            .bind(count)
            .bind(to_ts(&Utc::now()))
            .bind(main.to_string())
            .bind(sub.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn increment_item_count(
        &self,
        main: &str,
        sub: &str,
        delta: i64,
    ) -> Result<(), StoreError> {
        let sql = self.db.sql(
            "UPDATE categories SET item_count = item_count + ?, last_updated = ? \
             WHERE main_category = ? AND sub_category = ?",
        );
        sqlx::query(&sql)
            .bind(delta)
            .bind(to_ts(&Utc::now()))
            .bind(main.to_string())
            .bind(sub.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Categories with at least `min_items` items, for synthesis and the
    /// root index.
    pub async fn with_items(&self, min_items: i64) -> Result<Vec<CategoryRow>, StoreError> {
        let sql = self.db.sql(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE item_count >= ? \
             ORDER BY main_category ASC, sub_category ASC"
        ));
        let rows = sqlx::query(&sql)
            .bind(min_items)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_from_any).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    async fn store() -> CategoryStore {
        CategoryStore::new(Db::memory().await.unwrap())
    }

    #[tokio::test]
    async fn insert_if_missing_is_idempotent() {
        let store = store().await;
        let row = CategoryRow::new("software", "testing");
        assert!(store.insert_if_missing(&row).await.unwrap());
        assert!(!store.insert_if_missing(&row).await.unwrap());
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn count_updates() {
        let store = store().await;
        store
            .insert_if_missing(&CategoryRow::new("software", "testing"))
            .await
            .unwrap();

        store.update_item_count("software", "testing", 7).await.unwrap();
        let row = store.get("software", "testing").await.unwrap().unwrap();
        assert_eq!(row.item_count, 7);

        store.increment_item_count("software", "testing", 2).await.unwrap();
        let row = store.get("software", "testing").await.unwrap().unwrap();
        assert_eq!(row.item_count, 9);
    }

    #[tokio::test]
    async fn with_items_threshold() {
        let store = store().await;
        let mut big = CategoryRow::new("a", "b");
        big.item_count = 5;
        let small = CategoryRow::new("c", "d");
        store.insert_if_missing(&big).await.unwrap();
        store.insert_if_missing(&small).await.unwrap();

        let hits = store.with_items(3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].main_category, "a");
    }
}
