//! Startup reconciliation: crash leftovers and queue drift.
//!
//! An item stuck in `processing` with incomplete flags was abandoned by a
//! dead worker; it goes back to `unprocessed`. Completed items missing their
//! `processed` row get one.

use tracing::info;

use magpie_core::queue::{QueueRow, QueueStatus};
use magpie_store::StoreError;

use crate::context::Stores;

/// Returns how many rows were repaired.
pub async fn reconcile_queue(stores: &Stores) -> Result<u64, StoreError> {
    let mut repaired = 0u64;

    for row in stores.queue.get_all().await? {
        match stores.items.get(&row.item_id).await? {
            None => {
                stores.queue.delete(&row.item_id).await?;
                repaired += 1;
            }
            Some(item) => match row.status {
                QueueStatus::Processing if !item.processing_complete => {
                    stores
                        .queue
                        .update_status(&row.item_id, QueueStatus::Unprocessed, None, None, false)
                        .await?;
                    repaired += 1;
                }
                QueueStatus::Processing | QueueStatus::Unprocessed
                    if item.processing_complete =>
                {
                    stores
                        .queue
                        .update_status(&row.item_id, QueueStatus::Processed, None, None, false)
                        .await?;
                    repaired += 1;
                }
                _ => {}
            },
        }
    }

    // Every item has exactly one queue row; create any that are missing.
    for item in stores.items.get_all().await? {
        if stores.queue.get(&item.item_id).await?.is_none() {
            let mut row = QueueRow::new(&item.item_id);
            if item.processing_complete {
                row.status = QueueStatus::Processed;
                row.processed_at = item.processed_at;
            }
            stores.queue.create(&row).await?;
            repaired += 1;
        }
    }

    if repaired > 0 {
        info!(repaired, "queue reconciled at startup");
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::item::Item;
    use magpie_store::db::Db;

    async fn stores() -> Stores {
        Stores::new(Db::memory().await.unwrap())
    }

    #[tokio::test]
    async fn stuck_processing_rows_return_to_unprocessed() {
        let stores = stores().await;
        let item = Item::new("i1");
        stores.items.create(&item).await.unwrap();
        stores.queue.create(&QueueRow::new("i1")).await.unwrap();
        stores
            .queue
            .mark_processing(&["i1".to_string()], "cp_cache")
            .await
            .unwrap();

        let repaired = reconcile_queue(&stores).await.unwrap();
        assert_eq!(repaired, 1);
        let row = stores.queue.get("i1").await.unwrap().unwrap();
        assert_eq!(row.status, QueueStatus::Unprocessed);
    }

    #[tokio::test]
    async fn completed_items_get_processed_rows() {
        let stores = stores().await;
        let mut item = Item::new("done");
        item.processing_complete = true;
        stores.items.create(&item).await.unwrap();

        let repaired = reconcile_queue(&stores).await.unwrap();
        assert_eq!(repaired, 1);
        let row = stores.queue.get("done").await.unwrap().unwrap();
        assert_eq!(row.status, QueueStatus::Processed);
    }

    #[tokio::test]
    async fn orphan_queue_rows_are_removed() {
        let stores = stores().await;
        stores.queue.create(&QueueRow::new("ghost")).await.unwrap();

        let repaired = reconcile_queue(&stores).await.unwrap();
        assert_eq!(repaired, 1);
        assert!(stores.queue.get("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let stores = stores().await;
        let item = Item::new("i1");
        stores.items.create(&item).await.unwrap();

        assert_eq!(reconcile_queue(&stores).await.unwrap(), 1);
        assert_eq!(reconcile_queue(&stores).await.unwrap(), 0);
    }
}
