//! Phase 1: apply operator preferences to the stores.
//!
//! Clears the per-run success markers, propagates run-level reprocess
//! requests onto items, and resets any item whose reprocess flags are
//! raised (queue row back to `unprocessed`).

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use magpie_core::queue::{QueueRow, QueueStatus};
use magpie_store::ReprocessKind;

use crate::context::{PhaseOutcome, RunContext};
use crate::error::PipelineError;

pub async fn run(ctx: Arc<RunContext>) -> Result<PhaseOutcome, PipelineError> {
    let start = Instant::now();
    let mut outcome = PhaseOutcome::default();

    ctx.stores.items.clear_run_flags().await?;

    // Run-level reprocess requests mark every item.
    if ctx.preferences.force_reprocess_pipeline || ctx.preferences.force_recache {
        let ids: Vec<String> = ctx
            .stores
            .items
            .get_all()
            .await?
            .into_iter()
            .map(|i| i.item_id)
            .collect();
        if ctx.preferences.force_recache {
            ctx.stores
                .items
                .bulk_set_reprocess(&ids, ReprocessKind::Recache, "run_preferences")
                .await?;
        }
        if ctx.preferences.force_reprocess_pipeline {
            ctx.stores
                .items
                .bulk_set_reprocess(&ids, ReprocessKind::Pipeline, "run_preferences")
                .await?;
        }
    }

    // Reset every marked item and put it back in the queue.
    let marked = ctx.stores.items.needing_reprocessing().await?;
    for mut item in marked {
        item.reset_for_reprocessing();
        item.force_recache = false;
        ctx.stores.items.save(&item).await?;

        // The queue row may not exist yet for imported records.
        ctx.stores
            .queue
            .create(&QueueRow::new(&item.item_id))
            .await?;
        ctx.stores
            .queue
            .update_status(&item.item_id, QueueStatus::Unprocessed, None, None, false)
            .await?;
        ctx.stores
            .queue
            .reset_for_retry(&[item.item_id.clone()])
            .await?;
        outcome.processed += 1;
    }

    if outcome.processed > 0 {
        info!(reset = outcome.processed, "items queued for reprocessing");
    }
    outcome.duration = start.elapsed();
    Ok(outcome)
}
