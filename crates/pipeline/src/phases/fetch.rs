//! Phase 2: pull new bookmark identifiers and enqueue them.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use magpie_core::item::Item;
use magpie_core::queue::QueueRow;

use crate::context::{with_timeout, PhaseOutcome, RunContext};
use crate::error::PipelineError;
use crate::phases::names;

pub async fn run(ctx: Arc<RunContext>) -> Result<PhaseOutcome, PipelineError> {
    let start = Instant::now();
    let mut outcome = PhaseOutcome::default();

    if ctx.preferences.skip_fetch {
        outcome.skipped = 1;
        outcome.duration = start.elapsed();
        return Ok(outcome);
    }

    let refs = match with_timeout(
        ctx.timeouts.fetch_secs,
        ctx.ports.fetcher.list_new_items(),
    )
    .await
    {
        Ok(refs) => refs,
        Err(error) => {
            // A source outage skips this sweep; existing queue work continues.
            warn!(error = %error, "bookmark listing failed");
            outcome.errored = 1;
            outcome.network_errors = 1;
            outcome
                .errors
                .push(("fetch_bookmarks".to_string(), error.to_string()));
            ctx.emitter
                .phase_error(
                    &ctx.task_id,
                    names::FETCH_BOOKMARKS,
                    error.classify().as_str(),
                    error.to_string(),
                    None,
                )
                .await;
            outcome.duration = start.elapsed();
            return Ok(outcome);
        }
    };

    let total = refs.len() as u64;
    for external in refs {
        if ctx.is_cancelled() {
            break;
        }
        if ctx.stores.items.get(&external.item_id).await?.is_some() {
            // Known item: make sure the queue row exists, nothing else.
            ctx.stores
                .queue
                .create(&QueueRow::new(&external.item_id))
                .await?;
            outcome.skipped += 1;
            continue;
        }

        let mut item = Item::new(&external.item_id);
        item.source_url = external.source_url.clone();
        ctx.stores.items.create(&item).await?;
        ctx.stores
            .queue
            .create(&QueueRow::new(&external.item_id))
            .await?;
        outcome.processed += 1;

        if outcome.processed % 25 == 0 {
            ctx.emitter
                .emit_progress(
                    &ctx.task_id,
                    "enqueueing bookmarks",
                    outcome.processed,
                    total,
                )
                .await;
        }
    }

    info!(
        new = outcome.processed,
        known = outcome.skipped,
        "bookmark sweep complete"
    );
    outcome.duration = start.elapsed();
    Ok(outcome)
}
