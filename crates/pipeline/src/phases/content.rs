//! The per-item content pipeline: cache, media, categorization, KB item,
//! DB sync.
//!
//! Items are claimed from the queue in batches and processed by a bounded
//! worker pool. Within one item the five sub-phases run strictly in order;
//! across items they overlap. Every error is classified and isolated to its
//! item; nothing here stops the sweep short of a store failure.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use magpie_core::category::{normalize_name, CategoryRow};
use magpie_core::error::{ErrorClass, ItemErrorKind};
use magpie_core::item::{FailureClass, Item};
use magpie_core::queue::QueueStatus;
use magpie_kb::{item_dir, item_readme_path, media_sibling_name};
use magpie_ports::error::PortError;
use magpie_ports::media::is_image_path;
use magpie_ports::traits::ExternalRef;
use magpie_store::StoreError;

use crate::backoff::backoff_with_jitter;
use crate::context::{with_timeout, PhaseOutcome, RunContext};
use crate::error::PipelineError;

pub const PHASE_ID: &str = "content_processing";

const SUB_CACHE: &str = "cp_cache";
const SUB_MEDIA: &str = "cp_media";
const SUB_LLM: &str = "cp_llm";
const SUB_KB_ITEM: &str = "cp_kb_item";
const SUB_DB_SYNC: &str = "cp_db_sync";

/// How one item's sub-phase run ended.
enum SubPhaseRun {
    Completed,
    Cancelled,
}

struct ItemFailure {
    sub_phase: &'static str,
    kind: ItemErrorKind,
    error: PortError,
}

enum SubPhaseError {
    Item(ItemFailure),
    Store(StoreError),
}

impl From<StoreError> for SubPhaseError {
    fn from(e: StoreError) -> Self {
        SubPhaseError::Store(e)
    }
}

pub async fn run(ctx: Arc<RunContext>) -> Result<PhaseOutcome, PipelineError> {
    let start = Instant::now();
    let mut outcome = PhaseOutcome::default();
    let total_hint = ctx.stores.queue.stats().await?.unprocessed.max(0) as u64;

    loop {
        if ctx.is_cancelled() {
            break;
        }
        let rows = ctx
            .stores
            .queue
            .next_for_processing(i64::from(ctx.pipeline.batch_size), None)
            .await?;
        if rows.is_empty() {
            break;
        }

        // Items still inside their backoff window wait for a later sweep.
        let now = Utc::now();
        let mut ready: Vec<String> = Vec::new();
        let mut deferred = 0usize;
        for row in &rows {
            match ctx.stores.items.get(&row.item_id).await? {
                Some(item) if item.next_retry_after.map_or(true, |t| t <= now) => {
                    ready.push(row.item_id.clone());
                }
                Some(_) => deferred += 1,
                None => {
                    ctx.stores.queue.delete(&row.item_id).await?;
                }
            }
        }
        if ready.is_empty() {
            if deferred > 0 {
                break;
            }
            continue;
        }

        ctx.stores.queue.mark_processing(&ready, PHASE_ID).await?;

        let workers = Arc::new(Semaphore::new(ctx.pipeline.worker_count.max(1)));
        let mut join_set = tokio::task::JoinSet::new();
        for item_id in ready {
            let ctx = ctx.clone();
            let workers = workers.clone();
            join_set.spawn(async move {
                let _permit = workers
                    .acquire_owned()
                    .await
                    .expect("worker semaphore never closes");
                process_item(&ctx, &item_id).await
            });
        }
        while let Some(joined) = join_set.join_next().await {
            let result =
                joined.map_err(|e| PipelineError::Fatal(format!("worker panicked: {e}")))??;
            outcome.merge(result);
        }

        let done = outcome.processed + outcome.errored + outcome.skipped;
        ctx.emitter
            .phase_progress(
                &ctx.task_id,
                PHASE_ID,
                done,
                total_hint.max(done),
                "processing items",
            )
            .await;
    }

    outcome.duration = start.elapsed();
    Ok(outcome)
}

async fn process_item(ctx: &RunContext, item_id: &str) -> Result<PhaseOutcome, PipelineError> {
    let mut outcome = PhaseOutcome::default();
    let Some(mut item) = ctx.stores.items.get(item_id).await? else {
        ctx.stores.queue.delete(item_id).await?;
        return Ok(outcome);
    };

    if item.processing_complete && !item.force_reprocess_pipeline && !item.force_recache {
        ctx.stores
            .queue
            .update_status(item_id, QueueStatus::Processed, None, None, false)
            .await?;
        outcome.skipped += 1;
        return Ok(outcome);
    }

    debug!(item_id, "processing item");
    match run_sub_phases(ctx, &mut item, &mut outcome).await {
        Ok(SubPhaseRun::Completed) => {
            outcome.processed += 1;
        }
        Ok(SubPhaseRun::Cancelled) => {
            // The claim stays in `processing`; startup reconciliation or the
            // next run returns it to the queue.
        }
        Err(SubPhaseError::Store(e)) => return Err(e.into()),
        Err(SubPhaseError::Item(failure)) => {
            outcome.errored += 1;
            if failure.error.classify() == ErrorClass::Transient {
                outcome.network_errors += 1;
            }
            outcome
                .errors
                .push((item.item_id.clone(), failure.error.to_string()));
            handle_item_failure(ctx, &mut item, failure, &mut outcome).await?;
        }
    }
    Ok(outcome)
}

async fn run_sub_phases(
    ctx: &RunContext,
    item: &mut Item,
    outcome: &mut PhaseOutcome,
) -> Result<SubPhaseRun, SubPhaseError> {
    if ctx.is_cancelled() {
        return Ok(SubPhaseRun::Cancelled);
    }
    match cp_cache(ctx, item).await {
        Ok(true) => {
            outcome.cache_misses += 1;
            ctx.stores.items.save(item).await?;
        }
        Ok(false) => outcome.cache_hits += 1,
        Err(error) => {
            return Err(SubPhaseError::Item(ItemFailure {
                sub_phase: SUB_CACHE,
                kind: ItemErrorKind::Fetch,
                error,
            }))
        }
    }

    if ctx.is_cancelled() {
        return Ok(SubPhaseRun::Cancelled);
    }
    match cp_media(ctx, item).await {
        Ok(did_work) => {
            if did_work {
                outcome.media_processed += 1;
                ctx.stores.items.save(item).await?;
            }
        }
        Err(error) => {
            return Err(SubPhaseError::Item(ItemFailure {
                sub_phase: SUB_MEDIA,
                kind: ItemErrorKind::Media,
                error,
            }))
        }
    }

    if ctx.is_cancelled() {
        return Ok(SubPhaseRun::Cancelled);
    }
    match cp_llm(ctx, item).await {
        Ok(did_work) => {
            if did_work {
                ctx.stores.items.save(item).await?;
            }
        }
        Err(SubPhaseError::Store(e)) => return Err(SubPhaseError::Store(e)),
        Err(SubPhaseError::Item(f)) => return Err(SubPhaseError::Item(f)),
    }

    if ctx.is_cancelled() {
        return Ok(SubPhaseRun::Cancelled);
    }
    match cp_kb_item(ctx, item).await {
        Ok(did_work) => {
            if did_work {
                ctx.stores.items.save(item).await?;
            }
        }
        Err(error) => {
            return Err(SubPhaseError::Item(ItemFailure {
                sub_phase: SUB_KB_ITEM,
                kind: ItemErrorKind::Kb,
                error,
            }))
        }
    }

    if ctx.is_cancelled() {
        return Ok(SubPhaseRun::Cancelled);
    }
    cp_db_sync(ctx, item).await?;
    Ok(SubPhaseRun::Completed)
}

/// Fetch the raw payload and localize media. Populates the thread structure
/// and flattened text.
async fn cp_cache(ctx: &RunContext, item: &mut Item) -> Result<bool, PortError> {
    if item.cache_complete && !item.force_recache {
        return Ok(false);
    }

    let external = ExternalRef {
        item_id: item.source_item_id.clone(),
        source_url: item.source_url.clone(),
    };
    let fetched = with_timeout(
        ctx.timeouts.fetch_secs,
        ctx.ports.fetcher.fetch_item(&external),
    )
    .await?;

    item.is_thread = fetched.is_thread;
    item.full_text = fetched
        .thread_segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    item.thread_segments = fetched.thread_segments;
    item.raw_payload = fetched.raw_payload;

    item.media_refs.clear();
    for url in &fetched.media_urls {
        let path = with_timeout(ctx.timeouts.media_secs, ctx.ports.media.download(url)).await?;
        item.media_refs.push(path.to_string_lossy().into_owned());
    }

    item.urls_expanded = true;
    item.cache_complete = true;
    item.cached_at = Some(Utc::now());
    item.force_recache = false;
    item.cache_succeeded_this_run = true;
    Ok(true)
}

/// Describe every still image through the vision port.
async fn cp_media(ctx: &RunContext, item: &mut Item) -> Result<bool, PortError> {
    if item.media_processed {
        return Ok(false);
    }

    let mut descriptions = Vec::new();
    for media_ref in &item.media_refs {
        let path = Path::new(media_ref);
        if !is_image_path(path) {
            continue;
        }
        let description = with_timeout(
            ctx.timeouts.media_secs,
            ctx.ports.vision.describe_image(path),
        )
        .await?;
        descriptions.push(description);
    }

    item.image_descriptions = descriptions;
    item.media_processed = true;
    item.media_succeeded_this_run = true;
    Ok(true)
}

/// Categorize via the language model; registers the category pair.
async fn cp_llm(ctx: &RunContext, item: &mut Item) -> Result<bool, SubPhaseError> {
    if item.categories_processed
        && item.main_category.is_some()
        && item.sub_category.is_some()
        && item.item_name_suggestion.is_some()
    {
        return Ok(false);
    }

    let had_categories = item.main_category.is_some();
    let (categorization, raw) = {
        let _permit = ctx
            .llm_gate
            .acquire()
            .await
            .expect("llm gate never closes");
        with_timeout(
            ctx.timeouts.llm_secs,
            ctx.ports
                .llm
                .categorize(&item.full_text, &item.image_descriptions),
        )
        .await
        .map_err(|error| {
            SubPhaseError::Item(ItemFailure {
                sub_phase: SUB_LLM,
                kind: ItemErrorKind::Llm,
                error,
            })
        })?
    };

    let main = normalize_name(&categorization.main_category);
    let sub = normalize_name(&categorization.sub_category);
    let name = normalize_name(&categorization.item_name);
    if main.is_empty() || sub.is_empty() || name.is_empty() {
        return Err(SubPhaseError::Item(ItemFailure {
            sub_phase: SUB_LLM,
            kind: ItemErrorKind::Llm,
            error: PortError::Parse("categorization normalized to empty".to_string()),
        }));
    }

    ctx.stores
        .categories
        .insert_if_missing(&CategoryRow::new(&main, &sub))
        .await?;

    item.main_category = Some(main);
    item.sub_category = Some(sub);
    item.item_name_suggestion = Some(name);
    item.kb_description = categorization.description;
    item.categories_raw = raw;
    if had_categories {
        item.recategorization_attempts += 1;
    }
    item.categories_processed = true;
    item.llm_succeeded_this_run = true;
    Ok(true)
}

/// Render and write the KB artifact plus media siblings.
async fn cp_kb_item(ctx: &RunContext, item: &mut Item) -> Result<bool, PortError> {
    if item.kb_item_created && item.kb_item_written {
        return Ok(false);
    }

    let (Some(main), Some(sub), Some(name)) = (
        item.main_category.clone(),
        item.sub_category.clone(),
        item.item_name_suggestion.clone(),
    ) else {
        return Err(PortError::Parse(
            "item reached kb generation without categorization".to_string(),
        ));
    };

    let rel_dir = item_dir(&main, &sub, &name);
    let rel_readme = item_readme_path(&main, &sub, &name);
    let abs_dir = ctx.paths.knowledge_base_dir.join(&rel_dir);
    tokio::fs::create_dir_all(&abs_dir).await?;

    // Copy cached media next to the README under stable ordinal names.
    let mut kb_media_paths = Vec::new();
    for (index, media_ref) in item.media_refs.iter().enumerate() {
        let source = Path::new(media_ref);
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            warn!(item_id = %item.item_id, media = %media_ref, "cached media missing, skipping");
            continue;
        }
        let sibling = media_sibling_name(index, source);
        tokio::fs::copy(source, abs_dir.join(&sibling)).await?;
        kb_media_paths.push(rel_dir.join(&sibling).to_string_lossy().into_owned());
    }
    item.kb_media_paths = kb_media_paths;

    item.kb_title = name.clone();
    item.kb_display_title = name.replace('_', " ");
    if item.kb_content.is_empty() {
        item.kb_content = item.full_text.clone();
    }
    item.kb_file_path = rel_readme.to_string_lossy().into_owned();

    let markdown = ctx.ports.renderer.render_item(item)?;
    tokio::fs::write(ctx.paths.knowledge_base_dir.join(&rel_readme), markdown).await?;

    item.kb_item_created = true;
    item.kb_item_written = true;
    item.kb_generated_at = Some(Utc::now());
    item.kb_succeeded_this_run = true;
    Ok(true)
}

/// Persist the finished item, refresh the category count, and close the
/// queue row.
async fn cp_db_sync(ctx: &RunContext, item: &mut Item) -> Result<(), StoreError> {
    item.db_synced = true;
    item.processing_complete = item.urls_expanded
        && item.cache_complete
        && item.media_processed
        && item.categories_processed
        && item.kb_item_created
        && item.kb_item_written
        && item.db_synced;
    item.processed_at = Some(Utc::now());
    item.failure_class = None;
    item.next_retry_after = None;
    item.force_reprocess_pipeline = false;
    ctx.stores.items.save(item).await?;

    // Keep the registry count exact (recount is idempotent under retries).
    if let (Some(main), Some(sub)) = (item.main_category.clone(), item.sub_category.clone()) {
        let (_, count) = ctx
            .stores
            .items
            .list(&magpie_store::ItemFilter {
                main_category: Some(main.clone()),
                sub_category: Some(sub.clone()),
                limit: 1,
                ..Default::default()
            })
            .await?;
        ctx.stores
            .categories
            .update_item_count(&main, &sub, count)
            .await?;
    }

    ctx.stores
        .queue
        .update_status(
            &item.item_id,
            QueueStatus::Processed,
            Some(SUB_DB_SYNC),
            None,
            false,
        )
        .await?;
    Ok(())
}

async fn handle_item_failure(
    ctx: &RunContext,
    item: &mut Item,
    failure: ItemFailure,
    outcome: &mut PhaseOutcome,
) -> Result<(), PipelineError> {
    let class = failure.error.classify();
    let message = failure.error.to_string();
    item.set_error(failure.kind, message.clone());
    let now = Utc::now();

    let reported_class = match class {
        ErrorClass::Fatal => {
            ctx.stores.items.save(item).await?;
            return Err(PipelineError::Fatal(message));
        }
        ErrorClass::Transient | ErrorClass::RateLimited
            if item.retry_count + 1 < i64::from(ctx.pipeline.max_attempts) =>
        {
            item.retry_count += 1;
            outcome.retries += 1;
            item.last_retry_at = Some(now);
            let delay = match &failure.error {
                PortError::RateLimited {
                    retry_after_secs: Some(secs),
                } => Duration::from_secs(*secs),
                _ => backoff_with_jitter(
                    item.retry_count as u32,
                    Duration::from_secs(ctx.pipeline.backoff_base_secs),
                    Duration::from_secs(ctx.pipeline.backoff_cap_secs),
                ),
            };
            item.next_retry_after =
                Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            item.failure_class = Some(FailureClass::Transient);
            ctx.stores
                .queue
                .update_status(
                    &item.item_id,
                    QueueStatus::Unprocessed,
                    Some(failure.sub_phase),
                    Some(&message),
                    true,
                )
                .await?;
            ErrorClass::Transient
        }
        ErrorClass::Validation => {
            item.failure_class = Some(FailureClass::Validation);
            ctx.stores
                .queue
                .update_status(
                    &item.item_id,
                    QueueStatus::Failed,
                    Some(failure.sub_phase),
                    Some(&message),
                    false,
                )
                .await?;
            ErrorClass::Validation
        }
        // Permanent errors and exhausted retries both park the item.
        _ => {
            item.failure_class = Some(FailureClass::Permanent);
            item.next_retry_after = None;
            ctx.stores
                .queue
                .update_status(
                    &item.item_id,
                    QueueStatus::Failed,
                    Some(failure.sub_phase),
                    Some(&message),
                    false,
                )
                .await?;
            ErrorClass::Permanent
        }
    };

    ctx.stores.items.save(item).await?;
    ctx.emitter
        .phase_error(
            &ctx.task_id,
            failure.sub_phase,
            reported_class.as_str(),
            message,
            None,
        )
        .await;
    Ok(())
}
