//! Phase 5: embedding vectors for finished KB items.
//!
//! Vectors are written as JSON sidecars under `<kb>/.embeddings/`, one per
//! item; that file is the persisted reference into the vector collection.
//! Existing sidecars are kept unless the run forces a pipeline reprocess.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::warn;

use crate::context::{with_timeout, PhaseOutcome, RunContext};
use crate::error::PipelineError;
use crate::phases::names;

pub async fn run(ctx: Arc<RunContext>) -> Result<PhaseOutcome, PipelineError> {
    let start = Instant::now();
    let mut outcome = PhaseOutcome::default();

    let embeddings_dir = ctx.paths.knowledge_base_dir.join(".embeddings");
    tokio::fs::create_dir_all(&embeddings_dir).await?;

    let regenerate = ctx.preferences.force_reprocess_pipeline;
    for item in ctx.stores.items.get_all().await? {
        if ctx.is_cancelled() {
            break;
        }
        if !item.kb_item_created {
            continue;
        }

        let sidecar = embeddings_dir.join(format!("{}.json", item.item_id));
        if !regenerate && tokio::fs::try_exists(&sidecar).await.unwrap_or(false) {
            outcome.skipped += 1;
            continue;
        }

        let text = if item.kb_content.is_empty() {
            item.full_text.clone()
        } else {
            item.kb_content.clone()
        };

        let embedded = {
            let _permit = ctx
                .llm_gate
                .acquire()
                .await
                .expect("llm gate never closes");
            with_timeout(ctx.timeouts.llm_secs, ctx.ports.llm.embed(&text)).await
        };
        match embedded {
            Ok(vector) => {
                let payload = json!({
                    "item_id": item.item_id,
                    "kb_file_path": item.kb_file_path,
                    "dimensions": vector.len(),
                    "vector": vector,
                });
                tokio::fs::write(&sidecar, serde_json::to_vec(&payload)?).await?;
                outcome.processed += 1;
            }
            Err(error) => {
                warn!(item_id = %item.item_id, error = %error, "embedding failed");
                outcome.errored += 1;
                outcome
                    .errors
                    .push((item.item_id.clone(), error.to_string()));
                ctx.emitter
                    .phase_error(
                        &ctx.task_id,
                        names::EMBEDDING_GENERATION,
                        error.classify().as_str(),
                        error.to_string(),
                        None,
                    )
                    .await;
            }
        }
    }

    outcome.duration = start.elapsed();
    Ok(outcome)
}
