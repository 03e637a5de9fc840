//! Phase 7: publish generated artifacts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::context::{with_timeout, PhaseOutcome, RunContext};
use crate::error::PipelineError;
use crate::phases::names;

/// Every regular file under the KB and docs trees.
fn collect_artifacts(roots: &[&PathBuf]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
    }
    paths
}

pub async fn run(ctx: Arc<RunContext>) -> Result<PhaseOutcome, PipelineError> {
    let start = Instant::now();
    let mut outcome = PhaseOutcome::default();

    let paths = collect_artifacts(&[&ctx.paths.knowledge_base_dir, &ctx.paths.docs_dir]);
    if paths.is_empty() {
        outcome.skipped = 1;
        outcome.duration = start.elapsed();
        return Ok(outcome);
    }

    let message = format!("Update knowledge base ({} files)", paths.len());
    match with_timeout(
        ctx.timeouts.publish_secs,
        ctx.ports.publisher.publish(&paths, &message),
    )
    .await
    {
        Ok(()) => {
            info!(files = paths.len(), "artifacts published");
            outcome.processed = paths.len() as u64;
        }
        Err(error) => {
            warn!(error = %error, "publish failed");
            outcome.errored = 1;
            outcome
                .errors
                .push(("git_sync".to_string(), error.to_string()));
            ctx.emitter
                .phase_error(
                    &ctx.task_id,
                    names::GIT_SYNC,
                    error.classify().as_str(),
                    error.to_string(),
                    None,
                )
                .await;
        }
    }

    outcome.duration = start.elapsed();
    Ok(outcome)
}
