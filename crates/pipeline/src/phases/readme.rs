//! Phase 6: root README and the static HTML index.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::context::{PhaseOutcome, RunContext};
use crate::error::PipelineError;

pub async fn run(ctx: Arc<RunContext>) -> Result<PhaseOutcome, PipelineError> {
    let start = Instant::now();
    let mut outcome = PhaseOutcome::default();

    let items = ctx.stores.items.get_all().await?;

    let readme = ctx
        .ports
        .renderer
        .render_index(&items)
        .map_err(|e| PipelineError::Fatal(format!("index render failed: {e}")))?;
    tokio::fs::create_dir_all(&ctx.paths.knowledge_base_dir).await?;
    tokio::fs::write(ctx.paths.knowledge_base_dir.join("README.md"), readme).await?;
    outcome.processed += 1;

    let html = ctx
        .ports
        .renderer
        .render_html_index(&items)
        .map_err(|e| PipelineError::Fatal(format!("html index render failed: {e}")))?;
    tokio::fs::create_dir_all(&ctx.paths.docs_dir).await?;
    tokio::fs::write(ctx.paths.docs_dir.join("index.html"), html).await?;
    outcome.processed += 1;

    info!(items = items.len(), "index documents regenerated");
    outcome.duration = start.elapsed();
    Ok(outcome)
}
