//! Phase 4: synthesis documents for categories with enough items.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use magpie_ports::traits::SynthesisSource;
use magpie_store::ItemFilter;

use crate::context::{with_timeout, PhaseOutcome, RunContext};
use crate::error::PipelineError;
use crate::phases::names;

pub async fn run(ctx: Arc<RunContext>) -> Result<PhaseOutcome, PipelineError> {
    let start = Instant::now();
    let mut outcome = PhaseOutcome::default();

    let min_items = ctx.pipeline.synthesis_min_items;
    let categories = ctx.stores.categories.with_items(min_items as i64).await?;

    for category in categories {
        if ctx.is_cancelled() {
            break;
        }

        let (items, _) = ctx
            .stores
            .items
            .list(&ItemFilter {
                main_category: Some(category.main_category.clone()),
                sub_category: Some(category.sub_category.clone()),
                limit: 200,
                ..Default::default()
            })
            .await?;
        let sources: Vec<SynthesisSource> = items
            .iter()
            .filter(|i| i.kb_item_created)
            .map(|i| SynthesisSource {
                item_id: i.item_id.clone(),
                title: i.kb_display_title.clone(),
                description: i.kb_description.clone(),
                content: i.kb_content.clone(),
            })
            .collect();
        if sources.len() < min_items {
            outcome.skipped += 1;
            continue;
        }

        let result = async {
            let body = {
                let _permit = ctx
                    .llm_gate
                    .acquire()
                    .await
                    .expect("llm gate never closes");
                with_timeout(
                    ctx.timeouts.llm_secs,
                    ctx.ports.llm.synthesize(
                        &category.main_category,
                        &category.sub_category,
                        &sources,
                    ),
                )
                .await?
            };
            let document = ctx.ports.renderer.render_synthesis(
                &category.main_category,
                &category.sub_category,
                &body,
                sources.len(),
            )?;
            let dir = ctx
                .paths
                .knowledge_base_dir
                .join(&category.main_category)
                .join(&category.sub_category);
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                magpie_ports::PortError::Io(e)
            })?;
            tokio::fs::write(dir.join("synthesis.md"), document)
                .await
                .map_err(magpie_ports::PortError::Io)?;
            Ok::<(), magpie_ports::PortError>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(category = %category.key(), "synthesis generated");
                outcome.processed += 1;
            }
            Err(error) => {
                warn!(category = %category.key(), error = %error, "synthesis failed");
                outcome.errored += 1;
                outcome.errors.push((category.key(), error.to_string()));
                ctx.emitter
                    .phase_error(
                        &ctx.task_id,
                        names::SYNTHESIS_GENERATION,
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
