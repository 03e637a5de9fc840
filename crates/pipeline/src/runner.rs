//! Orchestrator: executes the main phases in order for one run.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use magpie_core::config::Config;
use magpie_core::run::RunDescriptor;
use magpie_core::stats::{PhaseMetric, RunTotals};
use magpie_events::types::StatusEvent;
use magpie_events::EventEmitter;

use crate::context::{PhaseOutcome, Ports, RunContext, Stores};
use crate::error::PipelineError;
use crate::phases::{self, names};
use crate::recover;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// End-of-run counters handed back to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub task_id: String,
    pub processed: u64,
    pub success: u64,
    pub error: u64,
    pub skipped: u64,
    pub status: RunStatus,
}

type PhaseFuture = BoxFuture<'static, Result<PhaseOutcome, PipelineError>>;
type PhaseFn = fn(Arc<RunContext>) -> PhaseFuture;

fn phase_list() -> Vec<(&'static str, PhaseFn)> {
    vec![
        (names::USER_INPUT_PARSING, |ctx| {
            Box::pin(phases::user_input::run(ctx))
        }),
        (names::FETCH_BOOKMARKS, |ctx| {
            Box::pin(phases::fetch::run(ctx))
        }),
        (names::CONTENT_PROCESSING, |ctx| {
            Box::pin(phases::content::run(ctx))
        }),
        (names::SYNTHESIS_GENERATION, |ctx| {
            Box::pin(phases::synthesis::run(ctx))
        }),
        (names::EMBEDDING_GENERATION, |ctx| {
            Box::pin(phases::embedding::run(ctx))
        }),
        (names::README_GENERATION, |ctx| {
            Box::pin(phases::readme::run(ctx))
        }),
        (names::GIT_SYNC, |ctx| Box::pin(phases::git_sync::run(ctx))),
    ]
}

pub struct Orchestrator {
    config: Config,
    stores: Stores,
    ports: Ports,
    emitter: Arc<EventEmitter>,
}

impl Orchestrator {
    pub fn new(config: Config, stores: Stores, ports: Ports, emitter: Arc<EventEmitter>) -> Self {
        Self {
            config,
            stores,
            ports,
            emitter,
        }
    }

    /// Execute one full sweep described by `descriptor`. Per-item failures
    /// are absorbed; only store unavailability or a fatal misconfiguration
    /// ends the run early (reported as `status = error`).
    pub async fn run(
        &self,
        descriptor: RunDescriptor,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();
        info!(run_id = %descriptor.run_id, task_id = %descriptor.task_id, "run starting");

        recover::reconcile_queue(&self.stores).await?;

        let ctx = Arc::new(RunContext {
            run_id: descriptor.run_id.clone(),
            task_id: descriptor.task_id.clone(),
            preferences: descriptor.preferences.clone(),
            pipeline: self.config.pipeline.clone(),
            timeouts: self.config.timeouts.clone(),
            paths: self.config.paths.clone(),
            stores: self.stores.clone(),
            ports: self.ports.clone(),
            emitter: self.emitter.clone(),
            cancel,
            llm_gate: Arc::new(Semaphore::new(
                self.config.pipeline.max_concurrent_requests.max(1),
            )),
        });

        self.emit_status(&ctx, true, None, "run started", started_at)
            .await;

        let mut totals = RunTotals::new(&descriptor.run_id);
        totals.start_time = Some(started_at);
        let mut status = RunStatus::Completed;

        for (name, phase_fn) in phase_list() {
            if ctx.is_cancelled() {
                warn!(phase = name, "run cancelled");
                status = RunStatus::Cancelled;
                break;
            }
            if !ctx.preferences.phase_enabled(name) {
                totals.skipped += 1;
                continue;
            }

            self.emit_status(&ctx, true, Some(name), &format!("running {name}"), started_at)
                .await;
            self.emitter
                .phase_start(&ctx.task_id, name, format!("Starting {name}"), None)
                .await;

            let phase_started = Instant::now();
            match phase_fn(ctx.clone()).await {
                Ok(outcome) => {
                    let duration = phase_started.elapsed().as_secs_f64();
                    self.record_phase(&descriptor.run_id, name, &outcome, duration)
                        .await;
                    self.emitter
                        .phase_complete(
                            &ctx.task_id,
                            name,
                            outcome.processed,
                            outcome.processed + outcome.errored + outcome.skipped,
                            outcome.errored,
                            duration,
                        )
                        .await;

                    totals.processed += (outcome.processed + outcome.errored) as i64;
                    totals.success += outcome.processed as i64;
                    totals.error += outcome.errored as i64;
                    totals.skipped += outcome.skipped as i64;
                    totals.retry_count += outcome.retries as i64;
                    totals.media_processed += outcome.media_processed as i64;
                    totals.cache_hits += outcome.cache_hits as i64;
                    totals.cache_misses += outcome.cache_misses as i64;
                    totals.network_errors += outcome.network_errors as i64;
                }
                Err(e) => {
                    error!(phase = name, error = %e, "run failed");
                    self.emitter
                        .phase_error(&ctx.task_id, name, "fatal", e.to_string(), None)
                        .await;
                    status = RunStatus::Error;
                    break;
                }
            }
        }

        totals.finalize(Utc::now());
        if let Err(e) = self.stores.stats.record_run_totals(&totals).await {
            warn!(error = %e, "failed to record run totals");
        }

        self.emit_status(
            &ctx,
            false,
            None,
            &format!("run {}", status.as_str()),
            started_at,
        )
        .await;
        // Push out anything the outage buffer is still holding.
        self.emitter.flush().await;

        let summary = RunSummary {
            run_id: descriptor.run_id,
            task_id: descriptor.task_id,
            processed: totals.processed.max(0) as u64,
            success: totals.success.max(0) as u64,
            error: totals.error.max(0) as u64,
            skipped: totals.skipped.max(0) as u64,
            status,
        };
        info!(
            run_id = %summary.run_id,
            processed = summary.processed,
            success = summary.success,
            error = summary.error,
            skipped = summary.skipped,
            status = summary.status.as_str(),
            "run finished"
        );
        Ok(summary)
    }

    async fn record_phase(
        &self,
        run_id: &str,
        phase: &str,
        outcome: &PhaseOutcome,
        duration: f64,
    ) {
        let total_items = (outcome.processed + outcome.errored + outcome.skipped) as i64;
        let mut metric = PhaseMetric::new(
            run_id,
            phase,
            "items_processed",
            outcome.processed as f64,
            "items",
        );
        metric.total_items = total_items;
        metric.total_duration_seconds = duration;
        if outcome.processed > 0 {
            metric.avg_time_per_item_seconds = duration / outcome.processed as f64;
        }
        if let Err(e) = self.stores.stats.record_phase_metric(&metric).await {
            warn!(error = %e, phase, "failed to record phase metric");
        }
    }

    async fn emit_status(
        &self,
        ctx: &RunContext,
        is_running: bool,
        current_phase: Option<&str>,
        message: &str,
        started_at: chrono::DateTime<Utc>,
    ) {
        self.emitter
            .emit_status(StatusEvent {
                task_id: ctx.task_id.clone(),
                is_running,
                current_phase_message: message.to_string(),
                current_phase: current_phase.map(str::to_string),
                started_at: Some(started_at),
                updated_at: None,
                timestamp: Utc::now(),
            })
            .await;
    }
}
