//! Constructor-injected run context threaded through every phase.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};

use magpie_core::config::{PathsConfig, PipelineConfig, TimeoutsConfig};
use magpie_core::run::RunPreferences;
use magpie_events::EventEmitter;
use magpie_ports::error::PortError;
use magpie_ports::traits::{
    BookmarkFetcher, LanguageModel, MediaStore, Publisher, Renderer, VisionModel,
};
use magpie_store::db::Db;
use magpie_store::{CategoryStore, ItemStore, QueueStore, StatsStore};

/// All durable stores, sharing one pool.
#[derive(Clone)]
pub struct Stores {
    pub items: ItemStore,
    pub queue: QueueStore,
    pub categories: CategoryStore,
    pub stats: StatsStore,
}

impl Stores {
    pub fn new(db: Db) -> Self {
        Self {
            items: ItemStore::new(db.clone()),
            queue: QueueStore::new(db.clone()),
            categories: CategoryStore::new(db.clone()),
            stats: StatsStore::new(db),
        }
    }
}

/// All capability ports a run needs.
#[derive(Clone)]
pub struct Ports {
    pub fetcher: Arc<dyn BookmarkFetcher>,
    pub media: Arc<dyn MediaStore>,
    pub vision: Arc<dyn VisionModel>,
    pub llm: Arc<dyn LanguageModel>,
    pub renderer: Arc<dyn Renderer>,
    pub publisher: Arc<dyn Publisher>,
}

/// Everything a phase operation receives: identifiers, preferences, tuning,
/// stores, ports, the emitter, and the cancel signal.
pub struct RunContext {
    pub run_id: String,
    pub task_id: String,
    pub preferences: RunPreferences,
    pub pipeline: PipelineConfig,
    pub timeouts: TimeoutsConfig,
    pub paths: PathsConfig,
    pub stores: Stores,
    pub ports: Ports,
    pub emitter: Arc<EventEmitter>,
    pub cancel: watch::Receiver<bool>,
    /// Caps concurrent in-flight model requests.
    pub llm_gate: Arc<Semaphore>,
}

impl RunContext {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Result of one phase sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseOutcome {
    pub processed: u64,
    pub errored: u64,
    pub skipped: u64,
    pub duration: Duration,
    /// Per-item error detail: `(item_id, message)`.
    pub errors: Vec<(String, String)>,
    // Counters folded into the run totals.
    pub retries: u64,
    pub media_processed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub network_errors: u64,
}

impl PhaseOutcome {
    pub fn merge(&mut self, other: PhaseOutcome) {
        self.processed += other.processed;
        self.errored += other.errored;
        self.skipped += other.skipped;
        self.retries += other.retries;
        self.media_processed += other.media_processed;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.network_errors += other.network_errors;
        self.errors.extend(other.errors);
    }
}

/// Bound a port call by the configured timeout; a timeout becomes a
/// transient [`PortError::Timeout`].
pub async fn with_timeout<T, F>(secs: u64, fut: F) -> Result<T, PortError>
where
    F: std::future::Future<Output = Result<T, PortError>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(PortError::Timeout(secs)),
    }
}
