//! The phase orchestrator: drives bookmarked items through the fixed
//! pipeline (fetch, cache, media, categorization, KB synthesis, index,
//! publish) with parallel workers, per-item sequential sub-phases,
//! retry/backoff, and unified event emission.

pub mod backoff;
pub mod context;
pub mod error;
pub mod phases;
pub mod recover;
pub mod runner;

pub use context::{PhaseOutcome, Ports, RunContext, Stores};
pub use error::PipelineError;
pub use runner::{Orchestrator, RunStatus, RunSummary};
