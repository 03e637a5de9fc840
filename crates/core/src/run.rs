use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of sweep the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every enabled phase, front to back.
    Full,
    /// Only the phases named in `enabled_phases`.
    PhaseOnly,
    /// Re-run items whose reprocess flags are set.
    Reprocess,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Full
    }
}

/// Operator preferences read during the `user_input_parsing` phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPreferences {
    pub run_mode: RunMode,
    /// Phase names to run when `run_mode` is `phase_only`. Empty = all.
    #[serde(default)]
    pub enabled_phases: Vec<String>,
    /// Apply `force_reprocess_pipeline` to every item before processing.
    #[serde(default)]
    pub force_reprocess_pipeline: bool,
    /// Also rebuild caches (implies refetching payloads and media).
    #[serde(default)]
    pub force_recache: bool,
    /// Skip pulling new bookmarks and only drain the existing queue.
    #[serde(default)]
    pub skip_fetch: bool,
}

impl RunPreferences {
    /// Whether a main phase is enabled under these preferences.
    pub fn phase_enabled(&self, phase: &str) -> bool {
        match self.run_mode {
            RunMode::PhaseOnly => {
                self.enabled_phases.is_empty()
                    || self.enabled_phases.iter().any(|p| p == phase)
            }
            _ => true,
        }
    }
}

/// A concrete run request. The `task_id` scopes every event the run emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub task_id: String,
    pub run_id: String,
    pub preferences: RunPreferences,
}

impl RunDescriptor {
    pub fn new(preferences: RunPreferences) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            run_id: Uuid::new_v4().to_string(),
            preferences,
        }
    }
}
