//! Maps `(channel, event kind)` to outbound subscriber topics.
//!
//! The alias fan-out (`phase_update` also arriving as `phase_status_update`,
//! logs also arriving as `live_log`, ...) keeps older UI subscribers working
//! against the consolidated envelope format.

use crate::envelope::Channel;
use crate::types::kinds;

/// Outbound topic names for one inbound event. Unknown kinds get an empty
/// route and are dropped. `task_id` adds the per-task room on phase traffic.
pub fn route(channel: Channel, kind: &str, task_id: Option<&str>) -> Vec<String> {
    let mut topics: Vec<String> = match (channel, kind) {
        (Channel::Logs, kinds::LOG_MESSAGE) => {
            vec!["log".into(), "live_log".into()]
        }
        (Channel::Phase, kinds::PHASE_UPDATE) => vec![
            "phase_update".into(),
            "phase_status_update".into(),
            "task_progress".into(),
        ],
        (Channel::Phase, kinds::PHASE_START) => {
            vec!["phase_update".into(), "phase_start".into()]
        }
        (Channel::Phase, kinds::PHASE_COMPLETE) => {
            vec!["phase_update".into(), "phase_complete".into()]
        }
        (Channel::Phase, kinds::PHASE_ERROR) => {
            vec!["phase_update".into(), "phase_error".into()]
        }
        (Channel::Phase, kinds::PROGRESS_UPDATE) => {
            vec!["progress_update".into(), "task_progress".into()]
        }
        (Channel::Status, kinds::STATUS_UPDATE) => {
            vec!["agent_status_update".into(), "status_update".into()]
        }
        _ => Vec::new(),
    };

    if channel == Channel::Phase && !topics.is_empty() {
        if let Some(task_id) = task_id {
            topics.push(format!("task:{task_id}"));
        }
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_fans_out_to_both_names() {
        assert_eq!(
            route(Channel::Logs, kinds::LOG_MESSAGE, Some("t1")),
            vec!["log", "live_log"]
        );
    }

    #[test]
    fn phase_update_includes_legacy_aliases_and_room() {
        assert_eq!(
            route(Channel::Phase, kinds::PHASE_UPDATE, Some("t1")),
            vec![
                "phase_update",
                "phase_status_update",
                "task_progress",
                "task:t1"
            ]
        );
    }

    #[test]
    fn phase_complete_and_error_carry_specific_kind() {
        assert_eq!(
            route(Channel::Phase, kinds::PHASE_COMPLETE, None),
            vec!["phase_update", "phase_complete"]
        );
        assert_eq!(
            route(Channel::Phase, kinds::PHASE_ERROR, Some("t7")),
            vec!["phase_update", "phase_error", "task:t7"]
        );
    }

    #[test]
    fn status_routes_to_agent_aliases() {
        assert_eq!(
            route(Channel::Status, kinds::STATUS_UPDATE, Some("t1")),
            vec!["agent_status_update", "status_update"]
        );
    }

    #[test]
    fn unknown_kind_is_dropped() {
        assert!(route(Channel::Logs, "mystery_event", None).is_empty());
        // A kind on the wrong channel is dropped too.
        assert!(route(Channel::Logs, kinds::PHASE_UPDATE, None).is_empty());
    }
}
