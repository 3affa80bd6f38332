//! Pure milestone status reduction, grounded on
//! `DefaultMissionReducer`: one `reduce(state, event) -> (state, commands)`
//! call per observed event, unit-testable without a model or action
//! backend. The coordinator drives this with real I/O; this module only
//! computes the resulting state and the commands that I/O should issue.

use serde_json::json;

use fieldglass_types::{Milestone, MilestoneStatus};

use crate::model::{CoordinatorCommand, CoordinatorStatus, MilestoneEvent, MilestoneSetState};

pub fn reduce(state: &MilestoneSetState, event: MilestoneEvent) -> (MilestoneSetState, Vec<CoordinatorCommand>) {
    let mut next = state.clone();
    let mut commands = Vec::new();
    let mut changed = false;

    match event {
        MilestoneEvent::PlanCreated { milestones } => {
            next.milestones = milestones;
            next.status = CoordinatorStatus::Running;
            changed = true;
        }
        MilestoneEvent::MilestoneStarted { milestone_id } => {
            if let Some(m) = next.milestone_mut(&milestone_id) {
                m.status = MilestoneStatus::InProgress;
                commands.push(CoordinatorCommand::DispatchMilestone {
                    task_id: next.task_id.clone(),
                    milestone_id,
                });
                changed = true;
            }
        }
        MilestoneEvent::MilestoneSucceeded { milestone_id, .. } => {
            if let Some(m) = next.milestone_mut(&milestone_id) {
                m.status = MilestoneStatus::Completed;
                m.error = None;
                changed = true;
            }
            if next.all_completed() {
                next.status = CoordinatorStatus::Succeeded;
                commands.push(CoordinatorCommand::EmitNotice {
                    task_id: next.task_id.clone(),
                    event_type: "coordinator.task.completed".to_string(),
                    properties: json!({ "taskID": next.task_id }),
                });
            }
        }
        MilestoneEvent::MilestoneRetryScheduled { milestone_id, error } => {
            if let Some(m) = next.milestone_mut(&milestone_id) {
                m.attempts = m.attempts.saturating_add(1);
                m.status = MilestoneStatus::Pending;
                m.error = Some(error);
                commands.push(CoordinatorCommand::InvokePlanner {
                    task_id: next.task_id.clone(),
                    failed_milestone_id: milestone_id,
                });
                changed = true;
            }
        }
        MilestoneEvent::MilestoneFailed { milestone_id, error } => {
            if let Some(m) = next.milestone_mut(&milestone_id) {
                m.status = MilestoneStatus::Failed;
                m.error = Some(error.clone());
                changed = true;
            }
            next.status = CoordinatorStatus::Failed;
            commands.push(CoordinatorCommand::EmitNotice {
                task_id: next.task_id.clone(),
                event_type: "coordinator.milestone.failed".to_string(),
                properties: json!({ "milestoneID": milestone_id, "error": error.message }),
            });
        }
        MilestoneEvent::RePlanned { milestones } => {
            replace_remaining(&mut next.milestones, milestones);
            next.status = CoordinatorStatus::Running;
            changed = true;
        }
        MilestoneEvent::CancelRequested { reason } => {
            next.status = CoordinatorStatus::Cancelled;
            commands.push(CoordinatorCommand::EmitNotice {
                task_id: next.task_id.clone(),
                event_type: "coordinator.task.cancelled".to_string(),
                properties: json!({ "reason": reason }),
            });
            changed = true;
        }
    }

    if changed {
        next.revision = next.revision.saturating_add(1);
    }
    (next, commands)
}

/// Merge a fresh plan into the existing milestone list: a milestone id that
/// already exists keeps its `attempts`/history (the planner decided to
/// retry it, not recreate it); any id not already present is appended as
/// new remedial work. Completed milestones are never touched.
fn replace_remaining(current: &mut Vec<Milestone>, replan: Vec<Milestone>) {
    for incoming in replan {
        if let Some(existing) = current.iter_mut().find(|m| m.id == incoming.id) {
            if existing.status != MilestoneStatus::Completed {
                existing.description = incoming.description;
                existing.success_criteria = incoming.success_criteria;
                existing.dependencies = incoming.dependencies;
            }
        } else {
            current.push(incoming);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldglass_types::{ErrorKind, ErrorRecord};

    fn plan() -> Vec<Milestone> {
        vec![
            Milestone::new("m1", "open the app", 3),
            Milestone::new("m2", "type the text", 3).with_dependencies(vec!["m1".to_string()]),
        ]
    }

    #[test]
    fn plan_created_starts_running() {
        let state = MilestoneSetState::new("t1");
        let (next, _) = reduce(&state, MilestoneEvent::PlanCreated { milestones: plan() });
        assert_eq!(next.status, CoordinatorStatus::Running);
        assert_eq!(next.milestones.len(), 2);
        assert_eq!(next.revision, 1);
    }

    #[test]
    fn milestone_started_emits_dispatch_command() {
        let (state, _) = reduce(&MilestoneSetState::new("t1"), MilestoneEvent::PlanCreated { milestones: plan() });
        let (next, commands) = reduce(&state, MilestoneEvent::MilestoneStarted { milestone_id: "m1".to_string() });
        assert_eq!(next.milestone("m1").unwrap().status, MilestoneStatus::InProgress);
        assert!(commands
            .iter()
            .any(|c| matches!(c, CoordinatorCommand::DispatchMilestone { milestone_id, .. } if milestone_id == "m1")));
    }

    #[test]
    fn all_milestones_succeeded_marks_task_succeeded() {
        let (mut state, _) = reduce(&MilestoneSetState::new("t1"), MilestoneEvent::PlanCreated { milestones: plan() });
        let (s, _) = reduce(&state, MilestoneEvent::MilestoneSucceeded { milestone_id: "m1".to_string(), result: None });
        state = s;
        let (next, commands) = reduce(&state, MilestoneEvent::MilestoneSucceeded { milestone_id: "m2".to_string(), result: None });
        assert_eq!(next.status, CoordinatorStatus::Succeeded);
        assert!(commands
            .iter()
            .any(|c| matches!(c, CoordinatorCommand::EmitNotice { event_type, .. } if event_type == "coordinator.task.completed")));
    }

    #[test]
    fn retry_scheduled_increments_attempts_and_requests_replan() {
        let (state, _) = reduce(&MilestoneSetState::new("t1"), MilestoneEvent::PlanCreated { milestones: plan() });
        let err = ErrorRecord::new(ErrorKind::ActionFailure, "click missed");
        let (next, commands) = reduce(
            &state,
            MilestoneEvent::MilestoneRetryScheduled { milestone_id: "m1".to_string(), error: err },
        );
        assert_eq!(next.milestone("m1").unwrap().attempts, 1);
        assert_eq!(next.milestone("m1").unwrap().status, MilestoneStatus::Pending);
        assert!(commands
            .iter()
            .any(|c| matches!(c, CoordinatorCommand::InvokePlanner { failed_milestone_id, .. } if failed_milestone_id == "m1")));
    }

    #[test]
    fn milestone_failed_terminates_task_failed() {
        let (state, _) = reduce(&MilestoneSetState::new("t1"), MilestoneEvent::PlanCreated { milestones: plan() });
        let err = ErrorRecord::new(ErrorKind::PolicyViolation, "blocked app");
        let (next, _) = reduce(&state, MilestoneEvent::MilestoneFailed { milestone_id: "m1".to_string(), error: err });
        assert_eq!(next.status, CoordinatorStatus::Failed);
        assert_eq!(next.milestone("m1").unwrap().status, MilestoneStatus::Failed);
    }

    #[test]
    fn replanning_preserves_existing_ids_and_appends_new_ones() {
        let (state, _) = reduce(&MilestoneSetState::new("t1"), MilestoneEvent::PlanCreated { milestones: plan() });
        let mut retried_m1 = Milestone::new("m1", "open the app (retry)", 3);
        retried_m1.attempts = 1;
        let new_remedial = Milestone::new("m3", "dismiss the error dialog", 3).with_dependencies(vec![]);
        let (next, _) = reduce(
            &state,
            MilestoneEvent::RePlanned { milestones: vec![retried_m1, new_remedial] },
        );
        assert_eq!(next.milestones.len(), 3);
        assert_eq!(next.milestone("m1").unwrap().description, "open the app (retry)");
        assert!(next.milestone("m3").is_some());
    }

    #[test]
    fn cancel_requested_terminates_task_cancelled() {
        let state = MilestoneSetState::new("t1");
        let (next, commands) = reduce(&state, MilestoneEvent::CancelRequested { reason: "user abort".to_string() });
        assert_eq!(next.status, CoordinatorStatus::Cancelled);
        assert!(!commands.is_empty());
    }
}
