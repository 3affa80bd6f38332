//! Milestone-set status model, grounded on
//! `tandem-orchestrator::model` (`MissionState`/`WorkItem`/`MissionEvent`/
//! `MissionCommand`), narrowed from the mission/work-item/gate shape to the
//! milestone shape the planner/worker coordinator actually drives.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fieldglass_types::{ErrorRecord, Milestone, MilestoneStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorStatus {
    Planning,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// The coordinator's full view of a task's decomposition. Mutated only by
/// [`crate::reducer::reduce`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneSetState {
    pub task_id: String,
    pub status: CoordinatorStatus,
    pub milestones: Vec<Milestone>,
    pub revision: u64,
}

impl MilestoneSetState {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: CoordinatorStatus::Planning,
            milestones: Vec::new(),
            revision: 0,
        }
    }

    pub fn milestone(&self, id: &str) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.id == id)
    }

    pub fn milestone_mut(&mut self, id: &str) -> Option<&mut Milestone> {
        self.milestones.iter_mut().find(|m| m.id == id)
    }

    pub fn completed_ids(&self) -> Vec<String> {
        self.milestones
            .iter()
            .filter(|m| m.status == MilestoneStatus::Completed)
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn all_completed(&self) -> bool {
        !self.milestones.is_empty()
            && self.milestones.iter().all(|m| m.status == MilestoneStatus::Completed)
    }

    /// The next milestone ready to dispatch: `Pending` with every dependency
    /// already `Completed`. Milestones are walked in list order, which is
    /// also dependency order since re-planning only appends.
    pub fn next_ready(&self) -> Option<&Milestone> {
        let completed = self.completed_ids();
        self.milestones.iter().find(|m| m.is_ready(&completed))
    }

    pub fn any_in_progress(&self) -> bool {
        self.milestones.iter().any(|m| m.status == MilestoneStatus::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MilestoneEvent {
    PlanCreated {
        milestones: Vec<Milestone>,
    },
    MilestoneStarted {
        milestone_id: String,
    },
    MilestoneSucceeded {
        milestone_id: String,
        result: Option<Value>,
    },
    MilestoneRetryScheduled {
        milestone_id: String,
        error: ErrorRecord,
    },
    MilestoneFailed {
        milestone_id: String,
        error: ErrorRecord,
    },
    RePlanned {
        milestones: Vec<Milestone>,
    },
    CancelRequested {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorCommand {
    DispatchMilestone {
        task_id: String,
        milestone_id: String,
    },
    InvokePlanner {
        task_id: String,
        failed_milestone_id: String,
    },
    EmitNotice {
        task_id: String,
        event_type: String,
        properties: Value,
    },
}
