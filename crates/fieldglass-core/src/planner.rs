//! The `enable_planner = false` degradation: a [`Planner`] that never calls
//! the model, always producing exactly one milestone spanning the whole
//! task description. Re-planning re-emits the same milestone id so the
//! orchestrator's reducer updates it in place rather than appending a
//! second one.

use async_trait::async_trait;
use fieldglass_orchestrator::{Planner, ReplanRequest};
use fieldglass_types::{ErrorRecord, Milestone, Task};

const FLAT_MILESTONE_ID: &str = "task";

pub struct FlatPlanner {
    max_attempts: u32,
}

impl FlatPlanner {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

#[async_trait]
impl Planner for FlatPlanner {
    async fn plan(&self, task: &Task, replan: Option<&ReplanRequest<'_>>) -> Result<Vec<Milestone>, ErrorRecord> {
        let id = replan
            .map(|r| r.failed_milestone.id.clone())
            .unwrap_or_else(|| FLAT_MILESTONE_ID.to_string());
        Ok(vec![Milestone::new(id, task.description.clone(), self.max_attempts)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_plan_produces_a_single_milestone() {
        let planner = FlatPlanner::new(2);
        let task = Task::new("write a note");
        let plan = planner.plan(&task, None).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].id, FLAT_MILESTONE_ID);
    }

    #[tokio::test]
    async fn replan_reuses_the_same_milestone_id() {
        let planner = FlatPlanner::new(2);
        let task = Task::new("write a note");
        let mut failed = Milestone::new(FLAT_MILESTONE_ID, "write a note", 2);
        failed.attempts = 1;
        let error = ErrorRecord::new(fieldglass_types::ErrorKind::ActionFailure, "click missed");
        let replan = ReplanRequest {
            failed_milestone: &failed,
            error: &error,
            recent_steps: &[],
        };
        let plan = planner.plan(&task, Some(&replan)).await.unwrap();
        assert_eq!(plan[0].id, FLAT_MILESTONE_ID);
    }
}
