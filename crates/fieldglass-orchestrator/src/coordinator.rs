//! The coordinator: drives planning, dependency-ordered dispatch to the
//! step graph engine (C5), and re-planning on retryable milestone failure.
//! The status bookkeeping is delegated entirely to [`crate::reducer::reduce`]
//! — this module only performs the I/O the reduced commands imply.

use std::path::Path;
use std::sync::Arc;

use fieldglass_audit::AuditTrail;
use fieldglass_cache::ToolCache;
use fieldglass_engine::{AgentState, Collaborators as EngineCollaborators, EngineConfig, StepGraphEngine};
use fieldglass_memory::{ArchivalStore, MemoryManager};
use fieldglass_observability::{emit_event, ObservabilityEvent, ProcessKind};
use fieldglass_providers::{ActionBackend, AppAllowlist, ModelBackend, PerceptionBackend};
use fieldglass_types::{ErrorKind, ErrorRecord, MilestoneOutcome, MilestoneStatus, Task, TaskResult, TaskStatus};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::model::{CoordinatorStatus, MilestoneEvent, MilestoneSetState};
use crate::planner::{Planner, ReplanRequest};
use crate::reducer::reduce;

/// The collaborator set the coordinator forwards to every milestone's
/// [`StepGraphEngine`]. Cheap to clone per dispatch since every field is an
/// `Arc`.
pub struct CoordinatorCollaborators {
    pub model: Arc<dyn ModelBackend>,
    pub perception: Arc<dyn PerceptionBackend>,
    pub action: Arc<dyn ActionBackend>,
    pub allowlist: Arc<dyn AppAllowlist>,
}

impl CoordinatorCollaborators {
    fn to_engine(&self) -> EngineCollaborators {
        EngineCollaborators {
            model: self.model.clone(),
            perception: self.perception.clone(),
            action: self.action.clone(),
            allowlist: self.allowlist.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub engine_config: EngineConfig,
    pub max_milestone_attempts: u32,
    pub memory_budget_bytes: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            engine_config: EngineConfig::default(),
            max_milestone_attempts: 3,
            memory_budget_bytes: 1_000_000,
        }
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    collaborators: CoordinatorCollaborators,
    cache: Arc<ToolCache>,
    archival: Arc<dyn ArchivalStore>,
    planner: Arc<dyn Planner>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        collaborators: CoordinatorCollaborators,
        cache: Arc<ToolCache>,
        archival: Arc<dyn ArchivalStore>,
        planner: Arc<dyn Planner>,
    ) -> Self {
        Self {
            config,
            collaborators,
            cache,
            archival,
            planner,
        }
    }

    pub async fn run_task(
        &self,
        task: Task,
        state_dir: &Path,
        cancel: CancellationToken,
    ) -> Result<TaskResult, ErrorRecord> {
        let audit = AuditTrail::open(state_dir, &task.id)
            .map_err(|e| ErrorRecord::new(ErrorKind::ToolFailure, format!("audit trail open failed: {e}")))?;
        let memory = MemoryManager::new(self.config.memory_budget_bytes, self.archival.clone());

        let initial_plan = self.planner.plan(&task, None).await?;
        let mut state = MilestoneSetState::new(task.id.clone());
        let (next, _) = reduce(&state, MilestoneEvent::PlanCreated { milestones: initial_plan });
        state = next;

        let mut results: std::collections::HashMap<String, Value> = std::collections::HashMap::new();

        loop {
            if cancel.is_cancelled() {
                let (next, _) = reduce(
                    &state,
                    MilestoneEvent::CancelRequested {
                        reason: "cancellation observed before milestone dispatch".to_string(),
                    },
                );
                state = next;
                break;
            }

            let Some(ready) = state.next_ready().cloned() else {
                break;
            };

            let (next, _) = reduce(&state, MilestoneEvent::MilestoneStarted { milestone_id: ready.id.clone() });
            state = next;

            emit_event(
                Level::INFO,
                ProcessKind::Engine,
                ObservabilityEvent::new("coordinator.milestone.dispatch", "orchestrator")
                    .with_task_id(&task.id)
                    .with_milestone_id(&ready.id),
            );

            let milestone_task = Task {
                id: task.id.clone(),
                description: ready.description.clone(),
                context: task.context.clone(),
            };
            let mut agent_state = AgentState::new(
                milestone_task,
                Some(ready.id.clone()),
                self.config.engine_config.max_steps,
                cancel.clone(),
            );

            let engine = StepGraphEngine::new(self.config.engine_config, self.collaborators.to_engine(), self.cache.clone());
            let run_result = engine.run(&mut agent_state, &audit, &memory).await;

            match run_result {
                Ok(payload) => {
                    if let Some(value) = payload.clone() {
                        results.insert(ready.id.clone(), value);
                    }
                    let (next, _) = reduce(
                        &state,
                        MilestoneEvent::MilestoneSucceeded {
                            milestone_id: ready.id.clone(),
                            result: payload,
                        },
                    );
                    state = next;
                }
                Err(error) if error.kind == ErrorKind::CancelRequested => {
                    let (next, _) = reduce(
                        &state,
                        MilestoneEvent::CancelRequested {
                            reason: error.message.clone(),
                        },
                    );
                    state = next;
                    break;
                }
                Err(error) => {
                    let can_retry = error.retryable
                        && state
                            .milestone(&ready.id)
                            .map(|m| m.can_retry())
                            .unwrap_or(false);

                    if can_retry {
                        let (next, _) = reduce(
                            &state,
                            MilestoneEvent::MilestoneRetryScheduled {
                                milestone_id: ready.id.clone(),
                                error: error.clone(),
                            },
                        );
                        state = next;

                        let recovery = audit
                            .recovery_context(fieldglass_audit::DEFAULT_RECOVERY_WINDOW)
                            .map_err(|e| ErrorRecord::new(ErrorKind::ToolFailure, e.to_string()))?;
                        let failed_milestone = state
                            .milestone(&ready.id)
                            .cloned()
                            .expect("milestone present: just reduced on its own id");
                        let replan_req = ReplanRequest {
                            failed_milestone: &failed_milestone,
                            error: &error,
                            recent_steps: &recovery.recent_steps,
                        };

                        match self.planner.plan(&task, Some(&replan_req)).await {
                            Ok(new_plan) => {
                                emit_event(
                                    Level::WARN,
                                    ProcessKind::Engine,
                                    ObservabilityEvent::new("coordinator.replan", "orchestrator")
                                        .with_task_id(&task.id)
                                        .with_milestone_id(&ready.id),
                                );
                                let (next, _) = reduce(&state, MilestoneEvent::RePlanned { milestones: new_plan });
                                state = next;
                            }
                            Err(planning_error) => {
                                let (next, _) = reduce(
                                    &state,
                                    MilestoneEvent::MilestoneFailed {
                                        milestone_id: ready.id.clone(),
                                        error: planning_error,
                                    },
                                );
                                state = next;
                                break;
                            }
                        }
                    } else {
                        let (next, _) = reduce(
                            &state,
                            MilestoneEvent::MilestoneFailed {
                                milestone_id: ready.id.clone(),
                                error: error.clone(),
                            },
                        );
                        state = next;
                        break;
                    }
                }
            }
        }

        Ok(finalize(&task.id, &state, &results))
    }
}

fn finalize(task_id: &str, state: &MilestoneSetState, results: &std::collections::HashMap<String, Value>) -> TaskResult {
    let milestones: Vec<MilestoneOutcome> = state
        .milestones
        .iter()
        .map(|m| MilestoneOutcome {
            milestone_id: m.id.clone(),
            status: m.status,
            attempts: m.attempts,
            result: results.get(&m.id).cloned(),
            error: m.error.clone(),
        })
        .collect();

    let status = match state.status {
        CoordinatorStatus::Succeeded => TaskStatus::Completed,
        CoordinatorStatus::Cancelled => TaskStatus::Cancelled,
        _ => TaskStatus::Failed,
    };

    let terminal_error = match status {
        TaskStatus::Completed => None,
        TaskStatus::Cancelled => Some(ErrorRecord::cancelled()),
        TaskStatus::Failed => milestones
            .iter()
            .find(|m| m.status == MilestoneStatus::Failed)
            .and_then(|m| m.error.clone())
            .or_else(|| Some(ErrorRecord::new(ErrorKind::PlanningFailure, "no milestone was ready to dispatch"))),
    };

    emit_event(
        Level::INFO,
        ProcessKind::Engine,
        ObservabilityEvent::new("coordinator.task.finished", "orchestrator")
            .with_task_id(task_id)
            .with_status(match status {
                TaskStatus::Completed => "completed",
                TaskStatus::Failed => "failed",
                TaskStatus::Cancelled => "cancelled",
            }),
    );

    TaskResult {
        status,
        milestones,
        terminal_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fieldglass_memory::InMemoryArchivalStore;
    use fieldglass_providers::{
        ScriptedActionBackend, ScriptedModelBackend, ScriptedPerceptionBackend, StaticAllowlist,
    };

    struct FixedPlanner {
        plans: std::sync::Mutex<std::collections::VecDeque<Result<Vec<fieldglass_types::Milestone>, ErrorRecord>>>,
    }

    impl FixedPlanner {
        fn new(plans: Vec<Result<Vec<fieldglass_types::Milestone>, ErrorRecord>>) -> Self {
            Self {
                plans: std::sync::Mutex::new(plans.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn plan(&self, _task: &Task, _replan: Option<&ReplanRequest<'_>>) -> Result<Vec<fieldglass_types::Milestone>, ErrorRecord> {
            self.plans.lock().unwrap().pop_front().expect("planner script exhausted")
        }
    }

    fn milestone(id: &str, deps: Vec<&str>) -> fieldglass_types::Milestone {
        fieldglass_types::Milestone::new(id, format!("do {id}"), 3)
            .with_success_criteria(vec!["done".to_string()])
            .with_dependencies(deps.into_iter().map(str::to_string).collect())
    }

    #[tokio::test]
    async fn two_milestone_plan_completes_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let planner = Arc::new(FixedPlanner::new(vec![Ok(vec![milestone("m1", vec![]), milestone("m2", vec!["m1"])])]));

        // Both milestones report completion on their first reasoning call, so
        // the engine never reaches `Verify` and the shared cache serves the
        // second milestone's `Observe` from the first milestone's capture.
        let collaborators = CoordinatorCollaborators {
            model: Arc::new(ScriptedModelBackend::ok(["the task is done", "the task is done"])),
            perception: Arc::new(ScriptedPerceptionBackend::ok(["looks fine"])),
            action: Arc::new(ScriptedActionBackend::new()),
            allowlist: Arc::new(StaticAllowlist::new(vec![("notes".to_string(), "/usr/bin/notes".to_string())])),
        };

        let coordinator = Coordinator::new(
            CoordinatorConfig::default(),
            collaborators,
            Arc::new(ToolCache::new(64)),
            Arc::new(InMemoryArchivalStore::new()),
            planner,
        );

        let task = Task::new("write a note");
        let result = coordinator
            .run_task(task, dir.path(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, TaskStatus::Completed);
        assert!(result.milestones.iter().all(|m| m.status == MilestoneStatus::Completed));
    }

    #[tokio::test]
    async fn non_retryable_failure_terminates_task_failed() {
        let dir = tempfile::tempdir().unwrap();
        let planner = Arc::new(FixedPlanner::new(vec![Ok(vec![milestone("m1", vec![])])]));

        let collaborators = CoordinatorCollaborators {
            model: Arc::new(ScriptedModelBackend::ok(["launch blocked.exe now"])),
            perception: Arc::new(ScriptedPerceptionBackend::ok(["blank screen"])),
            action: Arc::new(ScriptedActionBackend::new()),
            allowlist: Arc::new(StaticAllowlist::new(vec![])),
        };

        let coordinator = Coordinator::new(
            CoordinatorConfig::default(),
            collaborators,
            Arc::new(ToolCache::new(64)),
            Arc::new(InMemoryArchivalStore::new()),
            planner,
        );

        let task = Task::new("launch a blocked app");
        let result = coordinator
            .run_task(task, dir.path(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.milestones[0].status, MilestoneStatus::Failed);
        assert!(result.terminal_error.is_some());
    }

    #[tokio::test]
    async fn retryable_failure_triggers_replan_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let planner = Arc::new(FixedPlanner::new(vec![
            Ok(vec![milestone("m1", vec![])]),
            Ok(vec![milestone("m1", vec![])]),
        ]));

        let collaborators = CoordinatorCollaborators {
            model: Arc::new(ScriptedModelBackend::ok(["click the button", "the task is done"])),
            perception: Arc::new(ScriptedPerceptionBackend::ok(["blank screen"])),
            action: Arc::new(ScriptedActionBackend::failing(vec!["click"])),
            allowlist: Arc::new(StaticAllowlist::new(vec![])),
        };

        // A single failed attempt is enough to trigger replanning — disable
        // the engine's own internal retry so the scripted backends only
        // need to cover one pass per milestone attempt.
        let mut config = CoordinatorConfig::default();
        config.engine_config.max_retries = 0;

        let coordinator = Coordinator::new(
            config,
            collaborators,
            Arc::new(ToolCache::new(64)),
            Arc::new(InMemoryArchivalStore::new()),
            planner,
        );

        let task = Task::new("click a button");
        let result = coordinator
            .run_task(task, dir.path(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.milestones[0].attempts, 1);
    }
}
