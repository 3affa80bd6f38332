//! The glue surface: wires the orchestrator (C6), the step graph engine
//! (C5), the tool cache (C2), and the archival store (C3 backing) behind
//! the two calls `run_task` and `cancel`. Grounded
//! on `tandem-core::EngineLoop`'s `CancellationRegistry`
//! pair: one shared registry of in-flight cancellation tokens keyed by
//! task id, consulted by a `cancel` call that never touches the running
//! task directly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fieldglass_cache::ToolCache;
use fieldglass_engine::EngineConfig;
use fieldglass_memory::ArchivalStore;
use fieldglass_observability::{emit_event, ObservabilityEvent, ProcessKind};
use fieldglass_orchestrator::{Coordinator, CoordinatorCollaborators, CoordinatorConfig, ModelPlanner, Planner};
use fieldglass_providers::{ActionBackend, ModelBackend, PerceptionBackend};
use fieldglass_types::{ErrorRecord, Task, TaskResult};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::options::RunOptions;
use crate::planner::FlatPlanner;

const CACHE_MAX_ENTRIES: usize = 512;

/// The three collaborators `run_task` actually drives per step. The
/// allowlist is supplied per call through [`RunOptions::app_allowlist`]
/// instead, since different tasks may permit different applications.
pub struct CoreCollaborators {
    pub model: Arc<dyn ModelBackend>,
    pub perception: Arc<dyn PerceptionBackend>,
    pub action: Arc<dyn ActionBackend>,
}

/// A reference to an in-flight (or already-finished) task, used only to
/// request cancellation. Carries no state of its own beyond the task id.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub task_id: String,
}

impl TaskHandle {
    pub fn for_task(task: &Task) -> Self {
        Self { task_id: task.id.clone() }
    }
}

/// The long-lived facade a caller constructs once and reuses across many
/// `run_task` calls. The cache and archival store are intentionally shared
/// across calls, per the concurrency model's "cache may be shared across
/// workers" policy.
pub struct Core {
    state_dir: PathBuf,
    archival: Arc<dyn ArchivalStore>,
    cache: Arc<ToolCache>,
    collaborators: CoreCollaborators,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl Core {
    pub fn new(state_dir: impl Into<PathBuf>, archival: Arc<dyn ArchivalStore>, collaborators: CoreCollaborators) -> Self {
        Self {
            state_dir: state_dir.into(),
            archival,
            cache: Arc::new(ToolCache::new(CACHE_MAX_ENTRIES)),
            collaborators,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `task` to completion (success, failure, or cancellation) and
    /// returns the aggregated [`TaskResult`]. Blocks the calling future
    /// until the task reaches a terminal state; cancel it from another
    /// task via [`Core::cancel`] using the handle returned by
    /// [`TaskHandle::for_task`].
    pub async fn run_task(&self, task: Task, options: RunOptions) -> Result<TaskResult, ErrorRecord> {
        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent::new("core.task.started", "core").with_task_id(&task.id),
        );

        let cancel = CancellationToken::new();
        self.in_flight.lock().expect("in_flight lock poisoned").insert(task.id.clone(), cancel.clone());

        let planner: Arc<dyn Planner> = if options.enable_planner {
            Arc::new(ModelPlanner::new(self.collaborators.model.clone(), options.max_milestone_attempts))
        } else {
            Arc::new(FlatPlanner::new(options.max_milestone_attempts))
        };

        let coordinator_collaborators = CoordinatorCollaborators {
            model: self.collaborators.model.clone(),
            perception: self.collaborators.perception.clone(),
            action: self.collaborators.action.clone(),
            allowlist: options.app_allowlist.clone(),
        };

        let config = CoordinatorConfig {
            engine_config: EngineConfig {
                max_steps: options.max_steps_per_milestone,
                max_retries: options.max_retries,
                checkpoint_every: options.checkpoint_every,
                enable_verification: options.enable_verification,
                ..EngineConfig::default()
            },
            max_milestone_attempts: options.max_milestone_attempts,
            memory_budget_bytes: options.active_context_budget,
        };

        let coordinator = Coordinator::new(config, coordinator_collaborators, self.cache.clone(), self.archival.clone(), planner);

        let task_id = task.id.clone();
        let result = coordinator.run_task(task, &self.state_dir, cancel).await;
        self.in_flight.lock().expect("in_flight lock poisoned").remove(&task_id);

        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent::new("core.task.finished", "core").with_task_id(&task_id),
        );
        result
    }

    /// Sets the cancel signal for a running task. A no-op if the task has
    /// already reached a terminal state or `handle` names an unknown task.
    pub fn cancel(&self, handle: &TaskHandle) {
        if let Some(token) = self.in_flight.lock().expect("in_flight lock poisoned").get(&handle.task_id) {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldglass_memory::InMemoryArchivalStore;
    use fieldglass_providers::{ScriptedActionBackend, ScriptedModelBackend, ScriptedPerceptionBackend, StaticAllowlist};
    use fieldglass_types::TaskStatus;

    fn core(dir: &std::path::Path) -> Core {
        Core::new(
            dir,
            Arc::new(InMemoryArchivalStore::new()),
            CoreCollaborators {
                model: Arc::new(ScriptedModelBackend::ok([
                    r#"{"milestones":[{"description":"write the note","success_criteria":["note visible"]}]}"#,
                    "the task is done",
                ])),
                perception: Arc::new(ScriptedPerceptionBackend::ok(["blank screen"])),
                action: Arc::new(ScriptedActionBackend::new()),
            },
        )
    }

    #[tokio::test]
    async fn run_task_completes_with_planner_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let c = core(dir.path());
        let task = Task::new("write a note");
        let options = RunOptions {
            app_allowlist: Arc::new(StaticAllowlist::new(Vec::new())),
            ..RunOptions::default()
        };

        let result = c.run_task(task, options).await.unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn run_task_with_planner_disabled_uses_flat_single_milestone() {
        let dir = tempfile::tempdir().unwrap();
        let collaborators = CoreCollaborators {
            model: Arc::new(ScriptedModelBackend::ok(["the task is done"])),
            perception: Arc::new(ScriptedPerceptionBackend::ok(["blank screen"])),
            action: Arc::new(ScriptedActionBackend::new()),
        };
        let c = Core::new(dir.path(), Arc::new(InMemoryArchivalStore::new()), collaborators);
        let task = Task::new("write a note");
        let options = RunOptions {
            enable_planner: false,
            app_allowlist: Arc::new(StaticAllowlist::new(Vec::new())),
            ..RunOptions::default()
        };

        let result = c.run_task(task, options).await.unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.milestones.len(), 1);
    }

    #[tokio::test]
    async fn cancel_on_unregistered_handle_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let c = core(dir.path());
        let task = Task::new("write a note");
        let handle = TaskHandle::for_task(&task);
        c.cancel(&handle); // no in_flight entry exists yet for this task id

        let options = RunOptions {
            app_allowlist: Arc::new(StaticAllowlist::new(Vec::new())),
            ..RunOptions::default()
        };
        let result = c.run_task(task, options).await.unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
    }
}
