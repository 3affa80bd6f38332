//! The step graph engine (C5): Observe -> Reason -> Act -> Verify -> Decide,
//! with Recover/Terminal edges. One `StepGraphEngine::run` call drives a
//! single `AgentState` to a terminal outcome.

use std::sync::Arc;

use chrono::Utc;
use fieldglass_audit::{AuditTrail, Checkpoint};
use fieldglass_cache::{InvalidationRules, ToolCache};
use fieldglass_memory::MemoryManager;
use fieldglass_observability::{emit_event, ObservabilityEvent, ProcessKind};
use fieldglass_providers::{ActionBackend, AppAllowlist, GenerateOptions, ModelBackend, PerceptionBackend};
use fieldglass_types::{ActionKind, ActionRecord, ErrorKind, ErrorRecord, StepRecord};
use serde_json::Value;
use tracing::Level;

use crate::hooks::HookRegistry;
use crate::intent::parse_intent;
use crate::retry::BackoffPolicy;
use crate::state::AgentState;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub max_steps: u32,
    pub max_retries: u32,
    pub consecutive_failure_threshold: u32,
    pub checkpoint_every: u32,
    pub enable_verification: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 15,
            max_retries: 3,
            consecutive_failure_threshold: 5,
            checkpoint_every: 5,
            enable_verification: true,
        }
    }
}

/// The collaborator set the engine drives: model, perception, action, and
/// the allowlist `Act` consults for `LaunchApp`.
pub struct Collaborators {
    pub model: Arc<dyn ModelBackend>,
    pub perception: Arc<dyn PerceptionBackend>,
    pub action: Arc<dyn ActionBackend>,
    pub allowlist: Arc<dyn AppAllowlist>,
}

enum Node {
    Observe,
    Reason { observation: String },
    Act { observation: String, reasoning: String },
    Verify { observation: String, reasoning: String, action: ActionRecord },
    Decide { observation: String, reasoning: String, action: ActionRecord },
    Recover { error: ErrorRecord, attempt: u32 },
    Terminal(TerminalOutcome),
}

enum TerminalOutcome {
    Completed(Option<Value>),
    Failed(ErrorRecord),
    Cancelled,
}

pub struct StepGraphEngine {
    config: EngineConfig,
    collaborators: Collaborators,
    cache: Arc<ToolCache>,
    invalidation_rules: InvalidationRules,
    hooks: HookRegistry,
    backoff: BackoffPolicy,
}

impl StepGraphEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators, cache: Arc<ToolCache>) -> Self {
        Self {
            config,
            collaborators,
            cache,
            invalidation_rules: InvalidationRules::default(),
            hooks: HookRegistry::new(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub async fn run(
        &self,
        state: &mut AgentState,
        audit: &AuditTrail,
        memory: &MemoryManager,
    ) -> Result<Option<Value>, ErrorRecord> {
        let mut node = Node::Observe;

        loop {
            if state.cancel_signal.is_cancelled() {
                node = Node::Terminal(TerminalOutcome::Cancelled);
            }

            node = match node {
                Node::Observe => self.observe(state).await,
                Node::Reason { observation } => self.reason(state, audit, memory, observation).await,
                Node::Act { observation, reasoning } => self.act(state, observation, reasoning).await,
                Node::Verify { observation, reasoning, action } => {
                    self.verify(state, observation, reasoning, action).await
                }
                Node::Decide { observation, reasoning, action } => {
                    self.decide(state, audit, observation, reasoning, action).await
                }
                Node::Recover { error, attempt } => self.recover(state, audit, error, attempt).await,
                Node::Terminal(outcome) => return self.finalize(state, audit, outcome),
            };
        }
    }

    async fn observe(&self, state: &AgentState) -> Node {
        if state.cancel_signal.is_cancelled() {
            return Node::Terminal(TerminalOutcome::Cancelled);
        }

        let query = "describe the screen";
        let key = fieldglass_cache::cache_key("analyze_screen", &serde_json::json!({ "query": query }));
        if let Some(cached) = self.cache.get(&key) {
            if let Some(observation) = cached.as_str() {
                return Node::Reason { observation: observation.to_string() };
            }
        }

        match self.collaborators.perception.capture().await {
            Ok(image) => match self.collaborators.perception.analyze(&image, query).await {
                Ok(observation) => {
                    self.cache.put(
                        key,
                        serde_json::Value::String(observation.clone()),
                        std::time::Duration::from_secs(30),
                        vec![fieldglass_cache::SCREEN_TAG.to_string()],
                    );
                    Node::Reason { observation }
                }
                Err(err) => Node::Recover { error: err, attempt: 1 },
            },
            Err(err) => Node::Recover { error: err, attempt: 1 },
        }
    }

    async fn reason(&self, state: &AgentState, audit: &AuditTrail, memory: &MemoryManager, observation: String) -> Node {
        if state.cancel_signal.is_cancelled() {
            return Node::Terminal(TerminalOutcome::Cancelled);
        }

        let active_memory = memory.read_active().unwrap_or_default();
        let history_excerpt: Vec<&str> = state.history.iter().rev().take(3).map(|r| r.reasoning.as_str()).collect();

        // Reasoning after at least one recovered failure is a retry attempt:
        // fold the last few audit records and the latest checkpoint into the
        // prompt so the model sees what actually happened, not just that it
        // failed.
        let recovery_note = if state.consecutive_failures > 0 {
            audit
                .recovery_context(fieldglass_audit::DEFAULT_RECOVERY_WINDOW)
                .ok()
                .map(|ctx| {
                    format!(
                        "\nrecovery_context: last {} step(s), checkpoint_step={:?}",
                        ctx.recent_steps.len(),
                        ctx.checkpoint.map(|c| c.step_index)
                    )
                })
                .unwrap_or_default()
        } else {
            String::new()
        };

        let prompt = format!(
            "task: {}\nmilestone: {:?}\nobservation: {observation}\nrecent_history: {:?}\nactive_memory: {} items{recovery_note}",
            state.task.description,
            state.milestone_id,
            history_excerpt,
            active_memory.len()
        );

        let Some(prompt) = self.hooks.run_before_reason(prompt).await else {
            return Node::Terminal(TerminalOutcome::Failed(ErrorRecord::policy_violation(
                "before_reason hook cancelled the step",
            )));
        };

        match self.collaborators.model.generate(&prompt, &GenerateOptions::default()).await {
            Ok(reasoning) => Node::Act { observation, reasoning },
            Err(err) => Node::Recover { error: err, attempt: 1 },
        }
    }

    async fn act(&self, state: &mut AgentState, observation: String, reasoning: String) -> Node {
        if state.cancel_signal.is_cancelled() {
            return Node::Terminal(TerminalOutcome::Cancelled);
        }

        let context_text = state.task.context_text("text");
        let parsed = parse_intent(&reasoning, context_text.as_deref(), &state.task.description, self.collaborators.allowlist.as_ref());

        let action_kind = match parsed {
            Ok(kind) => kind,
            Err(err) => return Node::Recover { error: err, attempt: 1 },
        };

        if matches!(action_kind, ActionKind::NoAction { .. }) {
            state.consecutive_no_actions += 1;
        } else {
            state.consecutive_no_actions = 0;
        }

        let action_kind = if state.consecutive_no_actions >= 2 {
            state.consecutive_no_actions = 0;
            ActionKind::AnalyzeScreen { query: "break idle loop".to_string() }
        } else {
            action_kind
        };

        let Some(action_kind) = self.hooks.run_before_act(action_kind).await else {
            return Node::Terminal(TerminalOutcome::Failed(ErrorRecord::policy_violation(
                "before_act hook cancelled the step",
            )));
        };

        if matches!(action_kind, ActionKind::TaskComplete) {
            let record = ActionRecord::new(action_kind).succeeded(None);
            return Node::Decide { observation, reasoning, action: record };
        }

        if action_kind.is_mutating() {
            self.cache.invalidate(&self.invalidation_rules.tags_for(action_kind.label()));
        }

        match self.collaborators.action.execute(&action_kind).await {
            Ok(outcome) => {
                let record = ActionRecord { action: action_kind, success: outcome.success, payload: outcome.payload };
                if self.config.enable_verification {
                    Node::Verify { observation, reasoning, action: record }
                } else {
                    Node::Decide { observation, reasoning, action: record }
                }
            }
            Err(err) => Node::Recover { error: err, attempt: 1 },
        }
    }

    async fn verify(&self, state: &AgentState, observation: String, reasoning: String, action: ActionRecord) -> Node {
        if state.cancel_signal.is_cancelled() {
            return Node::Terminal(TerminalOutcome::Cancelled);
        }
        if !action.success {
            return Node::Recover {
                error: ErrorRecord::new(ErrorKind::VerificationFailure, "action backend reported failure"),
                attempt: 1,
            };
        }
        match self
            .collaborators
            .model
            .generate(
                &format!("confirm the action '{:?}' achieved its intended effect", action.action),
                &GenerateOptions::default(),
            )
            .await
        {
            Ok(confirmation) if confirmation.to_lowercase().contains("no") => Node::Recover {
                error: ErrorRecord::new(ErrorKind::VerificationFailure, "model rejected post-action state"),
                attempt: 1,
            },
            Ok(_) => Node::Decide { observation, reasoning, action },
            Err(err) => Node::Recover { error: err, attempt: 1 },
        }
    }

    async fn decide(
        &self,
        state: &mut AgentState,
        audit: &AuditTrail,
        observation: String,
        reasoning: String,
        action: ActionRecord,
    ) -> Node {
        let record = StepRecord {
            step_index: state.step_index,
            observation,
            reasoning,
            action: Some(action.clone()),
            confidence: if action.success { 0.9 } else { 0.3 },
            timestamp: Utc::now(),
            error: None,
        };
        if let Err(err) = audit.append_step(&record) {
            tracing::warn!(error = %err, "failed to append audit record");
        }
        state.history.push(record);
        self.hooks.fire_after_step(state.step_index, None).await;
        emit_event(
            Level::DEBUG,
            ProcessKind::Engine,
            ObservabilityEvent::new("engine.node", "step_graph").with_step(state.step_index),
        );

        state.step_index += 1;
        state.consecutive_failures = 0;

        if AuditTrail::checkpoint_due(state.step_index, self.config.checkpoint_every, false) {
            let _ = audit.checkpoint(&Checkpoint {
                task_id: state.task.id.clone(),
                milestone_id: state.milestone_id.clone(),
                step_index: state.step_index,
                active_memory_ids: Vec::new(),
                consecutive_failures: state.consecutive_failures,
                written_at: Utc::now(),
            });
        }

        if matches!(action.action, ActionKind::TaskComplete) {
            return Node::Terminal(TerminalOutcome::Completed(action.payload));
        }
        if state.budget_exhausted() {
            return Node::Terminal(TerminalOutcome::Failed(ErrorRecord::budget_exhausted(format!(
                "reached max_steps={}",
                state.max_steps
            ))));
        }
        Node::Observe
    }

    async fn recover(&self, state: &mut AgentState, audit: &AuditTrail, error: ErrorRecord, attempt: u32) -> Node {
        state.consecutive_failures += 1;
        let attempt = attempt.max(state.consecutive_failures);
        if state.consecutive_failures >= self.config.consecutive_failure_threshold {
            return Node::Terminal(TerminalOutcome::Failed(error));
        }
        if !error.retryable || attempt > self.config.max_retries {
            return Node::Terminal(TerminalOutcome::Failed(error));
        }

        let delay = self.backoff.delay_for(attempt);
        let error_kind = format!("{:?}", error.kind);
        let recovery_detail = if attempt > 1 {
            audit
                .recovery_context(fieldglass_audit::DEFAULT_RECOVERY_WINDOW)
                .ok()
                .map(|ctx| format!("{} recent step(s) available for retry context", ctx.recent_steps.len()))
        } else {
            None
        };
        let mut recover_event = ObservabilityEvent::new("engine.recover", "step_graph")
            .with_status("retrying")
            .with_error_kind(&error_kind);
        if let Some(detail) = recovery_detail.as_deref() {
            recover_event = recover_event.with_detail(detail);
        }
        emit_event(Level::WARN, ProcessKind::Engine, recover_event);
        tokio::time::sleep(delay).await;

        if state.cancel_signal.is_cancelled() {
            return Node::Terminal(TerminalOutcome::Cancelled);
        }
        Node::Observe
    }

    fn finalize(
        &self,
        state: &mut AgentState,
        audit: &AuditTrail,
        outcome: TerminalOutcome,
    ) -> Result<Option<Value>, ErrorRecord> {
        let _ = audit.checkpoint(&Checkpoint {
            task_id: state.task.id.clone(),
            milestone_id: state.milestone_id.clone(),
            step_index: state.step_index,
            active_memory_ids: Vec::new(),
            consecutive_failures: state.consecutive_failures,
            written_at: Utc::now(),
        });

        match outcome {
            TerminalOutcome::Completed(payload) => {
                state.result = payload.clone();
                Ok(payload)
            }
            TerminalOutcome::Failed(err) => {
                state.terminal_error = Some(err.clone());
                Err(err)
            }
            TerminalOutcome::Cancelled => {
                let err = ErrorRecord::cancelled();
                state.terminal_error = Some(err.clone());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldglass_memory::InMemoryArchivalStore;
    use fieldglass_providers::{Scripted, ScriptedActionBackend, ScriptedModelBackend, ScriptedPerceptionBackend, StaticAllowlist};
    use fieldglass_types::Task;
    use tokio_util::sync::CancellationToken;

    fn engine(model: ScriptedModelBackend, action: ScriptedActionBackend) -> StepGraphEngine {
        let collaborators = Collaborators {
            model: Arc::new(model),
            perception: Arc::new(ScriptedPerceptionBackend::ok(["nothing new"; 10])),
            action: Arc::new(action),
            allowlist: Arc::new(StaticAllowlist::names(["notes"])),
        };
        StepGraphEngine::new(
            EngineConfig { enable_verification: false, ..Default::default() },
            collaborators,
            Arc::new(ToolCache::new(16)),
        )
    }

    async fn trail() -> (tempfile::TempDir, AuditTrail) {
        let dir = tempfile::tempdir().unwrap();
        let trail = AuditTrail::open(dir.path(), "task-1").unwrap();
        (dir, trail)
    }

    #[tokio::test]
    async fn task_complete_terminates_successfully() {
        let model = ScriptedModelBackend::ok(["the task is now done"]);
        let engine = engine(model, ScriptedActionBackend::new());
        let (_dir, audit) = trail().await;
        let memory = MemoryManager::new(1024, Arc::new(InMemoryArchivalStore::new()));

        let mut state = AgentState::new(Task::new("say hello"), None, 15, CancellationToken::new());
        let result = engine.run(&mut state, &audit, &memory).await;
        assert!(result.is_ok());
        assert!(state.terminal_error.is_none());
    }

    #[tokio::test]
    async fn non_retryable_policy_violation_terminates_failed() {
        let model = ScriptedModelBackend::ok(["please launch malware.exe now"]);
        let engine = engine(model, ScriptedActionBackend::new());
        let (_dir, audit) = trail().await;
        let memory = MemoryManager::new(1024, Arc::new(InMemoryArchivalStore::new()));

        let mut state = AgentState::new(Task::new("launch an app"), None, 15, CancellationToken::new());
        let err = engine.run(&mut state, &audit, &memory).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PolicyViolation);
    }

    #[tokio::test]
    async fn cancellation_observed_before_model_call() {
        let model = ScriptedModelBackend::ok(["click at 1, 1"]);
        let engine = engine(model, ScriptedActionBackend::new());
        let (_dir, audit) = trail().await;
        let memory = MemoryManager::new(1024, Arc::new(InMemoryArchivalStore::new()));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut state = AgentState::new(Task::new("do nothing"), None, 15, cancel);
        let err = engine.run(&mut state, &audit, &memory).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CancelRequested);
    }

    #[tokio::test]
    async fn budget_exhaustion_terminates_failed() {
        let replies: Vec<Scripted<String>> = (0..3).map(|_| Scripted::Ok("click at 5, 5".to_string())).collect();
        let model = ScriptedModelBackend::new(replies);
        let engine = engine(model, ScriptedActionBackend::new());
        let (_dir, audit) = trail().await;
        let memory = MemoryManager::new(1024, Arc::new(InMemoryArchivalStore::new()));

        let mut state = AgentState::new(Task::new("keep clicking"), None, 3, CancellationToken::new());
        let err = engine.run(&mut state, &audit, &memory).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BudgetExhausted);
        assert_eq!(state.history.len(), 3);
    }

    #[tokio::test]
    async fn mutating_action_invalidates_cache_before_next_observe() {
        let replies = vec![
            Scripted::Ok("analyze the screen".to_string()),
            Scripted::Ok("click at 10, 10".to_string()),
            Scripted::Ok("the task is now done".to_string()),
        ];
        let model = ScriptedModelBackend::new(replies);
        let engine = engine(model, ScriptedActionBackend::new());
        let (_dir, audit) = trail().await;
        let memory = MemoryManager::new(1024, Arc::new(InMemoryArchivalStore::new()));

        let cache_key = fieldglass_cache::cache_key("analyze_screen", &serde_json::json!({"query": "describe the screen"}));
        engine.cache.put(&cache_key, serde_json::json!("stale"), std::time::Duration::from_secs(60), vec![fieldglass_cache::SCREEN_TAG.to_string()]);

        let mut state = AgentState::new(Task::new("click then verify"), None, 15, CancellationToken::new());
        let _ = engine.run(&mut state, &audit, &memory).await;

        assert!(engine.cache.get(&cache_key).is_none(), "click should have invalidated the screen-tagged entry");
    }
}
