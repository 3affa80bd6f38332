//! Deterministic collaborator doubles, driven by a pre-programmed sequence
//! of responses. Used by the engine and coordinator test suites to realize
//! the literal end-to-end scenarios without a live model or GUI.

use std::sync::Mutex;

use async_trait::async_trait;
use fieldglass_types::{ActionKind, ErrorRecord};
use serde_json::Value;

use crate::action_backend::{ActionBackend, ActionOutcome};
use crate::model::{GenerateOptions, ModelBackend};
use crate::perception::{CapturedImage, PerceptionBackend};

/// Either a successful reply or a typed failure, consumed once from the
/// script queue.
pub enum Scripted<T> {
    Ok(T),
    Err(ErrorRecord),
}

/// A `ModelBackend` that replays a fixed script of replies, one per call.
/// Panics if the script is exhausted — tests should script exactly as many
/// calls as the scenario makes.
pub struct ScriptedModelBackend {
    script: Mutex<std::collections::VecDeque<Scripted<String>>>,
}

impl ScriptedModelBackend {
    pub fn new(replies: impl IntoIterator<Item = Scripted<String>>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
        }
    }

    pub fn ok(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(replies.into_iter().map(|r| Scripted::Ok(r.into())))
    }
}

#[async_trait]
impl ModelBackend for ScriptedModelBackend {
    async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String, ErrorRecord> {
        let mut script = self.script.lock().expect("scripted model lock poisoned");
        match script.pop_front() {
            Some(Scripted::Ok(text)) => Ok(text),
            Some(Scripted::Err(err)) => Err(err),
            None => Err(ErrorRecord::new(
                fieldglass_types::ErrorKind::ModelFailure,
                "scripted model backend exhausted",
            )),
        }
    }
}

/// A `PerceptionBackend` returning a fixed image and fixed analysis replies.
pub struct ScriptedPerceptionBackend {
    analyses: Mutex<std::collections::VecDeque<Scripted<String>>>,
}

impl ScriptedPerceptionBackend {
    pub fn new(analyses: impl IntoIterator<Item = Scripted<String>>) -> Self {
        Self {
            analyses: Mutex::new(analyses.into_iter().collect()),
        }
    }

    pub fn ok(analyses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(analyses.into_iter().map(|a| Scripted::Ok(a.into())))
    }
}

#[async_trait]
impl PerceptionBackend for ScriptedPerceptionBackend {
    async fn capture(&self) -> Result<CapturedImage, ErrorRecord> {
        Ok(CapturedImage(vec![0u8; 4]))
    }

    async fn analyze(&self, _image: &CapturedImage, _query: &str) -> Result<String, ErrorRecord> {
        let mut analyses = self.analyses.lock().expect("scripted perception lock poisoned");
        match analyses.pop_front() {
            Some(Scripted::Ok(text)) => Ok(text),
            Some(Scripted::Err(err)) => Err(err),
            None => Ok("nothing new on screen".to_string()),
        }
    }
}

/// An `ActionBackend` that records every action it was asked to execute and
/// always reports success, unless told to fail a specific kind's label.
pub struct ScriptedActionBackend {
    pub executed: Mutex<Vec<ActionKind>>,
    fail_labels: Vec<&'static str>,
}

impl ScriptedActionBackend {
    pub fn new() -> Self {
        Self {
            executed: Mutex::new(Vec::new()),
            fail_labels: Vec::new(),
        }
    }

    pub fn failing(fail_labels: Vec<&'static str>) -> Self {
        Self {
            executed: Mutex::new(Vec::new()),
            fail_labels,
        }
    }
}

impl Default for ScriptedActionBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionBackend for ScriptedActionBackend {
    async fn execute(&self, action: &ActionKind) -> Result<ActionOutcome, ErrorRecord> {
        self.executed.lock().expect("scripted action lock poisoned").push(action.clone());
        if self.fail_labels.contains(&action.label()) {
            return Err(ErrorRecord::new(
                fieldglass_types::ErrorKind::ActionFailure,
                format!("scripted failure for {}", action.label()),
            ));
        }
        Ok(ActionOutcome {
            success: true,
            payload: Some(Value::Null),
        })
    }
}
