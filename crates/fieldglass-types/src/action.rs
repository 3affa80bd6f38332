use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of input actions the engine may execute. Adding a kind is a
/// compile-time change; the engine and the intent parser match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    LaunchApp { name: String },
    Click { x: Option<i32>, y: Option<i32>, button: MouseButton },
    TypeText { text: String },
    PressKey { key: String },
    Hotkey { keys: Vec<String> },
    Scroll { dy: i32 },
    Wait { seconds: f64 },
    AnalyzeScreen { query: String },
    NoAction { reason: String },
    TaskComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl ActionKind {
    /// Mutating actions are the ones the cache invalidation rules key on —
    /// every input action except observation-only ones.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ActionKind::Click { .. }
                | ActionKind::TypeText { .. }
                | ActionKind::PressKey { .. }
                | ActionKind::Hotkey { .. }
                | ActionKind::Scroll { .. }
                | ActionKind::LaunchApp { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::LaunchApp { .. } => "launch_app",
            ActionKind::Click { .. } => "click",
            ActionKind::TypeText { .. } => "type_text",
            ActionKind::PressKey { .. } => "press_key",
            ActionKind::Hotkey { .. } => "hotkey",
            ActionKind::Scroll { .. } => "scroll",
            ActionKind::Wait { .. } => "wait",
            ActionKind::AnalyzeScreen { .. } => "analyze_screen",
            ActionKind::NoAction { .. } => "no_action",
            ActionKind::TaskComplete => "task_complete",
        }
    }
}

/// An executed action together with the backend's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: ActionKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ActionRecord {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            success: false,
            payload: None,
        }
    }

    pub fn succeeded(mut self, payload: Option<Value>) -> Self {
        self.success = true;
        self.payload = payload;
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}
