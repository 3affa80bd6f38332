pub mod graph;
pub mod hooks;
pub mod intent;
pub mod retry;
pub mod state;

pub use graph::{Collaborators, EngineConfig, StepGraphEngine};
pub use hooks::{EngineHook, HookRegistry, HookResult};
pub use intent::parse_intent;
pub use retry::BackoffPolicy;
pub use state::AgentState;
