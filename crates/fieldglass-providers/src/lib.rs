pub mod action_backend;
pub mod model;
pub mod perception;
pub mod scripted;

pub use action_backend::{ActionBackend, ActionOutcome, AppAllowlist, StaticAllowlist};
pub use model::{GenerateOptions, ModelBackend};
pub use perception::{CapturedImage, PerceptionBackend};
pub use scripted::{Scripted, ScriptedActionBackend, ScriptedModelBackend, ScriptedPerceptionBackend};
