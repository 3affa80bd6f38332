//! The planner/worker coordinator (C6): decomposes a task into milestones,
//! dispatches each to the step graph engine in dependency order, and
//! re-plans around retryable milestone failures. The status transition
//! table lives in [`reducer`], grounded on
//! `tandem-orchestrator::reducer`/`model` pair, kept separate from the I/O
//! in [`coordinator`] that drives it.

pub mod coordinator;
pub mod model;
pub mod planner;
pub mod reducer;

pub use coordinator::{Coordinator, CoordinatorCollaborators, CoordinatorConfig};
pub use model::{CoordinatorCommand, CoordinatorStatus, MilestoneEvent, MilestoneSetState};
pub use planner::{ModelPlanner, Planner, ReplanRequest};
pub use reducer::reduce;
