pub mod archival;
pub mod manager;
pub mod types;

pub use archival::{ArchivalStore, InMemoryArchivalStore, SqliteArchivalStore};
pub use manager::MemoryManager;
pub use types::{MemoryError, MemoryItem, MemoryResult, MemoryStats, MemoryTier};
