//! Multi-tier memory model: a narrow
//! `MemoryBackend` storage contract with three concrete implementations
//! (in-memory, append-log file, and an optional embedded SQLite store), and
//! the `MemoryTiers` aggregator that owns task/project/global stores.

pub mod append_log;
pub mod backend;
pub mod in_memory;
pub mod stores;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use append_log::AppendLogBackend;
pub use backend::{apply_query, Filter, FilterOp, MemoryBackend, OrderBy, Query};
pub use in_memory::InMemoryBackend;
pub use stores::{GlobalMemoryStore, MemoryTiers, ProjectMemoryStore, TaskMemoryStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
