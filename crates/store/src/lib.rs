//! Capability stores for ToolRelay.
//!
//! Each backend implements [`toolrelay_core::CapabilityStore`] and returns
//! definitions sorted by name.

pub mod file_backend;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
