//! CapabilityStore trait: read-only access to capability definitions.
//!
//! The store is an external collaborator. The registry reads it once per
//! request (or per cache window) and freezes the result into a snapshot.

use async_trait::async_trait;

use crate::capability::CapabilityDefinition;
use crate::error::StoreError;

/// A source of capability definitions.
///
/// Implementations: SQLite, TOML/JSON file, in-memory.
#[async_trait]
pub trait CapabilityStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "file", "memory").
    fn name(&self) -> &str;

    /// Read every definition. An empty result is not an error.
    async fn fetch_all(&self) -> std::result::Result<Vec<CapabilityDefinition>, StoreError>;

    /// Can the store be reached?
    async fn health_check(&self) -> std::result::Result<(), StoreError> {
        self.fetch_all().await.map(|_| ())
    }
}
