//! In-memory store, useful for testing and embedding.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use toolrelay_core::capability::CapabilityDefinition;
use toolrelay_core::error::StoreError;
use toolrelay_core::store::CapabilityStore;

/// A store that keeps definitions in a Vec.
///
/// It can be switched offline to simulate an unreachable backend, and it
/// counts reads so cache behaviour can be observed.
pub struct InMemoryStore {
    definitions: Arc<RwLock<Vec<CapabilityDefinition>>>,
    online: AtomicBool,
    reads: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_definitions(Vec::new())
    }

    pub fn with_definitions(definitions: Vec<CapabilityDefinition>) -> Self {
        Self {
            definitions: Arc::new(RwLock::new(definitions)),
            online: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
        }
    }

    /// Insert or replace a definition by name.
    pub async fn upsert(&self, definition: CapabilityDefinition) {
        let mut defs = self.definitions.write().await;
        defs.retain(|d| d.name != definition.name);
        defs.push(definition);
    }

    /// Remove a definition. Returns whether it existed.
    pub async fn remove(&self, name: &str) -> bool {
        let mut defs = self.definitions.write().await;
        let before = defs.len();
        defs.retain(|d| d.name != name);
        defs.len() < before
    }

    /// Simulate the backing store going down or coming back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// How many times `fetch_all` has been called.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_all(&self) -> Result<Vec<CapabilityDefinition>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".into()));
        }
        let mut defs = self.definitions.read().await.clone();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }
}
