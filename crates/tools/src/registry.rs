//! Tool Registry: capability definitions as frozen, model-callable snapshots.
//!
//! The orchestrator calls [`ToolRegistry::load_capabilities`] once per
//! request. The returned [`CapabilitySnapshot`] is immutable and cheap to
//! clone, so every stage of the request sees the same capability set even if
//! the store changes underneath.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use toolrelay_core::capability::CapabilityDefinition;
use toolrelay_core::error::StoreError;
use toolrelay_core::provider::ToolDefinition;
use toolrelay_core::store::CapabilityStore;
use tracing::{debug, warn};

use crate::schema;

/// An immutable capability set, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySnapshot {
    definitions: Arc<[CapabilityDefinition]>,
}

impl CapabilitySnapshot {
    /// Validate and freeze a set of definitions.
    ///
    /// Fails if any name is empty or repeated, or if any parameter schema does
    /// not compile. A snapshot is never partially built.
    pub fn new(mut definitions: Vec<CapabilityDefinition>) -> Result<Self, StoreError> {
        definitions.sort_by(|a, b| a.name.cmp(&b.name));

        let mut seen = HashSet::with_capacity(definitions.len());
        for def in &definitions {
            if def.name.trim().is_empty() {
                return Err(StoreError::InvalidDefinition {
                    name: def.name.clone(),
                    reason: "name is empty".into(),
                });
            }
            if !seen.insert(def.name.as_str()) {
                return Err(StoreError::DuplicateName(def.name.clone()));
            }
            schema::compile(&def.parameter_schema).map_err(|reason| StoreError::InvalidDefinition {
                name: def.name.clone(),
                reason: format!("parameter schema: {reason}"),
            })?;
        }

        Ok(Self {
            definitions: definitions.into(),
        })
    }

    /// Look up a capability by name.
    pub fn get(&self, name: &str) -> Option<&CapabilityDefinition> {
        self.definitions
            .binary_search_by(|d| d.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.definitions[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityDefinition> {
        self.definitions.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// The function-calling schema for this snapshot.
    pub fn to_model_schema(&self) -> Vec<ToolDefinition> {
        to_model_schema(&self.definitions)
    }
}

/// Project definitions into the function-calling schema the provider expects.
pub fn to_model_schema(definitions: &[CapabilityDefinition]) -> Vec<ToolDefinition> {
    definitions.iter().map(CapabilityDefinition::to_definition).collect()
}

/// Reads capability definitions from a store, with a short-lived cache.
pub struct ToolRegistry {
    store: Arc<dyn CapabilityStore>,
    ttl: Duration,
    cache: RwLock<Option<(Instant, CapabilitySnapshot)>>,
}

impl ToolRegistry {
    /// A zero `ttl` reads the store on every call.
    pub fn new(store: Arc<dyn CapabilityStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// A registry without caching.
    pub fn uncached(store: Arc<dyn CapabilityStore>) -> Self {
        Self::new(store, Duration::ZERO)
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// The current capability snapshot.
    ///
    /// Any store failure surfaces as an error (mapped to
    /// `RegistryUnavailable`); an empty set is not an error. The cache lock
    /// is only held to read or replace the entry, never across a store read.
    pub async fn load_capabilities(&self) -> Result<CapabilitySnapshot, StoreError> {
        if self.ttl.is_zero() {
            return self.fetch().await;
        }

        if let Some((loaded_at, snapshot)) = self.cache.read().await.as_ref()
            && loaded_at.elapsed() < self.ttl
        {
            debug!(count = snapshot.len(), "Capability snapshot served from cache");
            return Ok(snapshot.clone());
        }

        let snapshot = self.fetch().await?;
        *self.cache.write().await = Some((Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }

    async fn fetch(&self) -> Result<CapabilitySnapshot, StoreError> {
        let definitions = self.store.fetch_all().await.map_err(|e| {
            warn!(store = self.store.name(), error = %e, "Capability store read failed");
            e
        })?;
        let snapshot = CapabilitySnapshot::new(definitions).map_err(|e| {
            warn!(store = self.store.name(), error = %e, "Rejected capability set");
            e
        })?;

        debug!(
            store = self.store.name(),
            count = snapshot.len(),
            "Capability snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Drop the cached snapshot so the next load reads the store.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}
