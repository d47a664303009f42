//! File store: capability definitions in a TOML or JSON file.
//!
//! The file is re-read on every fetch so edits take effect at the next
//! registry refresh. TOML files hold a `[[capabilities]]` array; JSON files
//! hold either a bare array or `{ "capabilities": [...] }`.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use toolrelay_core::capability::CapabilityDefinition;
use toolrelay_core::error::StoreError;
use toolrelay_core::store::CapabilityStore;
use tracing::debug;

#[derive(Deserialize)]
struct CapabilityFile {
    #[serde(default)]
    capabilities: Vec<CapabilityDefinition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonFile {
    List(Vec<CapabilityDefinition>),
    Wrapped(CapabilityFile),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

/// A store backed by a single definitions file.
pub struct FileStore {
    path: PathBuf,
    format: Format,
}

impl FileStore {
    /// Create a file store. `.json` files are parsed as JSON, anything else as TOML.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Toml,
        };
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, content: &str) -> Result<Vec<CapabilityDefinition>, StoreError> {
        let invalid = |reason: String| StoreError::InvalidDefinition {
            name: self.path.display().to_string(),
            reason,
        };
        match self.format {
            Format::Toml => toml::from_str::<CapabilityFile>(content)
                .map(|f| f.capabilities)
                .map_err(|e| invalid(e.to_string())),
            Format::Json => serde_json::from_str::<JsonFile>(content)
                .map(|f| match f {
                    JsonFile::List(defs) => defs,
                    JsonFile::Wrapped(file) => file.capabilities,
                })
                .map_err(|e| invalid(e.to_string())),
        }
    }
}

#[async_trait]
impl CapabilityStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_all(&self) -> Result<Vec<CapabilityDefinition>, StoreError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            StoreError::Unavailable(format!("cannot read {}: {e}", self.path.display()))
        })?;

        let mut defs = self.parse(&content)?;
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(path = %self.path.display(), count = defs.len(), "Loaded capability file");
        Ok(defs)
    }
}
