//! Capability registry and executor for ToolRelay.
//!
//! The [`registry::ToolRegistry`] turns a [`toolrelay_core::CapabilityStore`]
//! into frozen per-request snapshots. The [`executor::HttpExecutor`] turns one
//! model-issued call into one outbound HTTP interaction, with argument
//! validation, templating, auth, a timeout and retries.

pub mod auth;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod template;

pub use executor::{ExecutorSettings, HttpExecutor};
pub use registry::{CapabilitySnapshot, ToolRegistry, to_model_schema};
