//! Model provider implementations for ToolRelay.
//!
//! All providers implement the `toolrelay_core::provider::Provider` trait.
//! The router selects the provider based on configuration.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};
