//! # ToolRelay Core
//!
//! Domain types, traits, and error definitions for the ToolRelay
//! tool-orchestration runtime. Nothing here talks to the network: it defines
//! the model that every other crate implements against.
//!
//! ## Layout
//!
//! - [`provider`]: the model backend abstraction
//! - [`store`] and [`capability`]: where capability definitions come from and
//!   how a single call is executed
//! - [`message`]: the conversation buffer and its pairing rule
//! - [`context`]: the request-scoped correlation id, span and cancel token

pub mod capability;
pub mod context;
pub mod error;
pub mod message;
pub mod provider;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use capability::{
    AuthScheme, Backoff, CallOutcome, CapabilityCallRequest, CapabilityCallResult,
    CapabilityDefinition, CapabilityExecutor, Endpoint, HttpMethod, ResponseFormat, RetryPolicy,
};
pub use context::RequestContext;
pub use error::{Error, ErrorKind, ProviderError, Result, StoreError, ToolError};
pub use message::{Conversation, Message, MessageToolCall, PairingError, Role};
pub use provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage,
};
pub use store::CapabilityStore;
