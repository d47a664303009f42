//! The chat orchestrator.
//!
//! One request is one run of a small state machine:
//!
//! 1. **Freeze** the capability snapshot from the registry
//! 2. **Ask the model**, forwarding text as it streams in
//! 3. **If calls were requested**: run them, append the results, go to 2
//! 4. **If text only**: finish with a `done` event
//!
//! The run stops early on a model or registry failure, when the caller goes
//! away, or when the round-trip cap is hit.

pub mod orchestrator;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use orchestrator::{Disconnected, Orchestrator, OrchestratorSettings, RunOutcome, State};
pub use stream_event::StreamEvent;
