//! Request-scoped context passed explicitly through every stage of a request.

use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Correlation id, tracing span and cancellation signal for one request.
///
/// Cloning is cheap; clones share the same span and token.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub span: Span,
    pub cancel: CancellationToken,
}

impl RequestContext {
    /// Build a context around an existing correlation id.
    pub fn new(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let span = tracing::info_span!("request", request_id = %request_id);
        Self {
            request_id,
            span,
            cancel: CancellationToken::new(),
        }
    }

    /// Build a context with a freshly generated UUID v4 id.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
