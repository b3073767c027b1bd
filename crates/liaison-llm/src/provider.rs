//! Provider trait and error taxonomy.
//!
//! The workflow engine invokes the provider once per stage: two
//! structured-result calls and one token stream. Implementors must be
//! `Send + Sync`; the stream type is boxed so the sequencer can consume
//! any backend uniformly.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use liaison_core::session::{Direction, Gap, Perspective};

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Boxed stream of translation output chunks.
pub type TokenStream = Pin<Box<dyn Stream<Item = ProviderResult<TokenChunk>> + Send>>;

/// One unit of streaming translation output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenChunk {
    /// Incremental text.
    Delta(String),
    /// End marker: the stream terminated cleanly. No further chunks follow.
    Done,
}

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP request failed (includes timeouts and connect errors).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SSE stream decoding failed.
    #[error("SSE parse error: {message}")]
    SseParse {
        /// Error description.
        message: String,
    },

    /// Authentication failed (missing key, expired token, 401/403).
    #[error("auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// Rate limited by the provider.
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested retry delay in milliseconds.
        retry_after_ms: u64,
    },

    /// Provider returned an API error.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
        /// Whether this error can be retried.
        retryable: bool,
    },

    /// Response was empty or did not match the expected structure.
    #[error("malformed provider response: {message}")]
    Malformed {
        /// Error description.
        message: String,
    },

    /// The call observed cancellation and stopped.
    #[error("provider call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether the sequencer may retry the stage after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s == reqwest::StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                    })
            }
            Self::RateLimited { .. } => true,
            Self::Api { retryable, .. } => *retryable,
            Self::Json(_)
            | Self::SseParse { .. }
            | Self::Auth { .. }
            | Self::Malformed { .. }
            | Self::Cancelled => false,
        }
    }

    /// Suggested retry delay in milliseconds, if the provider gave one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Stable category string for event emission. Never raw provider text.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(_) => "network",
            Self::Json(_) | Self::SseParse { .. } | Self::Malformed { .. } => "parse",
            Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limit",
            Self::Api { .. } => "api",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Structured result of the gap-analysis stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GapAnalysis {
    /// Detected gaps (may be empty).
    pub gaps: Vec<Gap>,
    /// Improvement suggestions for the author.
    pub suggestions: Vec<String>,
}

/// Inputs for the streaming translation call. The sequencer fills this
/// from committed checkpoint fields only; translation never re-derives
/// what earlier stages produced.
#[derive(Clone, Debug)]
pub struct TranslateRequest {
    /// Original input text.
    pub content: String,
    /// Optional caller-supplied context block.
    pub context: Option<String>,
    /// Perspective committed by the detection stage.
    pub perspective: Perspective,
    /// Gaps committed by the analysis stage.
    pub gaps: Vec<Gap>,
    /// Requested direction.
    pub direction: Direction,
}

/// Language-capability provider: one implementation per backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend identifier (e.g. `"openai"`, `"qwen"`).
    fn name(&self) -> &str;

    /// Concrete model in use.
    fn model(&self) -> &str;

    /// Classify which role's perspective wrote the text.
    async fn classify_perspective(&self, content: &str) -> ProviderResult<Perspective>;

    /// Detect information gaps in the text, given the committed
    /// perspective and the requested direction.
    async fn analyze_gaps(
        &self,
        content: &str,
        perspective: Perspective,
        direction: Direction,
    ) -> ProviderResult<GapAnalysis>;

    /// Produce a translation as an incremental token stream, terminated
    /// by [`TokenChunk::Done`] or an error.
    async fn translate_stream(&self, request: &TranslateRequest) -> ProviderResult<TokenStream>;
}
