//! Adapter Traits
//!
//! The contract every model backend implements, plus the request and
//! response shapes that flow through it. Adapters only know how to talk to
//! their backend; selection, caching and failover live in the strategy core.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::descriptor::ModelDescriptor;

// ============================================================================
// Adapter Trait
// ============================================================================

/// A callable binding to one backend model or service
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Declared capabilities of this adapter
    fn capabilities(&self) -> ModelDescriptor;

    /// Probe whether the backend is reachable right now
    async fn is_available(&self) -> bool;

    /// Invoke the backend
    async fn call(&self, request: &AdapterRequest) -> Result<RawResponse, AdapterError>;
}

/// Adapter-side failures
#[derive(Clone, Debug, Error, PartialEq)]
pub enum AdapterError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// Request failed
    #[error("Request failed: {0}")]
    RequestFailed(String),
    /// Timeout
    #[error("Request timed out")]
    Timeout,
    /// Rate limited
    #[error("Rate limited")]
    RateLimited {
        /// Suggested wait before retrying
        retry_after_ms: Option<u64>,
    },
    /// Internal error (includes panics inside the adapter task)
    #[error("Internal error: {0}")]
    Internal(String),
}

// ============================================================================
// Request
// ============================================================================

/// A request handed to an adapter
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterRequest {
    /// Prompt or input text
    pub prompt: String,
    /// Backend-specific parameters
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Structured context (conversation, documents, ...)
    pub context: Option<serde_json::Value>,
    /// What the caller uses the output for
    pub purpose: Option<String>,
    /// Language of the request
    pub language: Option<String>,
    /// Maximum tokens in the response
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Streaming requests are never cached
    pub stream: bool,
}

impl AdapterRequest {
    /// Create a request with a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set a parameter
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Set structured context
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Set purpose
    #[must_use]
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Set language
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Token usage reported by a backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub prompt_tokens: u32,
    /// Completion tokens
    pub completion_tokens: u32,
    /// Total tokens
    pub total_tokens: u32,
}

/// What an adapter returns before normalization
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    /// Generated text
    pub text: String,
    /// Usage, if the backend reports it
    pub usage: Option<TokenUsage>,
    /// Backend confidence, if reported
    pub confidence: Option<f64>,
}

impl RawResponse {
    /// Create a raw response with text only
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Attach usage
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Metadata attached to every normalized response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Adapter that produced the response
    pub model_id: String,
    /// Token count (reported, or estimated from text length)
    pub token_count: u32,
    /// Invocation latency in milliseconds
    pub latency_ms: u64,
    /// Backend confidence, if reported
    pub confidence: Option<f64>,
    /// Served from the response cache
    pub cached: bool,
    /// Produced by a fallback adapter
    pub fallback: bool,
    /// Adapter originally requested when `fallback` is set
    pub original_model_id: Option<String>,
}

/// Normalized response returned to callers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text
    pub text: String,
    /// Response metadata
    pub metadata: ResponseMetadata,
}

impl ModelResponse {
    /// Normalize a raw adapter response
    #[must_use]
    pub fn from_raw(model_id: &str, raw: RawResponse, latency_ms: u64) -> Self {
        let token_count = raw
            .usage
            .map_or_else(|| estimate_tokens(&raw.text), |u| u.total_tokens);
        Self {
            metadata: ResponseMetadata {
                model_id: model_id.to_string(),
                token_count,
                latency_ms,
                confidence: raw.confidence,
                cached: false,
                fallback: false,
                original_model_id: None,
            },
            text: raw.text,
        }
    }
}

/// Length/4 heuristic used when a backend does not report usage
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.chars().count().div_ceil(4)).unwrap_or(u32::MAX)
}
