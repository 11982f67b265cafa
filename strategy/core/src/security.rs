//! Request Security
//!
//! Hook run before an adapter is invoked. A rejection aborts the call without
//! touching the adapter or the cache.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::adapter::AdapterRequest;

/// Default maximum prompt size: 1MB
pub const DEFAULT_MAX_PROMPT_BYTES: usize = 1024 * 1024;

/// Pre-invocation check
#[async_trait]
pub trait SecurityValidator: Send + Sync {
    /// Accept or reject `request` addressed to `adapter_id`.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason.
    async fn validate(&self, adapter_id: &str, request: &AdapterRequest) -> Result<(), String>;
}

/// Static access rules for adapter requests
///
/// Rejects:
/// - Requests to blocked adapters
/// - Oversized prompts
/// - Prompts with control characters (newline, tab and carriage return are allowed)
/// - Requests whose purpose is restricted to other adapters
#[derive(Clone, Debug)]
pub struct AccessPolicy {
    blocked: HashSet<String>,
    purpose_allowlist: HashMap<String, HashSet<String>>,
    max_prompt_bytes: usize,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            blocked: HashSet::new(),
            purpose_allowlist: HashMap::new(),
            max_prompt_bytes: DEFAULT_MAX_PROMPT_BYTES,
        }
    }
}

impl AccessPolicy {
    /// Create a permissive policy with the default size limit
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block an adapter entirely
    #[must_use]
    pub fn block(mut self, adapter_id: impl Into<String>) -> Self {
        self.blocked.insert(adapter_id.into());
        self
    }

    /// Restrict `purpose` to the listed adapters
    #[must_use]
    pub fn restrict_purpose<I, S>(mut self, purpose: impl Into<String>, adapters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.purpose_allowlist
            .insert(purpose.into(), adapters.into_iter().map(Into::into).collect());
        self
    }

    /// Set the maximum prompt size in bytes
    #[must_use]
    pub fn with_max_prompt_bytes(mut self, max: usize) -> Self {
        self.max_prompt_bytes = max;
        self
    }

    fn check(&self, adapter_id: &str, request: &AdapterRequest) -> Result<(), String> {
        if self.blocked.contains(adapter_id) {
            return Err(format!("adapter '{adapter_id}' is blocked"));
        }

        if request.prompt.len() > self.max_prompt_bytes {
            return Err(format!(
                "prompt too large: {} bytes (max: {})",
                request.prompt.len(),
                self.max_prompt_bytes
            ));
        }

        if request
            .prompt
            .chars()
            .any(|c| c.is_control() && c != '\n' && c != '\t' && c != '\r')
        {
            return Err("prompt contains invalid control characters".to_string());
        }

        if let Some(purpose) = &request.purpose {
            if let Some(allowed) = self.purpose_allowlist.get(purpose) {
                if !allowed.contains(adapter_id) {
                    return Err(format!(
                        "adapter '{adapter_id}' may not serve purpose '{purpose}'"
                    ));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SecurityValidator for AccessPolicy {
    async fn validate(&self, adapter_id: &str, request: &AdapterRequest) -> Result<(), String> {
        self.check(adapter_id, request)
    }
}
