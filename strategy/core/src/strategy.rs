//! Model Strategy Manager
//!
//! Entry point for inference requests. Selection filters the registry down to
//! adapters that can serve a [`RequestContext`] and ranks the survivors with a
//! weighted score. Invocation goes through the security hook and the response
//! cache, runs the adapter on its own task under a timeout, and on failure
//! performs one fallback search before giving up.
//!
//! # Scoring
//!
//! | Term | Points |
//! |------|--------|
//! | Preferred by the caller | 100 |
//! | Task type is a declared strength | 50 |
//! | Multilingual need met | 30 |
//! | Language supported | 20 |
//! | Enterprise tier for complexity > 0.7 | 40 |
//! | Pro tier for complexity > 0.4 | 30 |
//! | Offline request served by an offline adapter | 25 |
//! | Resource efficiency | 1-10 |
//!
//! Ties keep registry order, so selection is deterministic for a fixed
//! registry.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::adapter::{
    AdapterError, AdapterRequest, ModelDescriptor, ModelResponse, Tier, GENERAL_STRENGTH,
};
use crate::cache::{cache_key, ResponseCache};
use crate::config::StrategyConfig;
use crate::error::{StrategyError, StrategyResult};
use crate::events::{EventBus, StrategyEvent};
use crate::failover::{FailoverContext, FailoverManager};
use crate::health::HealthStatus;
use crate::metrics::CallStats;
use crate::registry::{AdapterHandle, AdapterRegistry};
use crate::security::SecurityValidator;

/// Points for a caller-preferred adapter
pub const PREFERRED_WEIGHT: f64 = 100.0;
/// Points for a direct task-type match
pub const TASK_MATCH_WEIGHT: f64 = 50.0;
/// Points for meeting a multilingual requirement
pub const MULTILINGUAL_WEIGHT: f64 = 30.0;
/// Points for supporting the request language
pub const LANGUAGE_WEIGHT: f64 = 20.0;
/// Points for an offline adapter on an offline request
pub const OFFLINE_WEIGHT: f64 = 25.0;
/// Enterprise bonus above this complexity
pub const ENTERPRISE_COMPLEXITY: f64 = 0.7;
/// Pro bonus above this complexity
pub const PRO_COMPLEXITY: f64 = 0.4;

const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_COMPLEXITY: f64 = 0.5;
const FALLBACK_COMPLEXITY: f64 = 0.3;

// ============================================================================
// Request Context
// ============================================================================

/// What the caller needs from an adapter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Task type (`general`, `reasoning`, `code`, ...)
    pub task_type: String,
    /// Request language, `en` when unset
    pub language: Option<String>,
    /// Complexity in `[0, 1]`, 0.5 when unset
    pub complexity: Option<f64>,
    /// Only multilingual adapters qualify
    pub requires_multilingual: bool,
    /// Adapters to favor
    pub preferred_adapters: Vec<String>,
    /// Only offline adapters qualify; forced on in offline mode
    pub offline_only: Option<bool>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(GENERAL_STRENGTH)
    }
}

impl RequestContext {
    /// Create a context for `task_type`
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            language: None,
            complexity: None,
            requires_multilingual: false,
            preferred_adapters: Vec::new(),
            offline_only: None,
        }
    }

    /// Set the language
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the complexity
    #[must_use]
    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.complexity = Some(complexity);
        self
    }

    /// Require a multilingual adapter
    #[must_use]
    pub fn multilingual(mut self) -> Self {
        self.requires_multilingual = true;
        self
    }

    /// Favor an adapter
    #[must_use]
    pub fn prefer(mut self, adapter_id: impl Into<String>) -> Self {
        self.preferred_adapters.push(adapter_id.into());
        self
    }

    /// Require (or explicitly allow) online adapters
    #[must_use]
    pub fn with_offline_only(mut self, offline_only: bool) -> Self {
        self.offline_only = Some(offline_only);
        self
    }

    /// Apply defaults. Offline mode forces `offline_only`.
    #[must_use]
    pub fn normalize(&self, offline_mode: bool) -> NormalizedContext {
        let task_type = if self.task_type.trim().is_empty() {
            GENERAL_STRENGTH.to_string()
        } else {
            self.task_type.clone()
        };
        NormalizedContext {
            task_type,
            language: self
                .language
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            complexity: self
                .complexity
                .filter(|c| c.is_finite())
                .map_or(DEFAULT_COMPLEXITY, |c| c.clamp(0.0, 1.0)),
            requires_multilingual: self.requires_multilingual,
            preferred_adapters: self.preferred_adapters.clone(),
            offline_only: offline_mode || self.offline_only.unwrap_or(false),
        }
    }
}

/// A [`RequestContext`] with every default applied
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedContext {
    /// Task type
    pub task_type: String,
    /// Language
    pub language: String,
    /// Complexity in `[0, 1]`
    pub complexity: f64,
    /// Only multilingual adapters qualify
    pub requires_multilingual: bool,
    /// Adapters to favor
    pub preferred_adapters: Vec<String>,
    /// Only offline adapters qualify
    pub offline_only: bool,
}

impl NormalizedContext {
    /// Whether `descriptor` satisfies the context filters
    #[must_use]
    pub fn accepts(&self, descriptor: &ModelDescriptor) -> bool {
        if self.offline_only && descriptor.requires_internet {
            return false;
        }
        if !descriptor.supports_language(&self.language) {
            return false;
        }
        if self.requires_multilingual && !descriptor.is_multilingual() {
            return false;
        }
        descriptor.can_serve(&self.task_type)
    }

    /// Weighted score of `descriptor` for this context
    #[must_use]
    pub fn score(&self, descriptor: &ModelDescriptor) -> f64 {
        let mut score = 0.0;
        if self.preferred_adapters.iter().any(|p| *p == descriptor.id) {
            score += PREFERRED_WEIGHT;
        }
        if descriptor.has_strength(&self.task_type) {
            score += TASK_MATCH_WEIGHT;
        }
        if self.requires_multilingual && descriptor.is_multilingual() {
            score += MULTILINGUAL_WEIGHT;
        }
        if descriptor.supports_language(&self.language) {
            score += LANGUAGE_WEIGHT;
        }
        score += tier_bonus(self.complexity, descriptor.tier);
        if self.offline_only && !descriptor.requires_internet {
            score += OFFLINE_WEIGHT;
        }
        score + descriptor.resources.efficiency_score()
    }
}

/// Complexity-dependent bonus for higher tiers
#[must_use]
pub fn tier_bonus(complexity: f64, tier: Tier) -> f64 {
    match tier {
        Tier::Enterprise if complexity > ENTERPRISE_COMPLEXITY => 40.0,
        Tier::Pro if complexity > PRO_COMPLEXITY => 30.0,
        _ => 0.0,
    }
}

/// A ranked adapter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    /// Adapter id
    pub adapter_id: String,
    /// Weighted score
    pub score: f64,
}

// ============================================================================
// Call Options
// ============================================================================

/// One `call_model` invocation
#[derive(Clone, Debug)]
pub struct CallOptions {
    /// Adapter to call
    pub adapter_id: String,
    /// Request to send
    pub request: AdapterRequest,
    /// Skip cache lookup and write-through
    pub bypass_cache: bool,
    /// Skip the security hook
    pub bypass_security: bool,
    /// Overrides the configured call timeout
    pub timeout: Option<Duration>,
    /// Task type reported to failover policies
    pub task_type: Option<String>,
}

impl CallOptions {
    /// Call `adapter_id` with `request`
    pub fn new(adapter_id: impl Into<String>, request: AdapterRequest) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            request,
            bypass_cache: false,
            bypass_security: false,
            timeout: None,
            task_type: None,
        }
    }

    /// Skip the cache
    #[must_use]
    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    /// Skip the security hook
    #[must_use]
    pub fn bypass_security(mut self) -> Self {
        self.bypass_security = true;
        self
    }

    /// Abort the adapter call after `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Task type for failover policies
    #[must_use]
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    fn retarget(&self, adapter_id: &str) -> Self {
        Self {
            adapter_id: adapter_id.to_string(),
            ..self.clone()
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Selection, invocation and fallback orchestration
pub struct ModelStrategyManager {
    config: StrategyConfig,
    registry: Arc<AdapterRegistry>,
    cache: Arc<ResponseCache>,
    failover: Option<Arc<FailoverManager>>,
    security: Option<Arc<dyn SecurityValidator>>,
    call_stats: Arc<CallStats>,
    events: EventBus,
}

impl ModelStrategyManager {
    /// Create a manager without failover policies or a security hook
    #[must_use]
    pub fn new(
        config: StrategyConfig,
        registry: Arc<AdapterRegistry>,
        cache: Arc<ResponseCache>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            registry,
            cache,
            failover: None,
            security: None,
            call_stats: Arc::new(CallStats::new()),
            events,
        }
    }

    /// Consult failover policies before the ranked fallback search
    #[must_use]
    pub fn with_failover(mut self, failover: Arc<FailoverManager>) -> Self {
        self.failover = Some(failover);
        self
    }

    /// Run `validator` before every adapter call
    #[must_use]
    pub fn with_security(mut self, validator: Arc<dyn SecurityValidator>) -> Self {
        self.security = Some(validator);
        self
    }

    /// Share call statistics with another component
    #[must_use]
    pub fn with_call_stats(mut self, call_stats: Arc<CallStats>) -> Self {
        self.call_stats = call_stats;
        self
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Per-adapter call statistics
    #[must_use]
    pub fn call_stats(&self) -> &Arc<CallStats> {
        &self.call_stats
    }

    /// Every candidate for `context`, best first.
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::NoEligibleModel` if nothing passes filtering.
    pub fn rank(&self, context: &RequestContext) -> StrategyResult<Vec<ScoredCandidate>> {
        self.rank_excluding(context, None)
    }

    /// Best adapter for `context`.
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::NoEligibleModel` if nothing passes filtering.
    pub fn select_model(&self, context: &RequestContext) -> StrategyResult<String> {
        let ranked = self.rank(context).inspect_err(|e| {
            self.events.publish(StrategyEvent::error(e, None));
        })?;
        let best = &ranked[0];
        tracing::debug!(
            adapter = %best.adapter_id,
            score = best.score,
            candidates = ranked.len(),
            task_type = %context.task_type,
            "Selected model"
        );
        Ok(best.adapter_id.clone())
    }

    /// Invoke an adapter, falling back to alternates on failure.
    ///
    /// # Errors
    ///
    /// - `ModelNotFound` if the adapter is not registered
    /// - `SecurityDenied` if the security hook rejects the request
    /// - `AllFallbacksFailed` if the call and every fallback failed
    pub async fn call_model(&self, options: CallOptions) -> StrategyResult<ModelResponse> {
        let adapter_id = options.adapter_id.clone();
        let result = self.dispatch(options, true).await;
        if let Err(e) = &result {
            self.events
                .publish(StrategyEvent::error(e, Some(adapter_id.as_str())));
        }
        result
    }

    fn rank_excluding(
        &self,
        context: &RequestContext,
        exclude: Option<&str>,
    ) -> StrategyResult<Vec<ScoredCandidate>> {
        let ctx = context.normalize(self.config.offline_mode);
        let eligible = self.registry.eligible_for(
            self.config.system_tier,
            self.config.offline_mode,
            &self.config.system_resources,
        );

        let mut ranked: Vec<ScoredCandidate> = eligible
            .iter()
            .filter(|id| Some(id.as_str()) != exclude)
            .filter_map(|id| self.registry.get(id).ok())
            .filter(|handle| ctx.accepts(handle.descriptor()))
            .filter(|handle| handle.health().status != HealthStatus::Critical)
            .map(|handle| ScoredCandidate {
                adapter_id: handle.id().to_string(),
                score: ctx.score(handle.descriptor()),
            })
            .collect();

        if ranked.is_empty() {
            return Err(StrategyError::NoEligibleModel {
                task_type: ctx.task_type,
            });
        }

        // Stable sort keeps registry order among equal scores
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(ranked)
    }

    fn dispatch(
        &self,
        options: CallOptions,
        allow_fallback: bool,
    ) -> BoxFuture<'_, StrategyResult<ModelResponse>> {
        Box::pin(async move {
            let handle = self.registry.get(&options.adapter_id)?;
            let adapter_id = handle.id();

            if !options.bypass_security {
                if let Some(validator) = &self.security {
                    if let Err(reason) = validator.validate(adapter_id, &options.request).await {
                        tracing::warn!(adapter = %adapter_id, reason = %reason, "Request rejected by security check");
                        return Err(StrategyError::SecurityDenied {
                            adapter_id: adapter_id.to_string(),
                            reason,
                        });
                    }
                }
            }

            let cacheable =
                !options.bypass_cache && !options.request.stream && self.cache.is_enabled();
            let key = cacheable.then(|| cache_key(adapter_id, &options.request));

            if let Some(key) = &key {
                if let Some(mut hit) = self.cache.get(key) {
                    hit.metadata.cached = true;
                    self.call_stats.record_cache_hit(adapter_id);
                    tracing::debug!(adapter = %adapter_id, "Cache hit");
                    return Ok(hit);
                }
            }

            match self.invoke(&handle, &options).await {
                Ok(response) => {
                    if let Some(key) = key {
                        self.cache.set(key, response.clone());
                    }
                    Ok(response)
                }
                Err(error) if allow_fallback => {
                    self.handle_model_error(&handle, &options, error).await
                }
                Err(error) => Err(error),
            }
        })
    }

    async fn invoke(
        &self,
        handle: &AdapterHandle,
        options: &CallOptions,
    ) -> StrategyResult<ModelResponse> {
        let adapter_id = handle.id();
        let adapter = handle.adapter();
        let request = options.request.clone();
        let limit = options.timeout.or_else(|| self.config.call_timeout());

        let started = Instant::now();
        let mut task = tokio::spawn(async move { adapter.call(&request).await });
        let joined = match limit {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    Ok(Err(AdapterError::Timeout))
                }
            },
            None => task.await,
        };
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = joined.unwrap_or_else(|e| {
            Err(AdapterError::Internal(format!("adapter task failed: {e}")))
        });

        match outcome {
            Ok(raw) => {
                self.call_stats.record_success(adapter_id, latency_ms);
                tracing::debug!(adapter = %adapter_id, latency_ms, "Adapter call succeeded");
                Ok(ModelResponse::from_raw(adapter_id, raw, latency_ms))
            }
            Err(source) => {
                let timed_out = source == AdapterError::Timeout;
                self.call_stats
                    .record_failure(adapter_id, latency_ms, timed_out);
                tracing::warn!(adapter = %adapter_id, error = %source, latency_ms, "Adapter call failed");
                Err(StrategyError::AdapterInvocation {
                    adapter_id: adapter_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Fallback search after `error` from `failed`.
    ///
    /// The policy-resolved failover target (if any) is tried first, then the
    /// ranked candidates for a context derived from the failed adapter's
    /// capabilities. Each attempt goes through cache and security but never
    /// starts another search.
    async fn handle_model_error(
        &self,
        failed: &AdapterHandle,
        options: &CallOptions,
        error: StrategyError,
    ) -> StrategyResult<ModelResponse> {
        let failed_id = failed.id().to_string();
        let descriptor = failed.descriptor();
        self.events
            .publish(StrategyEvent::error(&error, Some(failed_id.as_str())));

        let mut candidates: Vec<String> = Vec::new();

        if let Some(failover) = self.failover.as_ref().filter(|_| self.config.failover.enabled) {
            let reason = if error.is_timeout() { "timeout" } else { "invocation_error" };
            let task_type = options
                .task_type
                .clone()
                .unwrap_or_else(|| descriptor.primary_strength().to_string());
            let context = FailoverContext::new(reason).with_task_type(task_type);
            if let Some(target) = failover.failover(&failed_id, &context).await {
                candidates.push(target);
            }
        }

        let fallback_context = RequestContext {
            task_type: descriptor.primary_strength().to_string(),
            language: options.request.language.clone(),
            complexity: Some(FALLBACK_COMPLEXITY),
            requires_multilingual: descriptor.is_multilingual(),
            preferred_adapters: Vec::new(),
            offline_only: Some(descriptor.requires_internet),
        };
        match self.rank_excluding(&fallback_context, Some(&failed_id)) {
            Ok(ranked) => {
                for candidate in ranked {
                    if !candidates.contains(&candidate.adapter_id) {
                        candidates.push(candidate.adapter_id);
                    }
                }
            }
            Err(e) => tracing::debug!(adapter = %failed_id, error = %e, "No ranked fallback candidates"),
        }

        let mut last: Option<StrategyError> = None;
        for candidate in &candidates {
            match self.dispatch(options.retarget(candidate), false).await {
                Ok(mut response) => {
                    tracing::info!(original = %failed_id, fallback = %candidate, "Served by fallback adapter");
                    response.metadata.fallback = true;
                    response.metadata.original_model_id = Some(failed_id);
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(fallback = %candidate, error = %e, "Fallback attempt failed");
                    last = Some(e);
                }
            }
        }

        tracing::warn!(
            adapter = %failed_id,
            attempted = candidates.len(),
            "All fallbacks failed"
        );
        Err(StrategyError::AllFallbacksFailed {
            original_model_id: failed_id,
            original: Box::new(error),
            last: last.map(Box::new),
        })
    }
}

impl std::fmt::Debug for ModelStrategyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStrategyManager")
            .field("system_tier", &self.config.system_tier)
            .field("offline_mode", &self.config.offline_mode)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
