//! Model Descriptors
//!
//! Declared capabilities and resource requirements of an adapter. Descriptors
//! are created when the registry is loaded and never mutated afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StrategyError, StrategyResult};

/// Language tag meaning "any language"
pub const WILDCARD_LANGUAGE: &str = "*";

/// Strength tag accepted for any task type
pub const GENERAL_STRENGTH: &str = "general";

// ============================================================================
// Tier
// ============================================================================

/// Deployment tier, ordered `Core < Pro < Enterprise`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Base tier
    #[default]
    Core,
    /// Professional tier
    Pro,
    /// Enterprise tier
    Enterprise,
}

impl Tier {
    /// Whether an adapter requiring `required` may run on a system of this tier
    #[must_use]
    pub fn permits(&self, required: Tier) -> bool {
        required <= *self
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "core" => Ok(Self::Core),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(StrategyError::InvalidDescriptor(format!(
                "unknown tier '{other}' (expected core, pro or enterprise)"
            ))),
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Minimum resources an adapter needs to run
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Minimum RAM in megabytes
    #[serde(alias = "minRAM")]
    pub min_ram_mb: u64,
    /// Minimum CPU cores
    #[serde(alias = "minCPU")]
    pub min_cpu_cores: u32,
    /// Minimum GPU memory in megabytes (0 = no GPU needed)
    #[serde(alias = "minGPU", default)]
    pub min_gpu_mb: u64,
}

impl ResourceRequirements {
    /// Create requirements
    #[must_use]
    pub fn new(min_ram_mb: u64, min_cpu_cores: u32, min_gpu_mb: u64) -> Self {
        Self {
            min_ram_mb,
            min_cpu_cores,
            min_gpu_mb,
        }
    }

    /// Whether `available` satisfies these requirements.
    ///
    /// RAM and CPU are always checked; GPU only when some GPU is required.
    #[must_use]
    pub fn satisfied_by(&self, available: &SystemResources) -> bool {
        if available.ram_mb < self.min_ram_mb || available.cpu_cores < self.min_cpu_cores {
            return false;
        }
        self.min_gpu_mb == 0 || available.gpu_mb >= self.min_gpu_mb
    }

    /// Resource-efficiency bonus in `[1, 10]`: lighter adapters score higher
    #[must_use]
    pub fn efficiency_score(&self) -> f64 {
        let weight = self.min_ram_mb as f64 / 1000.0
            + f64::from(self.min_cpu_cores) * 2.0
            + self.min_gpu_mb as f64 / 1000.0;
        10.0 - weight.floor().min(9.0)
    }
}

/// Resources available on the host running the strategy core
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemResources {
    /// Available RAM in megabytes
    pub ram_mb: u64,
    /// Available CPU cores
    pub cpu_cores: u32,
    /// Available GPU memory in megabytes
    pub gpu_mb: u64,
}

impl Default for SystemResources {
    fn default() -> Self {
        Self {
            ram_mb: 16_000,
            cpu_cores: 8,
            gpu_mb: 0,
        }
    }
}

// ============================================================================
// Model Descriptor
// ============================================================================

/// Declared capabilities of one adapter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique adapter id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Task types this adapter is good at; the first is its primary strength
    pub strengths: Vec<String>,
    /// Supported language tags, or `*`
    pub languages: Vec<String>,
    /// Context window size in tokens
    pub max_tokens: u32,
    /// Minimum system tier
    pub tier: Tier,
    /// Whether the adapter needs network access
    pub requires_internet: bool,
    /// Minimum resources
    pub resources: ResourceRequirements,
}

impl ModelDescriptor {
    /// Create a descriptor with defaults: `general` strength, English, 4096
    /// tokens, core tier, offline, no resource requirements
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            strengths: vec![GENERAL_STRENGTH.to_string()],
            languages: vec!["en".to_string()],
            max_tokens: 4096,
            tier: Tier::Core,
            requires_internet: false,
            resources: ResourceRequirements::default(),
        }
    }

    /// Set strengths
    #[must_use]
    pub fn with_strengths<I, S>(mut self, strengths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strengths = strengths.into_iter().map(Into::into).collect();
        self
    }

    /// Set languages
    #[must_use]
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Set tier
    #[must_use]
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Set internet requirement
    #[must_use]
    pub fn with_internet(mut self, requires_internet: bool) -> Self {
        self.requires_internet = requires_internet;
        self
    }

    /// Set context window size
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set resource requirements
    #[must_use]
    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    /// Check that every required field carries a value
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::InvalidDescriptor` naming the first bad field.
    pub fn validate(&self) -> StrategyResult<()> {
        let missing = |field: &str| {
            Err(StrategyError::InvalidDescriptor(format!(
                "descriptor '{}' is missing required field '{field}'",
                self.id
            )))
        };

        if self.id.trim().is_empty() {
            return missing("id");
        }
        if self.name.trim().is_empty() {
            return missing("name");
        }
        if self.strengths.iter().all(|s| s.trim().is_empty()) {
            return missing("strengths");
        }
        if self.languages.iter().all(|l| l.trim().is_empty()) {
            return missing("languages");
        }
        if self.max_tokens == 0 {
            return missing("maxTokens");
        }
        Ok(())
    }

    /// Build a descriptor from configuration-shaped JSON.
    ///
    /// Accepts both `snake_case` and `camelCase` keys.
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::InvalidDescriptor` if a required field is
    /// missing, has the wrong type, or the tier is unknown.
    pub fn from_json(value: &serde_json::Value) -> StrategyResult<Self> {
        let draft: DescriptorDraft = serde_json::from_value(value.clone())
            .map_err(|e| StrategyError::InvalidDescriptor(e.to_string()))?;
        draft.into_descriptor()
    }

    /// Whether the adapter accepts `language`
    #[must_use]
    pub fn supports_language(&self, language: &str) -> bool {
        self.languages
            .iter()
            .any(|l| l == WILDCARD_LANGUAGE || l.eq_ignore_ascii_case(language))
    }

    /// Whether the adapter handles more than one language
    #[must_use]
    pub fn is_multilingual(&self) -> bool {
        self.languages.len() > 1 || self.languages.iter().any(|l| l == WILDCARD_LANGUAGE)
    }

    /// Whether `task_type` is one of the declared strengths
    #[must_use]
    pub fn has_strength(&self, task_type: &str) -> bool {
        self.strengths.iter().any(|s| s.eq_ignore_ascii_case(task_type))
    }

    /// Whether the adapter can serve `task_type` (direct or `general` strength)
    #[must_use]
    pub fn can_serve(&self, task_type: &str) -> bool {
        self.has_strength(task_type) || self.has_strength(GENERAL_STRENGTH)
    }

    /// First declared strength, `general` if none
    #[must_use]
    pub fn primary_strength(&self) -> &str {
        self.strengths
            .first()
            .map_or(GENERAL_STRENGTH, String::as_str)
    }
}

/// Loosely typed descriptor used to report missing fields by name
#[derive(Deserialize)]
struct DescriptorDraft {
    id: Option<String>,
    #[serde(alias = "displayName")]
    name: Option<String>,
    strengths: Option<Vec<String>>,
    languages: Option<Vec<String>>,
    #[serde(alias = "maxTokens", alias = "contextWindow")]
    max_tokens: Option<u32>,
    tier: Option<String>,
    #[serde(alias = "requiresInternet")]
    requires_internet: Option<bool>,
    #[serde(alias = "resourceRequirements", alias = "resource_requirements")]
    resources: Option<ResourceRequirements>,
}

impl DescriptorDraft {
    fn into_descriptor(self) -> StrategyResult<ModelDescriptor> {
        fn required<T>(value: Option<T>, field: &str) -> StrategyResult<T> {
            value.ok_or_else(|| {
                StrategyError::InvalidDescriptor(format!("missing required field '{field}'"))
            })
        }

        let descriptor = ModelDescriptor {
            id: required(self.id, "id")?,
            name: required(self.name, "name")?,
            strengths: required(self.strengths, "strengths")?,
            languages: required(self.languages, "languages")?,
            max_tokens: required(self.max_tokens, "maxTokens")?,
            tier: required(self.tier, "tier")?.parse()?,
            requires_internet: required(self.requires_internet, "requiresInternet")?,
            resources: required(self.resources, "resourceRequirements")?,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}
