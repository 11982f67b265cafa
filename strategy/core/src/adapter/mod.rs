//! Model Adapters
//!
//! The adapter contract consumed by the strategy core and the descriptors
//! adapters declare. Concrete backends (HTTP APIs, local runtimes) live
//! outside this crate and implement [`ModelAdapter`].

pub mod descriptor;
pub mod traits;

pub use descriptor::{
    ModelDescriptor, ResourceRequirements, SystemResources, Tier, GENERAL_STRENGTH,
    WILDCARD_LANGUAGE,
};
pub use traits::{
    estimate_tokens, AdapterError, AdapterRequest, ModelAdapter, ModelResponse, RawResponse,
    ResponseMetadata, TokenUsage,
};
