//! Failover
//!
//! Policies decide whether and how to fail over, groups bound where a target
//! may come from, and the manager ties both to live health and records every
//! failover in the ledger.

pub mod groups;
pub mod manager;
pub mod policy;

pub use groups::{FailoverGroup, FailoverGroupRegistry};
pub use manager::{performance_score, FailoverManager};
pub use policy::{
    FailoverAction, FailoverCondition, FailoverContext, FailoverPolicy, FailoverPolicyEngine,
    TargetStrategy,
};
