//! Failover Groups
//!
//! A group is an ordered set of interchangeable adapters. Group membership
//! bounds where `next_in_group`, `best_performer` and `fallback_chain` may
//! look for a target.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Ordered set of interchangeable adapters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverGroup {
    /// Group id
    pub id: String,
    /// Members in rotation order
    pub members: Vec<String>,
    /// Disabled groups are ignored during resolution
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl FailoverGroup {
    /// Create an enabled group
    pub fn new<I, S>(id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            members: members.into_iter().map(Into::into).collect(),
            enabled: true,
        }
    }

    /// Whether `adapter_id` is a member
    #[must_use]
    pub fn contains(&self, adapter_id: &str) -> bool {
        self.members.iter().any(|m| m == adapter_id)
    }

    /// Position of `adapter_id` in the rotation
    #[must_use]
    pub fn position(&self, adapter_id: &str) -> Option<usize> {
        self.members.iter().position(|m| m == adapter_id)
    }
}

/// Registry of failover groups in configuration order
#[derive(Debug, Default)]
pub struct FailoverGroupRegistry {
    groups: RwLock<Vec<FailoverGroup>>,
}

impl FailoverGroupRegistry {
    /// Create a registry from configured groups
    #[must_use]
    pub fn new(groups: Vec<FailoverGroup>) -> Self {
        let registry = Self::default();
        for group in groups {
            registry.add(group);
        }
        registry
    }

    /// Add a group, replacing any group with the same id
    pub fn add(&self, group: FailoverGroup) {
        let mut groups = self.groups.write();
        tracing::debug!(group = %group.id, members = group.members.len(), "Added failover group");
        match groups.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => *existing = group,
            None => groups.push(group),
        }
    }

    /// Remove a group. Returns `true` if it existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut groups = self.groups.write();
        let before = groups.len();
        groups.retain(|g| g.id != id);
        groups.len() != before
    }

    /// Enable or disable a group. Returns `false` if it does not exist.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.groups.write().iter_mut().find(|g| g.id == id) {
            Some(group) => {
                group.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// First enabled group containing `adapter_id`
    #[must_use]
    pub fn group_for(&self, adapter_id: &str) -> Option<FailoverGroup> {
        self.groups
            .read()
            .iter()
            .find(|g| g.enabled && g.contains(adapter_id))
            .cloned()
    }

    /// Look up a group by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<FailoverGroup> {
        self.groups.read().iter().find(|g| g.id == id).cloned()
    }

    /// All groups
    #[must_use]
    pub fn groups(&self) -> Vec<FailoverGroup> {
        self.groups.read().clone()
    }
}
