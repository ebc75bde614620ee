//! Weft access control
//!
//! Fabric-scoped capability rules consulted during command authorization.
//! Rules are held in memory, added by fabric administrators during
//! commissioning, and purged wholesale when their fabric is removed.

#![forbid(unsafe_code)]

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use weft_core::{ClusterId, EndpointId, FabricIndex, NodeId, WeftError, WeftResult};

/// Privilege level a rule grants, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Privilege {
    /// Read-only visibility
    View,
    /// Invoke ordinary operational commands
    Operate,
    /// Change configuration
    Manage,
    /// Full control including fabric administration
    Administer,
}

/// Optional narrowing of a rule to part of the node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTarget {
    /// Restrict to one cluster, or any when `None`
    pub cluster: Option<ClusterId>,
    /// Restrict to one endpoint, or any when `None`
    pub endpoint: Option<EndpointId>,
}

impl AccessTarget {
    fn matches(&self, cluster: ClusterId, endpoint: EndpointId) -> bool {
        self.cluster.map_or(true, |c| c == cluster) && self.endpoint.map_or(true, |e| e == endpoint)
    }
}

/// One capability rule scoped to a fabric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Fabric the rule belongs to; removed with the fabric
    pub fabric_index: FabricIndex,
    /// Subjects (node ids) the rule grants to; empty grants to nobody
    pub subjects: Vec<NodeId>,
    /// Privilege level granted
    pub privilege: Privilege,
    /// Targets the rule covers; empty covers the whole node
    pub targets: Vec<AccessTarget>,
}

/// In-memory capability rule store
#[derive(Default)]
pub struct AccessControl {
    rules: RwLock<Vec<AccessRule>>,
}

impl AccessControl {
    /// Create an empty rule store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. A rule with no subjects grants nothing and is rejected.
    pub fn add_rule(&self, rule: AccessRule) -> WeftResult<()> {
        if rule.subjects.is_empty() {
            return Err(WeftError::invalid_argument("access rule has no subjects"));
        }
        debug!(fabric = %rule.fabric_index, privilege = ?rule.privilege, "access rule added");
        self.rules.write().push(rule);
        Ok(())
    }

    /// Whether `subject` holds at least `required` privilege for
    /// `(cluster, endpoint)` under `fabric_index`
    pub fn check(
        &self,
        fabric_index: FabricIndex,
        subject: NodeId,
        cluster: ClusterId,
        endpoint: EndpointId,
        required: Privilege,
    ) -> bool {
        self.rules.read().iter().any(|rule| {
            rule.fabric_index == fabric_index
                && rule.privilege >= required
                && rule.subjects.contains(&subject)
                && (rule.targets.is_empty()
                    || rule.targets.iter().any(|t| t.matches(cluster, endpoint)))
        })
    }

    /// Purge every rule scoped to `fabric_index`
    pub fn remove_fabric(&self, fabric_index: FabricIndex) {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|rule| rule.fabric_index != fabric_index);
        let purged = before - rules.len();
        if purged > 0 {
            info!(%fabric_index, purged, "purged fabric-scoped access rules");
        }
    }

    /// Number of rules scoped to `fabric_index`
    pub fn rules_for_fabric(&self, fabric_index: FabricIndex) -> usize {
        self.rules
            .read()
            .iter()
            .filter(|rule| rule.fabric_index == fabric_index)
            .count()
    }
}
