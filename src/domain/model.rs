//! Domain Model
//!
//! Node groups, their member instances, and the protection marker both
//! the reconciler and the annotator key on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Node Groups
// =============================================================================

/// Pricing tier of a node group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapacityType {
    OnDemand,
    Spot,
    /// Child group of a mixed on-demand/spot deployment
    Mixed,
}

impl std::fmt::Display for CapacityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityType::OnDemand => write!(f, "on-demand"),
            CapacityType::Spot => write!(f, "spot"),
            CapacityType::Mixed => write!(f, "mixed"),
        }
    }
}

/// Min/desired/max size of a node group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfig {
    pub min: u32,
    pub desired: u32,
    pub max: u32,
}

impl ScalingConfig {
    pub fn new(min: u32, desired: u32, max: u32) -> Self {
        Self { min, desired, max }
    }

    /// True when every component is zero
    pub fn is_zero(&self) -> bool {
        self.min == 0 && self.desired == 0 && self.max == 0
    }
}

impl std::fmt::Display for ScalingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "min={} desired={} max={}", self.min, self.desired, self.max)
    }
}

/// A named, independently scaled pool of workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    pub name: String,
    pub capacity_type: CapacityType,
    pub scaling: ScalingConfig,
    /// Backing auto-scaling group, if the control plane reports one
    #[serde(default)]
    pub backing_group_id: Option<String>,
}

// =============================================================================
// Instances
// =============================================================================

/// Lifecycle state of a group member as reported by the compute API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Pending,
    InService,
    Terminating,
    Terminated,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Pending => write!(f, "Pending"),
            LifecycleState::InService => write!(f, "InService"),
            LifecycleState::Terminating => write!(f, "Terminating"),
            LifecycleState::Terminated => write!(f, "Terminated"),
            LifecycleState::Other => write!(f, "Other"),
        }
    }
}

/// A member of a backing group, as listed by the compute API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub instance_id: String,
    pub lifecycle_state: LifecycleState,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// An in-service instance attributed to the node group it serves
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRef {
    pub instance_id: String,
    pub node_group: String,
}

impl InstanceRef {
    pub fn new(instance_id: impl Into<String>, node_group: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            node_group: node_group.into(),
        }
    }
}

impl std::fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node_group, self.instance_id)
    }
}

// =============================================================================
// Protection Tag
// =============================================================================

/// Well-known tag marking the single non-evictable instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionTag {
    pub key: String,
    pub value: String,
}

impl Default for ProtectionTag {
    fn default() -> Self {
        Self {
            key: "protection".to_string(),
            value: "NO_DELETE".to_string(),
        }
    }
}

impl ProtectionTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// A member counts as protected only when both key and value match
    pub fn is_present(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.get(&self.key).is_some_and(|v| v == &self.value)
    }
}

impl std::fmt::Display for ProtectionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

// =============================================================================
// Cluster Targets
// =============================================================================

/// What caused a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TriggerKind {
    /// Instance lifecycle notification; routing hint only
    #[serde(rename_all = "camelCase")]
    Lifecycle { instance_id: String, state: String },
    Manual,
    Scheduled,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Lifecycle { .. } => write!(f, "lifecycle"),
            TriggerKind::Manual => write!(f, "manual"),
            TriggerKind::Scheduled => write!(f, "scheduled"),
        }
    }
}

/// Fully resolved input of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTarget {
    pub cluster_name: String,
    pub region: String,
    pub trigger: TriggerKind,
}

// =============================================================================
// Cluster Nodes
// =============================================================================

/// A Kubernetes node as seen by the annotator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    pub name: String,
    /// Instance ID parsed from `spec.providerID`
    pub instance_id: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ClusterNode {
    pub fn has_annotation(&self, key: &str, value: &str) -> bool {
        self.annotations.get(key).is_some_and(|v| v == value)
    }
}

/// Extract the instance ID from a provider ID such as `aws:///us-east-1a/i-0abc`
pub fn instance_id_from_provider_id(provider_id: &str) -> Option<String> {
    let id = provider_id.rsplit('/').next()?.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}
