//! Inventory File
//!
//! YAML description of clusters, node groups, instances and cluster nodes,
//! loaded into the in-memory providers for standalone runs.
//!
//! ```yaml
//! clusters:
//!   - name: prod-eu-west-1-main
//!     nodeGroups:
//!       - name: nodegroup-1-ondemand
//!         capacityType: on-demand
//!         scaling: { min: 1, desired: 2, max: 3 }
//!         backingGroupId: asg-ng1
//!         instances:
//!           - instanceId: i-0a1
//!             lifecycleState: InService
//!             tags: { protection: NO_DELETE }
//! nodes:
//!   - name: ip-10-0-1-5.eu-west-1.compute.internal
//!     providerId: aws:///eu-west-1a/i-0a1
//! ```

use super::memory::{InMemoryCloud, InMemoryNodes};
use crate::domain::{
    instance_id_from_provider_id, CapacityType, ClusterNode, LifecycleState, NodeGroup,
    ScalingConfig,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryFile {
    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEntry {
    pub name: String,
    #[serde(default)]
    pub node_groups: Vec<NodeGroupEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupEntry {
    pub name: String,
    #[serde(default = "default_capacity_type")]
    pub capacity_type: CapacityType,
    #[serde(default)]
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub backing_group_id: Option<String>,
    #[serde(default)]
    pub instances: Vec<InstanceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceEntry {
    pub instance_id: String,
    #[serde(default = "default_lifecycle_state")]
    pub lifecycle_state: LifecycleState,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEntry {
    pub name: String,
    pub provider_id: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

fn default_capacity_type() -> CapacityType {
    CapacityType::OnDemand
}

fn default_lifecycle_state() -> LifecycleState {
    LifecycleState::InService
}

impl InventoryFile {
    /// Parse an inventory document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let inventory: InventoryFile = serde_yaml::from_str(content)?;
        inventory.validate()?;
        Ok(inventory)
    }

    /// Read and parse an inventory file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let inventory = Self::from_yaml(&content)?;
        info!(
            path = %path.display(),
            clusters = inventory.clusters.len(),
            nodes = inventory.nodes.len(),
            "Loaded inventory file"
        );
        Ok(inventory)
    }

    fn validate(&self) -> Result<()> {
        for cluster in &self.clusters {
            if cluster.name.trim().is_empty() {
                return Err(Error::Configuration("inventory cluster without a name".into()));
            }
            for group in &cluster.node_groups {
                if group.instances.is_empty() || group.backing_group_id.is_some() {
                    continue;
                }
                return Err(Error::Configuration(format!(
                    "node group {}/{} lists instances but has no backingGroupId",
                    cluster.name, group.name
                )));
            }
        }
        Ok(())
    }
}

impl InMemoryCloud {
    /// Build a cloud populated from an inventory file
    pub fn from_inventory(inventory: &InventoryFile) -> Self {
        let cloud = InMemoryCloud::new();
        for cluster in &inventory.clusters {
            for entry in &cluster.node_groups {
                cloud.add_node_group(
                    &cluster.name,
                    NodeGroup {
                        name: entry.name.clone(),
                        capacity_type: entry.capacity_type,
                        scaling: entry.scaling,
                        backing_group_id: entry.backing_group_id.clone(),
                    },
                );
                let Some(group_id) = entry.backing_group_id.as_deref() else {
                    continue;
                };
                for instance in &entry.instances {
                    cloud.add_member(
                        group_id,
                        &instance.instance_id,
                        instance.lifecycle_state,
                        instance.tags.clone(),
                    );
                }
            }
        }
        cloud
    }
}

impl InMemoryNodes {
    /// Build a node set populated from an inventory file
    pub fn from_inventory(inventory: &InventoryFile) -> Self {
        let nodes = InMemoryNodes::new();
        for entry in &inventory.nodes {
            nodes.insert(ClusterNode {
                name: entry.name.clone(),
                instance_id: instance_id_from_provider_id(&entry.provider_id),
                annotations: entry.annotations.clone(),
            });
        }
        nodes
    }
}
