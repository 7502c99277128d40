//! Domain Ports - Core trait definitions for the protection operator
//!
//! These traits define the boundaries between the control loop and the
//! cloud provider and cluster control plane. Adapters implement these traits
//! to provide concrete functionality.

use super::model::{ClusterNode, GroupMember, NodeGroup};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Cluster Inventory Port
// =============================================================================

/// Port for node-group inventory from the managed cluster API
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    /// List the names of every node group in a cluster
    async fn list_node_groups(&self, cluster: &str) -> Result<Vec<String>>;

    /// Describe one node group, including its backing group reference.
    ///
    /// Returns `Error::NotFound` when the node group does not exist.
    async fn describe_node_group(&self, cluster: &str, name: &str) -> Result<NodeGroup>;
}

// =============================================================================
// Compute Provider Port
// =============================================================================

/// Port for instance inventory and tag mutation on the compute API
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// List the members of a backing group.
    ///
    /// Returns `Error::NotFound` when the group does not exist.
    async fn list_group_instances(&self, group_id: &str) -> Result<Vec<GroupMember>>;

    /// Create or overwrite a tag on an instance
    async fn create_tag(&self, instance_id: &str, key: &str, value: &str) -> Result<()>;

    /// Delete a tag key from an instance; deleting an absent key succeeds
    async fn delete_tag(&self, instance_id: &str, key: &str) -> Result<()>;
}

// =============================================================================
// Node Annotator Port
// =============================================================================

/// Port for node annotations on the cluster control plane
#[async_trait]
pub trait NodeAnnotator: Send + Sync {
    /// List cluster nodes with their instance mapping and annotations
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>>;

    /// Set an annotation on a node
    async fn set_annotation(&self, node: &str, key: &str, value: &str) -> Result<()>;

    /// Remove an annotation from a node
    async fn clear_annotation(&self, node: &str, key: &str) -> Result<()>;
}

// =============================================================================
// Cloud Connector Port
// =============================================================================

/// Inventory and compute adapters bound to one region
#[derive(Clone)]
pub struct CloudPorts {
    pub inventory: ClusterInventoryRef,
    pub compute: ComputeProviderRef,
}

impl CloudPorts {
    pub fn new(inventory: ClusterInventoryRef, compute: ComputeProviderRef) -> Self {
        Self { inventory, compute }
    }
}

/// Port producing cloud adapters for the region of a pass
pub trait CloudConnector: Send + Sync {
    fn connect(&self, region: &str) -> Result<CloudPorts>;
}

/// Fixed ports serve every region
impl CloudConnector for CloudPorts {
    fn connect(&self, _region: &str) -> Result<CloudPorts> {
        Ok(self.clone())
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterInventoryRef = Arc<dyn ClusterInventory>;
pub type ComputeProviderRef = Arc<dyn ComputeProvider>;
pub type NodeAnnotatorRef = Arc<dyn NodeAnnotator>;
pub type CloudConnectorRef = Arc<dyn CloudConnector>;
