//! Protection State Reader
//!
//! Resolves each selected node group to its backing group and classifies
//! the in-service members as protected or unprotected. A group that cannot
//! be read yields an empty classification; siblings are unaffected.

use crate::domain::{
    ClusterInventoryRef, ComputeProviderRef, InstanceRef, LifecycleState, ProtectionTag,
};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// =============================================================================
// Classification
// =============================================================================

/// How reading a node group went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadStatus {
    Ok,
    /// Node group or backing group missing
    NotFound,
    /// Provider call failed after retries
    Failed,
}

/// Protected/unprotected split of one node group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupClassification {
    pub node_group: String,
    pub backing_group_id: Option<String>,
    /// Sorted by instance ID
    pub protected: Vec<InstanceRef>,
    /// Sorted by instance ID
    pub unprotected: Vec<InstanceRef>,
    pub status: ReadStatus,
    pub message: Option<String>,
}

impl GroupClassification {
    fn unreadable(
        node_group: &str,
        backing_group_id: Option<String>,
        status: ReadStatus,
        message: String,
    ) -> Self {
        Self {
            node_group: node_group.to_string(),
            backing_group_id,
            protected: Vec::new(),
            unprotected: Vec::new(),
            status,
            message: Some(message),
        }
    }

    pub fn instance_count(&self) -> usize {
        self.protected.len() + self.unprotected.len()
    }

    /// Every instance in the group, protected first
    pub fn instances(&self) -> impl Iterator<Item = &InstanceRef> {
        self.protected.iter().chain(self.unprotected.iter())
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Reads live protection state from the provider
pub struct ProtectionStateReader {
    inventory: ClusterInventoryRef,
    compute: ComputeProviderRef,
    tag: ProtectionTag,
    retry: RetryPolicy,
}

impl ProtectionStateReader {
    pub fn new(
        inventory: ClusterInventoryRef,
        compute: ComputeProviderRef,
        tag: ProtectionTag,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inventory,
            compute,
            tag,
            retry,
        }
    }

    /// Classify every selected node group concurrently.
    ///
    /// Results follow the order of `node_groups`.
    pub async fn classify_all(
        &self,
        cluster: &str,
        node_groups: &[String],
    ) -> Vec<GroupClassification> {
        join_all(node_groups.iter().map(|name| self.classify(cluster, name))).await
    }

    /// Classify one node group
    pub async fn classify(&self, cluster: &str, node_group: &str) -> GroupClassification {
        let group_id = match self.resolve_backing_group(cluster, node_group).await {
            Ok(id) => id,
            Err(e) => {
                let status = read_status(&e);
                warn!(
                    cluster,
                    node_group,
                    error = %e,
                    "Unable to resolve backing group, skipping node group"
                );
                return GroupClassification::unreadable(node_group, None, status, e.to_string());
            }
        };

        let compute = self.compute.as_ref();
        let id = group_id.as_str();
        let members = match self
            .retry
            .run("ListGroupInstances", move || compute.list_group_instances(id))
            .await
        {
            Ok(members) => members,
            Err(e) => {
                warn!(
                    cluster,
                    node_group,
                    backing_group = %group_id,
                    error = %e,
                    "Unable to list backing group members"
                );
                return GroupClassification::unreadable(
                    node_group,
                    Some(group_id.clone()),
                    read_status(&e),
                    e.to_string(),
                );
            }
        };

        let mut protected = Vec::new();
        let mut unprotected = Vec::new();
        for member in members {
            if member.lifecycle_state != LifecycleState::InService {
                continue;
            }
            let instance = InstanceRef::new(member.instance_id, node_group);
            if self.tag.is_present(&member.tags) {
                protected.push(instance);
            } else {
                unprotected.push(instance);
            }
        }
        protected.sort();
        unprotected.sort();

        debug!(
            cluster,
            node_group,
            backing_group = %group_id,
            protected = protected.len(),
            unprotected = unprotected.len(),
            "Classified node group"
        );

        GroupClassification {
            node_group: node_group.to_string(),
            backing_group_id: Some(group_id),
            protected,
            unprotected,
            status: ReadStatus::Ok,
            message: None,
        }
    }

    async fn resolve_backing_group(&self, cluster: &str, node_group: &str) -> Result<String> {
        let inventory = self.inventory.as_ref();
        let group = self
            .retry
            .run("DescribeNodegroup", move || {
                inventory.describe_node_group(cluster, node_group)
            })
            .await?;

        group
            .backing_group_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::not_found("AutoScalingGroup", format!("{}/{}", cluster, node_group)))
    }
}

fn read_status(err: &Error) -> ReadStatus {
    if err.is_not_found() {
        ReadStatus::NotFound
    } else {
        ReadStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CapacityType, NodeGroup, ScalingConfig};
    use crate::providers::InMemoryCloud;
    use std::sync::Arc;

    fn node_group(name: &str, group_id: Option<&str>) -> NodeGroup {
        NodeGroup {
            name: name.to_string(),
            capacity_type: CapacityType::OnDemand,
            scaling: ScalingConfig::new(1, 2, 3),
            backing_group_id: group_id.map(str::to_string),
        }
    }

    fn reader(cloud: &Arc<InMemoryCloud>, retry: RetryPolicy) -> ProtectionStateReader {
        ProtectionStateReader::new(cloud.clone(), cloud.clone(), ProtectionTag::default(), retry)
    }

    #[tokio::test]
    async fn test_classifies_in_service_members() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_node_group("c1", node_group("nodegroup-1-ondemand", Some("asg-1")));
        cloud.add_instance("asg-1", "i-3", LifecycleState::InService, true);
        cloud.add_instance("asg-1", "i-1", LifecycleState::InService, false);
        cloud.add_instance("asg-1", "i-2", LifecycleState::Pending, false);
        cloud.add_instance("asg-1", "i-4", LifecycleState::Terminating, true);

        let result = reader(&cloud, RetryPolicy::none())
            .classify("c1", "nodegroup-1-ondemand")
            .await;

        assert_eq!(result.status, ReadStatus::Ok);
        assert_eq!(result.backing_group_id.as_deref(), Some("asg-1"));
        assert_eq!(result.protected, vec![InstanceRef::new("i-3", "nodegroup-1-ondemand")]);
        assert_eq!(result.unprotected, vec![InstanceRef::new("i-1", "nodegroup-1-ondemand")]);
    }

    #[tokio::test]
    async fn test_missing_backing_group_is_not_found() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_node_group("c1", node_group("nodegroup-1-ondemand", Some("asg-gone")));
        cloud.add_node_group("c1", node_group("nodegroup-2-ondemand", None));

        let reader = reader(&cloud, RetryPolicy::none());
        let gone = reader.classify("c1", "nodegroup-1-ondemand").await;
        let unset = reader.classify("c1", "nodegroup-2-ondemand").await;
        let unknown = reader.classify("c1", "nodegroup-9-ondemand").await;

        for result in [gone, unset, unknown] {
            assert_eq!(result.status, ReadStatus::NotFound);
            assert_eq!(result.instance_count(), 0);
            assert!(result.message.is_some());
        }
    }

    #[tokio::test]
    async fn test_transient_listing_failure_is_retried() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_node_group("c1", node_group("nodegroup-1-ondemand", Some("asg-1")));
        cloud.add_instance("asg-1", "i-1", LifecycleState::InService, false);
        cloud.fail_listing_transiently("asg-1", 2);

        let result = reader(&cloud, RetryPolicy::immediate(3))
            .classify("c1", "nodegroup-1-ondemand")
            .await;

        assert_eq!(result.status, ReadStatus::Ok);
        assert_eq!(result.unprotected.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_group_failed() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_node_group("c1", node_group("nodegroup-1-ondemand", Some("asg-1")));
        cloud.add_instance("asg-1", "i-1", LifecycleState::InService, false);
        cloud.fail_listing_transiently("asg-1", 5);

        let result = reader(&cloud, RetryPolicy::immediate(2))
            .classify("c1", "nodegroup-1-ondemand")
            .await;

        assert_eq!(result.status, ReadStatus::Failed);
        assert_eq!(result.backing_group_id.as_deref(), Some("asg-1"));
        assert_eq!(result.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_classify_all_isolates_failures() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_node_group("c1", node_group("nodegroup-1-ondemand", Some("asg-a")));
        cloud.add_node_group("c1", node_group("nodegroup-2-ondemand", Some("asg-missing")));
        cloud.add_node_group("c1", node_group("nodegroup-3-ondemand", Some("asg-c")));
        cloud.add_instance("asg-a", "i-a", LifecycleState::InService, false);
        cloud.add_instance("asg-c", "i-c", LifecycleState::InService, true);

        let names = vec![
            "nodegroup-1-ondemand".to_string(),
            "nodegroup-2-ondemand".to_string(),
            "nodegroup-3-ondemand".to_string(),
        ];
        let results = reader(&cloud, RetryPolicy::none()).classify_all("c1", &names).await;

        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ReadStatus::Ok, ReadStatus::NotFound, ReadStatus::Ok]
        );
        assert_eq!(results[0].unprotected.len(), 1);
        assert_eq!(results[2].protected.len(), 1);
    }
}
