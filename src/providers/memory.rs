//! In-Memory Providers
//!
//! Lock-guarded implementations of the cloud and cluster ports. Used for
//! standalone runs against an inventory file and throughout the test suite,
//! with hooks for injecting provider failures.

use crate::domain::{
    ClusterInventory, ClusterNode, ComputeProvider, GroupMember, LifecycleState, NodeAnnotator,
    NodeGroup, ProtectionTag,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// =============================================================================
// Cloud State
// =============================================================================

#[derive(Debug, Clone)]
struct InstanceState {
    group_id: String,
    lifecycle_state: LifecycleState,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct CloudState {
    /// cluster -> node group name -> node group
    node_groups: BTreeMap<String, BTreeMap<String, NodeGroup>>,
    /// backing group id -> member instance ids, in insertion order
    groups: BTreeMap<String, Vec<String>>,
    instances: BTreeMap<String, InstanceState>,
    /// Remaining transient failures per backing group listing
    listing_failures: HashMap<String, u32>,
    /// Remaining transient failures per instance tag mutation
    tagging_failures: HashMap<String, u32>,
    tagging_rejected: HashSet<String>,
    unreachable_clusters: HashSet<String>,
}

// =============================================================================
// In-Memory Cloud
// =============================================================================

/// In-memory node-group inventory and compute API
#[derive(Debug, Default)]
pub struct InMemoryCloud {
    state: RwLock<CloudState>,
    mutations: AtomicUsize,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node group in a cluster, replacing any group of the same name
    pub fn add_node_group(&self, cluster: &str, group: NodeGroup) {
        let mut state = self.state.write();
        if let Some(id) = group.backing_group_id.as_ref() {
            state.groups.entry(id.clone()).or_default();
        }
        state
            .node_groups
            .entry(cluster.to_string())
            .or_default()
            .insert(group.name.clone(), group);
    }

    /// Add a member to a backing group, creating the group if needed
    pub fn add_instance(&self, group_id: &str, instance_id: &str, lifecycle: LifecycleState, protected: bool) {
        let mut tags = BTreeMap::new();
        if protected {
            let tag = ProtectionTag::default();
            tags.insert(tag.key, tag.value);
        }
        self.add_member(group_id, instance_id, lifecycle, tags);
    }

    /// Add a member with an explicit tag set, moving it out of any previous group
    pub fn add_member(
        &self,
        group_id: &str,
        instance_id: &str,
        lifecycle: LifecycleState,
        tags: BTreeMap<String, String>,
    ) {
        let mut state = self.state.write();
        let previous = state
            .instances
            .get(instance_id)
            .map(|i| i.group_id.clone())
            .filter(|previous| previous != group_id);
        if let Some(previous) = previous {
            if let Some(members) = state.groups.get_mut(&previous) {
                members.retain(|m| m != instance_id);
            }
        }
        let members = state.groups.entry(group_id.to_string()).or_default();
        if !members.iter().any(|m| m == instance_id) {
            members.push(instance_id.to_string());
        }
        state.instances.insert(
            instance_id.to_string(),
            InstanceState {
                group_id: group_id.to_string(),
                lifecycle_state: lifecycle,
                tags,
            },
        );
    }

    /// Change the lifecycle state of an existing member
    pub fn set_lifecycle_state(&self, instance_id: &str, lifecycle: LifecycleState) {
        if let Some(instance) = self.state.write().instances.get_mut(instance_id) {
            instance.lifecycle_state = lifecycle;
        }
    }

    /// Delete a backing group and its members
    pub fn remove_group(&self, group_id: &str) {
        let mut state = self.state.write();
        if let Some(members) = state.groups.remove(group_id) {
            for id in members {
                if state.instances.get(&id).is_some_and(|i| i.group_id == group_id) {
                    state.instances.remove(&id);
                }
            }
        }
    }

    /// Fail the next `times` listings of a backing group with a throttling error
    pub fn fail_listing_transiently(&self, group_id: &str, times: u32) {
        self.state.write().listing_failures.insert(group_id.to_string(), times);
    }

    /// Fail the next `times` tag mutations on an instance with a throttling error
    pub fn fail_tagging_transiently(&self, instance_id: &str, times: u32) {
        self.state.write().tagging_failures.insert(instance_id.to_string(), times);
    }

    /// Reject every tag mutation on an instance
    pub fn fail_tagging_permanently(&self, instance_id: &str) {
        self.state.write().tagging_rejected.insert(instance_id.to_string());
    }

    /// Make node-group listing for a cluster fail
    pub fn set_cluster_unreachable(&self, cluster: &str, unreachable: bool) {
        let mut state = self.state.write();
        if unreachable {
            state.unreachable_clusters.insert(cluster.to_string());
        } else {
            state.unreachable_clusters.remove(cluster);
        }
    }

    /// Tags currently carried by an instance
    pub fn tags(&self, instance_id: &str) -> Option<BTreeMap<String, String>> {
        self.state.read().instances.get(instance_id).map(|i| i.tags.clone())
    }

    /// In-service instances carrying the tag, sorted by ID
    pub fn protected_instances(&self, tag: &ProtectionTag) -> Vec<String> {
        self.state
            .read()
            .instances
            .iter()
            .filter(|(_, i)| i.lifecycle_state == LifecycleState::InService && tag.is_present(&i.tags))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of successful tag mutations so far
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::Relaxed)
    }

    fn check_tagging(&self, operation: &str, instance_id: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.tagging_rejected.contains(instance_id) {
            return Err(Error::Provider {
                operation: operation.to_string(),
                reason: format!("UnauthorizedOperation on {}", instance_id),
            });
        }
        if let Some(remaining) = state.tagging_failures.get_mut(instance_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(throttled(operation));
            }
        }
        if !state.instances.contains_key(instance_id) {
            return Err(Error::not_found("Instance", instance_id));
        }
        Ok(())
    }
}

fn throttled(operation: &str) -> Error {
    Error::TransientProvider {
        operation: operation.to_string(),
        reason: "Throttling: Rate exceeded".to_string(),
    }
}

#[async_trait]
impl ClusterInventory for InMemoryCloud {
    async fn list_node_groups(&self, cluster: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        if state.unreachable_clusters.contains(cluster) {
            return Err(Error::Provider {
                operation: "ListNodegroups".to_string(),
                reason: format!("AccessDenied for cluster {}", cluster),
            });
        }
        let groups = state
            .node_groups
            .get(cluster)
            .ok_or_else(|| Error::not_found("Cluster", cluster))?;
        Ok(groups.keys().cloned().collect())
    }

    async fn describe_node_group(&self, cluster: &str, name: &str) -> Result<NodeGroup> {
        self.state
            .read()
            .node_groups
            .get(cluster)
            .and_then(|groups| groups.get(name))
            .cloned()
            .ok_or_else(|| Error::not_found("Nodegroup", format!("{}/{}", cluster, name)))
    }
}

#[async_trait]
impl ComputeProvider for InMemoryCloud {
    async fn list_group_instances(&self, group_id: &str) -> Result<Vec<GroupMember>> {
        let mut state = self.state.write();
        if let Some(remaining) = state.listing_failures.get_mut(group_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(throttled("DescribeAutoScalingGroups"));
            }
        }

        let members = state
            .groups
            .get(group_id)
            .ok_or_else(|| Error::not_found("AutoScalingGroup", group_id))?;

        Ok(members
            .iter()
            .filter_map(|id| {
                state.instances.get(id).map(|i| GroupMember {
                    instance_id: id.clone(),
                    lifecycle_state: i.lifecycle_state,
                    tags: i.tags.clone(),
                })
            })
            .collect())
    }

    async fn create_tag(&self, instance_id: &str, key: &str, value: &str) -> Result<()> {
        self.check_tagging("CreateTags", instance_id)?;
        if let Some(instance) = self.state.write().instances.get_mut(instance_id) {
            instance.tags.insert(key.to_string(), value.to_string());
        }
        self.mutations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete_tag(&self, instance_id: &str, key: &str) -> Result<()> {
        self.check_tagging("DeleteTags", instance_id)?;
        if let Some(instance) = self.state.write().instances.get_mut(instance_id) {
            instance.tags.remove(key);
        }
        self.mutations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// =============================================================================
// In-Memory Nodes
// =============================================================================

/// In-memory cluster node set
#[derive(Debug, Default)]
pub struct InMemoryNodes {
    nodes: RwLock<BTreeMap<String, ClusterNode>>,
    unreachable: AtomicBool,
    patches: AtomicUsize,
}

impl InMemoryNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node backed by an instance, optionally pre-annotated
    pub fn add_node(&self, name: &str, instance_id: &str, annotated: bool) {
        let mut annotations = BTreeMap::new();
        if annotated {
            annotations.insert(
                crate::annotator::SCALE_DOWN_DISABLED_ANNOTATION.to_string(),
                "true".to_string(),
            );
        }
        self.insert(ClusterNode {
            name: name.to_string(),
            instance_id: Some(instance_id.to_string()),
            annotations,
        });
    }

    pub fn insert(&self, node: ClusterNode) {
        self.nodes.write().insert(node.name.clone(), node);
    }

    /// Names of nodes carrying the annotation key, sorted
    pub fn annotated_nodes(&self, key: &str) -> Vec<String> {
        self.nodes
            .read()
            .values()
            .filter(|n| n.annotations.contains_key(key))
            .map(|n| n.name.clone())
            .collect()
    }

    /// Number of successful annotation patches so far
    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::Relaxed)
    }

    /// Simulate a control plane outage
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(Error::ControlPlaneUnreachable("connection refused".to_string()));
        }
        Ok(())
    }

    fn patch(&self, node: &str, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        self.check_reachable()?;
        let mut nodes = self.nodes.write();
        let entry = nodes.get_mut(node).ok_or_else(|| Error::not_found("Node", node))?;
        apply(&mut entry.annotations);
        self.patches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl NodeAnnotator for InMemoryNodes {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        self.check_reachable()?;
        Ok(self.nodes.read().values().cloned().collect())
    }

    async fn set_annotation(&self, node: &str, key: &str, value: &str) -> Result<()> {
        self.patch(node, |annotations| {
            annotations.insert(key.to_string(), value.to_string());
        })
    }

    async fn clear_annotation(&self, node: &str, key: &str) -> Result<()> {
        self.patch(node, |annotations| {
            annotations.remove(key);
        })
    }
}
