//! Scale-Down Exemption Annotator
//!
//! Keeps the autoscaler's scale-down exclusion annotation on the cluster node
//! backing the protected instance, and only there. Nodes whose instance is
//! outside the selected node groups are never touched.

pub mod kube_nodes;

pub use kube_nodes::KubeNodeAnnotator;

use crate::domain::{InstanceRef, NodeAnnotator, NodeAnnotatorRef};
use crate::error::Result;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Annotation recognized by the cluster autoscaler
pub const SCALE_DOWN_DISABLED_ANNOTATION: &str =
    "cluster-autoscaler.kubernetes.io/scale-down-disabled";

// =============================================================================
// Outcome
// =============================================================================

/// Overall result of an annotation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnnotationStatus {
    /// At least one node changed
    Synced,
    /// Annotations already matched
    Unchanged,
    /// Some node patches failed
    Partial,
    /// The control plane could not be listed
    Unreachable,
}

/// What the annotator did during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationOutcome {
    pub status: AnnotationStatus,
    /// Node that carries the annotation after the pass
    pub protected_node: Option<String>,
    pub annotated: Vec<String>,
    pub cleared: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl AnnotationOutcome {
    fn unreachable(error: String) -> Self {
        Self {
            status: AnnotationStatus::Unreachable,
            protected_node: None,
            annotated: Vec::new(),
            cleared: Vec::new(),
            errors: vec![error],
        }
    }
}

// =============================================================================
// Annotator
// =============================================================================

/// Aligns the node annotation with the protected instance
pub struct ScaleDownAnnotator {
    nodes: NodeAnnotatorRef,
    key: String,
    value: String,
    retry: RetryPolicy,
}

impl ScaleDownAnnotator {
    pub fn new(nodes: NodeAnnotatorRef, retry: RetryPolicy) -> Self {
        Self {
            nodes,
            key: SCALE_DOWN_DISABLED_ANNOTATION.to_string(),
            value: "true".to_string(),
            retry,
        }
    }

    /// Build from a control-plane connection attempt.
    ///
    /// A failed attempt disables annotation for the process; tagging still runs.
    pub fn from_connection(connection: Result<NodeAnnotatorRef>, retry: RetryPolicy) -> Option<Self> {
        match connection {
            Ok(nodes) => Some(Self::new(nodes, retry)),
            Err(e) => {
                warn!(error = %e, "Cluster control plane unavailable, node annotation disabled");
                None
            }
        }
    }

    /// Override the annotation key/value
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key = key.into();
        self.value = value.into();
        self
    }

    /// Sync annotations for the given scope.
    ///
    /// `scope` holds the instance IDs of every in-service instance in the
    /// selected node groups; `keeper` is the instance carrying the tag.
    pub async fn sync(
        &self,
        keeper: Option<&InstanceRef>,
        scope: &BTreeSet<String>,
    ) -> AnnotationOutcome {
        let port: &dyn NodeAnnotator = self.nodes.as_ref();
        let nodes = match self.retry.run("ListNodes", move || port.list_nodes()).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Cluster control plane unreachable, annotations retried next pass");
                return AnnotationOutcome::unreachable(e.to_string());
            }
        };

        let (key, value) = (self.key.as_str(), self.value.as_str());
        let keeper_id = keeper.map(|k| k.instance_id.as_str());
        let mut outcome = AnnotationOutcome {
            status: AnnotationStatus::Unchanged,
            protected_node: None,
            annotated: Vec::new(),
            cleared: Vec::new(),
            errors: Vec::new(),
        };

        for node in &nodes {
            let Some(instance_id) = node.instance_id.as_deref() else {
                continue;
            };
            if !scope.contains(instance_id) {
                continue;
            }
            let annotated = node.has_annotation(key, value);
            let name = node.name.as_str();

            if Some(instance_id) == keeper_id {
                if annotated {
                    outcome.protected_node = Some(node.name.clone());
                    continue;
                }
                match self
                    .retry
                    .run("PatchNode", move || port.set_annotation(name, key, value))
                    .await
                {
                    Ok(()) => {
                        info!(node = name, instance = instance_id, "Annotated protected node");
                        outcome.protected_node = Some(node.name.clone());
                        outcome.annotated.push(node.name.clone());
                    }
                    Err(e) => {
                        warn!(node = name, error = %e, "Failed to annotate protected node");
                        outcome.errors.push(format!("annotate {}: {}", name, e));
                    }
                }
            } else if node.annotations.contains_key(key) {
                match self
                    .retry
                    .run("PatchNode", move || port.clear_annotation(name, key))
                    .await
                {
                    Ok(()) => {
                        info!(node = name, instance = instance_id, "Cleared stale scale-down annotation");
                        outcome.cleared.push(node.name.clone());
                    }
                    Err(e) => {
                        warn!(node = name, error = %e, "Failed to clear scale-down annotation");
                        outcome.errors.push(format!("clear {}: {}", name, e));
                    }
                }
            }
        }

        if let (Some(id), None) = (keeper_id, &outcome.protected_node) {
            debug!(instance = id, "No cluster node found for protected instance");
        }

        outcome.status = if !outcome.errors.is_empty() {
            AnnotationStatus::Partial
        } else if outcome.annotated.is_empty() && outcome.cleared.is_empty() {
            AnnotationStatus::Unchanged
        } else {
            AnnotationStatus::Synced
        };
        outcome
    }
}
