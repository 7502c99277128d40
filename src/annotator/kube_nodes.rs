//! Kubernetes Node Adapter
//!
//! Implements the node annotation port against the cluster API using
//! JSON merge patches on `Node` objects.

use crate::domain::{instance_id_from_provider_id, ClusterNode, NodeAnnotator};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::debug;

/// Node annotator backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeNodeAnnotator {
    client: Client,
}

impl KubeNodeAnnotator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::ControlPlaneUnreachable(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn api(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    async fn patch_annotation(&self, node: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let mut annotations = serde_json::Map::new();
        annotations.insert(key.to_string(), value);
        let patch = json!({ "metadata": { "annotations": annotations } });

        self.api()
            .patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, node))?;

        debug!(node, key, "Patched node annotation");
        Ok(())
    }
}

#[async_trait]
impl NodeAnnotator for KubeNodeAnnotator {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        let nodes = self
            .api()
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, "*"))?;

        Ok(nodes.items.into_iter().filter_map(to_cluster_node).collect())
    }

    async fn set_annotation(&self, node: &str, key: &str, value: &str) -> Result<()> {
        self.patch_annotation(node, key, json!(value)).await
    }

    async fn clear_annotation(&self, node: &str, key: &str) -> Result<()> {
        // A null value in a merge patch deletes the key
        self.patch_annotation(node, key, serde_json::Value::Null).await
    }
}

fn to_cluster_node(node: Node) -> Option<ClusterNode> {
    let name = node.metadata.name?;
    let instance_id = node
        .spec
        .and_then(|spec| spec.provider_id)
        .and_then(|id| instance_id_from_provider_id(&id));

    Some(ClusterNode {
        name,
        instance_id,
        annotations: node.metadata.annotations.unwrap_or_default(),
    })
}

/// API responses are kept as `Kube` errors; anything below the API layer
/// means the control plane could not be reached.
fn map_kube_error(err: kube::Error, node: &str) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 404 => Error::not_found("Node", node),
        kube::Error::Api(_) => Error::Kube(err),
        other => Error::ControlPlaneUnreachable(other.to_string()),
    }
}
