//! Cluster Reconciler
//!
//! One pass: list node groups, select the candidates, classify them from a
//! fresh read, plan, mutate tags, align node annotations, report. The
//! reconciler holds no state between passes; instance tags are the record.

use super::engine::{execute, plan};
use super::reader::ProtectionStateReader;
use super::report::{effective_keeper, RunReport};
use crate::annotator::ScaleDownAnnotator;
use crate::config::ProtectorConfig;
use crate::domain::{
    CloudConnectorRef, CloudPorts, ClusterInventoryRef, ClusterTarget, ComputeProviderRef,
};
use crate::error::{Error, Result};
use crate::metrics::ReconcileMetrics;
use crate::selection::NodeGroupSelector;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

/// Drives reconciliation passes for any cluster
pub struct Reconciler {
    config: ProtectorConfig,
    cloud: CloudConnectorRef,
    selector: NodeGroupSelector,
    annotator: Option<ScaleDownAnnotator>,
    metrics: Option<ReconcileMetrics>,
}

impl Reconciler {
    /// Reconciler over fixed ports, whatever the target region
    pub fn new(
        config: ProtectorConfig,
        inventory: ClusterInventoryRef,
        compute: ComputeProviderRef,
    ) -> Self {
        Self::with_connector(config, Arc::new(CloudPorts::new(inventory, compute)))
    }

    /// Reconciler that connects to the target's region on every pass
    pub fn with_connector(config: ProtectorConfig, cloud: CloudConnectorRef) -> Self {
        Self {
            config,
            cloud,
            selector: NodeGroupSelector::default(),
            annotator: None,
            metrics: None,
        }
    }

    pub fn with_selector(mut self, selector: NodeGroupSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_annotator(mut self, annotator: ScaleDownAnnotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ProtectorConfig {
        &self.config
    }

    /// Run one bounded pass for a cluster.
    ///
    /// Per-group and per-instance failures land in the report; only an
    /// exceeded deadline is returned as an error.
    pub async fn reconcile(&self, target: &ClusterTarget) -> Result<RunReport> {
        let span = info_span!(
            "reconcile",
            cluster = %target.cluster_name,
            region = %target.region,
            trigger = %target.trigger,
        );
        let deadline = self.config.run_deadline;

        async {
            let report = match tokio::time::timeout(deadline, self.run_pass(target)).await {
                Ok(report) => report,
                Err(_) => {
                    error!(deadline_ms = deadline.as_millis() as u64, "Reconciliation deadline exceeded");
                    return Err(Error::DeadlineExceeded(deadline));
                }
            };

            match serde_json::to_string(&report) {
                Ok(json) => info!(
                    status = %report.status,
                    protected = report.protected_count,
                    duration_ms = report.duration_ms,
                    report = %json,
                    "Reconciliation complete"
                ),
                Err(e) => warn!(error = %e, "Unable to serialize run report"),
            }
            if let Some(metrics) = &self.metrics {
                metrics.observe(&report);
            }
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn run_pass(&self, target: &ClusterTarget) -> RunReport {
        let started_at = Utc::now();
        let cluster = target.cluster_name.as_str();

        let ports = match self.cloud.connect(&target.region) {
            Ok(ports) => ports,
            Err(e) => {
                error!(error = %e, "Unable to connect to the cloud provider");
                return RunReport::failed(target, e.to_string(), started_at);
            }
        };

        let inventory = ports.inventory.as_ref();
        let names = match self
            .config
            .provider_retry
            .run("ListNodegroups", move || inventory.list_node_groups(cluster))
            .await
        {
            Ok(names) => names,
            Err(e) => {
                error!(error = %e, "Unable to list node groups");
                return RunReport::failed(target, e.to_string(), started_at);
            }
        };

        let selection = self.selector.select(&names);
        if selection.is_empty() {
            warn!(node_groups = names.len(), "No node group matched any selection tier");
            return RunReport::no_matching_groups(target, started_at);
        }
        info!(
            tier = selection.tier.as_deref().unwrap_or_default(),
            selected = ?selection.node_groups,
            "Selected node groups"
        );

        let reader = ProtectionStateReader::new(
            ports.inventory.clone(),
            ports.compute.clone(),
            self.config.tag.clone(),
            self.config.provider_retry,
        );
        let snapshot = reader.classify_all(cluster, &selection.node_groups).await;
        let plan = plan(&snapshot);
        info!(
            state = %plan.state,
            instances = plan.instances_total,
            protected = plan.protected_before,
            mutations = plan.mutation_count(),
            "Planned protection changes"
        );

        let actions = execute(
            &plan,
            ports.compute.as_ref(),
            &self.config.tag,
            &self.config.provider_retry,
        )
        .await;

        let annotation = match &self.annotator {
            Some(annotator) => {
                let keeper = effective_keeper(&plan, &actions);
                let scope: BTreeSet<String> = snapshot
                    .iter()
                    .flat_map(|g| g.instances())
                    .map(|i| i.instance_id.clone())
                    .collect();
                Some(annotator.sync(keeper.as_ref(), &scope).await)
            }
            None => None,
        };

        RunReport::build(target, &selection, &snapshot, &plan, actions, annotation, started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotator::{AnnotationStatus, SCALE_DOWN_DISABLED_ANNOTATION};
    use crate::domain::{
        CapacityType, ClusterInventory, LifecycleState, NodeGroup, ProtectionTag, ScalingConfig,
        TriggerKind,
    };
    use crate::protection::{ProtectionState, RunStatus};
    use crate::providers::{InMemoryCloud, InMemoryNodes};
    use crate::retry::RetryPolicy;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::time::Duration;

    const CLUSTER: &str = "prod-us-east-1-main";

    fn target() -> ClusterTarget {
        ClusterTarget {
            cluster_name: CLUSTER.into(),
            region: "us-east-1".into(),
            trigger: TriggerKind::Manual,
        }
    }

    fn config() -> ProtectorConfig {
        ProtectorConfig {
            provider_retry: RetryPolicy::immediate(3),
            annotator_retry: RetryPolicy::immediate(2),
            ..Default::default()
        }
    }

    fn node_group(name: &str, group_id: &str) -> NodeGroup {
        NodeGroup {
            name: name.to_string(),
            capacity_type: CapacityType::OnDemand,
            scaling: ScalingConfig::new(1, 2, 3),
            backing_group_id: Some(group_id.to_string()),
        }
    }

    /// Two strict-tier groups with three in-service instances
    fn two_groups(protected: bool) -> Arc<InMemoryCloud> {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_node_group(CLUSTER, node_group("nodegroup-1-ondemand", "asg-1"));
        cloud.add_node_group(CLUSTER, node_group("nodegroup-2-ondemand", "asg-2"));
        cloud.add_node_group(CLUSTER, node_group("nodegroup-3-spot", "asg-3"));
        cloud.add_instance("asg-1", "i-0a", LifecycleState::InService, protected);
        cloud.add_instance("asg-1", "i-0b", LifecycleState::InService, protected);
        cloud.add_instance("asg-2", "i-0c", LifecycleState::InService, protected);
        cloud.add_instance("asg-3", "i-0s", LifecycleState::InService, false);
        cloud
    }

    fn reconciler(cloud: &Arc<InMemoryCloud>) -> Reconciler {
        Reconciler::new(config(), cloud.clone(), cloud.clone())
    }

    fn protected(cloud: &InMemoryCloud) -> Vec<String> {
        cloud.protected_instances(&ProtectionTag::default())
    }

    #[tokio::test]
    async fn test_none_protected_tags_one() {
        let cloud = two_groups(false);

        let report = reconciler(&cloud).reconcile(&target()).await.unwrap();

        assert_eq!(report.status, RunStatus::Corrected);
        assert_eq!(report.state, Some(ProtectionState::ZeroProtected));
        assert_eq!(report.selection_tier.as_deref(), Some("strict"));
        assert_eq!(report.node_groups_checked, 2);
        assert_eq!(report.actions_applied, 1);
        assert_eq!(report.actions_removed, 0);
        assert_eq!(report.protected_count, 1);
        assert_eq!(protected(&cloud), vec!["i-0a".to_string()]);
    }

    #[tokio::test]
    async fn test_all_protected_keeps_one() {
        let cloud = two_groups(true);

        let report = reconciler(&cloud).reconcile(&target()).await.unwrap();

        assert_eq!(report.state, Some(ProtectionState::ManyProtected));
        assert_eq!(report.actions_removed, 2);
        assert_eq!(report.actions_kept, 1);
        assert_eq!(report.protected_count, 1);
        assert_eq!(protected(&cloud), vec!["i-0a".to_string()]);
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let cloud = two_groups(true);
        let reconciler = reconciler(&cloud);

        reconciler.reconcile(&target()).await.unwrap();
        let mutations = cloud.mutation_count();
        let second = reconciler.reconcile(&target()).await.unwrap();

        assert_eq!(second.status, RunStatus::Converged);
        assert_eq!(second.state, Some(ProtectionState::OneProtected));
        assert_eq!(cloud.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn test_shared_backing_group_does_not_flap() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_node_group(CLUSTER, node_group("nodegroup-1-ondemand", "asg-shared"));
        cloud.add_node_group(CLUSTER, node_group("nodegroup-2-ondemand", "asg-shared"));
        cloud.add_instance("asg-shared", "i-1", LifecycleState::InService, true);
        let reconciler = reconciler(&cloud);

        for _ in 0..4 {
            let report = reconciler.reconcile(&target()).await.unwrap();
            assert_eq!(report.state, Some(ProtectionState::OneProtected));
            assert_eq!(report.status, RunStatus::Converged);
            assert_eq!(report.protected_count, 1);
            assert_eq!(protected(&cloud), vec!["i-1".to_string()]);
        }
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_passes_converge() {
        for initially_protected in [false, true] {
            let cloud = two_groups(initially_protected);
            let first = reconciler(&cloud);
            let second = reconciler(&cloud);

            let (ta, tb) = (target(), target());
            let (a, b) = tokio::join!(first.reconcile(&ta), second.reconcile(&tb));
            assert!(a.is_ok() && b.is_ok());
            assert_eq!(protected(&cloud), vec!["i-0a".to_string()]);

            let settled = first.reconcile(&target()).await.unwrap();
            assert_eq!(settled.status, RunStatus::Converged);
        }
    }

    #[tokio::test]
    async fn test_recovers_after_keeper_terminates() {
        let cloud = two_groups(false);
        let reconciler = reconciler(&cloud);
        reconciler.reconcile(&target()).await.unwrap();

        cloud.set_lifecycle_state("i-0a", LifecycleState::Terminated);
        let report = reconciler.reconcile(&target()).await.unwrap();

        assert_eq!(report.state, Some(ProtectionState::ZeroProtected));
        assert_eq!(protected(&cloud), vec!["i-0b".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_group_does_not_block_siblings() {
        let cloud = two_groups(false);
        cloud.remove_group("asg-1");

        let report = reconciler(&cloud).reconcile(&target()).await.unwrap();

        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.per_group_results.len(), 2);
        assert_eq!(protected(&cloud), vec!["i-0c".to_string()]);
    }

    #[tokio::test]
    async fn test_transient_tag_failure_retried() {
        let cloud = two_groups(false);
        cloud.fail_tagging_transiently("i-0a", 2);

        let report = reconciler(&cloud).reconcile(&target()).await.unwrap();

        assert_eq!(report.status, RunStatus::Corrected);
        assert_eq!(protected(&cloud), vec!["i-0a".to_string()]);
    }

    #[tokio::test]
    async fn test_annotates_keeper_node() {
        let cloud = two_groups(false);
        let nodes = Arc::new(InMemoryNodes::new());
        nodes.add_node("node-a", "i-0a", false);
        nodes.add_node("node-c", "i-0c", true);
        nodes.add_node("node-s", "i-0s", true);
        let annotator = ScaleDownAnnotator::new(nodes.clone(), RetryPolicy::none());

        let report = reconciler(&cloud)
            .with_annotator(annotator)
            .reconcile(&target())
            .await
            .unwrap();

        let annotation = report.annotation.unwrap();
        assert_eq!(annotation.status, AnnotationStatus::Synced);
        assert_eq!(annotation.protected_node.as_deref(), Some("node-a"));
        // node-s backs a group outside the selection
        assert_eq!(
            nodes.annotated_nodes(SCALE_DOWN_DISABLED_ANNOTATION),
            vec!["node-a".to_string(), "node-s".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unreachable_control_plane_still_tags() {
        let cloud = two_groups(false);
        let nodes = Arc::new(InMemoryNodes::new());
        nodes.add_node("node-a", "i-0a", false);
        nodes.set_unreachable(true);
        let annotator = ScaleDownAnnotator::new(nodes.clone(), RetryPolicy::none());

        let report = reconciler(&cloud)
            .with_annotator(annotator)
            .reconcile(&target())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Corrected);
        assert_eq!(report.annotation.unwrap().status, AnnotationStatus::Unreachable);
        assert_eq!(protected(&cloud), vec!["i-0a".to_string()]);
    }

    #[tokio::test]
    async fn test_no_matching_groups() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_node_group(CLUSTER, node_group("batch", "asg-x"));
        let selector = NodeGroupSelector::new(vec![crate::selection::MatcherTier::new(
            "strict",
            &["nodegroup-[0-9]-ondemand"],
            crate::selection::TierTake::All,
        )
        .unwrap()]);

        let report = reconciler(&cloud)
            .with_selector(selector)
            .reconcile(&target())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::NoMatchingGroups);
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_inventory_failure_reported() {
        let cloud = two_groups(false);
        cloud.set_cluster_unreachable(CLUSTER, true);

        let report = reconciler(&cloud).reconcile(&target()).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.is_some());
        assert_eq!(cloud.mutation_count(), 0);
    }

    /// Records the regions it was asked for; refuses unknown ones
    struct RegionalClouds {
        cloud: Arc<InMemoryCloud>,
        requested: parking_lot::Mutex<Vec<String>>,
    }

    impl crate::domain::CloudConnector for RegionalClouds {
        fn connect(&self, region: &str) -> Result<CloudPorts> {
            self.requested.lock().push(region.to_string());
            if region != "us-east-1" {
                return Err(Error::Configuration(format!("no endpoint for region {}", region)));
            }
            Ok(CloudPorts::new(self.cloud.clone(), self.cloud.clone()))
        }
    }

    #[tokio::test]
    async fn test_connects_to_target_region() {
        let clouds = Arc::new(RegionalClouds {
            cloud: two_groups(false),
            requested: parking_lot::Mutex::new(Vec::new()),
        });
        let reconciler = Reconciler::with_connector(config(), clouds.clone());

        let report = reconciler.reconcile(&target()).await.unwrap();
        assert_eq!(report.status, RunStatus::Corrected);

        let elsewhere = ClusterTarget {
            region: "eu-west-1".into(),
            ..target()
        };
        let report = reconciler.reconcile(&elsewhere).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.unwrap().contains("eu-west-1"));
        assert_eq!(*clouds.requested.lock(), vec!["us-east-1".to_string(), "eu-west-1".to_string()]);
    }

    struct SlowInventory;

    #[async_trait]
    impl ClusterInventory for SlowInventory {
        async fn list_node_groups(&self, _cluster: &str) -> Result<Vec<String>> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Vec::new())
        }

        async fn describe_node_group(&self, cluster: &str, name: &str) -> Result<NodeGroup> {
            Err(Error::not_found("Nodegroup", format!("{}/{}", cluster, name)))
        }
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let cloud = Arc::new(InMemoryCloud::new());
        let config = ProtectorConfig {
            run_deadline: Duration::from_millis(20),
            ..config()
        };
        let reconciler = Reconciler::new(config, Arc::new(SlowInventory), cloud);

        assert_matches!(
            reconciler.reconcile(&target()).await,
            Err(Error::DeadlineExceeded(_))
        );
    }
}
