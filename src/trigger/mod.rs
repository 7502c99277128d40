//! Trigger Adapters
//!
//! Turn lifecycle notifications and manual or scheduled invocations into a
//! resolved [`ClusterTarget`]. The adapters are stateless: an event only
//! says which cluster to look at, never what state its instances are in.

pub mod invocation;
pub mod lifecycle;
pub mod periodic;
pub mod region;
pub mod subscription;

pub use invocation::{InvocationAdapter, InvocationRequest};
pub use lifecycle::{LifecycleDisposition, LifecycleEventAdapter, LifecycleNotification};
pub use periodic::PeriodicTrigger;
pub use region::region_from_cluster_name;
pub use subscription::event_rule_pattern;

use crate::domain::{ClusterTarget, TriggerKind};
use crate::error::{Error, Result};

/// Cluster identity configured for the deployment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerDefaults {
    pub cluster_name: Option<String>,
    pub region: Option<String>,
}

impl TriggerDefaults {
    pub fn new(cluster_name: Option<String>, region: Option<String>) -> Self {
        Self {
            cluster_name: non_blank(cluster_name),
            region: non_blank(region),
        }
    }

    /// Resolve the cluster and region for a pass.
    ///
    /// Cluster: request, then default. Region: request, then the default
    /// region and the naming convention. The default region belongs to the
    /// default cluster, so for any other cluster the name is consulted first.
    pub fn resolve(
        &self,
        cluster_name: Option<&str>,
        region: Option<&str>,
        trigger: TriggerKind,
    ) -> Result<ClusterTarget> {
        let cluster_name = cluster_name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| self.cluster_name.clone())
            .ok_or(Error::MissingClusterIdentity)?;
        let is_default_cluster = self.cluster_name.as_deref() == Some(cluster_name.as_str());

        let requested = region
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let region = if is_default_cluster {
            requested
                .or_else(|| self.region.clone())
                .or_else(|| region_from_cluster_name(&cluster_name))
        } else {
            requested
                .or_else(|| region_from_cluster_name(&cluster_name))
                .or_else(|| self.region.clone())
        }
        .ok_or_else(|| Error::UnresolvableRegion {
            cluster: cluster_name.clone(),
        })?;

        Ok(ClusterTarget {
            cluster_name,
            region,
            trigger,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
