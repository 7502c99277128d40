//! Manual and scheduled invocations

use super::TriggerDefaults;
use crate::domain::{ClusterTarget, TriggerKind};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Body of a manual or scheduled invocation; both fields fall back to the
/// configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    #[serde(default, alias = "cluster_name")]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InvocationAdapter {
    defaults: TriggerDefaults,
}

impl InvocationAdapter {
    pub fn new(defaults: TriggerDefaults) -> Self {
        Self { defaults }
    }

    pub fn resolve(&self, request: &InvocationRequest, trigger: TriggerKind) -> Result<ClusterTarget> {
        self.defaults.resolve(
            request.cluster_name.as_deref(),
            request.region.as_deref(),
            trigger,
        )
    }
}
