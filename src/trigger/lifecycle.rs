//! Instance lifecycle notifications
//!
//! Accepts the compute event bus envelope for instance state changes.
//! Delivery is at-least-once and unordered, so the payload is used only to
//! route a pass to a cluster.

use super::TriggerDefaults;
use crate::domain::{ClusterTarget, TriggerKind};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const EVENT_SOURCE: &str = "aws.ec2";
pub const EVENT_DETAIL_TYPE: &str = "EC2 Instance State-change Notification";

/// States that can change which instance should hold the tag
pub const TRIGGERING_STATES: &[&str] = &["running", "terminated"];

/// State-change notification envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleNotification {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub source: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    /// Cluster hint added by the subscription's input transformer
    #[serde(default, rename = "clusterName")]
    pub cluster_name: Option<String>,
    pub detail: LifecycleDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleDetail {
    #[serde(rename = "instance-id")]
    pub instance_id: String,
    pub state: String,
}

impl LifecycleNotification {
    /// Decode a raw event body
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::MalformedEvent(e.to_string()))
    }
}

/// What to do with a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "camelCase")]
pub enum LifecycleDisposition {
    Reconcile(ClusterTarget),
    Ignored { reason: String },
}

/// Routes lifecycle notifications to a cluster pass
#[derive(Debug, Clone, Default)]
pub struct LifecycleEventAdapter {
    defaults: TriggerDefaults,
}

impl LifecycleEventAdapter {
    pub fn new(defaults: TriggerDefaults) -> Self {
        Self { defaults }
    }

    pub fn resolve(&self, event: &LifecycleNotification) -> Result<LifecycleDisposition> {
        if event.source != EVENT_SOURCE || event.detail_type != EVENT_DETAIL_TYPE {
            return Ok(LifecycleDisposition::Ignored {
                reason: format!("unsupported event {} / {}", event.source, event.detail_type),
            });
        }

        let state = event.detail.state.to_ascii_lowercase();
        if !TRIGGERING_STATES.contains(&state.as_str()) {
            debug!(instance = %event.detail.instance_id, state = %state, "Ignoring lifecycle state");
            return Ok(LifecycleDisposition::Ignored {
                reason: format!("state {} does not affect protection", state),
            });
        }

        let target = self.defaults.resolve(
            event.cluster_name.as_deref(),
            event.region.as_deref(),
            TriggerKind::Lifecycle {
                instance_id: event.detail.instance_id.clone(),
                state,
            },
        )?;
        Ok(LifecycleDisposition::Reconcile(target))
    }
}
