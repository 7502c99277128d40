//! Reconciliation Engine
//!
//! Turns a live snapshot into the minimal set of tag mutations that leaves
//! exactly one protected instance across the selected node groups, then
//! applies them one instance at a time.
//!
//! Instances are ordered by ascending instance ID (node-group name breaks
//! ties), so two passes over the same snapshot always choose the same keeper.

use super::reader::GroupClassification;
use crate::domain::{ComputeProvider, InstanceRef, ProtectionTag};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Plan
// =============================================================================

/// Aggregate protection state of a cluster snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtectionState {
    /// Instances exist but none is protected
    ZeroProtected,
    /// Exactly one protected instance
    OneProtected,
    /// More than one instance protected
    ManyProtected,
    /// No in-service instances anywhere
    NoneAvailable,
}

impl std::fmt::Display for ProtectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtectionState::ZeroProtected => write!(f, "ZERO_PROTECTED"),
            ProtectionState::OneProtected => write!(f, "ONE_PROTECTED"),
            ProtectionState::ManyProtected => write!(f, "MANY_PROTECTED"),
            ProtectionState::NoneAvailable => write!(f, "NONE_AVAILABLE"),
        }
    }
}

/// Corrective action set for one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionPlan {
    pub state: ProtectionState,
    /// Instance that holds the tag once the plan is applied
    pub keeper: Option<InstanceRef>,
    /// Instances to tag (at most one)
    pub apply: Vec<InstanceRef>,
    /// Instances to untag
    pub remove: Vec<InstanceRef>,
    pub protected_before: usize,
    pub instances_total: usize,
}

impl ProtectionPlan {
    /// Number of tag mutations the plan performs
    pub fn mutation_count(&self) -> usize {
        self.apply.len() + self.remove.len()
    }

    pub fn is_noop(&self) -> bool {
        self.mutation_count() == 0
    }
}

/// Compute the corrective plan for a snapshot
pub fn plan(snapshot: &[GroupClassification]) -> ProtectionPlan {
    let mut protected: Vec<&InstanceRef> = snapshot.iter().flat_map(|g| g.protected.iter()).collect();
    let mut unprotected: Vec<&InstanceRef> =
        snapshot.iter().flat_map(|g| g.unprotected.iter()).collect();
    // Node groups sharing a backing group report the same instance more than once
    protected.sort();
    protected.dedup_by(|a, b| a.instance_id == b.instance_id);
    unprotected.sort();
    unprotected.dedup_by(|a, b| a.instance_id == b.instance_id);
    unprotected.retain(|u| !protected.iter().any(|p| p.instance_id == u.instance_id));

    let protected_before = protected.len();
    let instances_total = protected.len() + unprotected.len();

    let (state, keeper, apply, remove) = match (protected.split_first(), unprotected.first()) {
        (None, None) => (ProtectionState::NoneAvailable, None, Vec::new(), Vec::new()),
        (None, Some(first)) => (
            ProtectionState::ZeroProtected,
            Some((*first).clone()),
            vec![(*first).clone()],
            Vec::new(),
        ),
        (Some((keeper, [])), _) => (
            ProtectionState::OneProtected,
            Some((*keeper).clone()),
            Vec::new(),
            Vec::new(),
        ),
        (Some((keeper, rest)), _) => (
            ProtectionState::ManyProtected,
            Some((*keeper).clone()),
            Vec::new(),
            rest.iter().map(|i| (*i).clone()).collect(),
        ),
    };

    ProtectionPlan {
        state,
        keeper,
        apply,
        remove,
        protected_before,
        instances_total,
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Per-instance action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Apply,
    Remove,
    /// Keeper left in place, no mutation
    Keep,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Apply => write!(f, "apply"),
            ActionKind::Remove => write!(f, "remove"),
            ActionKind::Keep => write!(f, "keep"),
        }
    }
}

/// Result of one attempted action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionOutcome {
    Succeeded,
    Failed,
}

/// Record of one instance-level action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub instance: InstanceRef,
    pub action: ActionKind,
    pub outcome: ActionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome == ActionOutcome::Succeeded
    }
}

/// Apply a plan's mutations.
///
/// Every mutation is attempted independently; a failure is recorded and the
/// remaining mutations still run.
pub async fn execute(
    plan: &ProtectionPlan,
    compute: &dyn ComputeProvider,
    tag: &ProtectionTag,
    retry: &RetryPolicy,
) -> Vec<ActionRecord> {
    let mut records = Vec::with_capacity(plan.mutation_count() + 1);

    if plan.state == ProtectionState::ManyProtected {
        if let Some(keeper) = &plan.keeper {
            records.push(ActionRecord {
                instance: keeper.clone(),
                action: ActionKind::Keep,
                outcome: ActionOutcome::Succeeded,
                error: None,
            });
        }
    }

    for instance in &plan.apply {
        let id = instance.instance_id.as_str();
        let (key, value) = (tag.key.as_str(), tag.value.as_str());
        let result = retry
            .run("CreateTags", move || compute.create_tag(id, key, value))
            .await;
        records.push(record(instance, ActionKind::Apply, result));
    }

    for instance in &plan.remove {
        let id = instance.instance_id.as_str();
        let key = tag.key.as_str();
        let result = retry
            .run("DeleteTags", move || compute.delete_tag(id, key))
            .await;
        records.push(record(instance, ActionKind::Remove, result));
    }

    records
}

fn record(instance: &InstanceRef, action: ActionKind, result: crate::error::Result<()>) -> ActionRecord {
    match result {
        Ok(()) => {
            info!(
                instance = %instance.instance_id,
                node_group = %instance.node_group,
                action = %action,
                "Protection tag mutation applied"
            );
            ActionRecord {
                instance: instance.clone(),
                action,
                outcome: ActionOutcome::Succeeded,
                error: None,
            }
        }
        Err(e) => {
            warn!(
                instance = %instance.instance_id,
                node_group = %instance.node_group,
                action = %action,
                error = %e,
                "Protection tag mutation failed"
            );
            ActionRecord {
                instance: instance.clone(),
                action,
                outcome: ActionOutcome::Failed,
                error: Some(e.to_string()),
            }
        }
    }
}
