//! Run Report
//!
//! Machine-readable summary of one reconciliation pass, emitted for logging
//! and alerting collaborators.

use super::engine::{ActionKind, ActionRecord, ProtectionPlan, ProtectionState};
use super::reader::{GroupClassification, ReadStatus};
use crate::annotator::AnnotationOutcome;
use crate::domain::{ClusterTarget, InstanceRef, TriggerKind};
use crate::selection::Selection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Per-Group Results
// =============================================================================

/// Health of one node group within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupStatus {
    Ok,
    Warning,
    Error,
}

/// What a run did to one node group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionTaken {
    None,
    Applied,
    Removed,
}

/// Result for one node group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResult {
    pub node_group: String,
    pub backing_group_id: Option<String>,
    pub status: GroupStatus,
    pub action_taken: ActionTaken,
    pub instances: usize,
    pub message: String,
}

impl GroupResult {
    fn from_classification(group: &GroupClassification, actions: &[ActionRecord]) -> Self {
        let mine: Vec<&ActionRecord> = actions
            .iter()
            .filter(|a| a.instance.node_group == group.node_group)
            .collect();

        let applied = |kind: ActionKind| mine.iter().any(|a| a.action == kind && a.succeeded());
        let action_taken = if applied(ActionKind::Apply) {
            ActionTaken::Applied
        } else if applied(ActionKind::Remove) {
            ActionTaken::Removed
        } else {
            ActionTaken::None
        };

        let failures: Vec<&&ActionRecord> = mine.iter().filter(|a| !a.succeeded()).collect();
        let status = match group.status {
            ReadStatus::NotFound => GroupStatus::Warning,
            ReadStatus::Failed => GroupStatus::Error,
            ReadStatus::Ok if !failures.is_empty() => GroupStatus::Error,
            ReadStatus::Ok => GroupStatus::Ok,
        };

        let message = match &group.message {
            Some(message) => message.clone(),
            None if mine.is_empty() => format!(
                "no action: {} in service, {} protected",
                group.instance_count(),
                group.protected.len()
            ),
            None => mine
                .iter()
                .map(|a| describe(a))
                .collect::<Vec<_>>()
                .join("; "),
        };

        Self {
            node_group: group.node_group.clone(),
            backing_group_id: group.backing_group_id.clone(),
            status,
            action_taken,
            instances: group.instance_count(),
            message,
        }
    }
}

fn describe(action: &ActionRecord) -> String {
    let id = &action.instance.instance_id;
    match (action.action, &action.error) {
        (ActionKind::Keep, _) => format!("kept {}", id),
        (ActionKind::Apply, None) => format!("tagged {}", id),
        (ActionKind::Remove, None) => format!("removed tag from {}", id),
        (ActionKind::Apply, Some(e)) => format!("failed to tag {}: {}", id, e),
        (ActionKind::Remove, Some(e)) => format!("failed to untag {}: {}", id, e),
    }
}

// =============================================================================
// Run Report
// =============================================================================

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    /// Already converged; nothing changed
    Converged,
    /// Corrective mutations all succeeded
    Corrected,
    /// Some group or mutation failed; the next pass retries
    Partial,
    NoMatchingGroups,
    NoInstances,
    /// Node-group inventory itself could not be read
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Converged => write!(f, "converged"),
            RunStatus::Corrected => write!(f, "corrected"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::NoMatchingGroups => write!(f, "no_matching_groups"),
            RunStatus::NoInstances => write!(f, "no_instances"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Structured report of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub cluster_name: String,
    pub region: String,
    pub trigger: TriggerKind,
    pub status: RunStatus,
    pub selection_tier: Option<String>,
    pub state: Option<ProtectionState>,
    pub keeper: Option<InstanceRef>,
    pub node_groups_checked: usize,
    pub actions_applied: usize,
    pub actions_removed: usize,
    pub actions_kept: usize,
    pub actions_failed: usize,
    /// Estimated protected count after this run
    pub protected_count: usize,
    pub per_group_results: Vec<GroupResult>,
    pub actions: Vec<ActionRecord>,
    pub annotation: Option<AnnotationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Report for a run that could not list the cluster's node groups
    pub fn failed(target: &ClusterTarget, error: String, started_at: DateTime<Utc>) -> Self {
        Self::empty(target, RunStatus::Failed, Some(error), started_at)
    }

    /// Report for a run whose selection matched nothing
    pub fn no_matching_groups(target: &ClusterTarget, started_at: DateTime<Utc>) -> Self {
        Self::empty(target, RunStatus::NoMatchingGroups, None, started_at)
    }

    fn empty(
        target: &ClusterTarget,
        status: RunStatus,
        error: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cluster_name: target.cluster_name.clone(),
            region: target.region.clone(),
            trigger: target.trigger.clone(),
            status,
            selection_tier: None,
            state: None,
            keeper: None,
            node_groups_checked: 0,
            actions_applied: 0,
            actions_removed: 0,
            actions_kept: 0,
            actions_failed: 0,
            protected_count: 0,
            per_group_results: Vec::new(),
            actions: Vec::new(),
            annotation: None,
            error,
            started_at,
            duration_ms: elapsed_ms(started_at),
        }
    }

    /// Assemble the report of a completed pass
    pub fn build(
        target: &ClusterTarget,
        selection: &Selection,
        snapshot: &[GroupClassification],
        plan: &ProtectionPlan,
        actions: Vec<ActionRecord>,
        annotation: Option<AnnotationOutcome>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let count = |kind: ActionKind| {
            actions
                .iter()
                .filter(|a| a.action == kind && a.succeeded())
                .count()
        };
        let actions_applied = count(ActionKind::Apply);
        let actions_removed = count(ActionKind::Remove);
        let actions_kept = count(ActionKind::Keep);
        let actions_failed = actions.iter().filter(|a| !a.succeeded()).count();

        let per_group_results: Vec<GroupResult> = snapshot
            .iter()
            .map(|g| GroupResult::from_classification(g, &actions))
            .collect();

        let degraded = actions_failed > 0
            || per_group_results
                .iter()
                .any(|g| g.status != GroupStatus::Ok);

        let status = if degraded {
            RunStatus::Partial
        } else if plan.state == ProtectionState::NoneAvailable {
            RunStatus::NoInstances
        } else if actions_applied + actions_removed > 0 {
            RunStatus::Corrected
        } else {
            RunStatus::Converged
        };

        Self {
            cluster_name: target.cluster_name.clone(),
            region: target.region.clone(),
            trigger: target.trigger.clone(),
            status,
            selection_tier: selection.tier.clone(),
            state: Some(plan.state),
            keeper: effective_keeper(plan, &actions),
            node_groups_checked: snapshot.len(),
            actions_applied,
            actions_removed,
            actions_kept,
            actions_failed,
            protected_count: (plan.protected_before + actions_applied)
                .saturating_sub(actions_removed),
            per_group_results,
            actions,
            annotation,
            error: None,
            started_at,
            duration_ms: elapsed_ms(started_at),
        }
    }
}

/// The instance actually carrying the tag after execution.
///
/// A keeper that needed tagging only counts once its tag landed.
pub fn effective_keeper(plan: &ProtectionPlan, actions: &[ActionRecord]) -> Option<InstanceRef> {
    let keeper = plan.keeper.as_ref()?;
    if plan.state != ProtectionState::ZeroProtected {
        return Some(keeper.clone());
    }
    actions
        .iter()
        .any(|a| a.action == ActionKind::Apply && a.succeeded() && &a.instance == keeper)
        .then(|| keeper.clone())
}

fn elapsed_ms(started_at: DateTime<Utc>) -> u64 {
    (Utc::now() - started_at).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::engine::{plan, ActionOutcome};

    fn target() -> ClusterTarget {
        ClusterTarget {
            cluster_name: "prod-us-east-1-main".into(),
            region: "us-east-1".into(),
            trigger: TriggerKind::Manual,
        }
    }

    fn group(name: &str, protected: &[&str], unprotected: &[&str], status: ReadStatus) -> GroupClassification {
        GroupClassification {
            node_group: name.to_string(),
            backing_group_id: None,
            protected: protected.iter().map(|i| InstanceRef::new(*i, name)).collect(),
            unprotected: unprotected.iter().map(|i| InstanceRef::new(*i, name)).collect(),
            status,
            message: (status != ReadStatus::Ok).then(|| "unreadable".to_string()),
        }
    }

    fn action(id: &str, group: &str, kind: ActionKind, ok: bool) -> ActionRecord {
        ActionRecord {
            instance: InstanceRef::new(id, group),
            action: kind,
            outcome: if ok { ActionOutcome::Succeeded } else { ActionOutcome::Failed },
            error: (!ok).then(|| "throttled".to_string()),
        }
    }

    fn selection(names: &[&str]) -> Selection {
        Selection {
            tier: Some("strict".into()),
            node_groups: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_corrected_report_counts() {
        let snapshot = vec![
            group("ng-a", &["i-1", "i-3"], &[], ReadStatus::Ok),
            group("ng-b", &["i-2"], &[], ReadStatus::Ok),
        ];
        let plan = plan(&snapshot);
        let actions = vec![
            action("i-1", "ng-a", ActionKind::Keep, true),
            action("i-2", "ng-b", ActionKind::Remove, true),
            action("i-3", "ng-a", ActionKind::Remove, true),
        ];
        let report = RunReport::build(
            &target(),
            &selection(&["ng-a", "ng-b"]),
            &snapshot,
            &plan,
            actions,
            None,
            Utc::now(),
        );

        assert_eq!(report.status, RunStatus::Corrected);
        assert_eq!(report.actions_removed, 2);
        assert_eq!(report.actions_kept, 1);
        assert_eq!(report.protected_count, 1);
        assert_eq!(report.per_group_results[0].action_taken, ActionTaken::Removed);
        assert_eq!(report.per_group_results[0].message, "kept i-1; removed tag from i-3");
    }

    #[test]
    fn test_failed_mutation_marks_partial() {
        let snapshot = vec![group("ng-a", &[], &["i-1"], ReadStatus::Ok)];
        let plan = plan(&snapshot);
        let actions = vec![action("i-1", "ng-a", ActionKind::Apply, false)];
        let report = RunReport::build(
            &target(),
            &selection(&["ng-a"]),
            &snapshot,
            &plan,
            actions.clone(),
            None,
            Utc::now(),
        );

        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.actions_failed, 1);
        assert_eq!(report.protected_count, 0);
        assert_eq!(report.keeper, None);
        assert_eq!(report.per_group_results[0].status, GroupStatus::Error);
        assert_eq!(effective_keeper(&plan, &actions), None);
    }

    #[test]
    fn test_not_found_group_is_warning() {
        let snapshot = vec![
            group("ng-a", &["i-1"], &[], ReadStatus::Ok),
            group("ng-b", &[], &[], ReadStatus::NotFound),
        ];
        let plan = plan(&snapshot);
        let report = RunReport::build(
            &target(),
            &selection(&["ng-a", "ng-b"]),
            &snapshot,
            &plan,
            Vec::new(),
            None,
            Utc::now(),
        );

        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.per_group_results[0].status, GroupStatus::Ok);
        assert_eq!(report.per_group_results[1].status, GroupStatus::Warning);
        assert_eq!(report.per_group_results[1].message, "unreadable");
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = RunReport::no_matching_groups(&target(), Utc::now());
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["clusterName"], "prod-us-east-1-main");
        assert_eq!(json["status"], "noMatchingGroups");
        assert_eq!(json["nodeGroupsChecked"], 0);
        assert_eq!(json["trigger"]["kind"], "manual");
        assert!(json.get("error").is_none());
    }
}
