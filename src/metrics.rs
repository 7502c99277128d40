//! Reconciliation Metrics
//!
//! Prometheus collectors for run outcomes and tag mutations, registered on
//! a caller-supplied registry.

use crate::error::{Error, Result};
use crate::protection::{ActionOutcome, RunReport};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

const NAMESPACE: &str = "node_protection";

/// Collectors updated after every run
#[derive(Clone)]
pub struct ReconcileMetrics {
    runs: IntCounterVec,
    mutations: IntCounterVec,
    duration: HistogramVec,
    protected: IntGaugeVec,
}

impl ReconcileMetrics {
    /// Create and register the collectors
    pub fn new(registry: &Registry) -> Result<Self> {
        let runs = IntCounterVec::new(
            Opts::new("runs_total", "Reconciliation runs by outcome").namespace(NAMESPACE),
            &["cluster", "status"],
        )
        .map_err(metrics_error)?;
        let mutations = IntCounterVec::new(
            Opts::new("tag_mutations_total", "Protection tag mutations by action")
                .namespace(NAMESPACE),
            &["cluster", "action", "outcome"],
        )
        .map_err(metrics_error)?;
        let duration = HistogramVec::new(
            HistogramOpts::new("run_duration_seconds", "Duration of reconciliation runs")
                .namespace(NAMESPACE)
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0]),
            &["cluster"],
        )
        .map_err(metrics_error)?;
        let protected = IntGaugeVec::new(
            Opts::new("protected_instances", "Protected instances after the last run")
                .namespace(NAMESPACE),
            &["cluster"],
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(runs.clone())).map_err(metrics_error)?;
        registry.register(Box::new(mutations.clone())).map_err(metrics_error)?;
        registry.register(Box::new(duration.clone())).map_err(metrics_error)?;
        registry.register(Box::new(protected.clone())).map_err(metrics_error)?;

        Ok(Self {
            runs,
            mutations,
            duration,
            protected,
        })
    }

    /// Record a finished run
    pub fn observe(&self, report: &RunReport) {
        let cluster = report.cluster_name.as_str();
        let status = report.status.to_string();

        self.runs.with_label_values(&[cluster, &status]).inc();
        self.duration
            .with_label_values(&[cluster])
            .observe(report.duration_ms as f64 / 1000.0);

        for action in &report.actions {
            let outcome = match action.outcome {
                ActionOutcome::Succeeded => "succeeded",
                ActionOutcome::Failed => "failed",
            };
            self.mutations
                .with_label_values(&[cluster, &action.action.to_string(), outcome])
                .inc();
        }

        if report.state.is_some() {
            self.protected
                .with_label_values(&[cluster])
                .set(report.protected_count as i64);
        }
    }

    #[cfg(test)]
    fn runs(&self, cluster: &str, status: &str) -> u64 {
        self.runs.with_label_values(&[cluster, status]).get()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClusterTarget, InstanceRef, TriggerKind};
    use crate::protection::{plan, ActionKind, ActionRecord, GroupClassification, ReadStatus};
    use crate::selection::Selection;
    use chrono::Utc;

    fn report() -> RunReport {
        let snapshot = vec![GroupClassification {
            node_group: "ng-a".into(),
            backing_group_id: Some("asg-a".into()),
            protected: Vec::new(),
            unprotected: vec![InstanceRef::new("i-1", "ng-a")],
            status: ReadStatus::Ok,
            message: None,
        }];
        let plan = plan(&snapshot);
        let actions = vec![ActionRecord {
            instance: InstanceRef::new("i-1", "ng-a"),
            action: ActionKind::Apply,
            outcome: ActionOutcome::Succeeded,
            error: None,
        }];
        let target = ClusterTarget {
            cluster_name: "prod-us-east-1-main".into(),
            region: "us-east-1".into(),
            trigger: TriggerKind::Scheduled,
        };
        let selection = Selection {
            tier: Some("strict".into()),
            node_groups: vec!["ng-a".into()],
        };
        RunReport::build(&target, &selection, &snapshot, &plan, actions, None, Utc::now())
    }

    #[test]
    fn test_observe_counts_run_and_mutations() {
        let registry = Registry::new();
        let metrics = ReconcileMetrics::new(&registry).unwrap();

        metrics.observe(&report());
        metrics.observe(&report());

        assert_eq!(metrics.runs("prod-us-east-1-main", "corrected"), 2);
        let names: Vec<String> = registry.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"node_protection_tag_mutations_total".to_string()));
        assert!(names.contains(&"node_protection_protected_instances".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        ReconcileMetrics::new(&registry).unwrap();
        assert!(ReconcileMetrics::new(&registry).is_err());
    }
}
