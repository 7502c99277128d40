//! REST API Handlers
//!
//! Endpoints for lifecycle notifications, manual reconciliation, capacity
//! splitting and health checks.

use crate::capacity::{split_capacity, CapacityRequest};
use crate::domain::TriggerKind;
use crate::error::Error;
use crate::protection::Reconciler;
use crate::trigger::{
    InvocationAdapter, InvocationRequest, LifecycleDisposition, LifecycleEventAdapter,
    LifecycleNotification, TriggerDefaults,
};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

// =============================================================================
// Response Types
// =============================================================================

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiErrorResponse {
    fn from_error(err: &Error) -> (StatusCode, Json<Self>) {
        let (status, code) = match err {
            Error::MissingClusterIdentity => (StatusCode::BAD_REQUEST, "missing_cluster_identity"),
            Error::UnresolvableRegion { .. } => (StatusCode::BAD_REQUEST, "unresolvable_region"),
            Error::MalformedEvent(_) => (StatusCode::BAD_REQUEST, "malformed_event"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            Error::InvalidCapacityRequest(_) => (StatusCode::BAD_REQUEST, "invalid_capacity_request"),
            Error::DeadlineExceeded(_) => (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        (
            status,
            Json(Self {
                error: code.into(),
                message: err.to_string(),
            }),
        )
    }
}

/// Response to a lifecycle notification that did not trigger a pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnoredEventResponse {
    pub status: String,
    pub reason: String,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    reconciler: Arc<Reconciler>,
    defaults: TriggerDefaults,
}

impl RestRouter {
    pub fn new(reconciler: Arc<Reconciler>, defaults: TriggerDefaults) -> Self {
        Self {
            reconciler,
            defaults,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            reconciler: self.reconciler,
            lifecycle: LifecycleEventAdapter::new(self.defaults.clone()),
            invocation: InvocationAdapter::new(self.defaults),
        };

        Router::new()
            // Trigger endpoints
            .route("/v1/events", post(handle_event))
            .route("/v1/reconcile", post(handle_reconcile))
            // Allocation endpoint
            .route("/v1/capacity/split", post(handle_capacity_split))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    reconciler: Arc<Reconciler>,
    lifecycle: LifecycleEventAdapter,
    invocation: InvocationAdapter,
}

// =============================================================================
// Handlers
// =============================================================================

/// Lifecycle notification from the event bus
async fn handle_event(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let disposition = LifecycleNotification::from_value(body)
        .and_then(|event| state.lifecycle.resolve(&event));

    match disposition {
        Ok(LifecycleDisposition::Reconcile(target)) => {
            info!(cluster = %target.cluster_name, trigger = %target.trigger, "Lifecycle event accepted");
            run_reconcile(&state, target).await
        }
        Ok(LifecycleDisposition::Ignored { reason }) => {
            debug!(%reason, "Lifecycle event ignored");
            (
                StatusCode::ACCEPTED,
                Json(IgnoredEventResponse {
                    status: "ignored".into(),
                    reason,
                }),
            )
                .into_response()
        }
        Err(e) => ApiErrorResponse::from_error(&e).into_response(),
    }
}

/// Manual reconciliation
async fn handle_reconcile(
    State(state): State<AppState>,
    Json(request): Json<InvocationRequest>,
) -> Response {
    match state.invocation.resolve(&request, TriggerKind::Manual) {
        Ok(target) => run_reconcile(&state, target).await,
        Err(e) => ApiErrorResponse::from_error(&e).into_response(),
    }
}

async fn run_reconcile(state: &AppState, target: crate::domain::ClusterTarget) -> Response {
    match state.reconciler.reconcile(&target).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!(cluster = %target.cluster_name, error = %e, "Reconciliation failed");
            ApiErrorResponse::from_error(&e).into_response()
        }
    }
}

/// Split requested capacity into on-demand and spot partitions
async fn handle_capacity_split(Json(request): Json<CapacityRequest>) -> Response {
    match split_capacity(&request) {
        Ok(split) => (StatusCode::OK, Json(split)).into_response(),
        Err(e) => ApiErrorResponse::from_error(&e).into_response(),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.reconciler.config().validate().is_ok() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtectorConfig;
    use crate::domain::{CapacityType, LifecycleState, NodeGroup, ProtectionTag, ScalingConfig};
    use crate::providers::InMemoryCloud;
    use crate::retry::RetryPolicy;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const CLUSTER: &str = "prod-us-east-1-main";

    fn app(cloud: &Arc<InMemoryCloud>) -> Router {
        let config = ProtectorConfig {
            provider_retry: RetryPolicy::none(),
            ..Default::default()
        };
        let reconciler = Arc::new(Reconciler::new(config, cloud.clone(), cloud.clone()));
        RestRouter::new(reconciler, TriggerDefaults::new(Some(CLUSTER.into()), None)).build()
    }

    fn cloud() -> Arc<InMemoryCloud> {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_node_group(
            CLUSTER,
            NodeGroup {
                name: "nodegroup-1-ondemand".into(),
                capacity_type: CapacityType::OnDemand,
                scaling: ScalingConfig::new(1, 2, 2),
                backing_group_id: Some("asg-1".into()),
            },
        );
        cloud.add_instance("asg-1", "i-2", LifecycleState::InService, false);
        cloud.add_instance("asg-1", "i-1", LifecycleState::InService, false);
        cloud
    }

    async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_manual_reconcile_returns_report() {
        let cloud = cloud();
        let (status, body) = post(app(&cloud), "/v1/reconcile", json!({})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["clusterName"], CLUSTER);
        assert_eq!(body["region"], "us-east-1");
        assert_eq!(body["actionsApplied"], 1);
        assert_eq!(body["state"], "ZERO_PROTECTED");
        assert_eq!(cloud.protected_instances(&ProtectionTag::default()), vec!["i-1".to_string()]);
    }

    #[tokio::test]
    async fn test_running_event_triggers_pass() {
        let cloud = cloud();
        let event = json!({
            "detail-type": "EC2 Instance State-change Notification",
            "source": "aws.ec2",
            "region": "us-east-1",
            "detail": { "instance-id": "i-2", "state": "running" }
        });
        let (status, body) = post(app(&cloud), "/v1/events", event).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["trigger"]["kind"], "lifecycle");
        assert_eq!(body["trigger"]["instanceId"], "i-2");
    }

    #[tokio::test]
    async fn test_pending_event_ignored() {
        let cloud = cloud();
        let event = json!({
            "detail-type": "EC2 Instance State-change Notification",
            "source": "aws.ec2",
            "detail": { "instance-id": "i-2", "state": "pending" }
        });
        let (status, body) = post(app(&cloud), "/v1/events", event).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "ignored");
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_event_rejected() {
        let (status, body) = post(app(&cloud()), "/v1/events", json!({ "detail": {} })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "malformed_event");
    }

    #[tokio::test]
    async fn test_unresolvable_region_rejected() {
        let (status, body) = post(
            app(&cloud()),
            "/v1/reconcile",
            json!({ "clusterName": "platform" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unresolvable_region");
    }

    #[tokio::test]
    async fn test_capacity_split() {
        let request = json!({
            "minTotal": 2,
            "desiredTotal": 4,
            "maxTotal": 10,
            "onDemandPercentage": 25,
            "onDemandInstanceTypes": ["m5.large"],
            "spotInstanceTypes": ["m5.large", "m5a.large"]
        });
        let (status, body) = post(app(&cloud()), "/v1/capacity/split", request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["onDemand"]["scaling"]["desired"], 1);
        assert_eq!(body["spot"]["scaling"]["desired"], 3);
    }

    #[tokio::test]
    async fn test_capacity_split_validation() {
        let request = json!({
            "minTotal": 5,
            "desiredTotal": 1,
            "maxTotal": 10,
            "onDemandPercentage": 50
        });
        let (status, body) = post(app(&cloud()), "/v1/capacity/split", request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(&cloud())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
