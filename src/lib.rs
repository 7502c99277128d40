//! Node Protection Operator
//!
//! Keeps exactly one worker instance per cluster marked as non-evictable,
//! aligns the autoscaler's scale-down exemption with it, and splits
//! requested node-group capacity across on-demand and spot partitions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              Trigger Adapters                                │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Lifecycle     │  │   Invocation    │  │      Periodic               │  │
//! │  │   (events)      │  │   (manual)      │  │      (scheduled)            │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                                ▼                                             │
//! │                    ┌───────────────────────┐                                │
//! │                    │      Reconciler       │                                │
//! │                    │ select → read → plan  │                                │
//! │                    │   → tag → annotate    │                                │
//! │                    └───────────┬───────────┘                                │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                              Ports                                           │
//! │  ┌─────────────────┐  ┌────────┴────────┐  ┌─────────────────────────────┐  │
//! │  │   Cluster       │  │    Compute      │  │      Node                   │  │
//! │  │   Inventory     │  │    Provider     │  │      Annotator              │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`protection`]: State reader, planner, executor, reconciler and reports
//! - [`selection`]: Tiered node-group selection
//! - [`capacity`]: On-demand/spot capacity split
//! - [`annotator`]: Scale-down exemption annotation
//! - [`trigger`]: Lifecycle, manual and periodic triggers
//! - [`providers`]: AWS and in-memory cloud adapters
//! - [`api`]: REST API
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and handling

pub mod annotator;
pub mod api;
pub mod capacity;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod protection;
pub mod providers;
pub mod retry;
pub mod selection;
pub mod trigger;

// Re-export commonly used types
pub use annotator::{AnnotationOutcome, AnnotationStatus, KubeNodeAnnotator, ScaleDownAnnotator};
pub use api::{ApiServer, ApiServerConfig, RestRouter};
pub use capacity::{split_capacity, CapacityRequest, CapacitySplit, Partition};
pub use config::ProtectorConfig;
pub use domain::{
    CloudConnector, CloudPorts, ClusterInventory, ClusterTarget, ComputeProvider, InstanceRef,
    NodeAnnotator, NodeGroup, ProtectionTag, TriggerKind,
};
pub use error::{Error, ErrorAction, Result};
pub use metrics::ReconcileMetrics;
pub use protection::{ProtectionPlan, ProtectionState, Reconciler, RunReport, RunStatus};
pub use providers::{
    AwsConfig, AwsConnector, AwsCredentials, InMemoryCloud, InMemoryNodes, InventoryFile,
};
pub use retry::RetryPolicy;
pub use selection::{NodeGroupSelector, Selection};
pub use trigger::{
    InvocationAdapter, InvocationRequest, LifecycleEventAdapter, PeriodicTrigger, TriggerDefaults,
};

/// Operator version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Operator name
pub const NAME: &str = "node-protection-operator";
