//! Capacity Allocator
//!
//! Splits one (min, desired, max) request between an on-demand and a spot
//! partition. All arithmetic is integer; component-wise sums always equal
//! the requested totals.

use crate::domain::{CapacityType, ScalingConfig};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// Request / Split
// =============================================================================

/// Requested capacity for a mixed node-group deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityRequest {
    pub min_total: u32,
    pub desired_total: u32,
    pub max_total: u32,
    /// Target on-demand share, 0..=100
    pub on_demand_percentage: u32,
    #[serde(default)]
    pub on_demand_instance_types: Vec<String>,
    #[serde(default)]
    pub spot_instance_types: Vec<String>,
}

/// One side of the split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub capacity_type: CapacityType,
    pub scaling: ScalingConfig,
    pub instance_types: Vec<String>,
}

impl Partition {
    /// A zeroed partition needs no node group at all
    pub fn is_empty(&self) -> bool {
        self.scaling.is_zero()
    }
}

/// Result of splitting a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacitySplit {
    pub on_demand: Partition,
    pub spot: Partition,
}

// =============================================================================
// Allocation
// =============================================================================

/// On-demand component for one total.
///
/// At least one on-demand node whenever any share is requested, never more
/// than the total itself.
fn on_demand_component(total: u32, pct: u32) -> u32 {
    if pct == 0 || total == 0 {
        return 0;
    }
    let share = (u64::from(total) * u64::from(pct) / 100) as u32;
    share.max(1).min(total)
}

/// Split a capacity request across on-demand and spot
pub fn split_capacity(request: &CapacityRequest) -> Result<CapacitySplit> {
    let pct = request.on_demand_percentage;
    if pct > 100 {
        return Err(Error::Validation(format!(
            "onDemandPercentage must be within 0..=100, got {}",
            pct
        )));
    }
    if request.min_total > request.desired_total || request.desired_total > request.max_total {
        return Err(Error::Validation(format!(
            "expected min <= desired <= max, got min={} desired={} max={}",
            request.min_total, request.desired_total, request.max_total
        )));
    }

    let mut on_demand = ScalingConfig::new(
        on_demand_component(request.min_total, pct),
        on_demand_component(request.desired_total, pct),
        on_demand_component(request.max_total, pct),
    );
    let mut spot = ScalingConfig::new(
        request.min_total.saturating_sub(on_demand.min),
        request.desired_total.saturating_sub(on_demand.desired),
        request.max_total.saturating_sub(on_demand.max),
    );

    on_demand.max = on_demand.max.max(on_demand.min);
    spot.max = spot.max.max(spot.min);

    if !on_demand.is_zero() && request.on_demand_instance_types.is_empty() {
        return Err(Error::InvalidCapacityRequest(format!(
            "on-demand partition ({}) requires at least one instance type",
            on_demand
        )));
    }
    if !spot.is_zero() && request.spot_instance_types.is_empty() {
        return Err(Error::InvalidCapacityRequest(format!(
            "spot partition ({}) requires at least one instance type",
            spot
        )));
    }

    debug!(
        pct,
        on_demand = %on_demand,
        spot = %spot,
        "Split capacity request"
    );

    let instance_types = |scaling: &ScalingConfig, types: &[String]| {
        if scaling.is_zero() {
            Vec::new()
        } else {
            types.to_vec()
        }
    };

    Ok(CapacitySplit {
        on_demand: Partition {
            capacity_type: CapacityType::OnDemand,
            instance_types: instance_types(&on_demand, &request.on_demand_instance_types),
            scaling: on_demand,
        },
        spot: Partition {
            capacity_type: CapacityType::Spot,
            instance_types: instance_types(&spot, &request.spot_instance_types),
            scaling: spot,
        },
    })
}
