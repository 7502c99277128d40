//! Response bodies of the EKS (JSON), Auto Scaling and EC2 (XML) APIs

use crate::domain::{CapacityType, LifecycleState, NodeGroup, ScalingConfig};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

// =============================================================================
// EKS
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNodegroupsResponse {
    #[serde(default)]
    pub nodegroups: Vec<String>,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DescribeNodegroupResponse {
    pub nodegroup: EksNodegroup,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EksNodegroup {
    pub nodegroup_name: String,
    #[serde(default)]
    pub capacity_type: Option<String>,
    #[serde(default)]
    pub scaling_config: Option<EksScalingConfig>,
    #[serde(default)]
    pub resources: Option<EksResources>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EksScalingConfig {
    #[serde(default)]
    pub min_size: u32,
    #[serde(default)]
    pub desired_size: u32,
    #[serde(default)]
    pub max_size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EksResources {
    #[serde(default)]
    pub auto_scaling_groups: Vec<EksAutoScalingGroup>,
}

#[derive(Debug, Deserialize)]
pub struct EksAutoScalingGroup {
    pub name: String,
}

impl From<EksNodegroup> for NodeGroup {
    fn from(group: EksNodegroup) -> Self {
        let capacity_type = match group.capacity_type.as_deref() {
            Some("SPOT") => CapacityType::Spot,
            _ => CapacityType::OnDemand,
        };
        let scaling = group.scaling_config.unwrap_or_default();
        NodeGroup {
            name: group.nodegroup_name,
            capacity_type,
            scaling: ScalingConfig::new(scaling.min_size, scaling.desired_size, scaling.max_size),
            backing_group_id: group
                .resources
                .and_then(|r| r.auto_scaling_groups.into_iter().next())
                .map(|g| g.name),
        }
    }
}

// =============================================================================
// Auto Scaling
// =============================================================================

/// `<member>` list wrapper used by the query protocol
#[derive(Debug, Deserialize)]
pub struct Members<T> {
    #[serde(rename = "member", default = "Vec::new")]
    pub member: Vec<T>,
}

impl<T> Default for Members<T> {
    fn default() -> Self {
        Self { member: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeAutoScalingGroupsResponse {
    pub describe_auto_scaling_groups_result: DescribeAutoScalingGroupsResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeAutoScalingGroupsResult {
    #[serde(default)]
    pub auto_scaling_groups: Members<AutoScalingGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AutoScalingGroup {
    pub auto_scaling_group_name: String,
    #[serde(default)]
    pub instances: Members<AutoScalingInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AutoScalingInstance {
    pub instance_id: String,
    pub lifecycle_state: String,
}

/// Collapse Auto Scaling lifecycle states (`Pending:Wait`, `Standby`, ...)
pub fn lifecycle_state(raw: &str) -> LifecycleState {
    match raw {
        "InService" => LifecycleState::InService,
        "Terminated" => LifecycleState::Terminated,
        s if s.starts_with("Pending") => LifecycleState::Pending,
        s if s.starts_with("Terminating") => LifecycleState::Terminating,
        _ => LifecycleState::Other,
    }
}

// =============================================================================
// EC2
// =============================================================================

/// `<item>` list wrapper used by EC2
#[derive(Debug, Deserialize)]
pub struct Items<T> {
    #[serde(rename = "item", default = "Vec::new")]
    pub item: Vec<T>,
}

impl<T> Default for Items<T> {
    fn default() -> Self {
        Self { item: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTagsResponse {
    #[serde(default)]
    pub tag_set: Items<TagDescription>,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDescription {
    pub resource_id: String,
    pub key: String,
    #[serde(default)]
    pub value: String,
}

// =============================================================================
// Faults
// =============================================================================

/// Error code and message returned by a failed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFault {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FaultDetail {
    code: String,
    #[serde(default)]
    message: String,
}

/// EC2: `<Response><Errors><Error>...`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2FaultResponse {
    errors: Ec2Faults,
}

#[derive(Debug, Deserialize)]
struct Ec2Faults {
    #[serde(rename = "Error", default = "Vec::new")]
    error: Vec<FaultDetail>,
}

/// Auto Scaling: `<ErrorResponse><Error>...`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryFaultResponse {
    error: FaultDetail,
}

#[derive(Debug, Default, Deserialize)]
struct EksFaultBody {
    #[serde(default, alias = "Message")]
    message: String,
}

/// Fault from a query-protocol (XML) error body
pub fn query_fault(status: u16, body: &str) -> ApiFault {
    let detail = quick_xml::de::from_str::<Ec2FaultResponse>(body)
        .ok()
        .and_then(|r| r.errors.error.into_iter().next())
        .or_else(|| {
            quick_xml::de::from_str::<QueryFaultResponse>(body)
                .ok()
                .map(|r| r.error)
        });
    match detail {
        Some(detail) => ApiFault {
            code: detail.code,
            message: detail.message,
        },
        None => http_fault(status),
    }
}

/// Fault from an EKS error, keyed by the `x-amzn-ErrorType` header
pub fn eks_fault(status: u16, error_type: Option<&str>, body: &str) -> ApiFault {
    let code = error_type
        .and_then(|t| t.split(':').next())
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let Some(code) = code else {
        return http_fault(status);
    };
    let message = serde_json::from_str::<EksFaultBody>(body)
        .unwrap_or_default()
        .message;
    ApiFault {
        code: code.to_string(),
        message,
    }
}

fn http_fault(status: u16) -> ApiFault {
    ApiFault {
        code: format!("HTTP{}", status),
        message: String::new(),
    }
}

/// Parse an XML response body
pub fn from_xml<T: DeserializeOwned>(operation: &str, body: &str) -> Result<T> {
    quick_xml::de::from_str(body).map_err(|e| Error::Provider {
        operation: operation.to_string(),
        reason: format!("unparsable response: {}", e),
    })
}

/// Parse a JSON response body
pub fn from_json<T: DeserializeOwned>(operation: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| Error::Provider {
        operation: operation.to_string(),
        reason: format!("unparsable response: {}", e),
    })
}
