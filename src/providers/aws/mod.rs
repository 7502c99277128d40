//! AWS Adapters
//!
//! Node-group inventory from the EKS API, backing-group membership from
//! Auto Scaling, and instance tags from EC2. Every region gets its own
//! [`AwsCloud`]; [`AwsConnector`] builds one per pass over a shared HTTP
//! client, so no provider state outlives a pass.

pub mod sigv4;
mod wire;

pub use sigv4::AwsCredentials;

use crate::domain::{
    CloudConnector, CloudPorts, ClusterInventory, ComputeProvider, GroupMember, NodeGroup,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use sigv4::encode_pairs;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const EKS_PAGE_SIZE: u32 = 100;
/// Instance IDs per DescribeTags filter
const TAG_FILTER_BATCH: usize = 100;
const AUTOSCALING_API_VERSION: &str = "2011-01-01";
const EC2_API_VERSION: &str = "2016-11-15";

const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "InvalidInstanceID.NotFound",
    "InvalidInstanceID.Malformed",
];

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "ServiceUnavailable",
    "InternalFailure",
    "InternalError",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Service {
    Eks,
    AutoScaling,
    Ec2,
}

impl Service {
    fn signing_name(self) -> &'static str {
        match self {
            Service::Eks => "eks",
            Service::AutoScaling => "autoscaling",
            Service::Ec2 => "ec2",
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Settings shared by every region
#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub credentials: AwsCredentials,
    /// Single endpoint for every service (e.g. a local emulator)
    pub endpoint_url: Option<String>,
    pub request_timeout: Duration,
}

/// Builds region-bound AWS adapters
pub struct AwsConnector {
    http: reqwest::Client,
    config: AwsConfig,
}

impl AwsConnector {
    pub fn new(config: AwsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Unable to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }
}

impl CloudConnector for AwsConnector {
    fn connect(&self, region: &str) -> Result<CloudPorts> {
        let cloud = Arc::new(AwsCloud::new(self.http.clone(), region, &self.config)?);
        Ok(CloudPorts::new(cloud.clone(), cloud))
    }
}

// =============================================================================
// Regional Adapter
// =============================================================================

/// EKS, Auto Scaling and EC2 clients for one region
#[derive(Debug)]
pub struct AwsCloud {
    http: reqwest::Client,
    region: String,
    credentials: AwsCredentials,
    eks: Url,
    autoscaling: Url,
    ec2: Url,
}

impl AwsCloud {
    pub fn new(http: reqwest::Client, region: &str, config: &AwsConfig) -> Result<Self> {
        let region = region.trim();
        if region.is_empty() {
            return Err(Error::Configuration("AWS region is empty".into()));
        }
        let endpoint = |service: &str| -> Result<Url> {
            let raw = match &config.endpoint_url {
                Some(url) => url.clone(),
                None => format!("https://{}.{}.{}", service, region, dns_suffix(region)),
            };
            Url::parse(&raw)
                .map_err(|e| Error::Configuration(format!("Invalid {} endpoint {}: {}", service, raw, e)))
        };
        let eks = endpoint("eks")?;
        let autoscaling = endpoint("autoscaling")?;
        let ec2 = endpoint("ec2")?;

        Ok(Self {
            http,
            region: region.to_string(),
            credentials: config.credentials.clone(),
            eks,
            autoscaling,
            ec2,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn eks_url(&self, path: &str, query: &[(String, String)]) -> Url {
        let mut url = self.eks.clone();
        url.set_path(path);
        if !query.is_empty() {
            url.set_query(Some(&encode_pairs(query)));
        }
        url
    }

    /// Call a query-protocol (form POST) API
    async fn query(
        &self,
        service: Service,
        operation: &str,
        params: Vec<(String, String)>,
        subject: (&str, &str),
    ) -> Result<String> {
        let (url, version) = match service {
            Service::AutoScaling => (self.autoscaling.clone(), AUTOSCALING_API_VERSION),
            _ => (self.ec2.clone(), EC2_API_VERSION),
        };
        let mut form = vec![
            ("Action".to_string(), operation.to_string()),
            ("Version".to_string(), version.to_string()),
        ];
        form.extend(params);
        self.send(service, operation, Method::POST, url, encode_pairs(&form), subject)
            .await
    }

    async fn send(
        &self,
        service: Service,
        operation: &str,
        method: Method,
        url: Url,
        body: String,
        subject: (&str, &str),
    ) -> Result<String> {
        let signed = sigv4::sign(
            &self.credentials,
            &self.region,
            service.signing_name(),
            method.as_str(),
            &url,
            body.as_bytes(),
            Utc::now(),
        )?;

        debug!(operation, region = %self.region, "Calling AWS API");
        let mut request = self
            .http
            .request(method, url)
            .header("x-amz-date", signed.amz_date.as_str())
            .header(AUTHORIZATION, signed.authorization.as_str());
        if let Some(token) = signed.security_token.as_deref() {
            request = request.header("x-amz-security-token", token);
        }
        if service != Service::Eks {
            request = request
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=utf-8")
                .body(body);
        }

        let response = request.send().await.map_err(|e| transport_error(operation, e))?;
        let status = response.status().as_u16();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(|e| transport_error(operation, e))?;

        if (200..300).contains(&status) {
            return Ok(text);
        }
        let fault = match service {
            Service::Eks => wire::eks_fault(status, error_type.as_deref(), &text),
            _ => wire::query_fault(status, &text),
        };
        let error = classify(operation, status, fault, subject);
        warn!(operation, status, error = %error, "AWS API call failed");
        Err(error)
    }

    /// Tags of the given instances, keyed by instance ID
    async fn instance_tags(&self, ids: &[String]) -> Result<HashMap<String, BTreeMap<String, String>>> {
        let mut tags: HashMap<String, BTreeMap<String, String>> = HashMap::new();
        for chunk in ids.chunks(TAG_FILTER_BATCH) {
            let mut next_token: Option<String> = None;
            loop {
                let mut params = vec![("Filter.1.Name".to_string(), "resource-id".to_string())];
                for (i, id) in chunk.iter().enumerate() {
                    params.push((format!("Filter.1.Value.{}", i + 1), id.clone()));
                }
                if let Some(token) = next_token.take() {
                    params.push(("NextToken".to_string(), token));
                }

                let body = self
                    .query(Service::Ec2, "DescribeTags", params, ("Instance", chunk[0].as_str()))
                    .await?;
                let page: wire::DescribeTagsResponse = wire::from_xml("DescribeTags", &body)?;
                for tag in page.tag_set.item {
                    tags.entry(tag.resource_id).or_default().insert(tag.key, tag.value);
                }
                match page.next_token.filter(|t| !t.is_empty()) {
                    Some(token) => next_token = Some(token),
                    None => break,
                }
            }
        }
        Ok(tags)
    }
}

fn dns_suffix(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    }
}

fn transport_error(operation: &str, e: reqwest::Error) -> Error {
    Error::TransientProvider {
        operation: operation.to_string(),
        reason: e.to_string(),
    }
}

/// Map a failed call onto the provider error taxonomy
fn classify(operation: &str, status: u16, fault: wire::ApiFault, subject: (&str, &str)) -> Error {
    if status == 404 || NOT_FOUND_CODES.contains(&fault.code.as_str()) {
        return Error::not_found(subject.0, subject.1);
    }
    let reason = if fault.message.is_empty() {
        fault.code.clone()
    } else {
        format!("{}: {}", fault.code, fault.message)
    };
    if status == 429 || status >= 500 || THROTTLING_CODES.contains(&fault.code.as_str()) {
        Error::TransientProvider {
            operation: operation.to_string(),
            reason,
        }
    } else {
        Error::Provider {
            operation: operation.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl ClusterInventory for AwsCloud {
    async fn list_node_groups(&self, cluster: &str) -> Result<Vec<String>> {
        let path = format!("/clusters/{}/node-groups", urlencoding::encode(cluster));
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = vec![("maxResults".to_string(), EKS_PAGE_SIZE.to_string())];
            if let Some(token) = next_token.take() {
                query.push(("nextToken".to_string(), token));
            }
            let url = self.eks_url(&path, &query);
            let body = self
                .send(Service::Eks, "ListNodegroups", Method::GET, url, String::new(), ("Cluster", cluster))
                .await?;
            let page: wire::ListNodegroupsResponse = wire::from_json("ListNodegroups", &body)?;
            names.extend(page.nodegroups);
            match page.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        names.sort();
        Ok(names)
    }

    async fn describe_node_group(&self, cluster: &str, name: &str) -> Result<NodeGroup> {
        let path = format!(
            "/clusters/{}/node-groups/{}",
            urlencoding::encode(cluster),
            urlencoding::encode(name)
        );
        let url = self.eks_url(&path, &[]);
        let subject = format!("{}/{}", cluster, name);
        let body = self
            .send(Service::Eks, "DescribeNodegroup", Method::GET, url, String::new(), ("Nodegroup", subject.as_str()))
            .await?;
        let response: wire::DescribeNodegroupResponse = wire::from_json("DescribeNodegroup", &body)?;
        Ok(response.nodegroup.into())
    }
}

#[async_trait]
impl ComputeProvider for AwsCloud {
    async fn list_group_instances(&self, group_id: &str) -> Result<Vec<GroupMember>> {
        let params = vec![("AutoScalingGroupNames.member.1".to_string(), group_id.to_string())];
        let body = self
            .query(Service::AutoScaling, "DescribeAutoScalingGroups", params, ("AutoScalingGroup", group_id))
            .await?;
        let response: wire::DescribeAutoScalingGroupsResponse =
            wire::from_xml("DescribeAutoScalingGroups", &body)?;
        let group = response
            .describe_auto_scaling_groups_result
            .auto_scaling_groups
            .member
            .into_iter()
            .find(|g| g.auto_scaling_group_name == group_id)
            .ok_or_else(|| Error::not_found("AutoScalingGroup", group_id))?;

        let instances = group.instances.member;
        if instances.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = instances.iter().map(|i| i.instance_id.clone()).collect();
        let mut tags = self.instance_tags(&ids).await?;

        Ok(instances
            .into_iter()
            .map(|i| GroupMember {
                lifecycle_state: wire::lifecycle_state(&i.lifecycle_state),
                tags: tags.remove(&i.instance_id).unwrap_or_default(),
                instance_id: i.instance_id,
            })
            .collect())
    }

    async fn create_tag(&self, instance_id: &str, key: &str, value: &str) -> Result<()> {
        let params = vec![
            ("ResourceId.1".to_string(), instance_id.to_string()),
            ("Tag.1.Key".to_string(), key.to_string()),
            ("Tag.1.Value".to_string(), value.to_string()),
        ];
        self.query(Service::Ec2, "CreateTags", params, ("Instance", instance_id))
            .await
            .map(|_| ())
    }

    async fn delete_tag(&self, instance_id: &str, key: &str) -> Result<()> {
        let params = vec![
            ("ResourceId.1".to_string(), instance_id.to_string()),
            ("Tag.1.Key".to_string(), key.to_string()),
        ];
        self.query(Service::Ec2, "DeleteTags", params, ("Instance", instance_id))
            .await
            .map(|_| ())
    }
}
