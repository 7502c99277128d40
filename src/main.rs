//! Node Protection Operator
//!
//! Keeps exactly one worker instance per cluster tagged as non-evictable and
//! mirrors the protection onto the autoscaler's scale-down exemption.
//!
//! Modes:
//! - default: REST API, health and metrics servers, optional periodic passes,
//!   against the AWS APIs and the cluster the process runs in
//! - `--standalone`: same surfaces over an in-memory inventory file
//! - `--once`: a single manual pass, report printed as JSON
//! - `--print-event-rule`: print the event subscription pattern
//! - `--split <JSON>`: split a capacity request and print the partitions

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

use node_protection_operator::domain::NodeAnnotatorRef;
use node_protection_operator::trigger::event_rule_pattern;
use node_protection_operator::{
    split_capacity, ApiServer, ApiServerConfig, AwsConfig, AwsConnector, AwsCredentials,
    CapacityRequest, Error, InMemoryCloud, InMemoryNodes, InvocationAdapter, InvocationRequest,
    InventoryFile, KubeNodeAnnotator, PeriodicTrigger, ProtectionTag, ProtectorConfig, Reconciler,
    ReconcileMetrics, Result, RetryPolicy, ScaleDownAnnotator, TriggerDefaults, TriggerKind,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Node Protection Operator - one protected instance per cluster
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Default cluster name
    #[arg(long, env = "CLUSTER_NAME")]
    cluster_name: Option<String>,

    /// Default region
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Scheduled reconciliation interval in seconds (0 disables)
    #[arg(long, env = "RECONCILE_INTERVAL", default_value = "300")]
    reconcile_interval_secs: u64,

    /// Deadline for one pass in seconds
    #[arg(long, env = "RUN_DEADLINE", default_value = "25")]
    run_deadline_secs: u64,

    /// Protection tag key
    #[arg(long, env = "PROTECTION_TAG_KEY", default_value = "protection")]
    protection_tag_key: String,

    /// Protection tag value
    #[arg(long, env = "PROTECTION_TAG_VALUE", default_value = "NO_DELETE")]
    protection_tag_value: String,

    /// Attempts per provider call
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "3")]
    retry_max_attempts: u32,

    /// AWS access key ID
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    aws_access_key_id: Option<String>,

    /// AWS secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    aws_secret_access_key: Option<String>,

    /// AWS session token for temporary credentials
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    aws_session_token: Option<String>,

    /// Single endpoint for every AWS service (e.g. a local emulator)
    #[arg(long, env = "AWS_ENDPOINT_URL")]
    aws_endpoint_url: Option<String>,

    /// Timeout per AWS API request in seconds
    #[arg(long, env = "PROVIDER_TIMEOUT", default_value = "10")]
    provider_timeout_secs: u64,

    /// YAML inventory backing the in-memory provider in standalone mode
    #[arg(long, env = "INVENTORY_FILE")]
    inventory_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (cloud and nodes from the inventory file)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Run one manual pass and print the report
    #[arg(long)]
    once: bool,

    /// Print the event subscription rule pattern and exit
    #[arg(long)]
    print_event_rule: bool,

    /// Split a capacity request given as JSON and exit
    #[arg(long, value_name = "JSON")]
    split: Option<String>,
}

impl Args {
    fn protector_config(&self) -> ProtectorConfig {
        let provider_retry = RetryPolicy {
            max_attempts: self.retry_max_attempts,
            ..Default::default()
        };
        ProtectorConfig {
            tag: ProtectionTag::new(&self.protection_tag_key, &self.protection_tag_value),
            run_deadline: Duration::from_secs(self.run_deadline_secs),
            provider_retry,
            annotator_retry: provider_retry,
        }
    }

    fn aws_config(&self) -> Result<AwsConfig> {
        let credentials = AwsCredentials::new(
            self.aws_access_key_id.clone().unwrap_or_default(),
            self.aws_secret_access_key.clone().unwrap_or_default(),
            self.aws_session_token.clone(),
        )?;
        Ok(AwsConfig {
            credentials,
            endpoint_url: self.aws_endpoint_url.clone().filter(|u| !u.trim().is_empty()),
            request_timeout: Duration::from_secs(self.provider_timeout_secs),
        })
    }

    fn defaults(&self) -> TriggerDefaults {
        TriggerDefaults::new(self.cluster_name.clone(), self.region.clone())
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_event_rule {
        println!("{}", serde_json::to_string_pretty(&event_rule_pattern())?);
        return Ok(());
    }

    if let Some(body) = args.split.as_deref() {
        let request: CapacityRequest = serde_json::from_str(body)?;
        let split = split_capacity(&request)?;
        println!("{}", serde_json::to_string_pretty(&split)?);
        return Ok(());
    }

    // Initialize logging
    init_logging(&args);

    info!("Starting Node Protection Operator");
    info!("  Version: {}", node_protection_operator::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Standalone mode: {}", args.standalone);

    let config = args.protector_config();
    config.validate()?;

    let annotator_retry = config.annotator_retry;
    let (reconciler, annotator) = if args.standalone {
        let inventory_path = args.inventory_file.as_deref().ok_or_else(|| {
            Error::Configuration("INVENTORY_FILE is required in standalone mode".into())
        })?;
        let inventory = InventoryFile::load(inventory_path).await?;
        let cloud = Arc::new(InMemoryCloud::from_inventory(&inventory));
        let nodes = Arc::new(InMemoryNodes::from_inventory(&inventory));
        (
            Reconciler::new(config, cloud.clone(), cloud),
            Some(ScaleDownAnnotator::new(nodes, annotator_retry)),
        )
    } else {
        let connector = AwsConnector::new(args.aws_config()?)?;
        let nodes = KubeNodeAnnotator::try_default()
            .await
            .map(|nodes| Arc::new(nodes) as NodeAnnotatorRef);
        (
            Reconciler::with_connector(config, Arc::new(connector)),
            ScaleDownAnnotator::from_connection(nodes, annotator_retry),
        )
    };

    let metrics = ReconcileMetrics::new(prometheus::default_registry())?;
    let mut reconciler = reconciler.with_metrics(metrics);
    if let Some(annotator) = annotator {
        reconciler = reconciler.with_annotator(annotator);
    }
    let reconciler = Arc::new(reconciler);
    let defaults = args.defaults();

    if args.once {
        let target = InvocationAdapter::new(defaults).resolve(&InvocationRequest::default(), TriggerKind::Manual)?;
        let report = reconciler.reconcile(&target).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let shutdown = CancellationToken::new();

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Start scheduled passes
    if args.reconcile_interval_secs > 0 {
        match InvocationAdapter::new(defaults.clone())
            .resolve(&InvocationRequest::default(), TriggerKind::Scheduled)
        {
            Ok(target) => {
                let trigger = PeriodicTrigger::new(Duration::from_secs(args.reconcile_interval_secs), target);
                let reconciler = reconciler.clone();
                let token = shutdown.clone();
                tokio::spawn(async move {
                    trigger.run(&reconciler, token).await;
                });
            }
            Err(e) => error!("Scheduled reconciliation disabled: {}", e),
        }
    }

    // Stop everything on Ctrl-C
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal_token.cancel();
    });

    let api_config = ApiServerConfig {
        rest_addr: args
            .api_addr
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid REST API address: {}", e)))?,
    };
    let api_server = ApiServer::new(api_config, reconciler, defaults, shutdown);

    info!("Starting REST API server");
    api_server.run().await?;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = ["hyper=warn", "kube=info", "tower=warn", "tower_http=info", "axum=info"]
        .iter()
        .filter_map(|d| d.parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env().add_directive(level.into()), |f, d| {
            f.add_directive(d)
        });

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid health server address: {}", e)))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => {
                            let mut response = text_response(StatusCode::OK, buffer);
                            if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                }
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
