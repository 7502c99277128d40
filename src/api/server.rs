//! API Server
//!
//! Serves the REST router until shutdown is requested.

use crate::error::{Error, Result};
use crate::protection::Reconciler;
use crate::trigger::TriggerDefaults;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::rest::RestRouter;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST API server for trigger and allocation endpoints
pub struct ApiServer {
    config: ApiServerConfig,
    reconciler: Arc<Reconciler>,
    defaults: TriggerDefaults,
    shutdown: CancellationToken,
}

impl ApiServer {
    pub fn new(
        config: ApiServerConfig,
        reconciler: Arc<Reconciler>,
        defaults: TriggerDefaults,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            reconciler,
            defaults,
            shutdown,
        }
    }

    /// Run the API server until the shutdown token fires
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.rest_addr;
        let app = RestRouter::new(self.reconciler.clone(), self.defaults.clone()).build();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
        info!("REST API listening on {}", addr);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtectorConfig;
    use crate::providers::InMemoryCloud;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.rest_addr.port(), 8090);
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let cloud = Arc::new(InMemoryCloud::new());
        let reconciler = Arc::new(Reconciler::new(ProtectorConfig::default(), cloud.clone(), cloud));
        let server = ApiServer::new(
            ApiServerConfig {
                rest_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            },
            reconciler,
            TriggerDefaults::default(),
            CancellationToken::new(),
        );

        server.shutdown();
        server.run().await.unwrap();
    }
}
