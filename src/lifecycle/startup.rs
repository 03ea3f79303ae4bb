//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the fragment store, aggregator and reloader from configuration
//! - Publish the first routing table before accepting traffic
//! - Start background tasks (reloader, metrics exporter, admin API)
//! - Serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, including an unusable first table
//! - Subscribe to the store before the first reload so no change is missed
//! - Listeners start last (traffic only when a table is published)

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::{setup_admin_router, AdminState};
use crate::aggregation::executor::AggregateExecutor;
use crate::aggregation::strategy::StrategyRegistry;
use crate::config::GatewayConfig;
use crate::fragments::{DiskFragmentStore, FragmentStore, FragmentSubscription, StoreError};
use crate::http::client::{DownstreamClient, HyperDownstreamClient};
use crate::http::server::{AppState, GatewayServer};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::{AggregationError, ConfigAggregator, Reloader};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("initial routing table: {0}")]
    InitialTable(#[from] AggregationError),

    #[error("{field}: invalid address {value:?}")]
    Address { field: &'static str, value: String },

    #[error("binding {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A gateway with its first routing table published, ready to serve.
pub struct Gateway {
    config: GatewayConfig,
    reloader: Arc<Reloader>,
    events: FragmentSubscription,
    state: AppState,
}

impl Gateway {
    /// Fragments from `config.fragments.directory`, the built-in merge
    /// strategies and the hyper downstream client.
    pub async fn bootstrap(config: GatewayConfig) -> Result<Self, StartupError> {
        let store = DiskFragmentStore::new(
            config.fragments.directory.clone(),
            Duration::from_secs(config.fragments.poll_interval_secs),
        );
        let client = HyperDownstreamClient::new(config.listener.max_body_bytes);
        Self::with_parts(config, Arc::new(store), Arc::new(client), StrategyRegistry::default()).await
    }

    /// Assemble from explicit parts, for embedding with other stores,
    /// clients or strategies.
    pub async fn with_parts(
        config: GatewayConfig,
        store: Arc<dyn FragmentStore>,
        client: Arc<dyn DownstreamClient>,
        strategies: StrategyRegistry,
    ) -> Result<Self, StartupError> {
        let strategies = Arc::new(strategies);
        let aggregator = ConfigAggregator::new(config.defaults.clone(), Arc::clone(&strategies))
            .with_request_timeout(Duration::from_secs(config.listener.request_timeout_secs));
        let reloader = Arc::new(Reloader::new(
            store,
            aggregator,
            Duration::from_millis(config.fragments.debounce_ms),
        ));

        let events = reloader.subscribe()?;
        let table = reloader.reload().await?;
        tracing::info!(
            version = table.version(),
            routes = table.route_count(),
            aggregates = table.aggregate_count(),
            directory = %config.fragments.directory,
            "Initial routing table published"
        );

        let state = AppState {
            reloader: Arc::clone(&reloader),
            executor: AggregateExecutor::new(client, strategies),
            max_body_bytes: config.listener.max_body_bytes,
        };

        Ok(Self {
            config,
            reloader,
            events,
            state,
        })
    }

    pub fn reloader(&self) -> &Arc<Reloader> {
        &self.reloader
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Bind the configured listener and serve until shutdown.
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), StartupError> {
        let address = self.config.listener.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), StartupError> {
        let reloader_task = tokio::spawn(Arc::clone(&self.reloader).run(self.events, shutdown.subscribe()));

        if self.config.admin.enabled {
            let address = self.config.admin.bind_address.clone();
            let admin_listener = TcpListener::bind(&address)
                .await
                .map_err(|source| StartupError::Bind { address, source })?;
            let admin = setup_admin_router(AdminState {
                reloader: Arc::clone(&self.reloader),
                api_key: Arc::from(self.config.admin.api_key.as_str()),
            });
            let mut admin_shutdown = shutdown.subscribe();
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            tokio::spawn(async move {
                let served = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let server = GatewayServer::new(&self.config.listener, self.state);
        server.run(listener, shutdown.subscribe()).await?;

        if let Err(e) = reloader_task.await {
            tracing::error!(error = %e, "Reloader task failed");
        }
        Ok(())
    }
}

/// Install the Prometheus exporter when enabled.
pub fn start_metrics(config: &GatewayConfig) -> Result<(), StartupError> {
    if !config.observability.metrics_enabled {
        return Ok(());
    }
    let addr: SocketAddr = config
        .observability
        .metrics_address
        .parse()
        .map_err(|_| StartupError::Address {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        })?;
    metrics::init_metrics(addr)?;
    Ok(())
}
