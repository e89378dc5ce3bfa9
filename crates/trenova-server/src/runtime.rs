// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime wiring every subsystem together.
//!
//! [`ServerRuntime`] owns the HTTP listener, the stream service, the job
//! service and the CDC consumer, and starts and stops them in a fixed order.
//!
//! # Example
//!
//! ```rust,ignore
//! use trenova_server::config::Config;
//! use trenova_server::runtime::ServerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = ServerRuntime::builder()
//!         .config(Config::from_env()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trenova_cdc::handlers::shipments::SHIPMENTS;
use trenova_cdc::{
    CdcConfig, CdcConsumer, FanoutHandler, MessageReader, SchemaRegistry, ShipmentsHandler,
};
use trenova_core::ports::memory::{
    InMemoryShipmentRepository, RecordingAssignmentRepository, RecordingAuditService,
    RecordingEmailService, RecordingNotificationService,
};
use trenova_core::ports::{
    AssignmentRepository, AuditService, EmailService, NotificationService, ShipmentRepository,
};
use trenova_jobs::handlers::{
    DelayShipmentHandler, DuplicateShipmentHandler, ExpireSuggestionsHandler,
    PatternAnalysisHandler, ProcessEmailQueueHandler, SendEmailHandler,
};
use trenova_jobs::{JobBroker, JobService, RedisBroker, typed};
use trenova_lanes::{
    AssignmentService, DedicatedLaneRepository, InMemoryDedicatedLaneRepository,
    InMemoryLocationRepository, InMemoryPatternConfigRepository, InMemorySuggestionRepository,
    LocationRepository, PatternConfigRepository, PatternService, PostgresLaneStore,
    SuggestionRepository, SuggestionService,
};
use trenova_streaming::StreamService;

use crate::api::{self, AppState};
use crate::assign::AutoAssignHandler;
use crate::config::Config;

/// How long in-flight HTTP requests get to finish on shutdown.
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Stores behind pattern detection, suggestions and lanes.
#[derive(Clone)]
pub struct LaneStores {
    /// Suggestion rows.
    pub suggestions: Arc<dyn SuggestionRepository>,
    /// Dedicated lanes.
    pub lanes: Arc<dyn DedicatedLaneRepository>,
    /// Per-organization detection configs.
    pub configs: Arc<dyn PatternConfigRepository>,
    /// Location codes for lane names.
    pub locations: Arc<dyn LocationRepository>,
}

impl LaneStores {
    /// In-memory stores.
    pub fn in_memory() -> Self {
        Self {
            suggestions: Arc::new(InMemorySuggestionRepository::new()),
            lanes: Arc::new(InMemoryDedicatedLaneRepository::new()),
            configs: Arc::new(InMemoryPatternConfigRepository::new()),
            locations: Arc::new(InMemoryLocationRepository::new()),
        }
    }

    /// Every store backed by one PostgreSQL store.
    pub fn postgres(store: PostgresLaneStore) -> Self {
        let store = Arc::new(store);
        Self {
            suggestions: store.clone(),
            lanes: store.clone(),
            configs: store.clone(),
            locations: store,
        }
    }

    async fn resolve(database_url: Option<&str>) -> Result<Self> {
        let Some(url) = database_url else {
            info!("No database configured, using in-memory lane stores");
            return Ok(Self::in_memory());
        };

        info!("Connecting to database...");
        let store = PostgresLaneStore::connect(url).await?;
        info!("Running database migrations...");
        store.migrate().await?;
        info!("Migrations completed");
        Ok(Self::postgres(store))
    }
}

/// Services owned outside this workspace.
#[derive(Clone)]
pub struct Collaborators {
    /// Shipment store.
    pub shipments: Arc<dyn ShipmentRepository>,
    /// Move assignment store.
    pub assignments: Arc<dyn AssignmentRepository>,
    /// Audit log.
    pub audit: Arc<dyn AuditService>,
    /// User notifications.
    pub notifications: Arc<dyn NotificationService>,
    /// Email delivery.
    pub email: Arc<dyn EmailService>,
}

impl Collaborators {
    /// In-memory collaborators for development and tests.
    pub fn in_memory() -> Self {
        Self {
            shipments: Arc::new(InMemoryShipmentRepository::new()),
            assignments: Arc::new(RecordingAssignmentRepository::new()),
            audit: Arc::new(RecordingAuditService::new()),
            notifications: Arc::new(RecordingNotificationService::new()),
            email: Arc::new(RecordingEmailService::new()),
        }
    }
}

/// Broker reader and schema registry for the CDC consumer.
#[derive(Clone)]
pub struct CdcSource {
    /// Broker reader.
    pub reader: Arc<dyn MessageReader>,
    /// Schema registry.
    pub registry: Arc<dyn SchemaRegistry>,
}

/// Builder for creating a [`ServerRuntime`].
#[derive(Default)]
pub struct ServerRuntimeBuilder {
    config: Option<Config>,
    collaborators: Option<Collaborators>,
    lane_stores: Option<LaneStores>,
    job_broker: Option<Arc<dyn JobBroker>>,
    cdc_source: Option<CdcSource>,
}

impl std::fmt::Debug for ServerRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRuntimeBuilder")
            .field("config", &self.config)
            .field("collaborators", &self.collaborators.as_ref().map(|_| "..."))
            .field("lane_stores", &self.lane_stores.as_ref().map(|_| "..."))
            .field("job_broker", &self.job_broker.as_ref().map(|_| "..."))
            .field("cdc_source", &self.cdc_source.as_ref().map(|_| "..."))
            .finish()
    }
}

impl ServerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the external collaborators.
    ///
    /// Default: in-memory implementations.
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    /// Set the lane stores.
    ///
    /// Default: PostgreSQL when `database_url` is set, in memory otherwise.
    pub fn lane_stores(mut self, stores: LaneStores) -> Self {
        self.lane_stores = Some(stores);
        self
    }

    /// Set the job broker.
    ///
    /// Default: Redis at `jobs.redis_url`.
    pub fn job_broker(mut self, broker: Arc<dyn JobBroker>) -> Self {
        self.job_broker = Some(broker);
        self
    }

    /// Set the CDC reader and registry.
    ///
    /// Default: Kafka and the HTTP schema registry (`kafka` feature only).
    pub fn cdc_source(mut self, source: CdcSource) -> Self {
        self.cdc_source = Some(source);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ServerRuntimeConfig> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;

        Ok(ServerRuntimeConfig {
            config,
            collaborators: self.collaborators,
            lane_stores: self.lane_stores,
            job_broker: self.job_broker,
            cdc_source: self.cdc_source,
        })
    }
}

/// Configuration for a [`ServerRuntime`].
pub struct ServerRuntimeConfig {
    config: Config,
    collaborators: Option<Collaborators>,
    lane_stores: Option<LaneStores>,
    job_broker: Option<Arc<dyn JobBroker>>,
    cdc_source: Option<CdcSource>,
}

impl std::fmt::Debug for ServerRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRuntimeConfig")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ServerRuntimeConfig {
    /// Start every subsystem and the HTTP server.
    ///
    /// Components start in the order listener, streaming, jobs, CDC. A
    /// failure stops whatever already started.
    pub async fn start(self) -> Result<ServerRuntime> {
        let Self {
            config,
            collaborators,
            lane_stores,
            job_broker,
            cdc_source,
        } = self;

        let collaborators = collaborators.unwrap_or_else(|| {
            warn!("No collaborators configured, using in-memory implementations");
            Collaborators::in_memory()
        });
        let stores = match lane_stores {
            Some(stores) => stores,
            None => LaneStores::resolve(config.database_url.as_deref()).await?,
        };

        let patterns = Arc::new(PatternService::new(
            collaborators.shipments.clone(),
            stores.suggestions.clone(),
            stores.lanes.clone(),
            stores.configs.clone(),
            stores.locations.clone(),
            collaborators.audit.clone(),
        ));
        let suggestions = Arc::new(SuggestionService::new(
            stores.suggestions.clone(),
            stores.lanes.clone(),
            collaborators.audit.clone(),
        ));
        let assignments = Arc::new(AssignmentService::new(
            stores.lanes.clone(),
            collaborators.shipments.clone(),
            collaborators.assignments.clone(),
        ));

        let listener = TcpListener::bind(config.http_addr).await?;
        let local_addr = listener.local_addr()?;

        let streaming = Arc::new(StreamService::new(config.streaming.clone()));
        streaming.start().await;

        let broker: Arc<dyn JobBroker> = match job_broker {
            Some(broker) => broker,
            None => match RedisBroker::connect(&config.jobs.redis_url).await {
                Ok(broker) => Arc::new(broker),
                Err(e) => {
                    streaming.stop().await;
                    return Err(e.into());
                }
            },
        };
        let jobs = Arc::new(JobService::new(broker, config.jobs.clone()));
        register_job_handlers(&jobs, &collaborators, &patterns, &suggestions);
        if let Err(e) = jobs.start().await {
            streaming.stop().await;
            return Err(e.into());
        }

        let cdc = match build_cdc(&config.cdc, cdc_source) {
            Ok(cdc) => cdc,
            Err(e) => {
                stop_started(&jobs, &streaming).await;
                return Err(e);
            }
        };
        if let Some(cdc) = &cdc {
            let shipments = FanoutHandler::new(SHIPMENTS)
                .with(Arc::new(ShipmentsHandler::new(streaming.clone())))
                .with(Arc::new(AutoAssignHandler::new(
                    assignments.clone(),
                    collaborators.shipments.clone(),
                )));
            cdc.register_handler(Arc::new(shipments));
            if let Err(e) = cdc.start().await {
                stop_started(&jobs, &streaming).await;
                return Err(e.into());
            }
        }

        let cancel = CancellationToken::new();
        let app = api::router(AppState {
            streaming: streaming.clone(),
            jobs: jobs.clone(),
            cdc: cdc.clone(),
            started_at: Utc::now(),
        });
        let shutdown = cancel.clone();
        let http = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });

        info!(
            addr = %local_addr,
            cdc = cdc.is_some(),
            scheduler = config.jobs.scheduler_enabled,
            "ServerRuntime started"
        );

        Ok(ServerRuntime {
            local_addr,
            cancel,
            http,
            cdc,
            jobs,
            streaming,
            patterns,
            suggestions,
            assignments,
        })
    }
}

fn register_job_handlers(
    jobs: &JobService,
    collaborators: &Collaborators,
    patterns: &Arc<PatternService>,
    suggestions: &Arc<SuggestionService>,
) {
    jobs.register_handler(typed(PatternAnalysisHandler::new(patterns.clone())));
    jobs.register_handler(typed(ExpireSuggestionsHandler::new(suggestions.clone())));
    jobs.register_handler(typed(DelayShipmentHandler::new(
        collaborators.shipments.clone(),
        collaborators.notifications.clone(),
        collaborators.audit.clone(),
    )));
    jobs.register_handler(typed(DuplicateShipmentHandler::new(
        collaborators.shipments.clone(),
        collaborators.audit.clone(),
        collaborators.notifications.clone(),
    )));
    jobs.register_handler(typed(SendEmailHandler::new(collaborators.email.clone())));
    jobs.register_handler(typed(ProcessEmailQueueHandler::new(
        collaborators.email.clone(),
    )));
}

fn build_cdc(config: &CdcConfig, source: Option<CdcSource>) -> Result<Option<Arc<CdcConsumer>>> {
    if !config.enabled {
        info!("CDC consumer disabled");
        return Ok(None);
    }
    match source {
        Some(source) => Ok(Some(Arc::new(CdcConsumer::new(
            config.clone(),
            source.reader,
            source.registry,
        )))),
        None => kafka_consumer(config),
    }
}

#[cfg(feature = "kafka")]
fn kafka_consumer(config: &CdcConfig) -> Result<Option<Arc<CdcConsumer>>> {
    Ok(Some(Arc::new(CdcConsumer::kafka(config.clone())?)))
}

#[cfg(not(feature = "kafka"))]
fn kafka_consumer(_config: &CdcConfig) -> Result<Option<Arc<CdcConsumer>>> {
    warn!("Built without the kafka feature, CDC consumer not started");
    Ok(None)
}

async fn stop_started(jobs: &JobService, streaming: &StreamService) {
    if let Err(e) = jobs.shutdown().await {
        error!(error = %e, "Job service failed to stop");
    }
    streaming.stop().await;
}

/// A running Trenova server.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ServerRuntime {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    http: JoinHandle<std::io::Result<()>>,
    cdc: Option<Arc<CdcConsumer>>,
    jobs: Arc<JobService>,
    streaming: Arc<StreamService>,
    patterns: Arc<PatternService>,
    suggestions: Arc<SuggestionService>,
    assignments: Arc<AssignmentService>,
}

impl ServerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ServerRuntimeBuilder {
        ServerRuntimeBuilder::new()
    }

    /// Address the HTTP server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The job service.
    pub fn jobs(&self) -> &Arc<JobService> {
        &self.jobs
    }

    /// The stream service.
    pub fn streaming(&self) -> &Arc<StreamService> {
        &self.streaming
    }

    /// The CDC consumer, when one was started.
    pub fn cdc(&self) -> Option<&Arc<CdcConsumer>> {
        self.cdc.as_ref()
    }

    /// Pattern detection.
    pub fn patterns(&self) -> &Arc<PatternService> {
        &self.patterns
    }

    /// Suggestion decisions.
    pub fn suggestions(&self) -> &Arc<SuggestionService> {
        &self.suggestions
    }

    /// Lane auto-assignment.
    pub fn assignments(&self) -> &Arc<AssignmentService> {
        &self.assignments
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops accepting connections, stops the CDC consumer so no further
    /// broadcasts happen, closes every stream client, waits for HTTP
    /// requests to drain and finally stops the job service.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("ServerRuntime shutting down...");
        self.cancel.cancel();

        if let Some(cdc) = &self.cdc
            && let Err(e) = cdc.stop().await
        {
            error!(error = %e, "CDC consumer failed to stop");
        }

        self.streaming.stop().await;

        match tokio::time::timeout(HTTP_DRAIN_TIMEOUT, &mut self.http).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(error = %e, "HTTP server error during shutdown"),
            Ok(Err(e)) => error!(error = %e, "HTTP server task failed"),
            Err(_) => {
                warn!(
                    timeout_secs = HTTP_DRAIN_TIMEOUT.as_secs(),
                    "HTTP server did not drain in time, aborting"
                );
                self.http.abort();
            }
        }

        self.jobs.shutdown().await?;
        info!("ServerRuntime shutdown complete");
        Ok(())
    }
}
