//! # Broker Bootstrap
//!
//! Builds a running broker from configuration: structured logging, the
//! Postgres pool and schema, the durable store and queue, then the scheduler
//! workers. The embedding API layer supplies the cloud adapters.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::adapters::Adapters;
use crate::broker::BrokerService;
use crate::config::ConfigManager;
use crate::database::{DatabaseConnection, DatabaseMigrations, PgStore};
use crate::error::Result;
use crate::logging::init_structured_logging;
use crate::pipeline::StepContext;
use crate::scheduler::{PgQueue, Scheduler, SchedulerHandle};

/// Handle over a bootstrapped broker and its workers
pub struct BrokerSystem {
    pub broker: BrokerService,
    pub scheduler: Arc<Scheduler>,
    pub config_manager: Arc<ConfigManager>,
    connection: DatabaseConnection,
    workers: Option<SchedulerHandle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub environment: String,
    pub workers: usize,
    pub database_pool_size: u32,
}

impl BrokerSystem {
    pub fn is_running(&self) -> bool {
        self.workers.is_some()
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            running: self.is_running(),
            environment: self.config_manager.environment().to_string(),
            workers: self.workers.as_ref().map_or(0, SchedulerHandle::worker_count),
            database_pool_size: self.connection.pool().size(),
        }
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.connection.health_check().await
    }

    /// Stop the workers; in-flight steps finish first
    pub async fn stop(&mut self) {
        match self.workers.take() {
            Some(workers) => workers.shutdown().await,
            None => warn!("Broker workers already stopped"),
        }
    }

    /// Stop the workers and close the pool
    pub async fn shutdown(mut self) {
        self.stop().await;
        self.connection.close().await;
        info!("Broker shut down");
    }
}

pub struct BrokerBootstrap;

impl BrokerBootstrap {
    /// Connect, migrate if configured, and start `queue.workers` workers
    pub async fn bootstrap(config_manager: Arc<ConfigManager>, adapters: Adapters) -> Result<BrokerSystem> {
        let config = Arc::new(config_manager.config().clone());
        init_structured_logging(&config.logging);

        info!(
            environment = %config_manager.environment(),
            workers = config.queue.workers,
            "Bootstrapping domain broker"
        );

        let connection = DatabaseConnection::connect(&config.database).await?;
        if config.database.run_migrations {
            DatabaseMigrations::run_all(connection.pool()).await?;
        }

        let store = Arc::new(PgStore::new(connection.pool().clone()));
        let queue = Arc::new(PgQueue::new(connection.pool().clone()));
        let context = StepContext::new(store, adapters, Arc::clone(&config))?;
        let scheduler = Arc::new(Scheduler::new(context, queue));
        let broker = BrokerService::new(Arc::clone(&scheduler));
        let workers = Arc::clone(&scheduler).start(config.queue.workers);

        info!(workers = workers.worker_count(), "Domain broker started");
        Ok(BrokerSystem {
            broker,
            scheduler,
            config_manager,
            connection,
            workers: Some(workers),
        })
    }

    /// Load configuration for the detected environment, then bootstrap
    pub async fn bootstrap_standalone(adapters: Adapters) -> Result<BrokerSystem> {
        let config_manager = ConfigManager::load()?;
        Self::bootstrap(config_manager, adapters).await
    }
}
