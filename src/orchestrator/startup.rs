use anyhow::Result;
use std::sync::Arc;

use crate::orchestrator::config::OrchestratorConfig;
use crate::orchestrator::db::{create_pool, run_migrations};
use crate::orchestrator::engine::Engine;
use crate::orchestrator::membership::StaticMembership;
use crate::orchestrator::node_agent::{HttpNodeAgent, NodeAgent, TaskKiller};
use crate::orchestrator::task_store::{PgTaskStore, TaskStore};

/// Builder for creating orchestrator instances with common configuration
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    store: Option<Arc<dyn TaskStore>>,
    agent: Option<Arc<dyn NodeAgent>>,
    killer: Option<Arc<dyn TaskKiller>>,
}

impl OrchestratorBuilder {
    /// Create a new builder with the provided configuration
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            store: None,
            agent: None,
            killer: None,
        }
    }

    /// Use this store instead of connecting to PostgreSQL
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this agent client instead of HTTP
    pub fn with_agent(mut self, agent: Arc<dyn NodeAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Use this task killer instead of the HTTP restart endpoint
    pub fn with_killer(mut self, killer: Arc<dyn TaskKiller>) -> Self {
        self.killer = Some(killer);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Build an orchestrator instance with the provided engine
    pub fn build(self, engine: Engine) -> OrchestratorInstance {
        OrchestratorInstance {
            engine,
            config: self.config,
        }
    }

    /// Wire the collaborators and restore persisted runs
    pub async fn create_engine(&self) -> Result<Engine> {
        let store = match &self.store {
            Some(store) => store.clone(),
            None => {
                let pool = create_pool(&self.config.database)?;
                run_migrations(&pool).await?;
                Arc::new(PgTaskStore::new(pool)) as Arc<dyn TaskStore>
            }
        };

        let http = Arc::new(HttpNodeAgent::new(self.config.request_timeout())?);
        let agent = match &self.agent {
            Some(agent) => agent.clone(),
            None => http.clone() as Arc<dyn NodeAgent>,
        };
        let killer = match &self.killer {
            Some(killer) => killer.clone(),
            None => http as Arc<dyn TaskKiller>,
        };

        let membership = Arc::new(StaticMembership::with_daemons(
            self.config.membership.daemons.clone(),
        ));

        let engine = Engine::new(store, membership, agent, killer, &self.config.agent);
        engine.initialize().await?;

        Ok(engine)
    }
}

/// A fully initialized orchestrator instance ready to drive runs
pub struct OrchestratorInstance {
    pub engine: Engine,
    pub config: OrchestratorConfig,
}

impl OrchestratorInstance {
    /// Drive active runs until the shutdown signal resolves
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        log::info!(
            "ringctl orchestrator driving {} daemon(s), tick every {:?}",
            self.engine.membership.current_daemon_names().len(),
            self.config.tick_interval()
        );
        self.engine.start_driver(self.config.tick_interval());

        shutdown_signal.await;

        log::info!("Orchestrator terminated, shutting down engine...");
        self.engine
            .shutdown_with_timeout(self.config.shutdown.timeout_secs)
            .await
    }

    /// Start the plan driver in the background
    pub fn start(self) -> RunningOrchestratorInstance {
        self.engine.start_driver(self.config.tick_interval());
        RunningOrchestratorInstance {
            engine: self.engine,
            shutdown_timeout_secs: self.config.shutdown.timeout_secs,
        }
    }

    /// Get a reference to the engine for testing or other purposes
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// A running orchestrator instance with lifecycle management
pub struct RunningOrchestratorInstance {
    pub engine: Engine,
    shutdown_timeout_secs: u64,
}

impl RunningOrchestratorInstance {
    /// Get a reference to the engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Shutdown the orchestrator
    pub async fn shutdown(self) -> Result<()> {
        self.engine
            .shutdown_with_timeout(self.shutdown_timeout_secs)
            .await
    }
}
