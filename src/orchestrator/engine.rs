use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{AgentError, OrchestratorError};
use crate::orchestrator::cluster_task_manager::{ClusterTaskManager, ManagedOperation, RunStatus};
use crate::orchestrator::config::AgentConfig;
use crate::orchestrator::driver::PlanDriver;
use crate::orchestrator::fleet_view::FleetStatusClient;
use crate::orchestrator::membership::{DaemonInfo, NodeMembership};
use crate::orchestrator::node_agent::{NodeAgent, TaskKiller};
use crate::orchestrator::operations::{CleanupRequest, CompactRequest};
use crate::orchestrator::plan::PlanEnv;
use crate::orchestrator::task_store::TaskStore;

struct DriverHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The central orchestration engine containing all shared state and collaborators
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn TaskStore>,
    pub membership: Arc<dyn NodeMembership>,
    pub agent: Arc<dyn NodeAgent>,
    pub killer: Arc<dyn TaskKiller>,

    pub compaction: Arc<ClusterTaskManager<CompactRequest>>,
    pub cleanup: Arc<ClusterTaskManager<CleanupRequest>>,

    /// Fleet-wide queries, independent of any run
    pub fleet: FleetStatusClient,

    request_timeout: Duration,
    driver: Arc<Mutex<Option<DriverHandle>>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        membership: Arc<dyn NodeMembership>,
        agent: Arc<dyn NodeAgent>,
        killer: Arc<dyn TaskKiller>,
        agent_config: &AgentConfig,
    ) -> Self {
        let env = PlanEnv::new(store.clone(), membership.clone(), agent.clone())
            .with_call_timeout(agent_config.request_timeout());
        let fleet = FleetStatusClient::new(
            agent.clone(),
            membership.clone(),
            agent_config.fan_out_concurrency,
            agent_config.request_timeout(),
        );

        Self {
            store,
            membership,
            agent,
            killer,
            compaction: Arc::new(ClusterTaskManager::new(env.clone())),
            cleanup: Arc::new(ClusterTaskManager::new(env)),
            fleet,
            request_timeout: agent_config.request_timeout(),
            driver: Arc::new(Mutex::new(None)),
        }
    }

    /// Every manager, in a fixed order
    pub fn managers(&self) -> Vec<Arc<dyn ManagedOperation>> {
        let compaction: Arc<dyn ManagedOperation> = self.compaction.clone();
        let cleanup: Arc<dyn ManagedOperation> = self.cleanup.clone();
        vec![compaction, cleanup]
    }

    /// Restores runs persisted by a previous process
    pub async fn initialize(&self) -> Result<()> {
        let mut restored = 0;
        for manager in self.managers() {
            if manager.restore_saved().await? {
                restored += 1;
            }
        }

        log::info!(
            "Engine initialized - {restored} run(s) restored, {} daemon(s) registered",
            self.membership.current_daemon_names().len()
        );
        Ok(())
    }

    pub fn status(&self) -> Vec<RunStatus> {
        self.managers()
            .iter()
            .map(|manager| manager.run_status())
            .collect()
    }

    pub fn daemon_info(&self, name: &str) -> Result<DaemonInfo, OrchestratorError> {
        self.membership
            .daemon_info(name)
            .ok_or_else(|| OrchestratorError::not_found(format!("daemon {name}")))
    }

    pub fn daemons_info(&self) -> Vec<DaemonInfo> {
        self.membership.daemons_info()
    }

    /// Kills the daemon task on `name` so that it is relaunched in place.
    /// Runs targeting the node are left alone; their steps keep polling.
    pub async fn restart_node(&self, name: &str) -> Result<DaemonInfo, OrchestratorError> {
        let Some(daemon) = self.membership.daemon_by_name(name) else {
            return Err(OrchestratorError::not_found(format!("daemon {name}")));
        };

        let killed = tokio::time::timeout(self.request_timeout, self.killer.kill(&daemon))
            .await
            .unwrap_or(Err(AgentError::Timeout));
        if let Err(e) = killed {
            log::warn!("Failed to restart daemon {name}: {e}");
            return Err(OrchestratorError::RemoteUnavailable {
                node: name.to_string(),
                reason: e.to_string(),
            });
        }

        log::info!("Restart requested for daemon {name}");
        Ok(DaemonInfo::from(&daemon))
    }

    /// Starts the plan driver. A second call while it runs is a no-op.
    pub fn start_driver(&self, tick_interval: Duration) {
        let mut driver = self.driver.lock().unwrap_or_else(|e| e.into_inner());
        if driver.is_some() {
            log::warn!("Plan driver already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = PlanDriver::new(self.managers(), tick_interval).spawn(shutdown_rx);
        *driver = Some(DriverHandle {
            shutdown_tx,
            handle,
        });
    }

    /// Shutdown the engine with default timeout
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(30).await
    }

    /// Stops the plan driver. Runs stay persisted and resume on the next start.
    pub async fn shutdown_with_timeout(&self, timeout_secs: u64) -> Result<()> {
        log::info!("Shutting down orchestration engine with {timeout_secs}s timeout...");

        let driver = self
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(DriverHandle {
            shutdown_tx,
            handle,
        }) = driver
        else {
            log::info!("Orchestration engine shutdown complete");
            return Ok(());
        };

        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(Duration::from_secs(timeout_secs), handle).await {
            Ok(Ok(())) => log::info!("Orchestration engine shutdown complete"),
            Ok(Err(e)) => log::error!("Plan driver terminated abnormally: {e}"),
            Err(_) => {
                log::error!("Engine shutdown timed out after {timeout_secs}s, plan driver may not have stopped cleanly");
            }
        }
        Ok(())
    }
}
