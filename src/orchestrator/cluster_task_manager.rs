use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::error::OrchestratorError;
use crate::orchestrator::plan::{NodeTaskStep, Phase, PhaseSnapshot, PhaseStatus, PlanEnv, Strategy};
use crate::orchestrator::request::{MaintenanceContext, MaintenanceRequest, OperationKind};

/// Answer handed back to a front door for start/stop requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResponse {
    Accepted,
    Rejected { reason: String },
}

impl RunResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RunResponse::Accepted)
    }
}

/// Read-only view of one operation class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub operation: OperationKind,
    pub active: bool,
    pub context: Option<JsonValue>,
    pub phases: Vec<PhaseSnapshot>,
}

struct ActiveRun<C> {
    context: C,
    phases: tokio::sync::Mutex<Vec<Phase>>,
    // Refreshed after every tick so status() never waits on remote calls
    snapshot: Mutex<Vec<PhaseSnapshot>>,
    cancel: watch::Sender<bool>,
}

impl<C> ActiveRun<C> {
    fn new(context: C, phases: Vec<Phase>) -> Self {
        let snapshot = phases.iter().map(Phase::snapshot).collect();
        let (cancel, _) = watch::channel(false);
        Self {
            context,
            phases: tokio::sync::Mutex::new(phases),
            snapshot: Mutex::new(snapshot),
            cancel,
        }
    }

    fn snapshot(&self) -> Vec<PhaseSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn refresh_snapshot(&self, phases: &[Phase]) {
        let snapshot = phases.iter().map(Phase::snapshot).collect();
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    fn is_complete(&self) -> bool {
        self.snapshot()
            .iter()
            .all(|phase| phase.status == PhaseStatus::Complete)
    }

    // send_replace stores the flag even while no tick is subscribed
    fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    fn resume(&self) {
        self.cancel.send_replace(false);
    }
}

/// Controller for one class of fleet-wide maintenance operation.
///
/// Owns the persisted context of the current run and the phases built from
/// it. At most one run per manager is active at a time.
pub struct ClusterTaskManager<R: MaintenanceRequest> {
    env: PlanEnv,
    strategy: Strategy,
    run: Mutex<Option<Arc<ActiveRun<R::Context>>>>,
    // Serializes start, stop and restore
    control: tokio::sync::Mutex<()>,
    _request: PhantomData<fn(R)>,
}

impl<R: MaintenanceRequest> ClusterTaskManager<R> {
    pub fn new(env: PlanEnv) -> Self {
        Self::with_strategy(env, R::strategy())
    }

    pub fn with_strategy(env: PlanEnv, strategy: Strategy) -> Self {
        Self {
            env,
            strategy,
            run: Mutex::new(None),
            control: tokio::sync::Mutex::new(()),
            _request: PhantomData,
        }
    }

    pub fn operation(&self) -> OperationKind {
        R::OPERATION
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn active_run(&self) -> Option<Arc<ActiveRun<R::Context>>> {
        self.run.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// True while a run exists that has not completed. A failed run stays in
    /// progress until it is stopped.
    pub fn is_in_progress(&self) -> bool {
        self.active_run().is_some_and(|run| !run.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.active_run().is_some_and(|run| run.is_complete())
    }

    pub fn context(&self) -> Option<R::Context> {
        self.active_run().map(|run| run.context.clone())
    }

    pub async fn start(&self, request: R) -> Result<(), OrchestratorError> {
        let _control = self.control.lock().await;
        let operation = R::OPERATION;

        if !request.is_valid() {
            return Err(OrchestratorError::validation(format!(
                "{operation} request must name at least one node"
            )));
        }

        if self.is_in_progress() {
            return Err(OrchestratorError::conflict(format!(
                "{operation} is already in progress"
            )));
        }

        let context = request.to_context(self.env.membership.as_ref());
        if context.target_nodes().is_empty() {
            return Err(OrchestratorError::validation(format!(
                "{operation} request {request:?} does not match any registered node"
            )));
        }

        let encoded = serde_json::to_vec(&context)?;
        let stale = self.take_tasks().await?;
        if let Err(e) = self
            .env
            .store
            .put(&operation.context_key(), encoded)
            .await
        {
            self.put_back(stale).await;
            return Err(e.into());
        }

        info!(
            "Starting {operation} on {} node(s): {:?}",
            context.target_nodes().len(),
            context.target_nodes()
        );
        self.install(context);
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        let _control = self.control.lock().await;
        let operation = R::OPERATION;

        let run = self.active_run();
        // Held until the records are gone so no late tick can recreate them
        let _plan = match &run {
            Some(run) => {
                run.cancel();
                Some(run.phases.lock().await)
            }
            None => {
                debug!("No {operation} run in memory, clearing persisted state");
                None
            }
        };

        if let Err(e) = self.clear_persisted().await {
            if let Some(run) = &run {
                run.resume();
            }
            return Err(e);
        }

        self.run.lock().unwrap_or_else(|e| e.into_inner()).take();
        if run.is_some() {
            info!("Stopped {operation} run");
        }
        Ok(())
    }

    /// Rebuilds the run from a persisted context, if any. Existing task
    /// records are left in place so steps pick up where they were.
    pub async fn restore(&self) -> Result<bool, OrchestratorError> {
        let _control = self.control.lock().await;
        let operation = R::OPERATION;

        let Some(bytes) = self.env.store.get(&operation.context_key()).await? else {
            info!("No {operation} run to restore");
            return Ok(false);
        };

        let context: R::Context = serde_json::from_slice(&bytes)?;
        info!(
            "Restoring {operation} run on {:?}",
            context.target_nodes()
        );
        self.install(context);
        Ok(true)
    }

    /// One scheduling tick over the active run
    pub async fn execute(&self) {
        let Some(run) = self.active_run() else {
            return;
        };

        let mut cancelled = run.cancel.subscribe();
        if *cancelled.borrow() {
            return;
        }

        let mut phases = run.phases.lock().await;
        if *cancelled.borrow() {
            return;
        }
        let env = &self.env;
        let tick = async {
            for phase in phases.iter_mut() {
                if phase.execute(env).await != PhaseStatus::Complete {
                    break;
                }
            }
        };

        tokio::select! {
            _ = tick => {}
            _ = wait_cancelled(&mut cancelled) => {
                info!("{} tick cancelled", R::OPERATION);
            }
        }
        run.refresh_snapshot(&phases);
    }

    pub fn status(&self) -> RunStatus {
        let run = self.active_run();
        RunStatus {
            operation: R::OPERATION,
            active: run.as_ref().is_some_and(|run| !run.is_complete()),
            context: run
                .as_ref()
                .and_then(|run| serde_json::to_value(&run.context).ok()),
            phases: run.map(|run| run.snapshot()).unwrap_or_default(),
        }
    }

    pub async fn start_run(&self, request: R) -> RunResponse {
        match self.start(request).await {
            Ok(()) => RunResponse::Accepted,
            Err(e) => {
                warn!("Rejected {} request: {e}", R::OPERATION);
                RunResponse::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub async fn stop_run(&self) -> RunResponse {
        match self.stop().await {
            Ok(()) => RunResponse::Accepted,
            Err(e) => {
                warn!("Failed to stop {} run: {e}", R::OPERATION);
                RunResponse::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn install(&self, context: R::Context) {
        let phases = self.create_phases(&context);
        let run = Arc::new(ActiveRun::new(context, phases));
        let previous = self
            .run
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(run);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn create_phases(&self, context: &R::Context) -> Vec<Phase> {
        let operation = R::OPERATION;
        let payload = context.task_payload();
        let steps = context
            .target_nodes()
            .iter()
            .map(|daemon| NodeTaskStep::new(operation, daemon, payload.clone()))
            .collect();
        vec![Phase::new(operation.phase_name(), self.strategy, steps)]
    }

    async fn clear_persisted(&self) -> Result<(), OrchestratorError> {
        self.take_tasks().await?;
        self.env
            .store
            .delete(&[R::OPERATION.context_key()])
            .await?;
        Ok(())
    }

    /// Deletes every task record of this class, returning what was deleted
    async fn take_tasks(&self) -> Result<Vec<(String, Vec<u8>)>, OrchestratorError> {
        let keys = self
            .env
            .store
            .keys_with_prefix(&R::OPERATION.task_key_prefix())
            .await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut records = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(value) = self.env.store.get(key).await? {
                records.push((key.clone(), value));
            }
        }
        info!("Clearing {} {} task record(s)", keys.len(), R::OPERATION);
        self.env.store.delete(&keys).await?;
        Ok(records)
    }

    async fn put_back(&self, records: Vec<(String, Vec<u8>)>) {
        for (key, value) in records {
            if let Err(e) = self.env.store.put(&key, value).await {
                warn!("Failed to restore task record {key}: {e}");
            }
        }
    }
}

async fn wait_cancelled(receiver: &mut watch::Receiver<bool>) {
    while !*receiver.borrow_and_update() {
        if receiver.changed().await.is_err() {
            // Run was replaced
            return;
        }
    }
}

/// Type-erased view of a manager used by the engine and the plan driver
#[async_trait]
pub trait ManagedOperation: Send + Sync {
    fn operation(&self) -> OperationKind;

    async fn tick(&self);

    async fn restore_saved(&self) -> Result<bool, OrchestratorError>;

    async fn clear(&self) -> Result<(), OrchestratorError>;

    fn run_status(&self) -> RunStatus;
}

#[async_trait]
impl<R: MaintenanceRequest> ManagedOperation for ClusterTaskManager<R> {
    fn operation(&self) -> OperationKind {
        R::OPERATION
    }

    async fn tick(&self) {
        self.execute().await
    }

    async fn restore_saved(&self) -> Result<bool, OrchestratorError> {
        self.restore().await
    }

    async fn clear(&self) -> Result<(), OrchestratorError> {
        self.stop().await
    }

    fn run_status(&self) -> RunStatus {
        self.status()
    }
}
