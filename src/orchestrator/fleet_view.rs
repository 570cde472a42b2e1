use log::{debug, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use crate::error::{AgentError, OrchestratorError};
use crate::orchestrator::membership::{DaemonRef, NodeMembership};
use crate::orchestrator::metrics::{DaemonStatus, HeapUsage, JoinMode, MetricKind, MetricValue};
use crate::orchestrator::node_agent::NodeAgent;

/// Aggregated answer of a fan-out query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FleetView {
    PerNode(BTreeMap<String, MetricValue>),
    NodeSet(BTreeSet<String>),
}

impl FleetView {
    pub fn len(&self) -> usize {
        match self {
            FleetView::PerNode(values) => values.len(),
            FleetView::NodeSet(nodes) => nodes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type NodeResult = (String, Result<MetricValue, AgentError>);

/// Receiving end of a fan-out. Each spawned call sends exactly one
/// `(node, result)` pair; the sender side closes once all calls are done.
struct Collector {
    results: mpsc::Receiver<NodeResult>,
}

impl Collector {
    /// Waits for every call. Failed nodes are left out.
    async fn join_all(mut self) -> BTreeMap<String, MetricValue> {
        let mut values = BTreeMap::new();
        while let Some((node, result)) = self.results.recv().await {
            if let Some(value) = Self::accept(&node, result) {
                values.insert(node, value);
            }
        }
        values
    }

    /// Resolves on the first successful call. Results already queued at that
    /// point are merged in; calls still in flight are not waited for. Empty
    /// when every call failed.
    async fn join_first_success(mut self) -> BTreeMap<String, MetricValue> {
        let mut values = BTreeMap::new();
        while let Some((node, result)) = self.results.recv().await {
            if let Some(value) = Self::accept(&node, result) {
                values.insert(node, value);
                break;
            }
        }

        while let Ok((node, result)) = self.results.try_recv() {
            if let Some(value) = Self::accept(&node, result) {
                values.insert(node, value);
            }
        }
        values
    }

    fn accept(node: &str, result: Result<MetricValue, AgentError>) -> Option<MetricValue> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Fleet query to {node} failed: {e}");
                None
            }
        }
    }
}

/// Queries every registered node agent concurrently and joins the answers
#[derive(Clone)]
pub struct FleetStatusClient {
    agent: Arc<dyn NodeAgent>,
    membership: Arc<dyn NodeMembership>,
    permits: Arc<Semaphore>,
    request_timeout: Duration,
}

impl FleetStatusClient {
    pub fn new(
        agent: Arc<dyn NodeAgent>,
        membership: Arc<dyn NodeMembership>,
        concurrency: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            agent,
            membership,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            request_timeout,
        }
    }

    pub fn node_names(&self) -> BTreeSet<String> {
        self.membership.current_daemon_names()
    }

    /// Spawns one bounded, timed call per daemon
    fn fan_out(&self, kind: &MetricKind) -> Collector {
        let daemons = self.membership.daemons();
        let (tx, rx) = mpsc::channel(daemons.len().max(1));
        debug!("Fanning out {:?} to {} node(s)", kind, daemons.len());

        for daemon in daemons {
            let tx = tx.clone();
            let agent = self.agent.clone();
            let permits = self.permits.clone();
            let kind = kind.clone();
            let timeout = self.request_timeout;

            tokio::spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => Self::query(agent.as_ref(), &daemon, &kind, timeout).await,
                    Err(_) => Err(AgentError::Unreachable("fan-out closed".to_string())),
                };
                // The collector may already have resolved
                let _ = tx.send((daemon.name, result)).await;
            });
        }

        Collector { results: rx }
    }

    async fn query(
        agent: &dyn NodeAgent,
        daemon: &DaemonRef,
        kind: &MetricKind,
        timeout: Duration,
    ) -> Result<MetricValue, AgentError> {
        match tokio::time::timeout(timeout, agent.metric(daemon, kind)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout),
        }
    }

    pub async fn fleet_view(&self, kind: MetricKind) -> FleetView {
        let collector = self.fan_out(&kind);
        match kind.join_mode() {
            JoinMode::WaitForAll => FleetView::PerNode(collector.join_all().await),
            JoinMode::FirstSuccess => {
                let nodes = collector
                    .join_first_success()
                    .await
                    .into_values()
                    .filter_map(MetricValue::into_endpoints)
                    .flatten()
                    .collect();
                FleetView::NodeSet(nodes)
            }
        }
    }

    /// Heap summary per reachable daemon
    pub async fn heap_usage(&self) -> BTreeMap<String, HeapUsage> {
        self.fan_out(&MetricKind::HeapUsage)
            .join_all()
            .await
            .into_iter()
            .filter_map(|(node, value)| value.into_heap().map(|heap| (node, heap)))
            .collect()
    }

    /// Endpoints some node reports as down, from the first node to answer
    pub async fn unreachable(&self) -> BTreeSet<String> {
        match self.fleet_view(MetricKind::Unreachable).await {
            FleetView::NodeSet(nodes) => nodes,
            FleetView::PerNode(_) => BTreeSet::new(),
        }
    }

    /// Status of a single daemon, `None` when it is not registered
    pub async fn node_status(
        &self,
        name: &str,
    ) -> Result<Option<DaemonStatus>, OrchestratorError> {
        let Some(daemon) = self.membership.daemon_by_name(name) else {
            return Ok(None);
        };

        let value = Self::query(
            self.agent.as_ref(),
            &daemon,
            &MetricKind::Status,
            self.request_timeout,
        )
        .await
        .map_err(|e| OrchestratorError::RemoteUnavailable {
            node: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(value.into_status())
    }
}
