use futures::future::join_all;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::cluster_task_manager::ManagedOperation;

/// Periodic loop that advances the active run of every manager.
///
/// Each manager ticks on its own task, so a slow node agent only delays the
/// operation class it belongs to. A manager whose previous tick is still
/// running misses the intervening intervals.
pub struct PlanDriver {
    managers: Vec<Arc<dyn ManagedOperation>>,
    tick_interval: Duration,
}

impl PlanDriver {
    pub fn new(managers: Vec<Arc<dyn ManagedOperation>>, tick_interval: Duration) -> Self {
        Self {
            managers,
            tick_interval,
        }
    }

    /// Runs until the shutdown flag flips to `true` or its sender is dropped.
    /// Ticks in flight at shutdown are dropped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let operations: Vec<String> = self
            .managers
            .iter()
            .map(|manager| manager.operation().to_string())
            .collect();
        info!(
            "Plan driver started for {operations:?}, ticking every {:?}",
            self.tick_interval
        );

        let tick_interval = self.tick_interval;
        let workers = self
            .managers
            .into_iter()
            .map(|manager| tokio::spawn(drive(manager, tick_interval, shutdown.clone())));
        for (operation, result) in operations.iter().zip(join_all(workers).await) {
            if let Err(e) = result {
                error!("Plan driver for {operation} terminated abnormally: {e}");
            }
        }

        info!("Plan driver stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

async fn drive(
    manager: Arc<dyn ManagedOperation>,
    tick_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = interval.tick() => {}
        }

        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = manager.tick() => {}
        }
    }

    debug!("{} ticks stopped", manager.operation());
}

async fn wait_for_shutdown(receiver: &mut watch::Receiver<bool>) {
    while !*receiver.borrow_and_update() {
        if receiver.changed().await.is_err() {
            return;
        }
    }
}
