use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

/// Address of one registered database daemon and its node agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRef {
    pub name: String,
    pub hostname: String,
    pub api_port: u16,
}

impl DaemonRef {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, api_port: u16) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            api_port,
        }
    }

    pub fn agent_base_url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.api_port)
    }
}

/// Operator-facing description of a registered daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonInfo {
    pub name: String,
    pub hostname: String,
    pub api_port: u16,
    pub agent_url: String,
}

impl From<&DaemonRef> for DaemonInfo {
    fn from(daemon: &DaemonRef) -> Self {
        Self {
            name: daemon.name.clone(),
            hostname: daemon.hostname.clone(),
            api_port: daemon.api_port,
            agent_url: daemon.agent_base_url(),
        }
    }
}

/// Current cluster membership, as seen by the control plane
pub trait NodeMembership: Send + Sync {
    fn current_daemon_names(&self) -> BTreeSet<String>;

    fn daemon_by_name(&self, name: &str) -> Option<DaemonRef>;

    /// All registered daemons, sorted by name
    fn daemons(&self) -> Vec<DaemonRef>;

    fn daemon_info(&self, name: &str) -> Option<DaemonInfo> {
        self.daemon_by_name(name).as_ref().map(DaemonInfo::from)
    }

    fn daemons_info(&self) -> Vec<DaemonInfo> {
        self.daemons().iter().map(DaemonInfo::from).collect()
    }
}

/// Membership held in memory, seeded from configuration or tests
#[derive(Debug, Default)]
pub struct StaticMembership {
    daemons: RwLock<BTreeMap<String, DaemonRef>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_daemons(daemons: impl IntoIterator<Item = DaemonRef>) -> Self {
        let membership = Self::new();
        for daemon in daemons {
            membership.register(daemon);
        }
        membership
    }

    pub fn register(&self, daemon: DaemonRef) {
        log::debug!("Registering daemon {} at {}", daemon.name, daemon.agent_base_url());
        let mut daemons = self.daemons.write().unwrap_or_else(|e| e.into_inner());
        daemons.insert(daemon.name.clone(), daemon);
    }

    pub fn deregister(&self, name: &str) -> Option<DaemonRef> {
        let mut daemons = self.daemons.write().unwrap_or_else(|e| e.into_inner());
        let removed = daemons.remove(name);
        if removed.is_some() {
            log::info!("Daemon {name} removed from membership");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.daemons.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeMembership for StaticMembership {
    fn current_daemon_names(&self) -> BTreeSet<String> {
        let daemons = self.daemons.read().unwrap_or_else(|e| e.into_inner());
        daemons.keys().cloned().collect()
    }

    fn daemon_by_name(&self, name: &str) -> Option<DaemonRef> {
        let daemons = self.daemons.read().unwrap_or_else(|e| e.into_inner());
        daemons.get(name).cloned()
    }

    fn daemons(&self) -> Vec<DaemonRef> {
        let daemons = self.daemons.read().unwrap_or_else(|e| e.into_inner());
        daemons.values().cloned().collect()
    }
}
