use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Fleet-wide views a node agent can answer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricKind {
    Status,
    HeapUsage,
    Unreachable,
    CompactionHistory,
    ThreadPoolStats,
    ProxyHistograms,
    TableStats { keyspace: String, table: String },
    TableHistograms { keyspace: String, table: String },
}

/// Payload shape of a metric response, used to pick its decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricShape {
    DaemonStatus,
    HeapUsage,
    EndpointList,
    StringTable,
}

/// How per-node answers are joined into a fleet view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    WaitForAll,
    FirstSuccess,
}

impl MetricKind {
    pub fn path(&self) -> &'static str {
        match self {
            MetricKind::Status => "/v1/daemon/status",
            MetricKind::HeapUsage => "/v1/daemon/heapUsage",
            MetricKind::Unreachable => "/v1/daemon/unreachable",
            MetricKind::CompactionHistory => "/v1/daemon/compactionHistory",
            MetricKind::ThreadPoolStats => "/v1/daemon/tpstats",
            MetricKind::ProxyHistograms => "/v1/daemon/proxyhistograms",
            MetricKind::TableStats { .. } => "/v1/daemon/cfstats",
            MetricKind::TableHistograms { .. } => "/v1/daemon/cfhistograms",
        }
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            MetricKind::TableStats { keyspace, table }
            | MetricKind::TableHistograms { keyspace, table } => {
                vec![("keyspace", keyspace.clone()), ("table", table.clone())]
            }
            _ => Vec::new(),
        }
    }

    pub fn shape(&self) -> MetricShape {
        match self {
            MetricKind::Status => MetricShape::DaemonStatus,
            MetricKind::HeapUsage => MetricShape::HeapUsage,
            MetricKind::Unreachable => MetricShape::EndpointList,
            _ => MetricShape::StringTable,
        }
    }

    pub fn join_mode(&self) -> JoinMode {
        match self {
            // Every node sees the whole ring, so one answer is enough
            MetricKind::Unreachable => JoinMode::FirstSuccess,
            _ => JoinMode::WaitForAll,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub mode: String,
    #[serde(default)]
    pub joined: bool,
    #[serde(default)]
    pub rpc_running: bool,
    #[serde(default)]
    pub native_transport_running: bool,
    #[serde(default)]
    pub gossip_initialized: bool,
    #[serde(default)]
    pub gossip_running: bool,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token_count: Option<u32>,
    #[serde(default)]
    pub data_center: Option<String>,
    #[serde(default)]
    pub rack: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapUsage {
    pub seconds_up: u64,
    pub mem_used: f64,
    pub mem_max: f64,
    #[serde(default)]
    pub exceptions: i64,
    #[serde(default)]
    pub load: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Status(DaemonStatus),
    Heap(HeapUsage),
    Endpoints(Vec<String>),
    Table(Vec<String>),
}

impl MetricValue {
    pub fn decode(shape: MetricShape, body: &[u8]) -> Result<Self, serde_json::Error> {
        match shape {
            MetricShape::DaemonStatus => Ok(MetricValue::Status(serde_json::from_slice(body)?)),
            MetricShape::HeapUsage => {
                // Some agents send the heap summary as a JSON-encoded string
                let value: JsonValue = serde_json::from_slice(body)?;
                let heap = match value {
                    JsonValue::String(inner) => serde_json::from_str(&inner)?,
                    other => serde_json::from_value(other)?,
                };
                Ok(MetricValue::Heap(heap))
            }
            MetricShape::EndpointList => Ok(MetricValue::Endpoints(serde_json::from_slice(body)?)),
            MetricShape::StringTable => Ok(MetricValue::Table(serde_json::from_slice(body)?)),
        }
    }

    pub fn shape(&self) -> MetricShape {
        match self {
            MetricValue::Status(_) => MetricShape::DaemonStatus,
            MetricValue::Heap(_) => MetricShape::HeapUsage,
            MetricValue::Endpoints(_) => MetricShape::EndpointList,
            MetricValue::Table(_) => MetricShape::StringTable,
        }
    }

    pub fn into_endpoints(self) -> Option<Vec<String>> {
        match self {
            MetricValue::Endpoints(endpoints) => Some(endpoints),
            _ => None,
        }
    }

    pub fn into_heap(self) -> Option<HeapUsage> {
        match self {
            MetricValue::Heap(heap) => Some(heap),
            _ => None,
        }
    }

    pub fn into_status(self) -> Option<DaemonStatus> {
        match self {
            MetricValue::Status(status) => Some(status),
            _ => None,
        }
    }
}
