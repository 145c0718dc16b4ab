use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

const INSTANCE_SUFFIX_LEN: usize = 6;

/// Service-wide run state, shared by every instance of a service. Also used as the
/// per-instance status in descriptors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[default]
    Running,
    Paused,
    Stopping,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Running => "running",
            ServiceState::Paused => "paused",
            ServiceState::Stopping => "stopping",
        }
    }

    /// Strict parse of a stored value. Anything else is not a state.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(ServiceState::Running),
            "paused" => Some(ServiceState::Paused),
            "stopping" => Some(ServiceState::Stopping),
            _ => None,
        }
    }

    /// Unknown or missing values read as running.
    pub fn parse_or_running(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or_default()
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator directive written to the signal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    Pause,
    Resume,
    Stop,
}

impl ControlSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlSignal::Pause => "pause",
            ControlSignal::Resume => "resume",
            ControlSignal::Stop => "stop",
        }
    }

    /// Case-insensitive, surrounding whitespace ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pause" => Some(ControlSignal::Pause),
            "resume" => Some(ControlSignal::Resume),
            "stop" => Some(ControlSignal::Stop),
            _ => None,
        }
    }

    /// The service-wide state this signal moves the service into.
    pub fn target_state(&self) -> ServiceState {
        match self {
            ControlSignal::Pause => ServiceState::Paused,
            ControlSignal::Resume => ServiceState::Running,
            ControlSignal::Stop => ServiceState::Stopping,
        }
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ControlSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown signal {s:?}, expected pause, resume or stop"))
    }
}

/// Scalar metadata attached to an instance descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::String(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

/// Descriptor of one running process, stored as JSON under a TTL'd key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub service_name: String,
    pub app_type: String,
    pub instance_id: String,
    pub hostname: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: ServiceState,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, MetadataValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Whatever could be salvaged from a stored descriptor. Every field is optional so a
/// descriptor written by an older or foreign client still yields its start time.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct StoredDescriptor {
    pub started_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<BTreeMap<String, MetadataValue>>,
    pub stop_reason: Option<String>,
}

impl StoredDescriptor {
    /// Unparseable payloads are treated as empty.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        raw.and_then(|r| serde_json::from_str(r).ok())
            .unwrap_or_default()
    }
}

/// Who this process is. Computed once per controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub hostname: String,
    pub pid: u32,
    pub instance_id: String,
}

impl InstanceIdentity {
    pub fn new(hostname: impl Into<String>, pid: u32, instance_id: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            pid,
            instance_id: instance_id.into(),
        }
    }

    /// Identity of the current process: `{hostname}-{pid}-{random suffix}`.
    pub fn detect() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown-host".to_string());
        let pid = std::process::id();
        let instance_id = generate_instance_id(&hostname, pid);
        Self::new(hostname, pid, instance_id)
    }
}

pub fn generate_instance_id(hostname: &str, pid: u32) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INSTANCE_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{hostname}-{pid}-{suffix}")
}
