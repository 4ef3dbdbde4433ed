use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointName(pub String);

impl EndpointName {
    pub fn new(s: impl Into<String>) -> Self {
        EndpointName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable hash of an endpoint's URL. Endpoints sharing a URL share a key and
/// therefore share a load-balancer front-end.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointKey(pub String);

impl EndpointKey {
    pub fn from_url(url: &str) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(url.as_bytes());
        EndpointKey(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagerId(pub uuid::Uuid);

impl ManagerId {
    pub fn new() -> Self {
        ManagerId(uuid::Uuid::new_v4())
    }
}

impl Default for ManagerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ManagerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(s: impl Into<String>) -> Self {
        InstanceId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Endpoint run state ────────────────────────────────────────────────────────

/// Value stored at `/endpoints/<name>/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRunState {
    Default,
    Running,
    Stopped,
    Paused,
}

impl EndpointRunState {
    /// Whether a reconciler should run a tick for an endpoint in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, EndpointRunState::Default | EndpointRunState::Running)
    }
}

impl std::fmt::Display for EndpointRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndpointRunState::Default => "default",
            EndpointRunState::Running => "running",
            EndpointRunState::Stopped => "stopped",
            EndpointRunState::Paused => "paused",
        };
        write!(f, "{}", s)
    }
}

impl Default for EndpointRunState {
    fn default() -> Self {
        EndpointRunState::Default
    }
}

// ── Rules ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOp {
    /// `metric > threshold` widens `ideal_min` (scale up).
    GreaterThan,
    /// `metric < threshold` narrows `ideal_max` (scale down).
    LessThan,
}

impl std::fmt::Display for RuleOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleOp::GreaterThan => write!(f, ">"),
            RuleOp::LessThan => write!(f, "<"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub metric: String,
    pub op: RuleOp,
    pub value: f64,
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: EndpointName,
    pub url: String,
    /// 0 means derive from the URL scheme.
    pub port: u16,
    pub cloud: String,
    pub cloud_config: serde_json::Value,
    pub loadbalancer: Vec<String>,
    pub min_instances: u32,
    pub max_instances: u32,
    pub ramp_limit: u32,
    pub mark_maximum: u32,
    pub rules: Vec<Rule>,
    /// Inherit metrics from another endpoint's key.
    pub source: Option<String>,
    pub static_ips: Vec<String>,
    pub enabled: bool,
    pub public: bool,
}

impl Endpoint {
    pub fn key(&self) -> EndpointKey {
        EndpointKey::from_url(&self.url)
    }
}

// ── Instance ──────────────────────────────────────────────────────────────────

/// Produced by a cloud driver. Never mutated by the control plane once born;
/// only decommissioned (tracked separately) or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub addresses: Vec<String>,
    /// Monotonic, used as secondary ordering when popping from the tail.
    pub created: chrono::DateTime<chrono::Utc>,
}

// ── IP lifecycle ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpState {
    New,
    Confirmed,
    Active,
    Orphaned,
    Dropped,
}

impl IpState {
    /// Whether this IP state may transition to `to`.
    pub fn can_transition_to(&self, to: IpState) -> bool {
        use IpState::*;
        matches!(
            (self, to),
            (New, Confirmed)
                | (Confirmed, Active)
                | (Confirmed, Orphaned)
                | (Active, Orphaned)
                | (Orphaned, Dropped)
        )
    }
}

impl std::fmt::Display for IpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IpState::New => "new",
            IpState::Confirmed => "confirmed",
            IpState::Active => "active",
            IpState::Orphaned => "orphaned",
            IpState::Dropped => "dropped",
        };
        write!(f, "{}", s)
    }
}

// ── Mark counter ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkLabel {
    Unregistered,
    Decommissioned,
}

impl std::fmt::Display for MarkLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarkLabel::Unregistered => "unregistered",
            MarkLabel::Decommissioned => "decommissioned",
        };
        write!(f, "{}", s)
    }
}

/// `{label: counter}`, published at `/endpoints/<name>/marked/<instance>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkCounters(pub HashMap<MarkLabel, u32>);

impl MarkCounters {
    /// Increment `label`'s counter; returns `true` if it hit `threshold` (and
    /// was reset back to zero — threshold-triggered-once semantics).
    pub fn increment(&mut self, label: MarkLabel, threshold: u32) -> bool {
        let counter = self.0.entry(label).or_insert(0);
        *counter += 1;
        if *counter >= threshold {
            self.0.remove(&label);
            true
        } else {
            false
        }
    }
}

// ── Manager record ────────────────────────────────────────────────────────────

/// Ephemeral — vanishes automatically if the manager's coordination session
/// dies. Published under `/managers/keys/<uuid>`, `/managers/ips/<ip>`,
/// `/managers/metrics/<uuid>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerRecord {
    pub id: ManagerId,
    /// Virtual-node keys this manager currently publishes.
    pub keys: Vec<u128>,
    pub ip: String,
}
