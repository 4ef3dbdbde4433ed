use serde::{Deserialize, Serialize};

/// Raw JSON representation of an endpoint config blob (`/endpoints/<name>`).
/// Recognized keys per spec: `url`, `port`, `cloud`, `cloud_config`,
/// `loadbalancer`, `min_instances`, `max_instances`, `ramp_limit`,
/// `mark_maximum`, `rules`, `source`, `static_ips`, `enabled`, `public`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawEndpoint {
    pub url: String,
    /// 0 means derive from the URL scheme.
    #[serde(default)]
    pub port: u16,
    pub cloud: String,
    #[serde(default = "default_cloud_config")]
    pub cloud_config: serde_json::Value,
    #[serde(default)]
    pub loadbalancer: Vec<String>,
    #[serde(default)]
    pub min_instances: u32,
    #[serde(default)]
    pub max_instances: u32,
    #[serde(default = "default_ramp_limit")]
    pub ramp_limit: u32,
    /// Absent means inherit the manager's global default.
    pub mark_maximum: Option<u32>,
    #[serde(default)]
    pub rules: Vec<RawRule>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub static_ips: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub public: bool,
}

fn default_cloud_config() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

fn default_ramp_limit() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRule {
    pub metric: String,
    pub op: String,
    pub value: f64,
}

/// Raw JSON representation of the global manager config (`/config`) and of a
/// per-manager override (`/managers/configs/<uuid>`), which is merged over
/// the global config field-by-field.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawManagerConfig {
    /// Number of virtual ring nodes this manager publishes.
    #[serde(default)]
    pub keys: Option<u32>,
    /// Reconciliation tick interval, in seconds.
    #[serde(default)]
    pub health_check: Option<u64>,
    #[serde(default)]
    pub loadbalancers: Vec<RawLoadBalancer>,
    /// Global default for endpoints that don't set their own `mark_maximum`.
    #[serde(default)]
    pub mark_maximum: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawLoadBalancer {
    pub name: String,
    #[serde(default = "default_lb_config")]
    pub config: serde_json::Value,
}

fn default_lb_config() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}
