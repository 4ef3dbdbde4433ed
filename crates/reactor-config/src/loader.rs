use reactor_domain::{Endpoint, EndpointName, Rule, RuleOp};
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{RawEndpoint, RawManagerConfig, RawRule};

/// Metric names every driver in this workspace can produce or accept as a
/// custom override (§4.4/§6). A rule naming anything else is a config-time
/// validation error (Open Question (a)) rather than silently ignored at
/// evaluation time.
pub const KNOWN_METRICS: &[&str] = &["rate", "response", "bytes", "connections", "cpu"];

/// Decode one endpoint's JSON config blob (`/endpoints/<name>`) into the
/// typed domain form. This is the single decode boundary: everything past
/// this call operates on [`Endpoint`], never on the raw JSON.
pub fn load_endpoint(name: &str, json: &str) -> Result<Endpoint, ConfigError> {
    let raw: RawEndpoint = serde_json::from_str(json).map_err(|source| ConfigError::JsonParse {
        what: format!("endpoint '{}'", name),
        source,
    })?;

    if raw.min_instances > raw.max_instances {
        return Err(ConfigError::Invalid {
            what: format!("endpoint '{}'", name),
            message: format!(
                "min_instances ({}) > max_instances ({})",
                raw.min_instances, raw.max_instances
            ),
        });
    }

    let rules = raw
        .rules
        .into_iter()
        .map(|r| convert_rule(name, r))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(endpoint = name, rules = rules.len(), "loaded endpoint config");

    Ok(Endpoint {
        name: EndpointName::new(name),
        url: raw.url,
        port: raw.port,
        cloud: raw.cloud,
        cloud_config: raw.cloud_config,
        loadbalancer: raw.loadbalancer,
        min_instances: raw.min_instances,
        max_instances: raw.max_instances,
        ramp_limit: raw.ramp_limit,
        mark_maximum: raw.mark_maximum.unwrap_or(0),
        rules,
        source: raw.source,
        static_ips: raw.static_ips,
        enabled: raw.enabled,
        public: raw.public,
    })
}

/// Encode an [`Endpoint`] back to the JSON blob stored at `/endpoints/<name>`.
/// Round-trips with [`load_endpoint`].
pub fn dump_endpoint(endpoint: &Endpoint) -> Result<String, ConfigError> {
    let raw = RawEndpoint {
        url: endpoint.url.clone(),
        port: endpoint.port,
        cloud: endpoint.cloud.clone(),
        cloud_config: endpoint.cloud_config.clone(),
        loadbalancer: endpoint.loadbalancer.clone(),
        min_instances: endpoint.min_instances,
        max_instances: endpoint.max_instances,
        ramp_limit: endpoint.ramp_limit,
        mark_maximum: if endpoint.mark_maximum == 0 {
            None
        } else {
            Some(endpoint.mark_maximum)
        },
        rules: endpoint
            .rules
            .iter()
            .map(|r| RawRule {
                metric: r.metric.clone(),
                op: match r.op {
                    RuleOp::GreaterThan => ">".to_string(),
                    RuleOp::LessThan => "<".to_string(),
                },
                value: r.value,
            })
            .collect(),
        source: endpoint.source.clone(),
        static_ips: endpoint.static_ips.clone(),
        enabled: endpoint.enabled,
        public: endpoint.public,
    };
    serde_json::to_string(&raw).map_err(|source| ConfigError::JsonParse {
        what: format!("endpoint '{}'", endpoint.name),
        source,
    })
}

fn convert_rule(endpoint_name: &str, raw: RawRule) -> Result<Rule, ConfigError> {
    if !crate::KNOWN_METRICS.contains(&raw.metric.as_str()) {
        return Err(ConfigError::Invalid {
            what: format!("endpoint '{}' rule", endpoint_name),
            message: format!("unknown metric '{}'", raw.metric),
        });
    }
    let op = match raw.op.as_str() {
        ">" | "gt" | "greater_than" => RuleOp::GreaterThan,
        "<" | "lt" | "less_than" => RuleOp::LessThan,
        other => {
            return Err(ConfigError::Invalid {
                what: format!("endpoint '{}' rule", endpoint_name),
                message: format!("unknown comparison operator '{}'", other),
            })
        }
    };
    Ok(Rule {
        metric: raw.metric,
        op,
        value: raw.value,
    })
}

/// Typed manager configuration, after merging the global `/config` blob with
/// a per-manager `/managers/configs/<uuid>` override (override wins
/// field-by-field).
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub keys: u32,
    pub health_check_secs: u64,
    pub loadbalancers: Vec<(String, serde_json::Value)>,
    pub mark_maximum: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            keys: 64,
            health_check_secs: 10,
            loadbalancers: Vec::new(),
            mark_maximum: 3,
        }
    }
}

/// Decode the global config blob, then merge a per-manager override on top.
/// Either JSON string may be empty, meaning "use defaults".
pub fn load_manager_config(
    global_json: Option<&str>,
    local_json: Option<&str>,
) -> Result<ManagerConfig, ConfigError> {
    let mut config = ManagerConfig::default();
    if let Some(json) = global_json.filter(|s| !s.is_empty()) {
        apply_raw(&mut config, parse_raw(json, "global manager config")?);
    }
    if let Some(json) = local_json.filter(|s| !s.is_empty()) {
        apply_raw(&mut config, parse_raw(json, "local manager config")?);
    }
    Ok(config)
}

fn parse_raw(json: &str, what: &str) -> Result<RawManagerConfig, ConfigError> {
    serde_json::from_str(json).map_err(|source| ConfigError::JsonParse {
        what: what.to_string(),
        source,
    })
}

fn apply_raw(config: &mut ManagerConfig, raw: RawManagerConfig) {
    if let Some(keys) = raw.keys {
        config.keys = keys;
    }
    if let Some(secs) = raw.health_check {
        config.health_check_secs = secs;
    }
    if let Some(mark_maximum) = raw.mark_maximum {
        config.mark_maximum = mark_maximum;
    }
    if !raw.loadbalancers.is_empty() {
        config.loadbalancers = raw
            .loadbalancers
            .into_iter()
            .map(|lb| (lb.name, lb.config))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_minimal_endpoint() {
        let json = r#"{"url":"http://example.com/","cloud":"local","min_instances":1,"max_instances":5}"#;
        let endpoint = load_endpoint("web", json).unwrap();
        assert_eq!(endpoint.name.as_str(), "web");
        assert_eq!(endpoint.min_instances, 1);
        assert_eq!(endpoint.max_instances, 5);
        assert!(endpoint.enabled);
        assert_eq!(endpoint.ramp_limit, 1);
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let json = r#"{"url":"http://example.com/","cloud":"local","min_instances":5,"max_instances":1}"#;
        assert!(load_endpoint("web", json).is_err());
    }

    #[test]
    fn rejects_unknown_rule_metric() {
        let json = r#"{"url":"http://example.com/","cloud":"local","rules":[{"metric":"bogus","op":">","value":1.0}]}"#;
        assert!(load_endpoint("web", json).is_err());
    }

    #[test]
    fn endpoint_round_trips_through_json() {
        let json = r#"{"url":"http://example.com/","cloud":"local","port":8080,
            "min_instances":2,"max_instances":8,"ramp_limit":3,"mark_maximum":5,
            "rules":[{"metric":"rate","op":">","value":100.0}],
            "source":null,"static_ips":["10.0.0.1"],"enabled":true,"public":true}"#;
        let endpoint = load_endpoint("web", json).unwrap();
        let dumped = dump_endpoint(&endpoint).unwrap();
        let reloaded = load_endpoint("web", &dumped).unwrap();
        assert_eq!(endpoint, reloaded);
    }

    #[test]
    fn manager_config_override_wins_field_by_field() {
        let global = r#"{"keys":32,"health_check":10,"mark_maximum":3}"#;
        let local = r#"{"health_check":5}"#;
        let config = load_manager_config(Some(global), Some(local)).unwrap();
        assert_eq!(config.keys, 32);
        assert_eq!(config.health_check_secs, 5);
        assert_eq!(config.mark_maximum, 3);
    }

    #[test]
    fn manager_config_defaults_when_absent() {
        let config = load_manager_config(None, None).unwrap();
        assert_eq!(config, ManagerConfig::default());
    }
}
