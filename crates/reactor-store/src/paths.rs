//! Pure path-building functions over the coordination-store tree.
//!
//! One function per line of spec §6's layout. Grounded in
//! `gridcentric/pancake/zookeeper/paths.py`, extended to the full tree this
//! spec requires (managers, endpoints, ip registration).

pub fn auth() -> String {
    "/auth".to_string()
}

pub fn public_url() -> String {
    "/url".to_string()
}

pub fn config() -> String {
    "/config".to_string()
}

pub fn managers() -> String {
    "/managers".to_string()
}

pub fn manager_ips() -> String {
    "/managers/ips".to_string()
}

pub fn manager_ip(ip: &str) -> String {
    format!("/managers/ips/{}", ip)
}

pub fn manager_configs() -> String {
    "/managers/configs".to_string()
}

pub fn manager_config(uuid: &str) -> String {
    format!("/managers/configs/{}", uuid)
}

pub fn manager_keys() -> String {
    "/managers/keys".to_string()
}

pub fn manager_key(uuid: &str) -> String {
    format!("/managers/keys/{}", uuid)
}

pub fn manager_metrics() -> String {
    "/managers/metrics".to_string()
}

pub fn manager_metric(uuid: &str) -> String {
    format!("/managers/metrics/{}", uuid)
}

pub fn endpoints() -> String {
    "/endpoints".to_string()
}

pub fn endpoint(name: &str) -> String {
    format!("/endpoints/{}", name)
}

pub fn endpoint_state(name: &str) -> String {
    format!("/endpoints/{}/state", name)
}

pub fn endpoint_manager(name: &str) -> String {
    format!("/endpoints/{}/manager", name)
}

pub fn confirmed_ips(name: &str) -> String {
    format!("/endpoints/{}/confirmed_ip", name)
}

pub fn confirmed_ip(name: &str, ip: &str) -> String {
    format!("/endpoints/{}/confirmed_ip/{}", name, ip)
}

pub fn marked_instances(name: &str) -> String {
    format!("/endpoints/{}/marked", name)
}

pub fn marked_instance(name: &str, instance_id: &str) -> String {
    format!("/endpoints/{}/marked/{}", name, instance_id)
}

pub fn decommissioned_instances(name: &str) -> String {
    format!("/endpoints/{}/decommissioned", name)
}

pub fn decommissioned_instance(name: &str, instance_id: &str) -> String {
    format!("/endpoints/{}/decommissioned/{}", name, instance_id)
}

pub fn instances(name: &str) -> String {
    format!("/endpoints/{}/instances", name)
}

pub fn instance(name: &str, instance_id: &str) -> String {
    format!("/endpoints/{}/instances/{}", name, instance_id)
}

pub fn metrics_live(name: &str) -> String {
    format!("/endpoints/{}/metrics/live", name)
}

pub fn metrics_custom(name: &str) -> String {
    format!("/endpoints/{}/metrics/custom", name)
}

pub fn metrics_ip(name: &str, ip: &str) -> String {
    format!("/endpoints/{}/metrics/ip/{}", name, ip)
}

pub fn log(name: &str) -> String {
    format!("/endpoints/{}/log", name)
}

pub fn sessions(name: &str) -> String {
    format!("/endpoints/{}/sessions", name)
}

pub fn session(name: &str, client: &str) -> String {
    format!("/endpoints/{}/sessions/{}", name, client)
}

pub fn new_ips() -> String {
    "/ips/new".to_string()
}

pub fn new_ip(ip: &str) -> String {
    format!("/ips/new/{}", ip)
}

pub fn drop_ips() -> String {
    "/ips/drop".to_string()
}

pub fn drop_ip(ip: &str) -> String {
    format!("/ips/drop/{}", ip)
}

pub fn ip_assoc(ip: &str) -> String {
    format!("/ips/assoc/{}", ip)
}

/// Extract the last path segment (e.g. the child name from a `list_children`
/// result joined back onto its parent).
pub fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths_nest_under_the_endpoint() {
        assert_eq!(confirmed_ip("web", "10.0.0.1"), "/endpoints/web/confirmed_ip/10.0.0.1");
        assert!(confirmed_ip("web", "10.0.0.1").starts_with(&confirmed_ips("web")));
    }

    #[test]
    fn leaf_extracts_last_segment() {
        assert_eq!(leaf("/endpoints/web/confirmed_ip/10.0.0.1"), "10.0.0.1");
        assert_eq!(leaf("solo"), "solo");
    }
}
