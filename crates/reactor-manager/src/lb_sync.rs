//! Driving the load-balancer contract (spec §4.7) from the coordination
//! store: the backend set for a URL is the union of `confirmed_ips ∪
//! static_ips` across every endpoint sharing that URL's key (§3 invariant,
//! scenario 6 "URL coalescing").

use reactor_domain::Endpoint;
use reactor_lb::{Backend, LbDriver};
use reactor_store::{paths, CoordinationStore};
use tracing::{debug, warn};

use crate::context::ManagerContext;
use crate::error::ManagerError;

fn derive_port(endpoint: &Endpoint) -> u16 {
    if endpoint.port != 0 {
        return endpoint.port;
    }
    if endpoint.url.starts_with("https://") {
        443
    } else {
        80
    }
}

/// Recompute and install the backend set for every endpoint sharing
/// `endpoint`'s URL key, across every load-balancer driver any of them
/// names. Idempotent: installing the same set twice in a row is a no-op at
/// the driver boundary (§4.7's contract requirement).
pub async fn refresh(ctx: &ManagerContext, endpoint: &Endpoint, all_endpoints: &[Endpoint]) -> Result<(), ManagerError> {
    let key = endpoint.key();
    let siblings: Vec<&Endpoint> = all_endpoints.iter().filter(|e| e.enabled && e.key() == key).collect();
    if siblings.is_empty() {
        return Ok(());
    }

    let mut backends = Vec::new();
    let mut names = Vec::new();
    let mut driver_names = std::collections::HashSet::new();

    for sibling in &siblings {
        names.push(sibling.name.0.clone());
        driver_names.extend(sibling.loadbalancer.iter().cloned());

        let confirmed = ctx.store.list_children(&paths::confirmed_ips(&sibling.name.0)).await?;
        for ip in confirmed.into_iter().chain(sibling.static_ips.clone()) {
            backends.push(Backend { ip, port: derive_port(sibling), weight: 1 });
        }
    }
    backends.sort_by(|a, b| a.ip.cmp(&b.ip));
    backends.dedup_by(|a, b| a.ip == b.ip);

    let port = derive_port(endpoint);
    let url = endpoint.url.clone();

    for driver in matching_drivers(ctx, &driver_names) {
        if let Err(err) = driver.change(&url, port, &names, &backends).await {
            warn!(driver = driver.name(), url = %url, error = %err, "load balancer change() failed, will retry next tick");
            continue;
        }
        if let Err(err) = driver.save().await {
            warn!(driver = driver.name(), url = %url, error = %err, "load balancer save() failed, will retry next tick");
        }
    }
    debug!(url = %url, backends = backends.len(), endpoints = names.len(), "refreshed load balancer");
    Ok(())
}

fn matching_drivers<'a>(ctx: &'a ManagerContext, names: &std::collections::HashSet<String>) -> Vec<&'a dyn LbDriver> {
    ctx.loadbalancers
        .iter()
        .filter(|d| names.contains(d.name()))
        .map(|d| d.as_ref())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reactor_config::ManagerConfig;
    use reactor_domain::EndpointName;
    use reactor_driver::DriverRegistry;
    use reactor_lb::NullLb;
    use reactor_store::InMemoryStore;

    use super::*;

    fn test_endpoint(name: &str, url: &str, static_ips: &[&str]) -> Endpoint {
        Endpoint {
            name: EndpointName::new(name),
            url: url.to_string(),
            port: 0,
            cloud: "local".to_string(),
            cloud_config: serde_json::json!({}),
            loadbalancer: vec!["null".to_string()],
            min_instances: 0,
            max_instances: 1,
            ramp_limit: 1,
            mark_maximum: 3,
            rules: vec![],
            source: None,
            static_ips: static_ips.iter().map(|s| s.to_string()).collect(),
            enabled: true,
            public: true,
        }
    }

    fn test_ctx(lb: Arc<NullLb>) -> ManagerContext {
        ManagerContext::new(
            reactor_domain::ManagerId::new(),
            "127.0.0.1".to_string(),
            Arc::new(InMemoryStore::new()),
            Arc::new(DriverRegistry::new()),
            vec![lb as Arc<dyn LbDriver>],
            ManagerConfig::default(),
        )
    }

    #[tokio::test]
    async fn refresh_unions_static_ips_across_siblings_sharing_a_url() {
        let lb = Arc::new(NullLb::new());
        let ctx = test_ctx(lb.clone());

        let endpoints = vec![
            test_endpoint("web-a", "http://shared/", &["10.0.0.1"]),
            test_endpoint("web-b", "http://shared/", &["10.0.0.2"]),
        ];

        refresh(&ctx, &endpoints[0], &endpoints).await.unwrap();

        let mut backends = lb.installed_backends("http://shared/");
        backends.sort_by(|a, b| a.ip.cmp(&b.ip));
        assert_eq!(backends.iter().map(|b| b.ip.as_str()).collect::<Vec<_>>(), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn refresh_skips_disabled_siblings() {
        let lb = Arc::new(NullLb::new());
        let ctx = test_ctx(lb.clone());

        let mut disabled = test_endpoint("web-b", "http://shared/", &["10.0.0.2"]);
        disabled.enabled = false;
        let endpoints = vec![test_endpoint("web-a", "http://shared/", &["10.0.0.1"]), disabled];

        refresh(&ctx, &endpoints[0], &endpoints).await.unwrap();

        let backends = lb.installed_backends("http://shared/");
        assert_eq!(backends.iter().map(|b| b.ip.as_str()).collect::<Vec<_>>(), vec!["10.0.0.1"]);
    }

    #[test]
    fn derive_port_falls_back_to_url_scheme() {
        let http = test_endpoint("a", "http://x/", &[]);
        let https = test_endpoint("b", "https://x/", &[]);
        assert_eq!(derive_port(&http), 80);
        assert_eq!(derive_port(&https), 443);
    }
}
