//! Gathering a [`TickInput`] snapshot for one endpoint and applying the
//! [`ReconcileReport`] it produces. The pure scaling/health-check math lives
//! in `reactor-reconciler`; everything here is I/O against the store and the
//! cloud/load-balancer drivers, kept separate so that logic stays testable
//! without either.

use std::collections::{HashMap, HashSet};

use reactor_domain::{Endpoint, Instance, MarkCounters};
use reactor_driver::StartParams;
use reactor_reconciler::{health_check, scaling_tick, Change, ReconcileReport, TickInput};
use reactor_store::{paths, CoordinationStore};
use tracing::{info, warn};

use crate::context::ManagerContext;
use crate::error::ManagerError;
use crate::lb_sync;
use crate::metrics_pipeline;

/// Read everything a tick needs for `endpoint` out of the store and the
/// endpoint's cloud driver. Best-effort per §4.8: a cloud driver error
/// surfaces here as [`ManagerError`] and the caller is expected to skip this
/// endpoint for the tick and retry on the next one.
pub async fn gather(ctx: &ManagerContext, endpoint: &Endpoint, all_endpoints: &[Endpoint]) -> Result<TickInput, ManagerError> {
    let driver = ctx.clouds.get(&endpoint.cloud)?;
    let all_instances = driver.list_instances(&endpoint.cloud_config).await?;

    let decommissioned_ids = ctx
        .store
        .list_children(&paths::decommissioned_instances(&endpoint.name.0))
        .await?;

    let confirmed_ips: HashSet<String> = ctx
        .store
        .list_children(&paths::confirmed_ips(&endpoint.name.0))
        .await?
        .into_iter()
        .collect();

    let mut marked = HashMap::new();
    for id in ctx.store.list_children(&paths::marked_instances(&endpoint.name.0)).await? {
        if let Some(raw) = ctx.store.read(&paths::marked_instance(&endpoint.name.0, &id)).await? {
            if let Ok(counters) = serde_json::from_str::<MarkCounters>(&raw) {
                marked.insert(id, counters);
            }
        }
    }

    let samples = metrics_pipeline::fuse_for_endpoint(ctx, endpoint, all_endpoints).await?;

    let mut active_ips = HashSet::new();
    for lb in ctx.loadbalancers.iter().filter(|d| endpoint.loadbalancer.iter().any(|n| n.as_str() == d.name())) {
        match lb.metrics().await {
            Ok(hosts) => active_ips.extend(hosts.keys().filter_map(|h| h.split(':').next().map(str::to_string))),
            Err(err) => warn!(driver = lb.name(), error = %err, "metrics() failed while gathering active_ips"),
        }
    }

    let mark_maximum = if endpoint.mark_maximum > 0 { endpoint.mark_maximum } else { ctx.config.mark_maximum };

    Ok(TickInput {
        all_instances,
        decommissioned_ids,
        confirmed_ips,
        marked,
        samples,
        active_ips,
        mark_maximum,
    })
}

/// Run the scaling half and the health-check half of a tick and apply both
/// reports' changes. Kept as two reports (rather than one merged pass)
/// because §4.2 and §4.5 are logically distinct steps that can fail and be
/// retried independently.
pub async fn run(ctx: &ManagerContext, endpoint: &Endpoint, all_endpoints: &[Endpoint]) -> Result<(), ManagerError> {
    let input = gather(ctx, endpoint, all_endpoints).await?;

    let scaling = scaling_tick(&endpoint.rules, &input, endpoint.min_instances, endpoint.max_instances, endpoint.ramp_limit.max(1));
    apply(ctx, endpoint, all_endpoints, &input, &scaling).await;

    let health = health_check(&input);
    apply(ctx, endpoint, all_endpoints, &input, &health).await;

    Ok(())
}

async fn apply(ctx: &ManagerContext, endpoint: &Endpoint, all_endpoints: &[Endpoint], input: &TickInput, report: &ReconcileReport) {
    let mut needs_refresh = false;

    for change in &report.changes {
        let result = apply_one(ctx, endpoint, input, change).await;
        if let Err(err) = result {
            warn!(endpoint = %endpoint.name, change = ?change, error = %err, "action failed, will retry next tick");
            continue;
        }
        if matches!(change, Change::RefreshLoadBalancer) {
            needs_refresh = true;
        }
    }

    if needs_refresh {
        if let Err(err) = lb_sync::refresh(ctx, endpoint, all_endpoints).await {
            warn!(endpoint = %endpoint.name, error = %err, "load balancer refresh failed, will retry next tick");
        }
    }
}

async fn apply_one(ctx: &ManagerContext, endpoint: &Endpoint, input: &TickInput, change: &Change) -> Result<(), ManagerError> {
    let name = endpoint.name.0.as_str();

    match change {
        Change::Launch => {
            let driver = ctx.clouds.get(&endpoint.cloud)?;
            let params = StartParams { endpoint_name: name.to_string(), config: endpoint.cloud_config.clone() };
            let instance = driver.start_instance(&params).await?;
            let payload = serde_json::to_string(&instance)?;
            ctx.store.write(&paths::instance(name, instance.id.as_str()), &payload).await?;
            info!(endpoint = name, instance = %instance.id, "launched instance");
        }
        Change::Decommission { instance_id, reason } => {
            let addresses: Vec<String> = input
                .all_instances
                .iter()
                .find(|i| &i.id.0 == instance_id)
                .map(|i: &Instance| i.addresses.clone())
                .unwrap_or_default();
            let payload = serde_json::to_string(&addresses)?;
            ctx.store.write(&paths::decommissioned_instance(name, instance_id), &payload).await?;
            info!(endpoint = name, instance = instance_id, reason, "decommissioned instance");
        }
        Change::Delete { instance_id } => {
            let driver = ctx.clouds.get(&endpoint.cloud)?;
            driver.delete_instance(&endpoint.cloud_config, instance_id).await?;
            ctx.store.delete(&paths::decommissioned_instance(name, instance_id)).await?;
            ctx.store.delete(&paths::marked_instance(name, instance_id)).await?;
            ctx.store.delete(&paths::instance(name, instance_id)).await?;
            info!(endpoint = name, instance = instance_id, "deleted instance");
        }
        Change::DropIp { ip } => {
            ctx.store.delete(&paths::confirmed_ip(name, ip)).await?;
            ctx.store.delete(&paths::ip_assoc(ip)).await?;
            info!(endpoint = name, ip, "dropped orphaned confirmed ip");
        }
        Change::Mark { instance_id, label, count } => {
            let path = paths::marked_instance(name, instance_id);
            let mut counters = match ctx.store.read(&path).await? {
                Some(raw) => serde_json::from_str::<MarkCounters>(&raw).unwrap_or_default(),
                None => MarkCounters::default(),
            };
            if let Some(label) = parse_label(label) {
                counters.0.insert(label, *count);
            }
            ctx.store.write_ephemeral(&path, &serde_json::to_string(&counters)?).await?;
        }
        Change::PruneOrphan { instance_id } => {
            ctx.store.delete(&paths::marked_instance(name, instance_id)).await?;
            ctx.store.delete(&paths::decommissioned_instance(name, instance_id)).await?;
        }
        Change::RefreshLoadBalancer => {}
    }
    Ok(())
}

fn parse_label(label: &str) -> Option<reactor_domain::MarkLabel> {
    match label {
        "unregistered" => Some(reactor_domain::MarkLabel::Unregistered),
        "decommissioned" => Some(reactor_domain::MarkLabel::Decommissioned),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reactor_config::ManagerConfig;
    use reactor_domain::{EndpointName, MarkLabel};
    use reactor_driver::{CloudDriver, DriverRegistry, LocalDriver};
    use reactor_lb::NullLb;
    use reactor_store::InMemoryStore;

    use super::*;

    fn test_endpoint() -> Endpoint {
        Endpoint {
            name: EndpointName::new("web"),
            url: "http://web/".to_string(),
            port: 0,
            cloud: "local".to_string(),
            cloud_config: serde_json::json!({}),
            loadbalancer: vec![],
            min_instances: 0,
            max_instances: 2,
            ramp_limit: 1,
            mark_maximum: 3,
            rules: vec![],
            source: None,
            static_ips: vec![],
            enabled: true,
            public: true,
        }
    }

    fn test_ctx(store: Arc<InMemoryStore>, local: Arc<LocalDriver>) -> ManagerContext {
        let mut clouds = DriverRegistry::new();
        clouds.register("local", local as Arc<dyn CloudDriver>);
        ManagerContext::new(
            reactor_domain::ManagerId::new(),
            "127.0.0.1".to_string(),
            store,
            Arc::new(clouds),
            vec![Arc::new(NullLb::new()) as Arc<dyn reactor_lb::LbDriver>],
            ManagerConfig::default(),
        )
    }

    fn empty_input() -> TickInput {
        TickInput {
            all_instances: vec![],
            decommissioned_ids: vec![],
            confirmed_ips: Default::default(),
            marked: Default::default(),
            samples: vec![],
            active_ips: Default::default(),
            mark_maximum: 3,
        }
    }

    #[tokio::test]
    async fn apply_launch_writes_the_new_instance_to_the_store() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = test_ctx(store.clone(), Arc::new(LocalDriver::new()));
        let endpoint = test_endpoint();
        let input = empty_input();

        apply_one(&ctx, &endpoint, &input, &Change::Launch).await.unwrap();

        let instances = store.list_children(&paths::instances("web")).await.unwrap();
        assert_eq!(instances.len(), 1);
    }

    #[tokio::test]
    async fn apply_mark_persists_an_incrementable_counter() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = test_ctx(store.clone(), Arc::new(LocalDriver::new()));
        let endpoint = test_endpoint();
        let input = empty_input();

        let change = Change::Mark { instance_id: "i1".to_string(), label: "unregistered", count: 1 };
        apply_one(&ctx, &endpoint, &input, &change).await.unwrap();

        let raw = store.read(&paths::marked_instance("web", "i1")).await.unwrap().unwrap();
        let counters: MarkCounters = serde_json::from_str(&raw).unwrap();
        assert_eq!(counters.0.get(&MarkLabel::Unregistered), Some(&1));
    }

    #[test]
    fn parse_label_rejects_unknown_strings() {
        assert_eq!(parse_label("unregistered"), Some(MarkLabel::Unregistered));
        assert_eq!(parse_label("bogus"), None);
    }
}
