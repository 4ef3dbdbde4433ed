//! The metric fusion pipeline (spec §2 data flow / §4.4): pull each
//! load-balancer driver's per-host metrics, attribute hosts to the endpoint
//! that owns their IP, publish this manager's local observations keyed by
//! endpoint key, then — for each owned endpoint — read every manager's
//! published observations back and fuse them into the vector the reconciler
//! sees.

use std::collections::HashMap;

use reactor_domain::{Endpoint, EndpointKey};
use reactor_lb::merge_host_metrics;
use reactor_metrics::{fuse_samples, Sample};
use reactor_store::{paths, CoordinationStore};
use tracing::warn;

use crate::context::ManagerContext;
use crate::error::ManagerError;

/// Pull every configured load-balancer driver's metrics, merge them by host,
/// then attribute each host to the endpoint that owns its IP (`/ips/assoc`)
/// and publish the per-key result as this manager's ephemeral observation.
/// A host with no recorded association is dropped — it belongs to no
/// endpoint this control plane tracks yet.
pub async fn publish_local_observations(ctx: &ManagerContext) -> Result<(), ManagerError> {
    let mut all_host_metrics = Vec::with_capacity(ctx.loadbalancers.len());
    for lb in &ctx.loadbalancers {
        match lb.metrics().await {
            Ok(m) => all_host_metrics.push(m),
            Err(err) => warn!(driver = lb.name(), error = %err, "load balancer metrics() failed, skipping"),
        }
    }
    let merged = merge_host_metrics(all_host_metrics);

    let mut by_key: HashMap<String, Vec<Sample>> = HashMap::new();
    for (host, metrics) in merged {
        let ip = host.split(':').next().unwrap_or(&host);
        let Some(endpoint_name) = ctx.store.read(&paths::ip_assoc(ip)).await? else {
            continue;
        };
        let Some(endpoint_json) = ctx.store.read(&paths::endpoint(&endpoint_name)).await? else {
            continue;
        };
        let Ok(endpoint) = reactor_config::load_endpoint(&endpoint_name, &endpoint_json) else {
            continue;
        };
        by_key.entry(endpoint.key().0).or_default().push(metrics);
    }

    let payload = serde_json::to_string(&by_key)?;
    ctx.store.write_ephemeral(&paths::manager_metric(&ctx.id.to_string()), &payload).await?;
    Ok(())
}

/// Fuse the samples every manager has published for `endpoint`'s key (or its
/// `source` endpoint's key, if configured) plus any operator-supplied
/// override at `/endpoints/<name>/metrics/custom`, and persist the result at
/// `/endpoints/<name>/metrics/live` for the reconciler (and any other reader)
/// to consume.
pub async fn fuse_for_endpoint(ctx: &ManagerContext, endpoint: &Endpoint, all_endpoints: &[Endpoint]) -> Result<Vec<Sample>, ManagerError> {
    let key = source_key(endpoint, all_endpoints);

    let manager_uuids = ctx.store.list_children(&paths::manager_keys()).await?;
    let mut sources = Vec::new();
    for uuid in manager_uuids {
        let Some(raw) = ctx.store.read(&paths::manager_metric(&uuid)).await? else {
            continue;
        };
        let Ok(by_key) = serde_json::from_str::<HashMap<String, Vec<Sample>>>(&raw) else {
            continue;
        };
        if let Some(samples) = by_key.get(key.as_str()) {
            sources.push(samples.clone());
        }
    }
    let mut fused = fuse_samples(sources);

    if let Some(custom) = ctx.store.read(&paths::metrics_custom(&endpoint.name.0)).await? {
        if let Ok(sample) = serde_json::from_str::<Sample>(&custom) {
            fused.push(sample);
        }
    }

    let payload = serde_json::to_string(&fused)?;
    ctx.store.write_ephemeral(&paths::metrics_live(&endpoint.name.0), &payload).await?;
    Ok(fused)
}

fn source_key(endpoint: &Endpoint, all_endpoints: &[Endpoint]) -> EndpointKey {
    match &endpoint.source {
        Some(source_name) => all_endpoints
            .iter()
            .find(|e| e.name.as_str() == source_name)
            .map(|e| e.key())
            .unwrap_or_else(|| endpoint.key()),
        None => endpoint.key(),
    }
}
