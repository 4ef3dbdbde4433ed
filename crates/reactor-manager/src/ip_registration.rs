//! IP registration (spec §4.6): matching freshly-announced addresses to the
//! owned endpoint whose cloud fleet they belong to.

use reactor_domain::Endpoint;
use reactor_reconciler::match_new_ip;
use reactor_store::{paths, CoordinationStore};
use tracing::{debug, info, warn};

use crate::context::ManagerContext;
use crate::error::ManagerError;
use crate::lb_sync;

/// For every pending `/ips/new/<ip>` node, try to match it against the
/// cloud address list of each endpoint in `owned`. The first match (ties
/// broken lexicographically by endpoint name, Open Question (c)) promotes
/// the IP: confirmed, reverse-associated, and the pending marker removed.
/// Unmatched IPs are left pending for the next event.
pub async fn process_pending(ctx: &ManagerContext, owned: &[&Endpoint], all_endpoints: &[Endpoint]) -> Result<(), ManagerError> {
    let pending = ctx.store.list_children(&paths::new_ips()).await?;
    if pending.is_empty() {
        return Ok(());
    }

    let mut endpoint_addresses: Vec<(String, Vec<String>)> = Vec::with_capacity(owned.len());
    for endpoint in owned {
        let driver = match ctx.clouds.get(&endpoint.cloud) {
            Ok(d) => d,
            Err(err) => {
                warn!(endpoint = %endpoint.name, error = %err, "no cloud driver for endpoint, skipping ip match");
                continue;
            }
        };
        match driver.list_instances(&endpoint.cloud_config).await {
            Ok(instances) => {
                let addrs: Vec<String> = instances.into_iter().flat_map(|i| i.addresses).collect();
                endpoint_addresses.push((endpoint.name.0.clone(), addrs));
            }
            Err(err) => warn!(endpoint = %endpoint.name, error = %err, "list_instances failed while matching new ips"),
        }
    }

    for ip in pending {
        let candidates: Vec<(&str, &[String])> =
            endpoint_addresses.iter().map(|(name, addrs)| (name.as_str(), addrs.as_slice())).collect();

        let Some(matched_name) = match_new_ip(&ip, candidates) else {
            debug!(ip, "new ip matches no owned endpoint yet, leaving pending");
            continue;
        };

        ctx.store.write(&paths::confirmed_ip(matched_name, &ip), "").await?;
        ctx.store.write(&paths::ip_assoc(&ip), matched_name).await?;
        ctx.store.delete(&paths::new_ip(&ip)).await?;
        info!(ip, endpoint = matched_name, "confirmed new ip");

        if let Some(endpoint) = owned.iter().find(|e| e.name.as_str() == matched_name) {
            if let Err(err) = lb_sync::refresh(ctx, endpoint, all_endpoints).await {
                warn!(endpoint = matched_name, error = %err, "load balancer refresh after ip confirmation failed");
            }
        }
    }
    Ok(())
}
