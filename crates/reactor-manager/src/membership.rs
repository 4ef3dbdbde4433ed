//! Ring membership (spec §4.1): publishing this manager's virtual keys and
//! reachable IP as ephemeral nodes, and rebuilding the ring from everyone
//! else's.

use reactor_domain::ManagerId;
use reactor_ring::{generate_virtual_keys, Ring, VirtualKey};
use reactor_store::{paths, CoordinationStore};
use tracing::info;

use crate::context::ManagerContext;
use crate::error::ManagerError;

/// Generate `keys` virtual nodes and publish them, plus this manager's
/// reachable IP, as ephemeral nodes tied to the store session. Ephemeral
/// publication is the ring's whole failure-detection mechanism: a crashed
/// manager's keys vanish with its session and every survivor re-derives
/// ownership without an election.
pub async fn join(ctx: &ManagerContext) -> Result<Vec<VirtualKey>, ManagerError> {
    let keys = generate_virtual_keys(ctx.config.keys);
    let joined = keys.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(",");

    ctx.store.write_ephemeral(&paths::manager_key(&ctx.id.to_string()), &joined).await?;
    ctx.store.write_ephemeral(&paths::manager_ip(&ctx.ip), &ctx.id.to_string()).await?;

    info!(manager = %ctx.id, keys = keys.len(), ip = %ctx.ip, "published ring membership");
    Ok(keys)
}

/// Release this manager's ephemeral membership nodes. Peers re-shard on
/// their next watch; cloud instances are left untouched.
pub async fn leave(ctx: &ManagerContext) -> Result<(), ManagerError> {
    ctx.store.release_ephemerals().await?;
    Ok(())
}

/// Rebuild the ring from every manager currently publishing keys. Managers
/// with an unparseable key list are skipped (data error) rather than
/// aborting the whole rebuild for every other manager.
pub async fn build_ring(store: &dyn CoordinationStore) -> Result<Ring, ManagerError> {
    let uuids = store.list_children(&paths::manager_keys()).await?;
    let mut members = Vec::with_capacity(uuids.len());

    for uuid in uuids {
        let Some(raw) = store.read(&paths::manager_key(&uuid)).await? else {
            continue;
        };
        let Ok(id) = uuid.parse::<uuid::Uuid>() else {
            tracing::warn!(uuid, "skipping manager with unparseable uuid");
            continue;
        };
        let keys: Vec<VirtualKey> = raw
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse::<VirtualKey>().ok())
            .collect();
        if keys.is_empty() {
            continue;
        }
        members.push((ManagerId(id), keys));
    }

    Ok(Ring::build(members))
}
