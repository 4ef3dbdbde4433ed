//! The manager loop (component G): hosts the ownership ring and drives
//! reconciliation for every endpoint this process currently owns. Watches
//! are delivered as [`StoreEvent`]s into a single-threaded event loop that
//! owns all mutable manager state (design note: "watches as callbacks"),
//! rather than mutated from a callback directly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use reactor_domain::Endpoint;
use reactor_ring::Ring;
use reactor_store::StoreEvent;
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::context::ManagerContext;
use crate::error::ManagerError;
use crate::{ip_registration, membership, metrics_pipeline, ownership, tick};

pub struct ManagerLoop {
    ctx: Arc<ManagerContext>,
    ring: Ring,
    /// Per-endpoint serialization, kept across ticks so a still-running tick
    /// causes the next clock firing to skip that endpoint rather than
    /// overlap it (§5 ordering).
    locks: HashMap<String, Arc<Mutex<()>>>,
    owned: HashSet<String>,
}

impl ManagerLoop {
    pub fn new(ctx: ManagerContext) -> Self {
        Self { ctx: Arc::new(ctx), ring: Ring::default(), locks: HashMap::new(), owned: HashSet::new() }
    }

    pub async fn run(mut self) -> Result<(), ManagerError> {
        membership::join(&self.ctx).await?;
        self.resync().await?;

        let mut ticker = tokio::time::interval(Duration::from_secs(self.ctx.config.health_check_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events = self.ctx.store.subscribe();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.run_tick_cycle().await {
                        warn!(error = %err, "tick cycle failed");
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(StoreEvent::SessionExpired) => self.handle_session_expired().await,
                        Ok(StoreEvent::ContentsChanged { path }) | Ok(StoreEvent::ChildrenChanged { path }) => {
                            if let Err(err) = self.handle_store_event(&path).await {
                                warn!(error = %err, path, "failed to handle store event");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "store event channel lagged, forcing a full resync");
                            if let Err(err) = self.resync().await {
                                warn!(error = %err, "resync after lag failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("store event channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        membership::leave(&self.ctx).await?;
        Ok(())
    }

    async fn resync(&mut self) -> Result<(), ManagerError> {
        self.ring = membership::build_ring(self.ctx.store.as_ref()).await?;
        info!(manager = %self.ctx.id, ring_size = self.ring.len(), "rebuilt ownership ring");
        self.run_tick_cycle().await
    }

    async fn handle_store_event(&mut self, path: &str) -> Result<(), ManagerError> {
        if path.starts_with("/managers") {
            self.ring = membership::build_ring(self.ctx.store.as_ref()).await?;
            info!(manager = %self.ctx.id, ring_size = self.ring.len(), "rebuilt ownership ring");
        }

        if is_resync_trigger(path) {
            self.run_tick_cycle().await
        } else if is_ip_registration_trigger(path) {
            let all_endpoints = ownership::load_all(self.ctx.store.as_ref()).await?;
            let states = self.run_states(&all_endpoints).await?;
            let owned = ownership::owned(&self.ring, &all_endpoints, &self.ctx.id, &states);
            ip_registration::process_pending(&self.ctx, &owned, &all_endpoints).await
        } else {
            Ok(())
        }
    }

    /// Session-fatal per §7: every ephemeral node this manager held is
    /// already gone. Unmanage everything, then reconnect with exponential
    /// backoff floored at the health-check interval.
    async fn handle_session_expired(&mut self) {
        warn!(manager = %self.ctx.id, "coordination session expired, unmanaging all endpoints");
        self.ring = Ring::default();
        self.owned.clear();
        self.locks.clear();

        let floor = Duration::from_secs(self.ctx.config.health_check_secs.max(1));
        let mut backoff = floor;
        loop {
            match membership::join(&self.ctx).await {
                Ok(_) => {
                    info!(manager = %self.ctx.id, "rejoined ring after session expiry");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, backoff_secs = backoff.as_secs(), "rejoin failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(300)).max(floor);
                }
            }
        }
        if let Err(err) = self.resync().await {
            warn!(error = %err, "resync after rejoin failed");
        }
    }

    async fn run_states(&self, endpoints: &[Endpoint]) -> Result<Vec<(String, reactor_domain::EndpointRunState)>, ManagerError> {
        let mut states = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let state = ownership::run_state(self.ctx.store.as_ref(), endpoint.name.as_str()).await?;
            states.push((endpoint.name.0.clone(), state));
        }
        Ok(states)
    }

    async fn run_tick_cycle(&mut self) -> Result<(), ManagerError> {
        if let Err(err) = metrics_pipeline::publish_local_observations(&self.ctx).await {
            warn!(error = %err, "publishing local metric observations failed");
        }

        let all_endpoints = ownership::load_all(self.ctx.store.as_ref()).await?;
        let states = self.run_states(&all_endpoints).await?;
        let owned: Vec<&Endpoint> = ownership::owned(&self.ring, &all_endpoints, &self.ctx.id, &states);
        let owned_names: Vec<String> = owned.iter().map(|e| e.name.0.clone()).collect();

        self.track_ownership_changes(&owned_names);

        if let Err(err) = ip_registration::process_pending(&self.ctx, &owned, &all_endpoints).await {
            warn!(error = %err, "ip registration pass failed");
        }

        let mut handles = Vec::with_capacity(owned.len());
        for endpoint in &owned {
            let endpoint = (*endpoint).clone();
            let all = all_endpoints.clone();
            let ctx = self.ctx.clone();
            let lock = self.locks.entry(endpoint.name.0.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();

            handles.push(tokio::spawn(async move {
                let Ok(_guard) = lock.try_lock() else {
                    debug!(endpoint = %endpoint.name, "previous tick still running, skipping this cycle");
                    return;
                };
                if let Err(err) = tick::run(&ctx, &endpoint, &all).await {
                    warn!(endpoint = %endpoint.name, error = %err, "tick failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        self.locks.retain(|name, _| owned_names.iter().any(|o| o == name));
        Ok(())
    }

    fn track_ownership_changes(&mut self, new_owned: &[String]) {
        let new_set: HashSet<String> = new_owned.iter().cloned().collect();
        for name in new_set.difference(&self.owned) {
            info!(endpoint = name, manager = %self.ctx.id, "now managing endpoint");
        }
        for name in self.owned.difference(&new_set) {
            info!(endpoint = name, manager = %self.ctx.id, "no longer managing endpoint, cloud instances left untouched");
        }
        self.owned = new_set;
    }
}

fn is_resync_trigger(path: &str) -> bool {
    path == "/managers"
        || path.starts_with("/managers/keys")
        || path.starts_with("/managers/ips")
        || path == "/endpoints"
        || (path.starts_with("/endpoints/") && (path.ends_with("/state") || path.matches('/').count() == 2))
}

fn is_ip_registration_trigger(path: &str) -> bool {
    path == "/ips/new" || path.starts_with("/ips/new/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resync_trigger_matches_endpoint_config_and_membership_paths() {
        assert!(is_resync_trigger("/endpoints/web"));
        assert!(is_resync_trigger("/endpoints/web/state"));
        assert!(is_resync_trigger("/managers/keys/u1"));
        assert!(!is_resync_trigger("/endpoints/web/metrics/live"));
        assert!(!is_resync_trigger("/endpoints/web/instances/i1"));
    }

    #[test]
    fn ip_registration_trigger_matches_new_ip_subtree() {
        assert!(is_ip_registration_trigger("/ips/new/10.0.0.1"));
        assert!(!is_ip_registration_trigger("/ips/drop/10.0.0.1"));
    }
}
