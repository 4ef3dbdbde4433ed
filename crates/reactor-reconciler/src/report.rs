use std::collections::HashMap;

use reactor_domain::{Instance, MarkCounters};
use serde::{Deserialize, Serialize};

/// Everything a single endpoint tick needs, gathered by the caller from the
/// coordination store and the cloud/LB drivers before calling [`crate::reconcile::tick`].
/// Keeping this a plain data bag (rather than threading store/driver handles
/// into `reconcile`) keeps the scaling and health-check logic pure and
/// trivially testable.
#[derive(Debug, Clone)]
pub struct TickInput {
    /// Every instance the cloud driver reports for this endpoint, unfiltered.
    pub all_instances: Vec<Instance>,
    /// Ids the endpoint has already decommissioned (excluded from the active
    /// fleet but still billed until deleted).
    pub decommissioned_ids: Vec<String>,
    /// Confirmed IPs currently recorded for this endpoint.
    pub confirmed_ips: std::collections::HashSet<String>,
    /// Per-instance mark counters (`/endpoints/<name>/marked/<id>`).
    pub marked: HashMap<String, MarkCounters>,
    /// Fused, weight-averaged metric samples for this endpoint.
    pub samples: Vec<reactor_metrics::Sample>,
    /// `active_ips` as reported by the load balancer's connection tracking.
    pub active_ips: std::collections::HashSet<String>,
    /// Endpoint-level `mark_maximum` override, or the manager default.
    pub mark_maximum: u32,
}

/// One observation or action a tick decided on. Emitted in order; the caller
/// applies each against the coordination store / drivers and is free to stop
/// early on an error (§7: a failed action is retried on the next tick).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Change {
    /// Launch a new instance (cloud driver `start_instance`).
    Launch,
    /// Decommission a still-live instance (drains before deletion).
    Decommission { instance_id: String, reason: String },
    /// Ask the cloud driver to delete a decommissioned instance outright.
    Delete { instance_id: String },
    /// Drop a confirmed IP with no backing instance.
    DropIp { ip: String },
    /// Increment a per-instance mark counter (did not yet hit threshold).
    /// `count` is the new counter value to persist at
    /// `/endpoints/<name>/marked/<instance_id>`.
    Mark { instance_id: String, label: &'static str, count: u32 },
    /// Clear stale bookkeeping for an instance id the cloud no longer knows.
    PruneOrphan { instance_id: String },
    /// The load balancer's backend set for this endpoint needs updating.
    RefreshLoadBalancer,
}

/// Everything a tick decided to do, in application order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub changes: Vec<Change>,
}

impl ReconcileReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn needs_loadbalancer_refresh(&self) -> bool {
        self.changes.iter().any(|c| matches!(c, Change::RefreshLoadBalancer))
    }
}
