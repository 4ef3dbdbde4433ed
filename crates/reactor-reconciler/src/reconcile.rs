//! Per-endpoint reconciliation: the scaling tick (§4.2/§4.3) and the
//! health-check housekeeping pass (§4.5). Both are pure functions over a
//! [`TickInput`] snapshot so they can be unit tested without a live store or
//! driver; the caller (reactor-manager) is responsible for gathering the
//! snapshot and applying the resulting [`ReconcileReport`].

use reactor_domain::{Instance, MarkLabel, Rule};
use reactor_metrics::{ideal_range, Sample};
use tracing::debug;

use crate::report::{Change, ReconcileReport, TickInput};

/// Intersect the rule-driven ideal range with the endpoint's configured
/// `[min_instances, max_instances]` bound, per spec §4.3's exact branch
/// table. A conflicting ideal range (`ideal_max < ideal_min`, meaning two
/// rules disagree) is passed straight through — the caller must compare
/// `target_min > target_max` and hold steady rather than act on it.
pub fn target_range(
    rules: &[Rule],
    samples: &[Sample],
    observed_instances: u32,
    config_min: u32,
    config_max: u32,
) -> (i64, i64) {
    let (ideal_min, ideal_max) = ideal_range(rules, samples, observed_instances);
    if ideal_max < ideal_min {
        return (ideal_min, ideal_max);
    }

    let config_min = config_min as i64;
    let config_max = config_max as i64;

    let mut target_min = ideal_min.max(config_min);
    let mut target_max = ideal_max.min(config_max);

    if target_max < target_min {
        if ideal_min > config_max {
            // More instances required than the configured maximum allows.
            target_min = config_max;
            target_max = config_max;
        } else {
            // Fewer instances required than the configured minimum allows.
            target_min = config_min;
            target_max = config_min;
        }
    }

    (target_min, target_max)
}

/// The number of instances to launch and the instances (most-recently
/// created first) to decommission this tick, bounded by `ramp_limit`
/// combined actions. `live_instances` must be ordered by creation time
/// ascending (the cloud driver contract's guarantee) — decommissioning pops
/// from the tail, so the newest instances are shed first when scaling down.
pub fn plan_scaling<'a>(
    live_instances: &'a [Instance],
    target_min: i64,
    target_max: i64,
    ramp_limit: u32,
) -> (u32, Vec<&'a Instance>) {
    let num_instances = live_instances.len() as i64;

    let target = if (num_instances >= target_min && num_instances <= target_max)
        || target_min > target_max
    {
        num_instances
    } else {
        (target_min + target_max) / 2
    };

    let mut launches = 0u32;
    let mut remaining = num_instances;
    while remaining < target && launches < ramp_limit {
        remaining += 1;
        launches += 1;
    }

    let mut decommission = Vec::new();
    let mut remaining = num_instances;
    let mut actions = launches;
    while target < remaining && actions < ramp_limit {
        let idx = (remaining - 1) as usize;
        decommission.push(&live_instances[idx]);
        remaining -= 1;
        actions += 1;
    }

    (launches, decommission)
}

/// The scaling half of a tick: compute the target range from fused metric
/// samples and the endpoint's config bounds, then emit `Launch`/
/// `Decommission` changes up to `ramp_limit`.
pub fn scaling_tick(
    rules: &[Rule],
    input: &TickInput,
    config_min: u32,
    config_max: u32,
    ramp_limit: u32,
) -> ReconcileReport {
    let live: Vec<Instance> = input
        .all_instances
        .iter()
        .filter(|i| !input.decommissioned_ids.contains(&i.id.0))
        .cloned()
        .collect();

    let num_confirmed = input.confirmed_ips.len() as u32;
    let (target_min, target_max) = target_range(rules, &input.samples, num_confirmed, config_min, config_max);
    let (launches, decommission) = plan_scaling(&live, target_min, target_max, ramp_limit);

    debug!(launches, decommissions = decommission.len(), target_min, target_max, "scaling_tick");

    let mut report = ReconcileReport::new();
    for _ in 0..launches {
        report.changes.push(Change::Launch);
    }
    for instance in &decommission {
        report.changes.push(Change::Decommission {
            instance_id: instance.id.0.clone(),
            reason: format!("bringing instance total down to target range [{}, {}]", target_min, target_max),
        });
    }
    if !decommission.is_empty() {
        report.changes.push(Change::RefreshLoadBalancer);
    }
    report
}

/// The housekeeping half of a tick, run against `active_ips` reported by the
/// load balancer (§4.5, four numbered steps):
///
/// 1. Prune marked/decommissioned records for instances the cloud no longer
///    reports at all.
/// 2. Mark live instances whose addresses don't intersect the confirmed-IP
///    set; decommission once the `unregistered` mark hits threshold.
/// 3. Drop confirmed IPs with no backing live instance (orphaned confirmed
///    IPs), triggering a load-balancer refresh.
/// 4. Mark decommissioned instances absent from `active_ips`; delete once
///    the `decommissioned` mark hits threshold.
pub fn health_check(input: &TickInput) -> ReconcileReport {
    let mut report = ReconcileReport::new();

    let known_ids: std::collections::HashSet<&str> =
        input.all_instances.iter().map(|i| i.id.0.as_str()).collect();

    for id in input.marked.keys() {
        if !known_ids.contains(id.as_str()) {
            report.changes.push(Change::PruneOrphan { instance_id: id.clone() });
        }
    }
    for id in &input.decommissioned_ids {
        if !known_ids.contains(id.as_str()) {
            report.changes.push(Change::PruneOrphan { instance_id: id.clone() });
        }
    }

    let mut associated_confirmed_ips = std::collections::HashSet::new();
    let mut dead_instances = Vec::new();

    for instance in &input.all_instances {
        if input.decommissioned_ids.contains(&instance.id.0) {
            continue;
        }
        let expected: std::collections::HashSet<&str> =
            instance.addresses.iter().map(String::as_str).collect();
        let confirmed: std::collections::HashSet<&str> =
            input.confirmed_ips.iter().map(String::as_str).collect();
        let matched: Vec<&str> = expected.intersection(&confirmed).copied().collect();

        if matched.is_empty() {
            let mut counters = input.marked.get(&instance.id.0).cloned().unwrap_or_default();
            let threshold = input.mark_maximum.max(1);
            if counters.increment(MarkLabel::Unregistered, threshold) {
                dead_instances.push(instance.clone());
            } else {
                let count = counters.0.get(&MarkLabel::Unregistered).copied().unwrap_or(0);
                report.changes.push(Change::Mark { instance_id: instance.id.0.clone(), label: "unregistered", count });
            }
        } else {
            associated_confirmed_ips.extend(matched.into_iter().map(str::to_string));
        }
    }

    let orphaned_confirmed_ips: Vec<&String> = input
        .confirmed_ips
        .iter()
        .filter(|ip| !associated_confirmed_ips.contains(ip.as_str()))
        .collect();
    for ip in &orphaned_confirmed_ips {
        report.changes.push(Change::DropIp { ip: (*ip).clone() });
    }
    if !orphaned_confirmed_ips.is_empty() {
        report.changes.push(Change::RefreshLoadBalancer);
    }

    for instance in &dead_instances {
        report.changes.push(Change::Decommission {
            instance_id: instance.id.0.clone(),
            reason: "instance has been marked for destruction".to_string(),
        });
    }
    if !dead_instances.is_empty() {
        report.changes.push(Change::RefreshLoadBalancer);
    }

    for id in &input.decommissioned_ids {
        let Some(instance) = input.all_instances.iter().find(|i| &i.id.0 == id) else { continue };
        let inactive = instance.addresses.iter().all(|addr| !input.active_ips.contains(addr));
        if inactive {
            let mut counters = input.marked.get(id).cloned().unwrap_or_default();
            let threshold = input.mark_maximum.max(1);
            if counters.increment(MarkLabel::Decommissioned, threshold) {
                report.changes.push(Change::Delete { instance_id: id.clone() });
            } else {
                let count = counters.0.get(&MarkLabel::Decommissioned).copied().unwrap_or(0);
                report.changes.push(Change::Mark { instance_id: id.clone(), label: "decommissioned", count });
            }
        }
    }

    report
}

/// IP registration (§4.6): given a newly-seen IP and the owned endpoints'
/// current cloud address lists, find the first matching endpoint. Ties
/// (an IP matching more than one endpoint's address list, which can happen
/// transiently during endpoint reconfiguration) are broken by the
/// lexicographically smaller endpoint name — this is Open Question (c)'s
/// resolution, chosen for determinism across managers observing the same
/// inputs in a different order.
pub fn match_new_ip<'a>(
    ip: &str,
    endpoint_addresses: impl IntoIterator<Item = (&'a str, &'a [String])>,
) -> Option<&'a str> {
    let mut candidates: Vec<&str> = endpoint_addresses
        .into_iter()
        .filter(|(_, addrs)| addrs.iter().any(|a| a == ip))
        .map(|(name, _)| name)
        .collect();
    candidates.sort_unstable();
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use reactor_domain::InstanceId;
    use std::collections::{HashMap, HashSet};

    fn instance(id: &str, addrs: &[&str], age_secs: i64) -> Instance {
        Instance {
            id: InstanceId::new(id),
            name: id.to_string(),
            addresses: addrs.iter().map(|s| s.to_string()).collect(),
            created: Utc::now() - Duration::seconds(age_secs),
        }
    }

    fn sample(metric: &str, weight: f64, value: f64) -> Sample {
        let mut s = Sample::new();
        s.insert(metric.to_string(), (weight, value));
        s
    }

    #[test]
    fn no_rules_holds_steady_within_config_bounds() {
        let (min, max) = target_range(&[], &[], 3, 1, 5);
        assert_eq!((min, max), (1, 5));
    }

    #[test]
    fn ideal_exceeding_config_max_clamps_to_config_max() {
        use reactor_domain::RuleOp;
        let rules = vec![Rule { metric: "rate".into(), op: RuleOp::GreaterThan, value: 100.0 }];
        let samples = vec![sample("rate", 1.0, 1000.0)];
        let (min, max) = target_range(&rules, &samples, 1, 1, 5);
        assert_eq!((min, max), (5, 5));
    }

    #[test]
    fn scaling_launches_up_to_ramp_limit() {
        let live: Vec<Instance> = vec![instance("i1", &["10.0.0.1"], 10)];
        let (launches, decommission) = plan_scaling(&live, 5, 10, 2);
        assert_eq!(launches, 2);
        assert!(decommission.is_empty());
    }

    #[test]
    fn scaling_decommissions_newest_instance_first() {
        let live: Vec<Instance> = vec![
            instance("old", &["10.0.0.1"], 100),
            instance("new", &["10.0.0.2"], 10),
        ];
        let (launches, decommission) = plan_scaling(&live, 0, 1, 5);
        assert_eq!(launches, 0);
        assert_eq!(decommission.len(), 1);
        assert_eq!(decommission[0].id.as_str(), "new");
    }

    #[test]
    fn within_range_holds_steady() {
        let live: Vec<Instance> = vec![instance("i1", &[], 10), instance("i2", &[], 10)];
        let (launches, decommission) = plan_scaling(&live, 1, 5, 3);
        assert_eq!(launches, 0);
        assert!(decommission.is_empty());
    }

    #[test]
    fn health_check_marks_instance_with_unconfirmed_address() {
        let input = TickInput {
            all_instances: vec![instance("i1", &["10.0.0.1"], 10)],
            decommissioned_ids: vec![],
            confirmed_ips: HashSet::new(),
            marked: HashMap::new(),
            samples: vec![],
            active_ips: HashSet::new(),
            mark_maximum: 3,
        };
        let report = health_check(&input);
        assert!(report
            .changes
            .iter()
            .any(|c| matches!(c, Change::Mark { instance_id, label, .. } if instance_id == "i1" && *label == "unregistered")));
    }

    #[test]
    fn health_check_decommissions_instance_past_mark_threshold() {
        let mut marked = HashMap::new();
        let mut counters = reactor_domain::MarkCounters::default();
        counters.increment(MarkLabel::Unregistered, 2);
        marked.insert("i1".to_string(), counters);

        let input = TickInput {
            all_instances: vec![instance("i1", &["10.0.0.1"], 10)],
            decommissioned_ids: vec![],
            confirmed_ips: HashSet::new(),
            marked,
            samples: vec![],
            active_ips: HashSet::new(),
            mark_maximum: 2,
        };
        let report = health_check(&input);
        assert!(report
            .changes
            .iter()
            .any(|c| matches!(c, Change::Decommission { instance_id, .. } if instance_id == "i1")));
    }

    #[test]
    fn health_check_drops_orphaned_confirmed_ip() {
        let mut confirmed = HashSet::new();
        confirmed.insert("10.0.0.9".to_string());

        let input = TickInput {
            all_instances: vec![instance("i1", &["10.0.0.1"], 10)],
            decommissioned_ids: vec![],
            confirmed_ips: confirmed,
            marked: HashMap::new(),
            samples: vec![],
            active_ips: HashSet::new(),
            mark_maximum: 3,
        };
        let report = health_check(&input);
        assert!(report
            .changes
            .iter()
            .any(|c| matches!(c, Change::DropIp { ip } if ip == "10.0.0.9")));
    }

    #[test]
    fn health_check_prunes_records_for_unknown_instance() {
        let mut marked = HashMap::new();
        marked.insert("ghost".to_string(), reactor_domain::MarkCounters::default());

        let input = TickInput {
            all_instances: vec![],
            decommissioned_ids: vec![],
            confirmed_ips: HashSet::new(),
            marked,
            samples: vec![],
            active_ips: HashSet::new(),
            mark_maximum: 3,
        };
        let report = health_check(&input);
        assert!(report
            .changes
            .iter()
            .any(|c| matches!(c, Change::PruneOrphan { instance_id } if instance_id == "ghost")));
    }

    #[test]
    fn health_check_deletes_inactive_decommissioned_instance_past_threshold() {
        let mut marked = HashMap::new();
        let mut counters = reactor_domain::MarkCounters::default();
        counters.increment(MarkLabel::Decommissioned, 2);
        marked.insert("i1".to_string(), counters);

        let input = TickInput {
            all_instances: vec![instance("i1", &["10.0.0.1"], 10)],
            decommissioned_ids: vec!["i1".to_string()],
            confirmed_ips: HashSet::new(),
            marked,
            samples: vec![],
            active_ips: HashSet::new(),
            mark_maximum: 2,
        };
        let report = health_check(&input);
        assert!(report
            .changes
            .iter()
            .any(|c| matches!(c, Change::Delete { instance_id } if instance_id == "i1")));
    }

    #[test]
    fn match_new_ip_picks_lexicographically_first_on_tie() {
        let addrs_a = vec!["10.0.0.1".to_string()];
        let addrs_b = vec!["10.0.0.1".to_string()];
        let endpoints = vec![("zebra", addrs_a.as_slice()), ("apple", addrs_b.as_slice())];
        assert_eq!(match_new_ip("10.0.0.1", endpoints), Some("apple"));
    }

    #[test]
    fn match_new_ip_none_when_no_endpoint_owns_it() {
        let addrs = vec!["10.0.0.1".to_string()];
        let endpoints = vec![("web", addrs.as_slice())];
        assert_eq!(match_new_ip("10.0.0.2", endpoints), None);
    }
}
