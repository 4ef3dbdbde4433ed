use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::LbError;

/// One backend address the load balancer should forward to, plus its
/// relative share of traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct Backend {
    pub ip: String,
    pub port: u16,
    pub weight: u32,
}

/// `metric name -> (weight, value)` for a single host, as returned by
/// `LbDriver::metrics`. Fused with other drivers' results by weight-weighted
/// averaging per host.
pub type HostMetrics = HashMap<String, (f64, f64)>;

/// A load-balancer driver installs and tears down one URL → backend-set
/// mapping at a time and reports per-host traffic metrics back to the
/// metric calculator. Every method must be idempotent under repeated calls
/// with identical arguments.
#[async_trait]
pub trait LbDriver: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Drop every URL this driver currently manages.
    async fn clear(&self) -> Result<(), LbError>;

    /// Install or replace the backend set for `url`. An empty `backends`
    /// list removes the mapping (unless the driver has a configured
    /// fallback redirect).
    async fn change(
        &self,
        url: &str,
        port: u16,
        endpoint_names: &[String],
        backends: &[Backend],
    ) -> Result<(), LbError>;

    /// Flush pending `change`/`clear` calls to the underlying process,
    /// signalling a reload if the backend requires one.
    async fn save(&self) -> Result<(), LbError>;

    /// Per-host metrics accumulated since the last call.
    async fn metrics(&self) -> Result<HashMap<String, HostMetrics>, LbError>;

    /// Evict a sticky-session mapping for `client` on `backend`. Drivers
    /// without session affinity leave the default no-op.
    async fn drop_session(&self, _client: &str, _backend: &Backend) -> Result<(), LbError> {
        Ok(())
    }
}

/// Weight-weighted merge of several drivers' `metrics()` results by host,
/// per spec §4.7 ("metrics() results are merged by host with weight-weighted
/// averaging").
pub fn merge_host_metrics(
    all: impl IntoIterator<Item = HashMap<String, HostMetrics>>,
) -> HashMap<String, HostMetrics> {
    let mut merged: HashMap<String, HashMap<String, (f64, f64)>> = HashMap::new();

    for source in all {
        for (host, metrics) in source {
            let host_entry = merged.entry(host).or_default();
            for (metric, (weight, value)) in metrics {
                host_entry
                    .entry(metric)
                    .and_modify(|(w, v)| {
                        let total = *w + weight;
                        if total > 0.0 {
                            *v = (*v * *w + value * weight) / total;
                        }
                        *w = total;
                    })
                    .or_insert((weight, value));
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_averages_same_host_same_metric_by_weight() {
        let mut a = HashMap::new();
        let mut host_a = HostMetrics::new();
        host_a.insert("rate".into(), (1.0, 10.0));
        a.insert("10.0.0.1:80".to_string(), host_a);

        let mut b = HashMap::new();
        let mut host_b = HostMetrics::new();
        host_b.insert("rate".into(), (1.0, 30.0));
        b.insert("10.0.0.1:80".to_string(), host_b);

        let merged = merge_host_metrics(vec![a, b]);
        let (weight, value) = merged["10.0.0.1:80"]["rate"];
        assert_eq!(weight, 2.0);
        assert_eq!(value, 20.0);
    }

    #[test]
    fn merge_keeps_disjoint_hosts_separate() {
        let mut a = HashMap::new();
        a.insert("host-a".to_string(), HostMetrics::new());
        let mut b = HashMap::new();
        b.insert("host-b".to_string(), HostMetrics::new());

        let merged = merge_host_metrics(vec![a, b]);
        assert_eq!(merged.len(), 2);
    }
}
