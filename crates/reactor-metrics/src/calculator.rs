use std::collections::HashMap;

use reactor_domain::{Rule, RuleOp};

/// One backend's observation: `metric name -> (weight, value)`.
pub type Sample = HashMap<String, (f64, f64)>;

/// Concatenate sample lists from every manager before averaging. Fusion
/// across managers is pure concatenation — the weighting happens once, at
/// aggregation time, not per-source.
pub fn fuse_samples(sources: impl IntoIterator<Item = Vec<Sample>>) -> Vec<Sample> {
    sources.into_iter().flatten().collect()
}

/// Weight-weighted arithmetic mean of `metric` across every sample that
/// reports it. Returns `None` if no sample reports the metric at all (the
/// rule is then ignored, per spec §4.4).
fn weighted_mean(samples: &[Sample], metric: &str) -> Option<f64> {
    let (weighted_sum, weight_total) = samples
        .iter()
        .filter_map(|s| s.get(metric))
        .fold((0.0_f64, 0.0_f64), |(sum, total), (weight, value)| {
            (sum + weight * value, total + weight)
        });
    if weight_total <= 0.0 {
        None
    } else {
        Some(weighted_sum / weight_total)
    }
}

/// Evaluate `rules` against the fused per-backend `samples`, given
/// `observed_instances` (the current confirmed-IP count, per §4.2 step 2),
/// and return `(ideal_min, ideal_max)`.
///
/// A `metric > threshold` rule that is violated widens `ideal_min`
/// proportionally to how far the observed per-instance average exceeds the
/// threshold, scaled off `observed_instances` — the same "demand implies a
/// multiple of the current fleet" shape a target-tracking autoscaler uses.
/// A `metric < threshold` rule that is violated narrows `ideal_max`
/// symmetrically. Rules whose metric has no samples are ignored. Pure and
/// stateless: the same inputs always produce the same output.
pub fn ideal_range(rules: &[Rule], samples: &[Sample], observed_instances: u32) -> (i64, i64) {
    let mut ideal_min: i64 = 0;
    let mut ideal_max: i64 = i64::MAX;
    let observed = observed_instances as f64;

    for rule in rules {
        let Some(value) = weighted_mean(samples, &rule.metric) else {
            continue;
        };
        if rule.value <= 0.0 {
            continue;
        }
        let ratio = value / rule.value;

        match rule.op {
            RuleOp::GreaterThan if ratio > 1.0 => {
                let candidate = (observed.max(1.0) * ratio).ceil() as i64;
                ideal_min = ideal_min.max(candidate);
            }
            RuleOp::LessThan if ratio < 1.0 => {
                let candidate = (observed * ratio).floor() as i64;
                ideal_max = ideal_max.min(candidate);
            }
            _ => {}
        }
    }

    (ideal_min, ideal_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(metric: &str, weight: f64, value: f64) -> Sample {
        let mut s = Sample::new();
        s.insert(metric.to_string(), (weight, value));
        s
    }

    #[test]
    fn no_rules_yields_unconstrained_range() {
        let (min, max) = ideal_range(&[], &[], 0);
        assert_eq!(min, 0);
        assert_eq!(max, i64::MAX);
    }

    #[test]
    fn missing_metric_is_ignored() {
        let rules = vec![Rule { metric: "rate".into(), op: RuleOp::GreaterThan, value: 100.0 }];
        let (min, max) = ideal_range(&rules, &[sample("bytes", 1.0, 500.0)], 1);
        assert_eq!((min, max), (0, i64::MAX));
    }

    #[test]
    fn scale_up_rule_widens_ideal_min_when_violated() {
        let rules = vec![Rule { metric: "rate".into(), op: RuleOp::GreaterThan, value: 100.0 }];
        let samples = vec![sample("rate", 1.0, 400.0)];
        let (min, max) = ideal_range(&rules, &samples, 1);
        assert!(min > 1, "expected ideal_min to widen above current count, got {}", min);
        assert_eq!(max, i64::MAX);
    }

    #[test]
    fn scale_down_rule_narrows_ideal_max_when_violated() {
        let rules = vec![Rule { metric: "rate".into(), op: RuleOp::LessThan, value: 100.0 }];
        let samples = vec![sample("rate", 1.0, 10.0)];
        let (min, max) = ideal_range(&rules, &samples, 4);
        assert_eq!(min, 0);
        assert!(max < 4);
    }

    #[test]
    fn weighted_mean_averages_across_backends() {
        let rules = vec![Rule { metric: "rate".into(), op: RuleOp::GreaterThan, value: 100.0 }];
        let samples = vec![sample("rate", 1.0, 50.0), sample("rate", 1.0, 350.0)];
        // mean = (1*50 + 1*350) / 2 = 200, ratio 2.0 > 1.0 -> rule fires.
        let (min, _max) = ideal_range(&rules, &samples, 1);
        assert!(min >= 2);
    }

    #[test]
    fn fuse_concatenates_without_reaveraging() {
        let a = vec![sample("rate", 1.0, 10.0)];
        let b = vec![sample("rate", 1.0, 20.0)];
        let fused = fuse_samples(vec![a, b]);
        assert_eq!(fused.len(), 2);
    }
}
