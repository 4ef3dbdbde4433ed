#[cfg(test)]
mod tests {
    use crate::types::*;

    #[test]
    fn endpoint_key_is_stable_for_same_url() {
        let a = EndpointKey::from_url("https://example.com/api");
        let b = EndpointKey::from_url("https://example.com/api");
        assert_eq!(a, b);
    }

    #[test]
    fn endpoint_key_differs_for_different_urls() {
        let a = EndpointKey::from_url("https://example.com/api");
        let b = EndpointKey::from_url("https://example.com/other");
        assert_ne!(a, b);
    }

    #[test]
    fn run_state_default_and_running_are_active() {
        assert!(EndpointRunState::Default.is_active());
        assert!(EndpointRunState::Running.is_active());
        assert!(!EndpointRunState::Stopped.is_active());
        assert!(!EndpointRunState::Paused.is_active());
    }

    #[test]
    fn ip_state_allows_forward_transitions() {
        assert!(IpState::New.can_transition_to(IpState::Confirmed));
        assert!(IpState::Confirmed.can_transition_to(IpState::Active));
        assert!(IpState::Confirmed.can_transition_to(IpState::Orphaned));
        assert!(IpState::Active.can_transition_to(IpState::Orphaned));
        assert!(IpState::Orphaned.can_transition_to(IpState::Dropped));
    }

    #[test]
    fn ip_state_rejects_skipping_or_backward_transitions() {
        assert!(!IpState::New.can_transition_to(IpState::Active));
        assert!(!IpState::Dropped.can_transition_to(IpState::New));
        assert!(!IpState::Active.can_transition_to(IpState::New));
    }

    #[test]
    fn mark_counters_trigger_at_threshold_and_reset() {
        let mut marks = MarkCounters::default();
        assert!(!marks.increment(MarkLabel::Unregistered, 3));
        assert!(!marks.increment(MarkLabel::Unregistered, 3));
        assert!(marks.increment(MarkLabel::Unregistered, 3));
        assert_eq!(marks.0.get(&MarkLabel::Unregistered), None);
    }

    #[test]
    fn mark_counters_track_labels_independently() {
        let mut marks = MarkCounters::default();
        marks.increment(MarkLabel::Unregistered, 5);
        marks.increment(MarkLabel::Decommissioned, 5);
        assert_eq!(marks.0.get(&MarkLabel::Unregistered), Some(&1));
        assert_eq!(marks.0.get(&MarkLabel::Decommissioned), Some(&1));
    }
}
