use reactor_config::{load_endpoint, load_manager_config};

#[test]
fn loads_endpoint_with_rules_and_static_ips() {
    let json = r#"{
        "url": "http://svc.example.com/",
        "cloud": "local",
        "min_instances": 2,
        "max_instances": 10,
        "ramp_limit": 2,
        "mark_maximum": 4,
        "rules": [{"metric": "rate", "op": ">", "value": 100.0}],
        "static_ips": ["10.0.0.9"],
        "enabled": true,
        "public": true
    }"#;

    let endpoint = load_endpoint("web", json).expect("should load without error");
    assert_eq!(endpoint.url, "http://svc.example.com/");
    assert_eq!(endpoint.rules.len(), 1);
    assert_eq!(endpoint.static_ips, vec!["10.0.0.9".to_string()]);
}

#[test]
fn rejects_malformed_json() {
    assert!(load_endpoint("web", "not json").is_err());
}

#[test]
fn manager_config_merges_global_and_local() {
    let config = load_manager_config(Some(r#"{"keys": 48}"#), Some(r#"{"health_check": 20}"#))
        .expect("should merge without error");
    assert_eq!(config.keys, 48);
    assert_eq!(config.health_check_secs, 20);
}
