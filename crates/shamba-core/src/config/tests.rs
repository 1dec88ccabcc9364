use super::*;

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.shamba.name, "shamba");
    assert_eq!(config.gateway.base_url, "https://api.textbee.dev/api/v1");
    assert_eq!(config.gateway.timeout_secs, 30);
    assert_eq!(config.gateway.bulk_delay_ms, 300);
    assert_eq!(config.webhook.max_skew_secs, 300);
    assert!(config.polling.enabled);
    assert_eq!(config.polling.interval_secs, 60);
    assert!(config.webhook.secret.is_empty());
    assert!(config.prices.base_url.is_empty());
    assert_eq!(config.prices.timeout_secs, 10);
    assert!(!config.classifier.system_senders.is_empty());
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let toml_str = r#"
        [gateway]
        device_id = "dev123"
        api_key = "key456"

        [polling]
        interval_secs = 15
    "#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.gateway.device_id, "dev123");
    assert_eq!(config.gateway.api_key, "key456");
    assert_eq!(config.gateway.timeout_secs, 30, "untouched field keeps default");
    assert_eq!(config.polling.interval_secs, 15);
    assert_eq!(config.polling.fetch_limit, 50);
}

#[test]
fn test_classifier_config_from_toml() {
    let toml_str = r#"
        [classifier]
        self_number = "254700000001"
        system_senders = ["safaricom", "custom-carrier"]
    "#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.classifier.self_number, "254700000001");
    assert_eq!(config.classifier.system_senders.len(), 2);
    // Keywords fall back to defaults when not listed.
    assert!(!config.classifier.system_keywords.is_empty());
}

#[test]
fn test_shellexpand_home() {
    std::env::set_var("HOME", "/home/tester");
    assert_eq!(shellexpand("~/x/db.sqlite"), "/home/tester/x/db.sqlite");
    assert_eq!(shellexpand("/abs/path"), "/abs/path");
}
