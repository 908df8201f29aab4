use super::*;

#[test]
fn default_hub_config_uses_constants() {
    let hub = HubConfig::default();
    assert_eq!(hub.chat_retention, constants::CHAT_RETENTION_LIMIT);
    assert_eq!(hub.claim_stale_secs, constants::CLAIM_STALE_SECS);
    assert_eq!(hub.default_lock_ttl_ms, constants::DEFAULT_LOCK_TTL_MS);
    assert!(hub.data_dir.is_none());
}

#[test]
fn default_keywords_are_lowercase() {
    let hub = HubConfig::default();
    assert!(hub
        .accomplishment_keywords
        .iter()
        .all(|k| k.to_lowercase() == *k));
    assert!(hub.accomplishment_keywords.contains(&"shipped".to_string()));
}

#[test]
fn test_config_is_in_memory() {
    let config = Config::for_tests();
    assert!(config.hub.data_dir.is_none());
    assert_eq!(config.api.port, 3000);
}
