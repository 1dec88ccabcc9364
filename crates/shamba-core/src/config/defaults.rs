//! Default values for config fields, referenced by serde attributes.

pub(super) fn default_name() -> String {
    "shamba".to_string()
}

pub(super) fn default_data_dir() -> String {
    "~/.shamba".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_db_path() -> String {
    "~/.shamba/data/shamba.db".to_string()
}

pub(super) fn default_gateway_base_url() -> String {
    "https://api.textbee.dev/api/v1".to_string()
}

pub(super) fn default_gateway_timeout() -> u64 {
    30
}

pub(super) fn default_bulk_delay_ms() -> u64 {
    300
}

pub(super) fn default_prices_timeout() -> u64 {
    10
}

pub(super) fn default_webhook_skew() -> u64 {
    300
}

pub(super) fn default_poll_interval() -> u64 {
    60
}

pub(super) fn default_fetch_limit() -> u32 {
    50
}

pub(super) fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

pub(super) fn default_api_port() -> u16 {
    8090
}

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_system_senders() -> Vec<String> {
    crate::classify::DEFAULT_SYSTEM_SENDERS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(super) fn default_system_keywords() -> Vec<String> {
    crate::classify::DEFAULT_SYSTEM_KEYWORDS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
