mod defaults;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ShambaError;
use defaults::*;

/// Top-level Shamba configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub shamba: ShambaConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub prices: PricesConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShambaConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ShambaConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// SMS vendor gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    /// Vendor API key. `SHAMBA_SMS_API_KEY` overrides the file value.
    #[serde(default)]
    pub api_key: String,
    /// Registered device/operator id at the vendor.
    #[serde(default)]
    pub device_id: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
    /// Pause between recipients in a bulk send, to respect vendor throughput.
    #[serde(default = "default_bulk_delay_ms")]
    pub bulk_delay_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            api_key: String::new(),
            device_id: String::new(),
            timeout_secs: default_gateway_timeout(),
            bulk_delay_ms: default_bulk_delay_ms(),
        }
    }
}

/// Inbound classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Our own sending number, for self-loop detection.
    #[serde(default)]
    pub self_number: String,
    #[serde(default = "default_system_senders")]
    pub system_senders: Vec<String>,
    #[serde(default = "default_system_keywords")]
    pub system_keywords: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            self_number: String::new(),
            system_senders: default_system_senders(),
            system_keywords: default_system_keywords(),
        }
    }
}

/// Webhook verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for HMAC verification. Empty = verification skipped.
    /// `SHAMBA_WEBHOOK_SECRET` overrides the file value.
    #[serde(default)]
    pub secret: String,
    /// Maximum accepted age of a signed webhook, in seconds.
    #[serde(default = "default_webhook_skew")]
    pub max_skew_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            max_skew_secs: default_webhook_skew(),
        }
    }
}

/// Pull-polling fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_poll_interval(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

/// Message log store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Price platform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricesConfig {
    /// Base URL of the platform's price API. Empty = no price data, location
    /// queries answer "no data yet".
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_prices_timeout")]
    pub timeout_secs: u64,
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: default_prices_timeout(),
        }
    }
}

/// Operator HTTP surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Bearer token for operator endpoints. Empty = no auth (local-only use).
    #[serde(default)]
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
        }
    }
}

/// Expand `~` to the home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist. Secrets may be
/// overridden from the environment after the file is read.
pub fn load(path: &str) -> Result<Config, ShambaError> {
    let path = Path::new(path);
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ShambaError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| ShambaError::Config(format!("failed to parse config: {e}")))?
    } else {
        tracing::info!("Config file not found at {}, using defaults", path.display());
        Config::default()
    };

    if let Ok(key) = std::env::var("SHAMBA_SMS_API_KEY") {
        config.gateway.api_key = key;
    }
    if let Ok(secret) = std::env::var("SHAMBA_WEBHOOK_SECRET") {
        config.webhook.secret = secret;
    }

    Ok(config)
}
