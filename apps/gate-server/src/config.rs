//! Application configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use bulwark_infra::{PriceTable, RedisConfig};

/// Where the tunable thresholds come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsSourceKind {
    /// `GUARD_*` environment variables.
    Env,
    /// JSON document in the admin settings store.
    Redis,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub redis: RedisConfig,
    pub settings_source: SettingsSourceKind,
    pub settings_cache_ttl: Duration,
    pub global_admission_enabled: bool,
    pub prices: PriceTable,
    /// Cap on store-failure log lines per minute.
    pub anomaly_logs_per_minute: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let settings_source = match env::var("SETTINGS_SOURCE").as_deref() {
            Ok("redis") => SettingsSourceKind::Redis,
            _ => SettingsSourceKind::Env,
        };

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            redis: RedisConfig::from_env(),
            settings_source,
            settings_cache_ttl: Duration::from_secs(
                env::var("SETTINGS_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            global_admission_enabled: env::var("GLOBAL_ADMISSION_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            prices: PriceTable::from_env(),
            anomaly_logs_per_minute: env::var("ANOMALY_LOGS_PER_MINUTE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        }
    }
}
