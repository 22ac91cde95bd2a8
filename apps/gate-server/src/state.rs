//! Application state - shared across all handlers.

use std::sync::Arc;

use bulwark_core::StoreError;
use bulwark_core::ports::{AtomicStore, CostEstimator, SettingsSource, SystemClock};
use bulwark_core::services::Gatekeeper;
use bulwark_infra::{
    AnomalyCounters, CachedSettings, EnvSettingsSource, InMemoryStore, RandomTokenGenerator,
    RedisSettingsSource, RedisStore, ThrottledAnomalySink, TokenPriceEstimator,
};

use crate::config::{AppConfig, SettingsSourceKind};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<Gatekeeper>,
    pub estimator: Arc<dyn CostEstimator>,
    pub anomalies: Arc<AnomalyCounters>,
    /// `redis` or `memory`.
    pub store_backend: &'static str,
    pub global_admission: bool,
}

impl AppState {
    /// Build the application state, falling back to the in-memory store
    /// when Redis is unreachable and the fallback is allowed.
    pub async fn new(config: &AppConfig) -> Result<Self, StoreError> {
        let (store, conn, store_backend) = match RedisStore::new(config.redis.clone()).await {
            Ok(redis) => {
                let conn = redis.connection();
                let store: Arc<dyn AtomicStore> = Arc::new(redis);
                (store, Some(conn), "redis")
            }
            Err(e) if config.redis.fallback_to_memory => {
                tracing::error!(
                    "Failed to connect to Redis: {}. Using in-memory store; limits are per-process.",
                    e
                );
                let store: Arc<dyn AtomicStore> = Arc::new(InMemoryStore::new());
                (store, None, "memory")
            }
            Err(e) => return Err(e),
        };

        let settings: Arc<dyn SettingsSource> = match (config.settings_source, conn) {
            (SettingsSourceKind::Redis, Some(conn)) => Arc::new(CachedSettings::new(
                RedisSettingsSource::new(conn),
                config.settings_cache_ttl,
            )),
            (SettingsSourceKind::Redis, None) => {
                tracing::warn!("SETTINGS_SOURCE=redis without Redis, reading GUARD_* variables");
                Arc::new(CachedSettings::new(EnvSettingsSource, config.settings_cache_ttl))
            }
            (SettingsSourceKind::Env, _) => {
                Arc::new(CachedSettings::new(EnvSettingsSource, config.settings_cache_ttl))
            }
        };

        let sink = ThrottledAnomalySink::new(config.anomaly_logs_per_minute);
        let anomalies = sink.counters();

        let gate = Gatekeeper::new(
            store,
            settings,
            Arc::new(SystemClock),
            Arc::new(RandomTokenGenerator),
            Arc::new(sink),
        );

        tracing::info!(store = store_backend, "Application state initialized");

        Ok(Self {
            gate: Arc::new(gate),
            estimator: Arc::new(TokenPriceEstimator::new(config.prices)),
            anomalies,
            store_backend,
            global_admission: config.global_admission_enabled,
        })
    }

    /// In-memory state with fixed settings.
    #[cfg(test)]
    pub fn in_memory(settings: bulwark_core::GuardSettings) -> Self {
        use bulwark_core::ports::StaticSettings;

        let sink = ThrottledAnomalySink::default();
        let anomalies = sink.counters();
        let gate = Gatekeeper::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticSettings(settings)),
            Arc::new(SystemClock),
            Arc::new(RandomTokenGenerator),
            Arc::new(sink),
        );

        Self {
            gate: Arc::new(gate),
            estimator: Arc::new(TokenPriceEstimator::default()),
            anomalies,
            store_backend: "memory",
            global_admission: true,
        }
    }
}
