//! # Bulwark Infrastructure
//!
//! Concrete implementations of the ports defined in `bulwark-core`:
//! atomic stores, settings sources, the token-price estimator and
//! anomaly reporting.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory only
//! - `rate-limit` - Anomaly log throttling via governor
//! - `redis` - Redis-backed store and settings source

pub mod anomaly;
pub mod estimator;
pub mod settings;
pub mod store;
pub mod token;

// Re-exports - In-Memory
pub use anomaly::{AnomalyCounters, AnomalyStats};
pub use estimator::{PriceTable, TokenPriceEstimator};
pub use settings::{CachedSettings, EnvSettingsSource};
pub use store::InMemoryStore;
pub use token::RandomTokenGenerator;

#[cfg(feature = "rate-limit")]
pub use anomaly::ThrottledAnomalySink;

// Re-exports - Redis
#[cfg(feature = "redis")]
pub use settings::RedisSettingsSource;
#[cfg(feature = "redis")]
pub use store::{RedisConfig, RedisStore};
